//! Filter configuration and its file formats.
//!
//! A [FilterConfig] bundles the fixed robot geometry with the unscented filter tuning. It can be
//! stored as JSON, YAML, or TOML; [FilterConfig::from_file] and [FilterConfig::to_file] pick the
//! format from the file extension. Missing fields fall back to their defaults, so a partial file such
//! as
//!
//! ```toml
//! [geometry]
//! wheel_radius = 0.08
//!
//! [ukf]
//! spread = "canonical"
//! ```
//!
//! is a valid configuration.

use crate::FilterError;
use crate::kalman::UkfParameters;
use crate::measurements::RobotGeometry;

use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Complete configuration of an odometry estimator.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub geometry: RobotGeometry,
    pub ukf: UkfParameters,
}

impl FilterConfig {
    /// Check that the geometry and filter parameters can build a filter.
    pub fn validate(&self) -> Result<(), FilterError> {
        self.geometry.validate()?;
        self.ukf.validate()
    }
    /// Write the configuration, choosing the format by file extension (.json/.yaml/.yml/.toml).
    ///
    /// JSON output is pretty-printed.
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let path = path.as_ref();
        let text = match ConfigFormat::from_path(path)? {
            ConfigFormat::Json => serde_json::to_string_pretty(self).map_err(io::Error::other)?,
            ConfigFormat::Yaml => serde_yaml::to_string(self).map_err(io::Error::other)?,
            ConfigFormat::Toml => toml::to_string(self).map_err(io::Error::other)?,
        };
        fs::write(path, text)
    }
    /// Read a configuration, choosing the format by file extension (.json/.yaml/.yml/.toml).
    pub fn from_file<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref();
        let format = ConfigFormat::from_path(path)?;
        let text = fs::read_to_string(path)?;
        match format {
            ConfigFormat::Json => serde_json::from_str(&text).map_err(io::Error::other),
            ConfigFormat::Yaml => serde_yaml::from_str(&text).map_err(io::Error::other),
            ConfigFormat::Toml => toml::from_str(&text).map_err(io::Error::other),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ConfigFormat {
    Json,
    Yaml,
    Toml,
}
impl ConfigFormat {
    fn from_path(path: &Path) -> io::Result<Self> {
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .map(|s| s.to_lowercase());
        match ext.as_deref() {
            Some("json") => Ok(ConfigFormat::Json),
            Some("yaml") | Some("yml") => Ok(ConfigFormat::Yaml),
            Some("toml") => Ok(ConfigFormat::Toml),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("unsupported config file extension: {}", path.display()),
            )),
        }
    }
}
