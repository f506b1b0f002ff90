//! Replay and synthetic data utilities for the odometry filter.
//!
//! This module provides:
//! - A struct ([SensorRecord]) for reading and writing synchronized sensor triples to/from CSV files
//! - [run_filter], which pushes recorded triples through an [OdometryEstimator] one at a time
//! - A synthetic data generator ([generate_records]) driven by a piecewise-constant command profile
//!   with seeded Gaussian sensor noise
//!
//! The replay takes the place of a live message bus: records are assumed to be already time-aligned.

use crate::estimator::OdometryEstimator;
use crate::measurements::RobotGeometry;
use crate::messages::{FilteredState, write_csv};
use crate::{CommandedVelocity, FilterError, ImuSample, WheelSample, forward};

use std::io;
use std::path::Path;

use log::{debug, info};
use nalgebra::Vector6;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

/// One synchronized IMU, wheel encoder, and command triple.
///
/// Column names match the CSV header
/// `time,yaw_rate,yaw_rate_variance,wheel_0,wheel_1,wheel_2,wheel_3,cmd_vx,cmd_vy,cmd_omega`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorRecord {
    /// Sample time in seconds
    pub time: f64,
    /// Gyroscope yaw rate in rad/s
    pub yaw_rate: f64,
    /// Gyroscope yaw rate variance in rad²/s²
    pub yaw_rate_variance: f64,
    pub wheel_0: f64,
    pub wheel_1: f64,
    pub wheel_2: f64,
    pub wheel_3: f64,
    /// Commanded forward velocity in m/s
    pub cmd_vx: f64,
    /// Commanded lateral velocity in m/s
    pub cmd_vy: f64,
    /// Commanded yaw rate in rad/s
    pub cmd_omega: f64,
}
impl SensorRecord {
    /// Reads a CSV file of sensor records.
    ///
    /// # Arguments
    /// * `path` - Path to the CSV file to read.
    ///
    /// # Returns
    /// * `Ok(Vec<SensorRecord>)` if successful.
    /// * `Err` if the file cannot be read or a row cannot be parsed.
    pub fn from_csv<P: AsRef<Path>>(path: P) -> csv::Result<Vec<Self>> {
        let mut rdr = csv::Reader::from_path(path)?;
        let mut records = Vec::new();
        for result in rdr.deserialize() {
            let record: Self = result?;
            records.push(record);
        }
        Ok(records)
    }
    /// Writes sensor records to a CSV file.
    pub fn to_csv<P: AsRef<Path>>(records: &[Self], path: P) -> io::Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        for record in records {
            writer.serialize(record)?;
        }
        writer.flush()?;
        Ok(())
    }
    pub fn imu(&self) -> ImuSample {
        ImuSample::new(self.yaw_rate, self.yaw_rate_variance, self.time)
    }
    pub fn wheels(&self) -> WheelSample {
        WheelSample::new(
            [self.wheel_0, self.wheel_1, self.wheel_2, self.wheel_3],
            self.time,
        )
    }
    pub fn command(&self) -> CommandedVelocity {
        CommandedVelocity::new(self.cmd_vx, self.cmd_vy, self.cmd_omega)
    }
}

/// Output of a replay.
#[derive(Clone, Debug, Default)]
pub struct ReplayResult {
    /// One filtered state per accepted record after the first
    pub states: Vec<FilteredState>,
    /// Number of records rejected as invalid input
    pub rejected: usize,
}
impl ReplayResult {
    /// Writes the filtered states to a CSV file.
    pub fn to_csv<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        write_csv(&self.states, path)
    }
}

/// Replay recorded sensor triples through the estimator in order.
///
/// Records rejected as [FilterError::InvalidInput] are counted and skipped, the way a live node
/// would drop a bad message and wait for the next one. Any other error stops the replay.
///
/// # Errors
/// [FilterError::NumericalDivergence] or [FilterError::Diverged] from the estimator.
pub fn run_filter(
    estimator: &mut OdometryEstimator,
    records: &[SensorRecord],
) -> Result<ReplayResult, FilterError> {
    let mut result = ReplayResult::default();
    for record in records {
        match estimator.process(&record.imu(), &record.wheels(), &record.command()) {
            Ok(Some(state)) => result.states.push(state),
            Ok(None) => {}
            Err(FilterError::InvalidInput(_)) => result.rejected += 1,
            Err(e) => return Err(e),
        }
    }
    info!(
        "replayed {} records: {} estimates, {} rejected",
        records.len(),
        result.states.len(),
        result.rejected
    );
    Ok(result)
}

/// A constant command held for `duration` seconds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandSegment {
    pub duration: f64,
    pub vx: f64,
    pub vy: f64,
    pub omega: f64,
}
impl CommandSegment {
    pub fn new(duration: f64, vx: f64, vy: f64, omega: f64) -> Self {
        CommandSegment {
            duration,
            vx,
            vy,
            omega,
        }
    }
    pub fn command(&self) -> CommandedVelocity {
        CommandedVelocity::new(self.vx, self.vy, self.omega)
    }
}

/// Synthetic trajectory description.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrajectoryConfig {
    /// Sample rate in Hz
    pub rate: f64,
    /// Time of the first sample in seconds
    pub start_time: f64,
    /// Command profile, played back in order
    pub segments: Vec<CommandSegment>,
    /// Standard deviation of the gyroscope noise (rad/s)
    pub yaw_rate_std: f64,
    /// Standard deviation of the wheel speed noise (rad/s)
    pub wheel_velocity_std: f64,
    /// Seed for the noise generator
    pub seed: u64,
}
impl Default for TrajectoryConfig {
    /// Straight run, left arc, then a strafe.
    fn default() -> Self {
        TrajectoryConfig {
            rate: 50.0,
            start_time: 0.0,
            segments: vec![
                CommandSegment::new(2.0, 0.5, 0.0, 0.0),
                CommandSegment::new(3.0, 0.5, 0.0, 0.3),
                CommandSegment::new(2.0, 0.0, 0.3, 0.0),
            ],
            yaw_rate_std: 0.01,
            wheel_velocity_std: 0.2,
            seed: 42,
        }
    }
}
impl TrajectoryConfig {
    /// Total length of the command profile in seconds.
    pub fn duration(&self) -> f64 {
        self.segments.iter().map(|s| s.duration).sum()
    }
    /// Default noise settings with a single constant command held for `duration` seconds.
    pub fn constant(duration: f64, command: CommandedVelocity) -> Self {
        TrajectoryConfig {
            segments: vec![CommandSegment::new(
                duration,
                command.vx,
                command.vy,
                command.omega,
            )],
            ..TrajectoryConfig::default()
        }
    }
    pub fn validate(&self) -> Result<(), FilterError> {
        if !(self.rate > 0.0 && self.rate.is_finite()) {
            return Err(FilterError::InvalidConfig(format!(
                "sample rate must be positive, got {}",
                self.rate
            )));
        }
        if self.segments.is_empty() {
            return Err(FilterError::InvalidConfig(
                "trajectory needs at least one command segment".to_string(),
            ));
        }
        if self
            .segments
            .iter()
            .any(|s| !(s.duration > 0.0 && s.duration.is_finite()) || s.command().validate().is_err())
        {
            return Err(FilterError::InvalidConfig(format!(
                "command segments must have a positive duration and finite velocities: {:?}",
                self.segments
            )));
        }
        if !(self.yaw_rate_std >= 0.0 && self.yaw_rate_std.is_finite())
            || !(self.wheel_velocity_std >= 0.0 && self.wheel_velocity_std.is_finite())
        {
            return Err(FilterError::InvalidConfig(format!(
                "noise standard deviations must be non-negative, got yaw rate {} and wheel {}",
                self.yaw_rate_std, self.wheel_velocity_std
            )));
        }
        Ok(())
    }
    /// Command active at `elapsed` seconds into the profile. The last command holds past the end.
    fn command_at(&self, elapsed: f64) -> CommandedVelocity {
        let mut end = 0.0;
        for segment in &self.segments {
            end += segment.duration;
            if elapsed < end {
                return segment.command();
            }
        }
        self.segments
            .last()
            .map(CommandSegment::command)
            .unwrap_or_default()
    }
}

/// Noise-free pose used as ground truth for a synthetic record.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TruthPose {
    pub time: f64,
    pub x: f64,
    pub y: f64,
    pub heading: f64,
}

/// Generated sensor records with the matching ground truth.
#[derive(Clone, Debug, Default)]
pub struct SyntheticData {
    pub records: Vec<SensorRecord>,
    pub truth: Vec<TruthPose>,
}
impl SyntheticData {
    /// Writes the ground truth poses to a CSV file.
    pub fn truth_to_csv<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        for pose in &self.truth {
            writer.serialize(pose)?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Generate noisy sensor records for a command profile.
///
/// Record `i` carries the command applied over `(t[i-1], t[i]]`, so the truth evolves with the same
/// convention the filter uses: the command of the current triple is integrated over the time since
/// the previous one. Wheel speeds come from rolling without slip through the observation matrix of
/// `geometry`; Gaussian noise is added to the yaw rate and to each wheel independently.
///
/// # Errors
/// [FilterError::InvalidConfig] for an invalid trajectory or geometry.
pub fn generate_records(
    config: &TrajectoryConfig,
    geometry: &RobotGeometry,
) -> Result<SyntheticData, FilterError> {
    config.validate()?;
    geometry.validate()?;
    let yaw_noise = Normal::new(0.0, config.yaw_rate_std)
        .map_err(|e| FilterError::InvalidConfig(format!("yaw rate noise: {}", e)))?;
    let wheel_noise = Normal::new(0.0, config.wheel_velocity_std)
        .map_err(|e| FilterError::InvalidConfig(format!("wheel velocity noise: {}", e)))?;
    let mut rng = StdRng::seed_from_u64(config.seed);

    let dt = 1.0 / config.rate;
    let steps = (config.duration() * config.rate).round() as usize;
    let mut data = SyntheticData::default();
    let mut truth = Vector6::<f64>::zeros();
    for i in 0..=steps {
        let time = config.start_time + i as f64 / config.rate;
        // the first record only sets the time reference; give it the first command
        let command = config.command_at(i.saturating_sub(1) as f64 / config.rate);
        if i > 0 {
            truth = forward(&truth, &command, dt);
        }
        let wheels = geometry.expected_wheel_speeds(&command);
        data.records.push(SensorRecord {
            time,
            yaw_rate: command.omega + yaw_noise.sample(&mut rng),
            yaw_rate_variance: config.yaw_rate_std.powi(2),
            wheel_0: wheels[0] + wheel_noise.sample(&mut rng),
            wheel_1: wheels[1] + wheel_noise.sample(&mut rng),
            wheel_2: wheels[2] + wheel_noise.sample(&mut rng),
            wheel_3: wheels[3] + wheel_noise.sample(&mut rng),
            cmd_vx: command.vx,
            cmd_vy: command.vy,
            cmd_omega: command.omega,
        });
        data.truth.push(TruthPose {
            time,
            x: truth[0],
            y: truth[1],
            heading: truth[2],
        });
    }
    debug!(
        "generated {} records over {:.2} s at {} Hz",
        data.records.len(),
        config.duration(),
        config.rate
    );
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FilterConfig;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn record_to_samples() {
        let record = SensorRecord {
            time: 2.5,
            yaw_rate: 0.1,
            yaw_rate_variance: 0.01,
            wheel_0: 1.0,
            wheel_1: 2.0,
            wheel_2: 3.0,
            wheel_3: 4.0,
            cmd_vx: 0.5,
            cmd_vy: -0.5,
            cmd_omega: 0.2,
        };
        assert_eq!(record.imu(), ImuSample::new(0.1, 0.01, 2.5));
        assert_eq!(record.wheels().velocities, [1.0, 2.0, 3.0, 4.0]);
        assert_eq!(record.wheels().timestamp, 2.5);
        assert_eq!(record.command(), CommandedVelocity::new(0.5, -0.5, 0.2));
    }

    #[test]
    fn sensor_csv_header_and_read_back() {
        let data = generate_records(&TrajectoryConfig::default(), &RobotGeometry::default()).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sensors.csv");
        SensorRecord::to_csv(&data.records, &path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with(
            "time,yaw_rate,yaw_rate_variance,wheel_0,wheel_1,wheel_2,wheel_3,cmd_vx,cmd_vy,cmd_omega"
        ));
        let loaded = SensorRecord::from_csv(&path).unwrap();
        assert_eq!(loaded.len(), data.records.len());
        assert_approx_eq!(loaded[10].wheel_2, data.records[10].wheel_2, 1e-12);
    }

    #[test]
    fn malformed_csv_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.csv");
        std::fs::write(&path, "time,yaw_rate\n0.0,abc\n").unwrap();
        assert!(SensorRecord::from_csv(&path).is_err());
    }

    #[test]
    fn generated_profile_shape() {
        let config = TrajectoryConfig::default();
        let data = generate_records(&config, &RobotGeometry::default()).unwrap();
        assert_eq!(data.records.len(), 7 * 50 + 1);
        assert_eq!(data.truth.len(), data.records.len());
        assert_approx_eq!(data.records.last().unwrap().time, 7.0, 1e-9);
        // straight segment first, arc second, strafe last
        assert_eq!(data.records[10].command(), CommandedVelocity::new(0.5, 0.0, 0.0));
        assert_eq!(data.records[150].command(), CommandedVelocity::new(0.5, 0.0, 0.3));
        assert_eq!(data.records[300].command(), CommandedVelocity::new(0.0, 0.3, 0.0));
        // 2 s straight at 0.5 m/s
        assert_approx_eq!(data.truth[100].x, 1.0, 1e-9);
        // 3 s at 0.3 rad/s
        assert_approx_eq!(data.truth[250].heading, 0.9, 1e-9);
    }

    #[test]
    fn generation_is_seeded() {
        let config = TrajectoryConfig::default();
        let a = generate_records(&config, &RobotGeometry::default()).unwrap();
        let b = generate_records(&config, &RobotGeometry::default()).unwrap();
        assert_eq!(a.records, b.records);
        let other = TrajectoryConfig {
            seed: 7,
            ..TrajectoryConfig::default()
        };
        let c = generate_records(&other, &RobotGeometry::default()).unwrap();
        assert_ne!(a.records[5].wheel_0, c.records[5].wheel_0);
    }

    #[test]
    fn noiseless_generation_matches_observation_model() {
        let geometry = RobotGeometry::default();
        let config = TrajectoryConfig {
            yaw_rate_std: 0.0,
            wheel_velocity_std: 0.0,
            ..TrajectoryConfig::constant(1.0, CommandedVelocity::new(1.0, 0.0, 0.0))
        };
        let data = generate_records(&config, &geometry).unwrap();
        for record in &data.records {
            assert_approx_eq!(record.wheel_0, 1.0 / geometry.wheel_radius, 1e-12);
            assert_eq!(record.yaw_rate, 0.0);
        }
    }

    #[test]
    fn invalid_trajectory_rejected() {
        let config = TrajectoryConfig {
            segments: vec![],
            ..TrajectoryConfig::default()
        };
        assert!(generate_records(&config, &RobotGeometry::default()).is_err());
        let config = TrajectoryConfig {
            yaw_rate_std: -1.0,
            ..TrajectoryConfig::default()
        };
        assert!(matches!(
            generate_records(&config, &RobotGeometry::default()),
            Err(FilterError::InvalidConfig(_))
        ));
        let config = TrajectoryConfig {
            wheel_velocity_std: -0.2,
            ..TrajectoryConfig::default()
        };
        assert!(matches!(config.validate(), Err(FilterError::InvalidConfig(_))));
        let config = TrajectoryConfig {
            wheel_velocity_std: f64::INFINITY,
            ..TrajectoryConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn replay_skips_invalid_records() {
        let mut data =
            generate_records(&TrajectoryConfig::default(), &RobotGeometry::default()).unwrap();
        data.records[20].wheel_1 = f64::NAN;
        // duplicated timestamp
        data.records[40].time = data.records[39].time;
        let mut estimator = OdometryEstimator::new(&FilterConfig::default()).unwrap();
        let result = run_filter(&mut estimator, &data.records).unwrap();
        assert_eq!(result.rejected, 2);
        assert_eq!(result.states.len(), data.records.len() - 1 - 2);
    }

    #[test]
    fn replay_stops_on_divergence() {
        let data = generate_records(&TrajectoryConfig::default(), &RobotGeometry::default()).unwrap();
        let mut estimator = OdometryEstimator::new(&FilterConfig::default()).unwrap();
        let mut bad = *estimator.state();
        bad.covariance[(0, 0)] = f64::NAN;
        estimator.reset(bad);
        let err = run_filter(&mut estimator, &data.records).unwrap_err();
        assert!(err.is_divergence());
        assert!(estimator.is_diverged());
    }
}
