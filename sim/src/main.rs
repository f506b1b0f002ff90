//! UKF ODOM SIM: replay and synthetic data tool for the wheel/IMU odometry filter.
//!
//! This program has three modes:
//!
//! - `run`: Replays a CSV of synchronized IMU, wheel encoder, and command samples through the
//!   unscented Kalman filter and writes the filtered odometry to CSV.
//!
//! - `generate`: Produces such a sensor CSV from a command profile with seeded Gaussian noise, and
//!   optionally the noise-free ground truth.
//!
//! - `config`: Writes the default filter configuration (TOML/JSON/YAML) as a starting point.
//!
//! For the CSV column layout use --help with the specific subcommand.

mod common;

use clap::{Args, Parser, Subcommand};
use common::{ensure_parent_dir, init_logger, validate_input_path};

use anyhow::{Context, Result};
use log::{error, info};
use std::path::{Path, PathBuf};
use ukf_odom::CommandedVelocity;
use ukf_odom::config::FilterConfig;
use ukf_odom::estimator::OdometryEstimator;
use ukf_odom::sim::{SensorRecord, TrajectoryConfig, generate_records, run_filter};

const LONG_ABOUT: &str = "UKF ODOM SIM: replay and synthetic data tool for the wheel/IMU odometry filter.

The filter fuses a gyroscope yaw rate, four wheel angular velocities, and the commanded body velocity
of a four-wheeled base into a planar pose and twist estimate.

Sensor CSV columns:
  time,yaw_rate,yaw_rate_variance,wheel_0,wheel_1,wheel_2,wheel_3,cmd_vx,cmd_vy,cmd_omega

Filtered CSV columns:
  time,x,y,heading,qx,qy,qz,qw,vx,vy,omega,pose_cov_xx,pose_cov_yy,pose_cov_yaw,
  twist_cov_vx,twist_cov_vy,twist_cov_omega";

/// Command line arguments
#[derive(Parser)]
#[command(author, version, about = "Replay and synthetic data tool for the UKF odometry filter.", long_about = LONG_ABOUT)]
struct Cli {
    /// Filter configuration file (TOML/JSON/YAML); defaults are used when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,

    /// Log level (off, error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Log file path (if not specified, logs to stderr)
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

/// Top-level commands
#[derive(Subcommand, Clone, Debug)]
enum Command {
    #[command(
        name = "run",
        about = "Replay a sensor CSV through the filter",
        long_about = "Replay a CSV of synchronized sensor samples through the unscented Kalman filter. The first row only sets the time reference. Rows with non-finite values or a non-increasing timestamp are skipped. The replay stops if the filter diverges."
    )]
    Run(RunArgs),
    #[command(
        name = "generate",
        about = "Generate a synthetic sensor CSV",
        long_about = "Generate a synthetic sensor CSV by integrating a command profile and adding Gaussian noise to the ideal yaw rate and wheel speeds. Without --duration the built-in profile (straight, arc, strafe) is used; with --duration a single constant command is held."
    )]
    Generate(GenerateArgs),
    #[command(name = "config", about = "Write the default filter configuration")]
    CreateConfig(CreateConfigArgs),
}

/// Replay arguments
#[derive(Args, Clone, Debug)]
struct RunArgs {
    /// Input sensor CSV file
    #[arg(short, long, value_parser)]
    input: PathBuf,
    /// Output filtered-state CSV file
    #[arg(short, long, value_parser)]
    output: PathBuf,
}

/// Synthetic data arguments
#[derive(Args, Clone, Debug)]
struct GenerateArgs {
    /// Output sensor CSV file
    #[arg(short, long, value_parser)]
    output: PathBuf,
    /// Optional ground truth CSV file
    #[arg(long)]
    truth: Option<PathBuf>,
    /// Hold a single constant command for this many seconds
    #[arg(long)]
    duration: Option<f64>,
    /// Constant forward velocity (m/s), used with --duration
    #[arg(long, default_value_t = 0.5, requires = "duration")]
    vx: f64,
    /// Constant lateral velocity (m/s), used with --duration
    #[arg(long, default_value_t = 0.0, requires = "duration")]
    vy: f64,
    /// Constant yaw rate (rad/s), used with --duration
    #[arg(long, default_value_t = 0.0, requires = "duration")]
    omega: f64,
    /// Sample rate in Hz
    #[arg(long, default_value_t = 50.0)]
    rate: f64,
    /// Gyroscope noise standard deviation (rad/s)
    #[arg(long, default_value_t = 0.01)]
    yaw_rate_std: f64,
    /// Wheel speed noise standard deviation (rad/s)
    #[arg(long, default_value_t = 0.2)]
    wheel_std: f64,
    /// Seed for the noise generator
    #[arg(long, default_value_t = 42)]
    seed: u64,
}

/// Config template arguments
#[derive(Args, Clone, Debug)]
struct CreateConfigArgs {
    /// Output file; the extension selects the format (.toml/.json/.yaml/.yml)
    #[arg(short, long, default_value = "ukf_odom.toml")]
    output: PathBuf,
}

fn load_config(path: Option<&PathBuf>) -> Result<FilterConfig> {
    let config = match path {
        Some(p) => {
            info!("Loading filter configuration from {}", p.display());
            FilterConfig::from_file(p)
                .with_context(|| format!("cannot read configuration '{}'", p.display()))?
        }
        None => FilterConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

fn build_trajectory(args: &GenerateArgs) -> TrajectoryConfig {
    let base = match args.duration {
        Some(duration) => TrajectoryConfig::constant(
            duration,
            CommandedVelocity::new(args.vx, args.vy, args.omega),
        ),
        None => TrajectoryConfig::default(),
    };
    TrajectoryConfig {
        rate: args.rate,
        yaw_rate_std: args.yaw_rate_std,
        wheel_velocity_std: args.wheel_std,
        seed: args.seed,
        ..base
    }
}

fn run_replay(args: &RunArgs, config: &FilterConfig) -> Result<()> {
    validate_input_path(&args.input)?;
    let records = SensorRecord::from_csv(&args.input)
        .with_context(|| format!("cannot read sensor records from '{}'", args.input.display()))?;
    info!("Read {} records from {}", records.len(), args.input.display());

    let mut estimator = OdometryEstimator::new(config)?;
    let result = match run_filter(&mut estimator, &records) {
        Ok(result) => result,
        Err(e) => {
            error!("Replay of {} aborted: {}", args.input.display(), e);
            return Err(e.into());
        }
    };

    ensure_parent_dir(&args.output)?;
    result
        .to_csv(&args.output)
        .with_context(|| format!("cannot write '{}'", args.output.display()))?;
    info!(
        "Wrote {} filtered states to {}",
        result.states.len(),
        args.output.display()
    );
    Ok(())
}

fn run_generate(args: &GenerateArgs, config: &FilterConfig) -> Result<()> {
    let trajectory = build_trajectory(args);
    let data = generate_records(&trajectory, &config.geometry)?;
    write_records(&data.records, &args.output)?;
    if let Some(truth) = &args.truth {
        ensure_parent_dir(truth)?;
        data.truth_to_csv(truth)
            .with_context(|| format!("cannot write '{}'", truth.display()))?;
        info!("Wrote ground truth to {}", truth.display());
    }
    Ok(())
}

fn write_records(records: &[SensorRecord], output: &Path) -> Result<()> {
    ensure_parent_dir(output)?;
    SensorRecord::to_csv(records, output)
        .with_context(|| format!("cannot write '{}'", output.display()))?;
    info!("Wrote {} sensor records to {}", records.len(), output.display());
    Ok(())
}

fn create_config_file(args: &CreateConfigArgs) -> Result<()> {
    ensure_parent_dir(&args.output)?;
    FilterConfig::default()
        .to_file(&args.output)
        .with_context(|| format!("cannot write '{}'", args.output.display()))?;
    info!("Wrote default configuration to {}", args.output.display());
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logger(&cli.log_level, cli.log_file.as_ref())?;

    match cli.command {
        Some(Command::Run(args)) => {
            let config = load_config(cli.config.as_ref())?;
            info!("Replaying {}", args.input.display());
            run_replay(&args, &config)
        }
        Some(Command::Generate(args)) => {
            let config = load_config(cli.config.as_ref())?;
            run_generate(&args, &config)
        }
        Some(Command::CreateConfig(args)) => create_config_file(&args),
        None => {
            eprintln!("Error: No command provided. Use -h or --help for usage information.");
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use ukf_odom::messages::FilteredRecord;

    #[test]
    fn test_parse_run_with_global_flags() {
        let cli = Cli::try_parse_from([
            "ukf-odom-sim",
            "run",
            "--input",
            "in.csv",
            "--output",
            "out.csv",
            "--log-level",
            "debug",
            "--config",
            "filter.toml",
        ])
        .unwrap();
        assert_eq!(cli.log_level, "debug");
        assert_eq!(cli.config, Some(PathBuf::from("filter.toml")));
        match cli.command {
            Some(Command::Run(args)) => {
                assert_eq!(args.input, PathBuf::from("in.csv"));
                assert_eq!(args.output, PathBuf::from("out.csv"));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_generate_velocity_requires_duration() {
        assert!(Cli::try_parse_from(["ukf-odom-sim", "generate", "-o", "s.csv", "--vx", "1.0"]).is_err());
        assert!(
            Cli::try_parse_from([
                "ukf-odom-sim", "generate", "-o", "s.csv", "--duration", "3", "--vx", "1.0"
            ])
            .is_ok()
        );
    }

    #[test]
    fn test_build_trajectory_constant() {
        let cli = Cli::try_parse_from([
            "ukf-odom-sim", "generate", "-o", "s.csv", "--duration", "3", "--omega", "0.2", "--seed", "9",
        ])
        .unwrap();
        let Some(Command::Generate(args)) = cli.command else {
            panic!("expected generate");
        };
        let trajectory = build_trajectory(&args);
        assert_eq!(trajectory.segments.len(), 1);
        assert_eq!(trajectory.duration(), 3.0);
        assert_eq!(trajectory.segments[0].vx, 0.5);
        assert_eq!(trajectory.segments[0].omega, 0.2);
        assert_eq!(trajectory.seed, 9);
    }

    #[test]
    fn test_build_trajectory_default_profile() {
        let cli = Cli::try_parse_from(["ukf-odom-sim", "generate", "-o", "s.csv"]).unwrap();
        let Some(Command::Generate(args)) = cli.command else {
            panic!("expected generate");
        };
        let trajectory = build_trajectory(&args);
        assert_eq!(trajectory.segments, TrajectoryConfig::default().segments);
    }

    #[test]
    fn test_generate_then_replay() {
        let dir = tempdir().unwrap();
        let sensors = dir.path().join("data").join("sensors.csv");
        let truth = dir.path().join("data").join("truth.csv");
        let filtered = dir.path().join("out").join("filtered.csv");
        let config = FilterConfig::default();

        let generate = GenerateArgs {
            output: sensors.clone(),
            truth: Some(truth.clone()),
            duration: Some(2.0),
            vx: 0.5,
            vy: 0.0,
            omega: 0.1,
            rate: 20.0,
            yaw_rate_std: 0.01,
            wheel_std: 0.1,
            seed: 1,
        };
        run_generate(&generate, &config).unwrap();
        assert!(truth.is_file());

        let run = RunArgs {
            input: sensors,
            output: filtered.clone(),
        };
        run_replay(&run, &config).unwrap();
        let rows = FilteredRecord::from_csv(&filtered).unwrap();
        assert_eq!(rows.len(), 40);
    }

    #[test]
    fn test_generate_rejects_negative_noise() {
        let dir = tempdir().unwrap();
        let sensors = dir.path().join("sensors.csv");
        let cli = Cli::try_parse_from([
            "ukf-odom-sim",
            "generate",
            "-o",
            sensors.to_str().unwrap(),
            "--wheel-std=-0.5",
        ])
        .unwrap();
        let Some(Command::Generate(args)) = cli.command else {
            panic!("expected generate");
        };
        assert!(run_generate(&args, &FilterConfig::default()).is_err());
        assert!(!sensors.exists());
    }

    #[test]
    fn test_create_config_file_roundtrip() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("filter.yaml");
        create_config_file(&CreateConfigArgs {
            output: output.clone(),
        })
        .unwrap();
        let loaded = load_config(Some(&output)).unwrap();
        assert_eq!(loaded.ukf.spread, FilterConfig::default().ukf.spread);
    }

    #[test]
    fn test_replay_missing_input() {
        let dir = tempdir().unwrap();
        let run = RunArgs {
            input: dir.path().join("missing.csv"),
            output: dir.path().join("out.csv"),
        };
        assert!(run_replay(&run, &FilterConfig::default()).is_err());
    }
}
