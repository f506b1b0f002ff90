//! Unscented Kalman filter odometry for wheeled mobile robots
//!
//! This crate estimates the planar pose and body-frame velocity of a four-wheeled (mecanum style) mobile robot by
//! fusing three synchronized sensor streams: a gyroscope yaw rate, the four wheel angular velocities, and the
//! commanded velocity sent to the base controller. The estimate is produced by an Unscented Kalman Filter (UKF)
//! whose prediction step pushes sigma points through a nonlinear body-frame kinematic model and whose update step
//! is a linear Kalman correction through an observation matrix derived from the robot geometry.
//!
//! This crate is primarily built off of:
//! - [`nalgebra`](https://crates.io/crates/nalgebra): fixed-size linear algebra for every filter quantity.
//! - [`serde`](https://crates.io/crates/serde) and [`csv`](https://crates.io/crates/csv): configuration and data I/O.
//! - [`rand`](https://crates.io/crates/rand) and [`rand_distr`](https://crates.io/crates/rand_distr): noise for synthetic data.
//!
//! The transport layer that receives and time-aligns live sensor streams is not part of this crate. Callers hand
//! synchronized sample triples to [estimator::OdometryEstimator] and receive [messages::FilteredState] messages
//! back. The [sim] module provides a file based replay of recorded triples in place of a live bus.
//!
//! ## Crate overview
//!
//! - [error]: Error types shared by every module.
//! - [estimator]: The per-step pipeline: time delta, filter step, state commit, output projection.
//! - [kalman]: Sigma points, recombination, the linear measurement update, and the filter struct.
//! - [linalg]: Fixed-size linear algebra helpers (Cholesky factor, SPD solve, checks).
//! - [linearize]: Motion model Jacobian used for a diagnostic linearized prediction.
//! - [measurements]: Robot geometry, observation matrix, and the odometry measurement.
//! - [messages]: The filtered-state output message and its CSV form.
//! - [config]: Filter configuration and its JSON/YAML/TOML file formats.
//! - [sim]: Sensor record CSV I/O, replay through the estimator, and synthetic data generation.
//!
//! ## State definition
//!
//! $$
//! x = [p_x, p_y, \theta, v_x, v_y, \omega]
//! $$
//!
//! Where:
//! - $p_x$, $p_y$ are the position of the robot in the odometry frame (meters).
//! - $\theta$ is the heading of the robot in the odometry frame (radians, not wrapped).
//! - $v_x$, $v_y$ are the body-frame linear velocities (m/s).
//! - $\omega$ is the yaw rate (rad/s).
//!
//! ### Motion model
//!
//! The body-frame velocities are rotated into the odometry frame and integrated over one time step. The velocity
//! states are overwritten by the commanded velocity:
//!
//! $$
//! \begin{aligned}
//! p_x(+) &= p_x(-) + (v_x \cos\theta - v_y \sin\theta) t \\\\
//! p_y(+) &= p_y(-) + (v_y \cos\theta + v_x \sin\theta) t \\\\
//! \theta(+) &= \theta(-) + \omega t
//! \end{aligned}
//! $$
//!
//! ### Measurement model
//!
//! The measurement vector is $z = [\omega_{imu}, w_0, w_1, w_2, w_3]$ and is related to the state through the
//! constant observation matrix $C$ built in [measurements::RobotGeometry::observation_matrix].
pub mod config;
pub mod error;
pub mod estimator;
pub mod kalman;
pub mod linalg;
pub mod linearize;
pub mod measurements;
pub mod messages;
pub mod sim;

use nalgebra::{Matrix6, Vector3, Vector6};

use std::fmt::{self, Debug, Display};

pub use crate::error::{FilterError, FilterStage};

/// Number of filter states: `[x, y, θ, vx, vy, ω]`
pub const STATE_DIMENSION: usize = 6;
/// Number of measurement channels: one yaw rate plus four wheel speeds
pub const MEASUREMENT_DIMENSION: usize = 5;
/// Number of sigma points, `2n + 1`
pub const SIGMA_POINT_COUNT: usize = 2 * STATE_DIMENSION + 1;
/// Number of wheels on the platform
pub const WHEEL_COUNT: usize = 4;

/// Generic Bayesian filter trait providing the predict/update interface.
///
/// Unlike a plain Kalman filter these operations can fail: a covariance that is no longer
/// positive-definite or a singular innovation covariance is reported as
/// [FilterError::NumericalDivergence]. On error the filter state is left unchanged.
pub trait NavigationFilter {
    /// Control input used to propagate the state
    type Input;
    /// Measurement used to correct the state
    type Measurement;
    fn predict(&mut self, control_input: &Self::Input, dt: f64) -> Result<(), FilterError>;
    fn update(&mut self, measurement: &Self::Measurement) -> Result<(), FilterError>;
    fn get_estimate(&self) -> Vector6<f64>;
    fn get_certainty(&self) -> Matrix6<f64>;
}

/// A single gyroscope sample. Only the yaw (z) axis rate is used by the filter.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ImuSample {
    /// Yaw rate in rad/s
    pub yaw_rate: f64,
    /// Variance of the yaw rate in rad²/s²
    pub yaw_rate_variance: f64,
    /// Sample time in seconds
    pub timestamp: f64,
}
impl ImuSample {
    pub fn new(yaw_rate: f64, yaw_rate_variance: f64, timestamp: f64) -> Self {
        ImuSample {
            yaw_rate,
            yaw_rate_variance,
            timestamp,
        }
    }
    /// Reject non-finite values and negative variances.
    pub fn validate(&self) -> Result<(), FilterError> {
        if !self.yaw_rate.is_finite() || !self.timestamp.is_finite() {
            return Err(FilterError::InvalidInput(format!(
                "IMU sample is not finite: {}",
                self
            )));
        }
        if !self.yaw_rate_variance.is_finite() || self.yaw_rate_variance < 0.0 {
            return Err(FilterError::InvalidInput(format!(
                "IMU yaw rate variance must be finite and non-negative, got {}",
                self.yaw_rate_variance
            )));
        }
        Ok(())
    }
}
impl Display for ImuSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ImuSample {{ t: {:.4}, yaw_rate: {:.4}, variance: {:.6} }}",
            self.timestamp, self.yaw_rate, self.yaw_rate_variance
        )
    }
}

/// Wheel angular velocities in the fixed order `[w0, w1, w2, w3]` used by the observation matrix.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct WheelSample {
    /// Wheel angular velocities in rad/s
    pub velocities: [f64; WHEEL_COUNT],
    /// Sample time in seconds
    pub timestamp: f64,
}
impl WheelSample {
    pub fn new(velocities: [f64; WHEEL_COUNT], timestamp: f64) -> Self {
        WheelSample {
            velocities,
            timestamp,
        }
    }
    /// Build a sample from a joint-state style velocity list.
    ///
    /// The list must contain exactly [WHEEL_COUNT] entries, otherwise the sample is rejected.
    ///
    /// # Example
    /// ```rust
    /// use ukf_odom::WheelSample;
    /// let sample = WheelSample::from_slice(&[1.0, 1.0, 1.0, 1.0], 0.5).unwrap();
    /// assert_eq!(sample.velocities[3], 1.0);
    /// assert!(WheelSample::from_slice(&[1.0, 1.0], 0.5).is_err());
    /// ```
    pub fn from_slice(velocities: &[f64], timestamp: f64) -> Result<Self, FilterError> {
        let velocities: [f64; WHEEL_COUNT] = velocities.try_into().map_err(|_| {
            FilterError::InvalidInput(format!(
                "expected {} wheel velocities, got {}",
                WHEEL_COUNT,
                velocities.len()
            ))
        })?;
        Ok(WheelSample {
            velocities,
            timestamp,
        })
    }
    pub fn validate(&self) -> Result<(), FilterError> {
        if self.velocities.iter().all(|w| w.is_finite()) && self.timestamp.is_finite() {
            Ok(())
        } else {
            Err(FilterError::InvalidInput(format!(
                "wheel sample is not finite: {:?}",
                self.velocities
            )))
        }
    }
}

/// Commanded body-frame velocity sent to the base controller.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct CommandedVelocity {
    /// Forward velocity in m/s
    pub vx: f64,
    /// Lateral (strafe) velocity in m/s
    pub vy: f64,
    /// Yaw rate in rad/s
    pub omega: f64,
}
impl CommandedVelocity {
    pub fn new(vx: f64, vy: f64, omega: f64) -> Self {
        CommandedVelocity { vx, vy, omega }
    }
    pub fn validate(&self) -> Result<(), FilterError> {
        if self.vx.is_finite() && self.vy.is_finite() && self.omega.is_finite() {
            Ok(())
        } else {
            Err(FilterError::InvalidInput(format!(
                "commanded velocity is not finite: {}",
                self
            )))
        }
    }
}
impl Display for CommandedVelocity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CommandedVelocity {{ vx: {:.4}, vy: {:.4}, omega: {:.4} }}",
            self.vx, self.vy, self.omega
        )
    }
}
impl From<Vector3<f64>> for CommandedVelocity {
    fn from(v: Vector3<f64>) -> Self {
        CommandedVelocity::new(v[0], v[1], v[2])
    }
}
impl From<CommandedVelocity> for Vector3<f64> {
    fn from(cmd: CommandedVelocity) -> Self {
        Vector3::new(cmd.vx, cmd.vy, cmd.omega)
    }
}

/// Mean and covariance of the filter, always handled as a pair.
///
/// The state is replaced as a whole by the filter step; it is never mutated in place by
/// the intermediate stages.
#[derive(Clone, Copy, PartialEq)]
pub struct FilterState {
    /// `[x, y, θ, vx, vy, ω]`
    pub mean: Vector6<f64>,
    /// 6×6 symmetric positive-definite covariance
    pub covariance: Matrix6<f64>,
}
impl FilterState {
    pub fn new(mean: Vector6<f64>, covariance: Matrix6<f64>) -> Self {
        FilterState { mean, covariance }
    }
    /// Zero state with an isotropic covariance `scale · I`.
    pub fn with_isotropic_covariance(scale: f64) -> Self {
        FilterState {
            mean: Vector6::zeros(),
            covariance: Matrix6::identity() * scale,
        }
    }
    pub fn x(&self) -> f64 {
        self.mean[0]
    }
    pub fn y(&self) -> f64 {
        self.mean[1]
    }
    pub fn heading(&self) -> f64 {
        self.mean[2]
    }
    pub fn vx(&self) -> f64 {
        self.mean[3]
    }
    pub fn vy(&self) -> f64 {
        self.mean[4]
    }
    pub fn omega(&self) -> f64 {
        self.mean[5]
    }
}
impl Default for FilterState {
    /// `x = 0`, `P = 0.1·I`
    fn default() -> Self {
        FilterState::with_isotropic_covariance(0.1)
    }
}
impl Debug for FilterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterState")
            .field("mean", &self.mean.as_slice())
            .field("covariance_diagonal", &self.covariance.diagonal().as_slice())
            .finish()
    }
}
impl Display for FilterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FilterState {{ pos: [{:.4}, {:.4}], heading: {:.4}, vel: [{:.4}, {:.4}], omega: {:.4}, trace(P): {:.6} }}",
            self.x(),
            self.y(),
            self.heading(),
            self.vx(),
            self.vy(),
            self.omega(),
            self.covariance.trace()
        )
    }
}

/// Body-frame kinematic motion model.
///
/// Rotates the commanded body-frame velocity by the heading of `state`, integrates position and
/// heading over `dt`, and overwrites the velocity states with the command. The function is pure: it
/// is evaluated once per sigma point and must give identical results for identical inputs.
///
/// # Arguments
/// * `state` - state vector `[x, y, θ, vx, vy, ω]`
/// * `command` - commanded body-frame velocity
/// * `dt` - time step in seconds
///
/// # Example
/// ```rust
/// use ukf_odom::{CommandedVelocity, forward};
/// use nalgebra::Vector6;
/// let state = Vector6::zeros();
/// let next = forward(&state, &CommandedVelocity::new(1.0, 0.0, 0.0), 0.1);
/// assert!((next[0] - 0.1).abs() < 1e-12);
/// assert_eq!(next[3], 1.0);
/// ```
pub fn forward(state: &Vector6<f64>, command: &CommandedVelocity, dt: f64) -> Vector6<f64> {
    let (sin_theta, cos_theta) = state[2].sin_cos();
    Vector6::new(
        state[0] + (command.vx * cos_theta - command.vy * sin_theta) * dt,
        state[1] + (command.vy * cos_theta + command.vx * sin_theta) * dt,
        state[2] + command.omega * dt,
        command.vx,
        command.vy,
        command.omega,
    )
}
