//! Per-step odometry pipeline
//!
//! [OdometryEstimator] owns the filter and the time reference. Each call to
//! [OdometryEstimator::process] takes one synchronized sample triple and runs
//! time-delta computation, the unscented prediction, the measurement update, the state commit, and
//! the output projection.
//!
//! The first triple only establishes the time reference and yields `Ok(None)`. A rejected triple
//! ([FilterError::InvalidInput]) leaves the state and the time reference untouched. A numerical
//! divergence latches the estimator: every later call returns [FilterError::Diverged] until
//! [OdometryEstimator::reset] supplies a new state.

use crate::config::FilterConfig;
use crate::kalman::UnscentedKalmanFilter;
use crate::measurements::OdometryMeasurement;
use crate::messages::FilteredState;
use crate::{CommandedVelocity, FilterError, FilterState, ImuSample, WheelSample};

use log::{debug, error, trace, warn};

#[derive(Clone, Debug)]
pub struct OdometryEstimator {
    filter: UnscentedKalmanFilter,
    last_timestamp: Option<f64>,
    diverged: bool,
}

impl OdometryEstimator {
    /// Build an estimator with `x = 0` and `P = initial_covariance · I`.
    pub fn new(config: &FilterConfig) -> Result<Self, FilterError> {
        let initial = FilterState::with_isotropic_covariance(config.ukf.initial_covariance);
        Self::with_state(config, initial)
    }
    /// Build an estimator starting from `state`.
    pub fn with_state(config: &FilterConfig, state: FilterState) -> Result<Self, FilterError> {
        config.validate()?;
        let filter = UnscentedKalmanFilter::with_state(&config.geometry, config.ukf, state)?;
        debug!("odometry estimator created: {:?}", filter);
        Ok(OdometryEstimator {
            filter,
            last_timestamp: None,
            diverged: false,
        })
    }
    /// Run one filter step on a synchronized sample triple.
    ///
    /// The IMU timestamp drives the time step. Returns `Ok(None)` for the first triple after
    /// construction or reset.
    ///
    /// # Errors
    /// * [FilterError::Diverged] if a previous step diverged and no reset happened since.
    /// * [FilterError::InvalidInput] for non-finite samples or a non-positive time step. Nothing is
    ///   modified.
    /// * [FilterError::NumericalDivergence] if the filter diverged on this step. The estimator is
    ///   latched afterwards.
    pub fn process(
        &mut self,
        imu: &ImuSample,
        wheels: &WheelSample,
        command: &CommandedVelocity,
    ) -> Result<Option<FilteredState>, FilterError> {
        if self.diverged {
            return Err(FilterError::Diverged);
        }
        if let Err(e) = validate_triple(imu, wheels, command) {
            warn!("rejecting sample at t = {}: {}", imu.timestamp, e);
            return Err(e);
        }
        let timestamp = imu.timestamp;
        let Some(previous) = self.last_timestamp else {
            debug!("time reference set to {}", timestamp);
            self.last_timestamp = Some(timestamp);
            return Ok(None);
        };
        let dt = timestamp - previous;
        let variance = self.filter.params().wheel_velocity_variance;
        let measurement = OdometryMeasurement::new(imu, wheels, variance);
        match self.filter.step(command, &measurement, dt) {
            Ok(state) => {
                let message = FilteredState::from_filter_state(state, timestamp);
                trace!("t = {:.4}, dt = {:.4}: {}", timestamp, dt, state);
                self.last_timestamp = Some(timestamp);
                Ok(Some(message))
            }
            Err(e) if e.is_divergence() => {
                error!("filter diverged at t = {}: {}", timestamp, e);
                self.diverged = true;
                Err(e)
            }
            Err(e) => {
                warn!("rejecting sample at t = {}: {}", timestamp, e);
                Err(e)
            }
        }
    }
    /// Replace the filter state, clear the divergence latch, and forget the time reference.
    pub fn reset(&mut self, state: FilterState) {
        debug!("estimator reset to {}", state);
        self.filter.set_state(state);
        self.diverged = false;
        self.last_timestamp = None;
    }
    pub fn state(&self) -> &FilterState {
        self.filter.state()
    }
    pub fn filter(&self) -> &UnscentedKalmanFilter {
        &self.filter
    }
    pub fn is_diverged(&self) -> bool {
        self.diverged
    }
    pub fn last_timestamp(&self) -> Option<f64> {
        self.last_timestamp
    }
}

fn validate_triple(
    imu: &ImuSample,
    wheels: &WheelSample,
    command: &CommandedVelocity,
) -> Result<(), FilterError> {
    imu.validate()?;
    wheels.validate()?;
    command.validate()
}
