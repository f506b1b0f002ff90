//! Unscented Kalman filter for wheel/IMU odometry
//!
//! The prediction step is unscented: sigma points drawn from the prior are pushed through the
//! nonlinear motion model [forward](crate::forward) and recombined into a predicted mean and
//! covariance. The measurement model is linear, so the update step is a regular Kalman correction
//! through the constant observation matrix.
//!
//! # Sigma point spread
//!
//! The default spread does not use the textbook scaling:
//!
//! $$
//! \lambda = \lambda_{target} - n, \qquad s = (n - \kappa) + \lambda
//! $$
//!
//! with $\lambda_{target} = 7$ and $\kappa = 3$, giving $\lambda = 1$ and $s = 4$ for the six-state
//! filter. The canonical scaling $s = n + \lambda$ is available through [SpreadFormula::Canonical].
//! The weights are the same in both cases:
//!
//! $$
//! w_0 = \frac{\lambda}{\lambda + n}, \qquad w_i = \frac{1}{2(n + \lambda)}
//! $$
//!
//! # Update
//!
//! $$
//! \begin{aligned}
//! S &= C \bar{P} C^T + R + \epsilon I \\\\
//! K &= \bar{P} C^T S^{-1} \\\\
//! x^+ &= \bar{x} + K (z - C \bar{x}) \\\\
//! P^+ &= (I - K C) \bar{P} + \epsilon I
//! \end{aligned}
//! $$

use crate::linalg::{cholesky_lower, is_finite, spd_solve, symmetrize};
use crate::linearize::linearized_predict;
use crate::measurements::{DEFAULT_WHEEL_VELOCITY_VARIANCE, ObservationMatrix, OdometryMeasurement, RobotGeometry};
use crate::{
    CommandedVelocity, FilterError, FilterStage, FilterState, MEASUREMENT_DIMENSION,
    NavigationFilter, SIGMA_POINT_COUNT, STATE_DIMENSION, forward,
};

use std::fmt::{self, Debug, Display};

use log::trace;
use nalgebra::{Matrix5, Matrix6, SMatrix, SVector, Vector6};
use serde::{Deserialize, Serialize};

/// Sigma points stored one per column
pub type SigmaMatrix = SMatrix<f64, STATE_DIMENSION, SIGMA_POINT_COUNT>;
/// Sigma point weights
pub type SigmaWeights = SVector<f64, SIGMA_POINT_COUNT>;

/// Scaling applied to the Cholesky factor when spreading the sigma points.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpreadFormula {
    /// `(n - κ) + λ`
    #[default]
    Literal,
    /// `n + λ`, the textbook unscented transform scaling
    Canonical,
}

/// Tuning parameters of the unscented filter.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UkfParameters {
    /// Target for `λ + n`; `λ = lambda_target - n`
    pub lambda_target: f64,
    /// Secondary spread constant used by [SpreadFormula::Literal]
    pub kappa: f64,
    /// Which spread scaling to apply to the Cholesky factor
    pub spread: SpreadFormula,
    /// Diagonal regularizer ε added to the innovation and posterior covariances
    pub regularization: f64,
    /// Variance of each wheel velocity channel (rad²/s²)
    pub wheel_velocity_variance: f64,
    /// Initial covariance is `initial_covariance · I`
    pub initial_covariance: f64,
    /// Diagonal additive process noise on the predicted covariance
    pub process_noise: [f64; STATE_DIMENSION],
}
impl Default for UkfParameters {
    fn default() -> Self {
        UkfParameters {
            lambda_target: 7.0,
            kappa: 3.0,
            spread: SpreadFormula::Literal,
            regularization: 1e-6,
            wheel_velocity_variance: DEFAULT_WHEEL_VELOCITY_VARIANCE,
            initial_covariance: 0.1,
            process_noise: [0.0; STATE_DIMENSION],
        }
    }
}
impl UkfParameters {
    pub fn lambda(&self) -> f64 {
        self.lambda_target - STATE_DIMENSION as f64
    }
    /// Factor applied under the square root of the Cholesky factor
    pub fn spread_scale(&self) -> f64 {
        let n = STATE_DIMENSION as f64;
        match self.spread {
            SpreadFormula::Literal => (n - self.kappa) + self.lambda(),
            SpreadFormula::Canonical => n + self.lambda(),
        }
    }
    /// Mean and covariance weights, `λ/(λ+n)` for the central point and `1/(2(n+λ))` otherwise
    pub fn weights(&self) -> (SigmaWeights, SigmaWeights) {
        let n = STATE_DIMENSION as f64;
        let lambda = self.lambda();
        let mut weights_mean = SigmaWeights::from_element(1.0 / (2.0 * (n + lambda)));
        weights_mean[0] = lambda / (lambda + n);
        let weights_cov = weights_mean;
        (weights_mean, weights_cov)
    }
    pub fn process_noise_matrix(&self) -> Matrix6<f64> {
        Matrix6::from_diagonal(&Vector6::from_row_slice(&self.process_noise))
    }
    pub fn validate(&self) -> Result<(), FilterError> {
        let n = STATE_DIMENSION as f64;
        if !self.lambda_target.is_finite() || !self.kappa.is_finite() {
            return Err(FilterError::InvalidConfig(
                "lambda_target and kappa must be finite".to_string(),
            ));
        }
        if (n + self.lambda()).abs() < f64::EPSILON {
            return Err(FilterError::InvalidConfig(
                "n + lambda must be non-zero".to_string(),
            ));
        }
        if self.spread_scale() <= 0.0 {
            return Err(FilterError::InvalidConfig(format!(
                "sigma point spread must be positive, got {}",
                self.spread_scale()
            )));
        }
        // ε keeps P⁺ definite while the predicted velocity block is zero
        if !(self.regularization > 0.0 && self.regularization.is_finite()) {
            return Err(FilterError::InvalidConfig(format!(
                "regularization must be positive, got {}",
                self.regularization
            )));
        }
        if !(self.wheel_velocity_variance >= 0.0 && self.wheel_velocity_variance.is_finite()) {
            return Err(FilterError::InvalidConfig(format!(
                "wheel_velocity_variance must be non-negative, got {}",
                self.wheel_velocity_variance
            )));
        }
        if !(self.initial_covariance > 0.0 && self.initial_covariance.is_finite()) {
            return Err(FilterError::InvalidConfig(format!(
                "initial_covariance must be positive, got {}",
                self.initial_covariance
            )));
        }
        if self.process_noise.iter().any(|q| !(*q >= 0.0 && q.is_finite())) {
            return Err(FilterError::InvalidConfig(format!(
                "process noise must be non-negative, got {:?}",
                self.process_noise
            )));
        }
        Ok(())
    }
}

/// A set of `2n + 1` sigma points with their weights.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SigmaPoints {
    /// One sigma point per column
    pub points: SigmaMatrix,
    pub weights_mean: SigmaWeights,
    pub weights_cov: SigmaWeights,
}
impl SigmaPoints {
    /// Weighted mean `Σ w_mean[i]·χ[i]`
    pub fn weighted_mean(&self) -> Vector6<f64> {
        self.points * self.weights_mean
    }
}

/// Generate the sigma points for a prior `(x, P)`.
///
/// Point 0 is the mean, points `1..=n` add the columns of `sqrt(scale)·chol(P)` and points
/// `n+1..=2n` subtract them.
///
/// # Errors
/// [FilterError::NumericalDivergence] when `P` is not positive-definite.
pub fn sigma_points(state: &FilterState, params: &UkfParameters) -> Result<SigmaPoints, FilterError> {
    let l = cholesky_lower(&state.covariance).ok_or_else(|| {
        FilterError::divergence(
            FilterStage::SigmaPoints,
            format!(
                "covariance is not positive-definite (diagonal {:?})",
                state.covariance.diagonal().as_slice()
            ),
        )
    })?;
    let sqrt_p = params.spread_scale().sqrt() * l;
    let mu = state.mean;
    let mut points = SigmaMatrix::zeros();
    points.set_column(0, &mu);
    for i in 0..STATE_DIMENSION {
        points.set_column(i + 1, &(mu + sqrt_p.column(i)));
        points.set_column(i + 1 + STATE_DIMENSION, &(mu - sqrt_p.column(i)));
    }
    let (weights_mean, weights_cov) = params.weights();
    Ok(SigmaPoints {
        points,
        weights_mean,
        weights_cov,
    })
}

/// Push every sigma point through the motion model with the same command and time step.
pub fn propagate_sigma_points(sigma: &SigmaPoints, command: &CommandedVelocity, dt: f64) -> SigmaPoints {
    let mut propagated = *sigma;
    for (i, column) in sigma.points.column_iter().enumerate() {
        let point = forward(&column.into_owned(), command, dt);
        propagated.points.set_column(i, &point);
    }
    propagated
}

/// Recombine propagated sigma points into a predicted mean and covariance.
///
/// The covariance is accumulated around the recombined mean `x̄` itself and `process_noise` is added
/// to it.
///
/// # Errors
/// [FilterError::NumericalDivergence] when the result is not finite.
pub fn recombine(sigma: &SigmaPoints, process_noise: &Matrix6<f64>) -> Result<FilterState, FilterError> {
    let mu_bar = sigma.weighted_mean();
    let mut p_bar = Matrix6::<f64>::zeros();
    for (i, point) in sigma.points.column_iter().enumerate() {
        let diff = point - mu_bar;
        p_bar += sigma.weights_cov[i] * diff * diff.transpose();
    }
    p_bar += process_noise;
    if !is_finite(&mu_bar) || !is_finite(&p_bar) {
        return Err(FilterError::divergence(
            FilterStage::Recombination,
            "predicted mean or covariance is not finite",
        ));
    }
    Ok(FilterState::new(mu_bar, symmetrize(&p_bar)))
}

/// Innovation covariance `S = C P̄ Cᵀ + R + εI`.
pub fn innovation_covariance(
    predicted: &FilterState,
    measurement: &OdometryMeasurement,
    observation: &ObservationMatrix,
    regularization: f64,
) -> Matrix5<f64> {
    observation * predicted.covariance * observation.transpose()
        + measurement.get_noise()
        + Matrix5::identity() * regularization
}

/// Kalman gain `K = P̄ Cᵀ S⁻¹`.
///
/// Computed as `Kᵀ = S⁻¹ (C P̄)` using the symmetry of `S` and `P̄`.
///
/// # Errors
/// [FilterError::NumericalDivergence] when `S` cannot be inverted.
pub fn kalman_gain(
    predicted: &FilterState,
    measurement: &OdometryMeasurement,
    observation: &ObservationMatrix,
    regularization: f64,
) -> Result<SMatrix<f64, STATE_DIMENSION, MEASUREMENT_DIMENSION>, FilterError> {
    let s = innovation_covariance(predicted, measurement, observation, regularization);
    let c_p = observation * predicted.covariance;
    let kt = spd_solve(&s, &c_p).ok_or_else(|| {
        FilterError::divergence(
            FilterStage::Update,
            "innovation covariance is singular after regularization",
        )
    })?;
    Ok(kt.transpose())
}

/// Linear Kalman correction of a predicted state with a measurement.
///
/// # Errors
/// [FilterError::NumericalDivergence] when `S` is singular or the posterior is not finite.
pub fn innovate(
    predicted: &FilterState,
    measurement: &OdometryMeasurement,
    observation: &ObservationMatrix,
    regularization: f64,
) -> Result<FilterState, FilterError> {
    let k = kalman_gain(predicted, measurement, observation, regularization)?;
    let residual = measurement.get_vector() - observation * predicted.mean;
    let mean = predicted.mean + k * residual;
    let covariance = (Matrix6::identity() - k * observation) * predicted.covariance
        + Matrix6::identity() * regularization;
    if !is_finite(&mean) || !is_finite(&covariance) {
        return Err(FilterError::divergence(
            FilterStage::Update,
            "posterior mean or covariance is not finite",
        ));
    }
    Ok(FilterState::new(mean, symmetrize(&covariance)))
}

/// Unscented Kalman Filter for the six-state odometry problem
#[derive(Clone)]
pub struct UnscentedKalmanFilter {
    state: FilterState,
    params: UkfParameters,
    observation: ObservationMatrix,
    process_noise: Matrix6<f64>,
}
impl Debug for UnscentedKalmanFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UKF")
            .field("state", &self.state)
            .field("lambda", &self.params.lambda())
            .field("spread_scale", &self.params.spread_scale())
            .field("regularization", &self.params.regularization)
            .finish()
    }
}
impl Display for UnscentedKalmanFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnscentedKalmanFilter")
            .field("mean_state", &self.state.mean.as_slice())
            .field("covariance", &self.state.covariance)
            .field("lambda", &self.params.lambda())
            .finish()
    }
}
impl UnscentedKalmanFilter {
    /// Build a filter starting from `x = 0`, `P = initial_covariance · I`.
    pub fn new(geometry: &RobotGeometry, params: UkfParameters) -> Result<Self, FilterError> {
        let initial = FilterState::with_isotropic_covariance(params.initial_covariance);
        Self::with_state(geometry, params, initial)
    }
    /// Build a filter starting from an explicit state.
    pub fn with_state(
        geometry: &RobotGeometry,
        params: UkfParameters,
        state: FilterState,
    ) -> Result<Self, FilterError> {
        geometry.validate()?;
        params.validate()?;
        Ok(UnscentedKalmanFilter {
            state,
            params,
            observation: geometry.observation_matrix(),
            process_noise: params.process_noise_matrix(),
        })
    }
    pub fn state(&self) -> &FilterState {
        &self.state
    }
    /// Replace the filter state, e.g. to recover after divergence.
    pub fn set_state(&mut self, state: FilterState) {
        self.state = state;
    }
    pub fn params(&self) -> &UkfParameters {
        &self.params
    }
    pub fn observation_matrix(&self) -> &ObservationMatrix {
        &self.observation
    }
    pub fn get_sigma_points(&self) -> Result<SigmaPoints, FilterError> {
        sigma_points(&self.state, &self.params)
    }
    /// Unscented prediction of `state` without committing anything.
    pub fn predict_state(
        &self,
        state: &FilterState,
        command: &CommandedVelocity,
        dt: f64,
    ) -> Result<FilterState, FilterError> {
        let sigma = sigma_points(state, &self.params)?;
        let propagated = propagate_sigma_points(&sigma, command, dt);
        let predicted = recombine(&propagated, &self.process_noise)?;
        if log::log_enabled!(log::Level::Trace) {
            let linear = linearized_predict(state, command, dt);
            trace!(
                "unscented vs linearized prediction: |dx| = {:.3e}, trace(P) {:.6} vs {:.6}",
                (predicted.mean - linear.mean).norm(),
                predicted.covariance.trace(),
                linear.covariance.trace()
            );
        }
        Ok(predicted)
    }
    /// Measurement update of `predicted` without committing anything.
    pub fn update_state(
        &self,
        predicted: &FilterState,
        measurement: &OdometryMeasurement,
    ) -> Result<FilterState, FilterError> {
        innovate(
            predicted,
            measurement,
            &self.observation,
            self.params.regularization,
        )
    }
    /// Full predict + update. The state is committed only if both stages succeed.
    pub fn step(
        &mut self,
        command: &CommandedVelocity,
        measurement: &OdometryMeasurement,
        dt: f64,
    ) -> Result<&FilterState, FilterError> {
        check_dt(dt)?;
        command.validate()?;
        measurement.validate()?;
        let predicted = self.predict_state(&self.state, command, dt)?;
        let posterior = self.update_state(&predicted, measurement)?;
        self.state = posterior;
        Ok(&self.state)
    }
}
impl NavigationFilter for UnscentedKalmanFilter {
    type Input = CommandedVelocity;
    type Measurement = OdometryMeasurement;

    fn predict(&mut self, control_input: &CommandedVelocity, dt: f64) -> Result<(), FilterError> {
        check_dt(dt)?;
        control_input.validate()?;
        self.state = self.predict_state(&self.state, control_input, dt)?;
        Ok(())
    }
    fn update(&mut self, measurement: &OdometryMeasurement) -> Result<(), FilterError> {
        measurement.validate()?;
        self.state = self.update_state(&self.state, measurement)?;
        Ok(())
    }
    fn get_estimate(&self) -> Vector6<f64> {
        self.state.mean
    }
    fn get_certainty(&self) -> Matrix6<f64> {
        self.state.covariance
    }
}

fn check_dt(dt: f64) -> Result<(), FilterError> {
    if dt.is_finite() && dt > 0.0 {
        Ok(())
    } else {
        Err(FilterError::InvalidInput(format!(
            "time step must be positive and finite, got {}",
            dt
        )))
    }
}
