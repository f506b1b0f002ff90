//! Error types for the odometry filter.

use thiserror::Error;

/// Filter stage at which a numerical failure was detected.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterStage {
    /// Cholesky factorization of the prior covariance
    SigmaPoints,
    /// Weighted recombination of the propagated sigma points
    Recombination,
    /// Innovation covariance inversion and Kalman correction
    Update,
}
impl std::fmt::Display for FilterStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FilterStage::SigmaPoints => "sigma point generation",
            FilterStage::Recombination => "recombination",
            FilterStage::Update => "measurement update",
        };
        write!(f, "{}", name)
    }
}

/// Errors raised by the filter, the estimator pipeline, and configuration loading.
#[derive(Debug, Error)]
pub enum FilterError {
    /// Covariance lost positive-definiteness or the innovation covariance could
    /// not be inverted. Fatal to the filter instance.
    #[error("numerical divergence during {stage}: {detail}")]
    NumericalDivergence {
        /// Stage at which the failure was detected
        stage: FilterStage,
        /// Human readable description of the failure
        detail: String,
    },

    /// The input for a step was rejected; the filter state is unchanged.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A step was requested after the estimator diverged and before it was reset.
    #[error("filter has diverged; reset the state before stepping again")]
    Diverged,

    /// Geometry or filter parameters cannot produce a valid filter.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl FilterError {
    pub(crate) fn divergence(stage: FilterStage, detail: impl Into<String>) -> Self {
        FilterError::NumericalDivergence {
            stage,
            detail: detail.into(),
        }
    }
    /// True for the fatal numerical failure variant.
    pub fn is_divergence(&self) -> bool {
        matches!(self, FilterError::NumericalDivergence { .. })
    }
}
