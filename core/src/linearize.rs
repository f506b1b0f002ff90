//! Jacobian and linearized prediction for diagnostics
//!
//! The unscented prediction in [crate::kalman] never uses these. They exist so that the unscented
//! predicted moments can be compared against a first-order (EKF style) propagation of the same prior.
//!
//! # State Ordering
//!
//! ```text
//! x = [x, y, θ, vx, vy, ω]
//! ```
//!
//! # Jacobian
//!
//! The Jacobian is taken of the constant-velocity kinematics, i.e. with the velocity states
//! carried forward rather than overwritten by the command:
//!
//! ```text
//!     | 1  0  -(vx sθ + vy cθ) dt   cθ dt  -sθ dt   0  |
//!     | 0  1   (vx cθ - vy sθ) dt   sθ dt   cθ dt   0  |
//! G = | 0  0          1               0       0     dt |
//!     | 0  0          0               1       0     0  |
//!     | 0  0          0               0       1     0  |
//!     | 0  0          0               0       0     1  |
//! ```
//!
//! where `vx`, `vy` are the commanded velocities and `θ` the heading of the linearization point.

use crate::{CommandedVelocity, FilterState, forward};
use nalgebra::Matrix6;

/// Motion model Jacobian `G` evaluated at `state`.
///
/// # Arguments
/// * `state` - linearization point
/// * `command` - commanded body-frame velocity
/// * `dt` - time step in seconds
pub fn motion_jacobian(state: &FilterState, command: &CommandedVelocity, dt: f64) -> Matrix6<f64> {
    let (sin_theta, cos_theta) = state.heading().sin_cos();
    let mut g = Matrix6::<f64>::identity();
    g[(0, 2)] = -(command.vx * sin_theta + command.vy * cos_theta) * dt;
    g[(0, 3)] = cos_theta * dt;
    g[(0, 4)] = -sin_theta * dt;
    g[(1, 2)] = (command.vx * cos_theta - command.vy * sin_theta) * dt;
    g[(1, 3)] = sin_theta * dt;
    g[(1, 4)] = cos_theta * dt;
    g[(2, 5)] = dt;
    g
}

/// First-order prediction: the mean goes through [forward] and the covariance becomes `G P Gᵀ`.
pub fn linearized_predict(state: &FilterState, command: &CommandedVelocity, dt: f64) -> FilterState {
    let g = motion_jacobian(state, command, dt);
    FilterState::new(
        forward(&state.mean, command, dt),
        g * state.covariance * g.transpose(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::is_symmetric;
    use assert_approx_eq::assert_approx_eq;
    use nalgebra::Vector6;

    #[test]
    fn jacobian_zero_dt_is_identity() {
        let state = FilterState::new(Vector6::new(1.0, 2.0, 0.7, 0.0, 0.0, 0.0), Matrix6::identity());
        let g = motion_jacobian(&state, &CommandedVelocity::new(1.0, 0.5, 0.1), 0.0);
        assert_eq!(g, Matrix6::identity());
    }

    #[test]
    fn jacobian_heading_column_matches_finite_difference() {
        let state = FilterState::new(Vector6::new(0.0, 0.0, 0.4, 0.0, 0.0, 0.0), Matrix6::identity());
        let cmd = CommandedVelocity::new(0.8, -0.3, 0.2);
        let dt = 0.1;
        let g = motion_jacobian(&state, &cmd, dt);
        let h = 1e-6;
        let mut plus = state.mean;
        plus[2] += h;
        let mut minus = state.mean;
        minus[2] -= h;
        let diff = (forward(&plus, &cmd, dt) - forward(&minus, &cmd, dt)) / (2.0 * h);
        assert_approx_eq!(g[(0, 2)], diff[0], 1e-8);
        assert_approx_eq!(g[(1, 2)], diff[1], 1e-8);
        assert_approx_eq!(g[(2, 2)], diff[2], 1e-8);
    }

    #[test]
    fn linearized_predict_grows_position_uncertainty() {
        let state = FilterState::default();
        let predicted = linearized_predict(&state, &CommandedVelocity::new(1.0, 0.0, 0.0), 0.1);
        assert_approx_eq!(predicted.x(), 0.1, 1e-12);
        assert!(predicted.covariance[(1, 1)] > state.covariance[(1, 1)]);
        assert!(is_symmetric(&predicted.covariance, 1e-12));
    }
}
