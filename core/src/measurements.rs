//! Measurement-related code for the odometry filter.
//!
//! This module defines the fixed robot geometry, the linear observation matrix derived from it,
//! and the combined yaw-rate plus wheel-speed measurement consumed by the update step.

use crate::{
    CommandedVelocity, FilterError, ImuSample, MEASUREMENT_DIMENSION, STATE_DIMENSION, WHEEL_COUNT,
    WheelSample,
};

use std::fmt::{self, Display};

use nalgebra::{Matrix5, SMatrix, Vector5, Vector6};
use serde::{Deserialize, Serialize};

/// Observation matrix type mapping the 6-state vector to the 5-element measurement
pub type ObservationMatrix = SMatrix<f64, MEASUREMENT_DIMENSION, STATE_DIMENSION>;

/// Default wheel velocity variance (rad²/s²) used for every wheel channel
pub const DEFAULT_WHEEL_VELOCITY_VARIANCE: f64 = 3.0;

/// Fixed geometry of the four-wheeled base.
///
/// The values are supplied once at construction and are never mutated while the filter runs.
/// Defaults describe the stock four-wheeled base.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RobotGeometry {
    /// Wheel radius in meters
    pub wheel_radius: f64,
    /// Distance between the front and rear wheel pairs in meters
    pub wheel_pair_separation: f64,
    /// Distance between the left and right wheels in meters
    pub wheel_separation: f64,
    /// Width of a single wheel in meters
    pub wheel_width: f64,
}
impl Default for RobotGeometry {
    fn default() -> Self {
        RobotGeometry {
            wheel_radius: 0.0762,
            wheel_pair_separation: 0.488,
            wheel_separation: 0.44715,
            wheel_width: 0.05,
        }
    }
}
impl RobotGeometry {
    pub fn validate(&self) -> Result<(), FilterError> {
        let fields = [
            ("wheel_radius", self.wheel_radius),
            ("wheel_pair_separation", self.wheel_pair_separation),
            ("wheel_separation", self.wheel_separation),
            ("wheel_width", self.wheel_width),
        ];
        for (name, value) in fields {
            if !value.is_finite() || value <= 0.0 {
                return Err(FilterError::InvalidConfig(format!(
                    "{} must be positive, got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }
    /// Geometric factor converting yaw rate into wheel angular velocity for a roller wheel.
    ///
    /// With `b = ½(wheel_separation + wheel_width)` and `a = ½(wheel_radius + wheel_pair_separation)`
    /// the factor is `(a + b) / wheel_radius`.
    pub fn roller_wheel_effect(&self) -> f64 {
        let b = 0.5 * (self.wheel_separation + self.wheel_width);
        let a = 0.5 * (self.wheel_radius + self.wheel_pair_separation);
        (a + b) / self.wheel_radius
    }
    /// Build the constant 5×6 observation matrix.
    ///
    /// Row 0 reads the yaw rate state directly (gyroscope). Rows 1..=4 are the wheel speeds:
    ///
    /// ```text
    /// w0 = ( vx - vy) / r - k ω
    /// w1 = ( vx + vy) / r + k ω
    /// w2 = ( vx + vy) / r - k ω
    /// w3 = ( vx - vy) / r + k ω
    /// ```
    ///
    /// where `r` is the wheel radius and `k` the [roller wheel effect](Self::roller_wheel_effect).
    /// Position and heading columns are zero.
    pub fn observation_matrix(&self) -> ObservationMatrix {
        let inv_r = 1.0 / self.wheel_radius;
        let k = self.roller_wheel_effect();
        let mut c = ObservationMatrix::zeros();
        c[(0, 5)] = 1.0;
        let signs: [(f64, f64); WHEEL_COUNT] = [(-1.0, -1.0), (1.0, 1.0), (1.0, -1.0), (-1.0, 1.0)];
        for (wheel, (vy_sign, omega_sign)) in signs.iter().enumerate() {
            let row = wheel + 1;
            c[(row, 3)] = inv_r;
            c[(row, 4)] = vy_sign * inv_r;
            c[(row, 5)] = omega_sign * k;
        }
        c
    }
    /// Wheel angular velocities produced by rolling without slip at the given body velocity.
    pub fn expected_wheel_speeds(&self, command: &CommandedVelocity) -> [f64; WHEEL_COUNT] {
        let state = Vector6::new(0.0, 0.0, 0.0, command.vx, command.vy, command.omega);
        let z = self.observation_matrix() * state;
        [z[1], z[2], z[3], z[4]]
    }
}

/// Combined gyroscope and wheel-speed measurement for one filter step.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct OdometryMeasurement {
    /// Gyroscope yaw rate in rad/s
    pub yaw_rate: f64,
    /// Variance of the yaw rate in rad²/s²
    pub yaw_rate_variance: f64,
    /// Wheel angular velocities `[w0, w1, w2, w3]` in rad/s
    pub wheel_velocities: [f64; WHEEL_COUNT],
    /// Variance applied to every wheel channel in rad²/s²
    pub wheel_velocity_variance: f64,
}
impl OdometryMeasurement {
    pub fn new(imu: &ImuSample, wheels: &WheelSample, wheel_velocity_variance: f64) -> Self {
        OdometryMeasurement {
            yaw_rate: imu.yaw_rate,
            yaw_rate_variance: imu.yaw_rate_variance,
            wheel_velocities: wheels.velocities,
            wheel_velocity_variance,
        }
    }
    pub fn validate(&self) -> Result<(), FilterError> {
        if !self.get_vector().iter().all(|v| v.is_finite()) {
            return Err(FilterError::InvalidInput(format!(
                "measurement is not finite: {}",
                self
            )));
        }
        if !(self.yaw_rate_variance >= 0.0 && self.yaw_rate_variance.is_finite())
            || !(self.wheel_velocity_variance >= 0.0 && self.wheel_velocity_variance.is_finite())
        {
            return Err(FilterError::InvalidInput(format!(
                "measurement variances must be finite and non-negative: {}",
                self
            )));
        }
        Ok(())
    }
    /// Measurement vector `z = [yaw_rate, w0, w1, w2, w3]`
    pub fn get_vector(&self) -> Vector5<f64> {
        Vector5::new(
            self.yaw_rate,
            self.wheel_velocities[0],
            self.wheel_velocities[1],
            self.wheel_velocities[2],
            self.wheel_velocities[3],
        )
    }
    /// Diagonal measurement covariance `R`
    pub fn get_noise(&self) -> Matrix5<f64> {
        let w = self.wheel_velocity_variance;
        Matrix5::from_diagonal(&Vector5::new(self.yaw_rate_variance, w, w, w, w))
    }
}
impl Display for OdometryMeasurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "OdometryMeasurement(yaw_rate: {}, yaw_var: {}, wheels: {:?}, wheel_var: {})",
            self.yaw_rate, self.yaw_rate_variance, self.wheel_velocities, self.wheel_velocity_variance
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn default_geometry_is_valid() {
        assert!(RobotGeometry::default().validate().is_ok());
    }

    #[test]
    fn invalid_geometry_rejected() {
        let geometry = RobotGeometry {
            wheel_radius: 0.0,
            ..RobotGeometry::default()
        };
        assert!(matches!(
            geometry.validate(),
            Err(FilterError::InvalidConfig(_))
        ));
    }

    #[test]
    fn roller_wheel_effect_matches_geometry() {
        let g = RobotGeometry::default();
        let b = 0.5 * (0.44715 + 0.05);
        let a = 0.5 * (0.0762 + 0.488);
        assert_approx_eq!(g.roller_wheel_effect(), (a + b) / 0.0762, 1e-12);
    }

    #[test]
    fn observation_matrix_layout() {
        let g = RobotGeometry::default();
        let c = g.observation_matrix();
        let inv_r = 1.0 / g.wheel_radius;
        let k = g.roller_wheel_effect();
        // yaw rate row
        assert_eq!(c.row(0).iter().cloned().collect::<Vec<_>>(), vec![0.0, 0.0, 0.0, 0.0, 0.0, 1.0]);
        // position and heading never observed
        for row in 0..5 {
            for col in 0..3 {
                assert_eq!(c[(row, col)], 0.0);
            }
        }
        assert_approx_eq!(c[(1, 3)], inv_r, 1e-12);
        assert_approx_eq!(c[(1, 4)], -inv_r, 1e-12);
        assert_approx_eq!(c[(1, 5)], -k, 1e-12);
        assert_approx_eq!(c[(2, 4)], inv_r, 1e-12);
        assert_approx_eq!(c[(2, 5)], k, 1e-12);
        assert_approx_eq!(c[(3, 4)], inv_r, 1e-12);
        assert_approx_eq!(c[(3, 5)], -k, 1e-12);
        assert_approx_eq!(c[(4, 4)], -inv_r, 1e-12);
        assert_approx_eq!(c[(4, 5)], k, 1e-12);
    }

    #[test]
    fn straight_line_wheel_speeds() {
        let g = RobotGeometry::default();
        let speeds = g.expected_wheel_speeds(&CommandedVelocity::new(1.0, 0.0, 0.0));
        for w in speeds {
            assert_approx_eq!(w, 1.0 / g.wheel_radius, 1e-12);
        }
    }

    #[test]
    fn measurement_vector_and_noise() {
        let imu = ImuSample::new(0.2, 0.01, 1.0);
        let wheels = WheelSample::new([1.0, 2.0, 3.0, 4.0], 1.0);
        let meas = OdometryMeasurement::new(&imu, &wheels, DEFAULT_WHEEL_VELOCITY_VARIANCE);
        let z = meas.get_vector();
        assert_eq!(z, Vector5::new(0.2, 1.0, 2.0, 3.0, 4.0));
        let r = meas.get_noise();
        assert_eq!(r[(0, 0)], 0.01);
        for i in 1..5 {
            assert_eq!(r[(i, i)], 3.0);
        }
        assert_eq!(r[(0, 1)], 0.0);
        assert!(meas.validate().is_ok());
    }

    #[test]
    fn measurement_rejects_nan() {
        let meas = OdometryMeasurement {
            yaw_rate: f64::NAN,
            ..OdometryMeasurement::default()
        };
        assert!(meas.validate().is_err());
    }
}
