//! Filtered-state output messages
//!
//! A [FilteredState] is the odometry message produced after every successful filter step. It mirrors
//! a 3D odometry message restricted to the plane: position `(x, y, 0)`, a heading quaternion about the
//! vertical axis, a body-frame twist, and two 6×6 covariances in message order
//! `[x, y, z, roll, pitch, yaw]` stored row-major.
//!
//! Only the planar slots (0, 1, 5) of each covariance are populated; the z, roll, and pitch rows and
//! columns are zero.

use crate::FilterState;

use std::fmt::{self, Display};
use std::io;
use std::path::Path;

use nalgebra::{Matrix4, Rotation3, UnitQuaternion};
use serde::{Deserialize, Serialize};

/// Parent frame of the published odometry
pub const ODOM_FRAME_ID: &str = "odom";
/// Child (robot body) frame of the published odometry
pub const BASE_FRAME_ID: &str = "base_footprint";

/// Message slots of `x`, `y`, and `yaw` in a row-major 6×6 covariance
const PLANAR_SLOTS: [usize; 3] = [0, 1, 5];

/// Planar pose
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Pose2D {
    pub x: f64,
    pub y: f64,
    /// Unwrapped heading in radians
    pub heading: f64,
    /// Heading as a rotation about +z
    pub orientation: UnitQuaternion<f64>,
}

/// Body-frame planar velocity
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Twist2D {
    pub vx: f64,
    pub vy: f64,
    pub omega: f64,
}

/// Filtered odometry output for one step.
#[derive(Clone, Debug, PartialEq)]
pub struct FilteredState {
    /// Timestamp of the IMU sample that triggered the step (s)
    pub timestamp: f64,
    pub frame_id: String,
    pub child_frame_id: String,
    pub pose: Pose2D,
    pub twist: Twist2D,
    /// Row-major 6×6 pose covariance, `(x, y, yaw)` slots populated
    pub pose_covariance: [f64; 36],
    /// Row-major 6×6 twist covariance, `(vx, vy, ωz)` slots populated
    pub twist_covariance: [f64; 36],
}
impl FilteredState {
    /// Project a filter state into an odometry message.
    pub fn from_filter_state(state: &FilterState, timestamp: f64) -> Self {
        FilteredState {
            timestamp,
            frame_id: ODOM_FRAME_ID.to_string(),
            child_frame_id: BASE_FRAME_ID.to_string(),
            pose: Pose2D {
                x: state.x(),
                y: state.y(),
                heading: state.heading(),
                orientation: heading_quaternion(state.heading()),
            },
            twist: Twist2D {
                vx: state.vx(),
                vy: state.vy(),
                omega: state.omega(),
            },
            pose_covariance: planar_covariance(state, 0),
            twist_covariance: planar_covariance(state, 3),
        }
    }
    /// Entry `(row, col)` of the pose covariance
    pub fn pose_covariance_at(&self, row: usize, col: usize) -> f64 {
        self.pose_covariance[row * 6 + col]
    }
    /// Entry `(row, col)` of the twist covariance
    pub fn twist_covariance_at(&self, row: usize, col: usize) -> f64 {
        self.twist_covariance[row * 6 + col]
    }
}
impl Display for FilteredState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FilteredState {{ t: {:.4}, pose: [{:.4}, {:.4}, {:.4}], twist: [{:.4}, {:.4}, {:.4}] }}",
            self.timestamp,
            self.pose.x,
            self.pose.y,
            self.pose.heading,
            self.twist.vx,
            self.twist.vy,
            self.twist.omega
        )
    }
}

/// Quaternion of a planar rotation by `heading`.
///
/// The rotation is written as a homogeneous 4×4 transform and the quaternion is extracted from its
/// rotation block.
pub fn heading_quaternion(heading: f64) -> UnitQuaternion<f64> {
    let (s, c) = heading.sin_cos();
    #[rustfmt::skip]
    let transform = Matrix4::new(
        c,  -s,  0.0, 0.0,
        s,   c,  0.0, 0.0,
        0.0, 0.0, 1.0, 0.0,
        0.0, 0.0, 0.0, 1.0,
    );
    let rotation = Rotation3::from_matrix_unchecked(transform.fixed_view::<3, 3>(0, 0).into_owned());
    UnitQuaternion::from_rotation_matrix(&rotation)
}

/// Copy the 3×3 block of `state.covariance` starting at `offset` into the planar message slots.
fn planar_covariance(state: &FilterState, offset: usize) -> [f64; 36] {
    let mut out = [0.0; 36];
    for (i, &row) in PLANAR_SLOTS.iter().enumerate() {
        for (j, &col) in PLANAR_SLOTS.iter().enumerate() {
            out[row * 6 + col] = state.covariance[(offset + i, offset + j)];
        }
    }
    out
}

/// Flat CSV row of a [FilteredState]
///
/// Columns: `time,x,y,heading,qx,qy,qz,qw,vx,vy,omega,pose_cov_xx,pose_cov_yy,pose_cov_yaw,
/// twist_cov_vx,twist_cov_vy,twist_cov_omega`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FilteredRecord {
    pub time: f64,
    pub x: f64,
    pub y: f64,
    pub heading: f64,
    pub qx: f64,
    pub qy: f64,
    pub qz: f64,
    pub qw: f64,
    pub vx: f64,
    pub vy: f64,
    pub omega: f64,
    pub pose_cov_xx: f64,
    pub pose_cov_yy: f64,
    pub pose_cov_yaw: f64,
    pub twist_cov_vx: f64,
    pub twist_cov_vy: f64,
    pub twist_cov_omega: f64,
}
impl From<&FilteredState> for FilteredRecord {
    fn from(state: &FilteredState) -> Self {
        let q = state.pose.orientation.quaternion();
        FilteredRecord {
            time: state.timestamp,
            x: state.pose.x,
            y: state.pose.y,
            heading: state.pose.heading,
            qx: q.i,
            qy: q.j,
            qz: q.k,
            qw: q.w,
            vx: state.twist.vx,
            vy: state.twist.vy,
            omega: state.twist.omega,
            pose_cov_xx: state.pose_covariance_at(0, 0),
            pose_cov_yy: state.pose_covariance_at(1, 1),
            pose_cov_yaw: state.pose_covariance_at(5, 5),
            twist_cov_vx: state.twist_covariance_at(0, 0),
            twist_cov_vy: state.twist_covariance_at(1, 1),
            twist_cov_omega: state.twist_covariance_at(5, 5),
        }
    }
}
impl FilteredRecord {
    /// Read filtered records back from a CSV file.
    pub fn from_csv<P: AsRef<Path>>(path: P) -> csv::Result<Vec<Self>> {
        let mut rdr = csv::Reader::from_path(path)?;
        rdr.deserialize().collect()
    }
}

/// Write a sequence of filtered states to a CSV file.
///
/// # Arguments
/// * `states` - filtered states in output order
/// * `path` - destination file, overwritten if it exists
pub fn write_csv<P: AsRef<Path>>(states: &[FilteredState], path: P) -> io::Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for state in states {
        writer.serialize(FilteredRecord::from(state))?;
    }
    writer.flush()?;
    Ok(())
}
