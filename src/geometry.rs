//! SO(3) / SE(3) helpers
//!
//! Rotations are `nalgebra::Rotation3<f64>`. The exponential map is
//! `Rotation3::new`; the logarithm is computed through the unit quaternion
//! with an `atan2` formulation so it stays accurate for the tiny rotations
//! the Monte Carlo deviations produce.

use nalgebra::{Matrix3, Rotation3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

use crate::types::PoseVector;

const SMALL_ANGLE: f64 = 1e-8;

/// Create a skew-symmetric matrix from a 3D vector: `skew(v) * u == v × u`
pub fn skew_symmetric(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(0.0, -v[2], v[1], v[2], 0.0, -v[0], -v[1], v[0], 0.0)
}

/// Exponential map R^3 -> SO(3)
pub fn so3_exp(rvec: &Vector3<f64>) -> Rotation3<f64> {
    Rotation3::new(*rvec)
}

/// Logarithm map SO(3) -> R^3 (rotation vector, angle in [0, π])
pub fn so3_log(r: &Rotation3<f64>) -> Vector3<f64> {
    let q = UnitQuaternion::from_rotation_matrix(r);
    // q and -q are the same rotation; pick the hemisphere with w >= 0
    let (w, xyz) = if q.w < 0.0 {
        (-q.w, -q.imag())
    } else {
        (q.w, q.imag())
    };

    let norm_xyz = xyz.norm();
    if norm_xyz < SMALL_ANGLE {
        // sin(θ/2) ≈ θ/2
        xyz * (2.0 / w)
    } else {
        let theta = 2.0 * norm_xyz.atan2(w);
        xyz * (theta / norm_xyz)
    }
}

/// Right Jacobian of SO(3)
///
/// Jr(θ) = I - (1 - cos|θ|)/|θ|² [θ]× + (|θ| - sin|θ|)/|θ|³ [θ]×²
pub fn right_jacobian(theta: &Vector3<f64>) -> Matrix3<f64> {
    let angle = theta.norm();
    let w = skew_symmetric(theta);
    if angle < SMALL_ANGLE {
        return Matrix3::identity() - 0.5 * w;
    }
    let angle_sq = angle * angle;
    Matrix3::identity() - ((1.0 - angle.cos()) / angle_sq) * w
        + ((angle - angle.sin()) / (angle_sq * angle)) * w * w
}

/// Left Jacobian of SO(3), used by the coupled SE(3) exponential
fn left_jacobian(theta: &Vector3<f64>) -> Matrix3<f64> {
    right_jacobian(&(-theta))
}

/// Rigid body pose: body-to-navigation rotation and position in navigation frame
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Pose3 {
    pub rotation: Rotation3<f64>,
    pub translation: Vector3<f64>,
}

impl Pose3 {
    pub fn new(rotation: Rotation3<f64>, translation: Vector3<f64>) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    pub fn identity() -> Self {
        Self::new(Rotation3::identity(), Vector3::zeros())
    }

    /// `self * other`
    pub fn compose(&self, other: &Pose3) -> Pose3 {
        Pose3::new(
            self.rotation * other.rotation,
            self.translation + self.rotation * other.translation,
        )
    }

    pub fn inverse(&self) -> Pose3 {
        let r_inv = self.rotation.inverse();
        Pose3::new(r_inv, -(r_inv * self.translation))
    }

    /// SE(3) exponential of a twist ξ = [ω (0:3), v (3:6)]
    ///
    /// Rotation and translation are coupled: t = Jl(ω) v, which makes
    /// `expmap(ξ t)` a screw motion with constant body twist.
    pub fn expmap(xi: &PoseVector) -> Pose3 {
        let omega = xi.fixed_rows::<3>(0).into_owned();
        let v = xi.fixed_rows::<3>(3).into_owned();
        Pose3::new(so3_exp(&omega), left_jacobian(&omega) * v)
    }

    /// Tangent deviation of `other` from `self`
    ///
    /// Rotation part is the right perturbation Log(R_selfᵀ R_other); the
    /// translation part is the plain position difference in navigation frame.
    pub fn local_coordinates(&self, other: &Pose3) -> PoseVector {
        let omega = so3_log(&(self.rotation.inverse() * other.rotation));
        let dt = other.translation - self.translation;
        PoseVector::new(omega.x, omega.y, omega.z, dt.x, dt.y, dt.z)
    }
}

impl Default for Pose3 {
    fn default() -> Self {
        Self::identity()
    }
}
