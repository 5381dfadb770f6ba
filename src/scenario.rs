//! Ground-truth trajectories
//!
//! A scenario gives exact kinematics at any time t (seconds), so the sensor
//! model can produce noiseless IMU readings without finite differencing.

use nalgebra::{Rotation3, Vector3};

use crate::geometry::{so3_exp, Pose3};
use crate::types::{NavState, PoseVector};

/// Trait for continuous trajectories with analytical derivatives
///
/// Rotations are body-to-navigation (`nRb`), so `rotation(t) * v_b` is a
/// navigation-frame vector.
pub trait Scenario {
    /// Pose of the body in navigation frame at time t
    fn pose(&self, t: f64) -> Pose3;

    /// Angular velocity in body frame (rad/s)
    fn omega_b(&self, t: f64) -> Vector3<f64>;

    /// Velocity in navigation frame (m/s)
    fn velocity_n(&self, t: f64) -> Vector3<f64>;

    /// Acceleration in navigation frame (m/s²), gravity not included
    fn acceleration_n(&self, t: f64) -> Vector3<f64>;

    fn rotation(&self, t: f64) -> Rotation3<f64> {
        self.pose(t).rotation
    }

    fn velocity_b(&self, t: f64) -> Vector3<f64> {
        self.rotation(t).inverse() * self.velocity_n(t)
    }

    fn acceleration_b(&self, t: f64) -> Vector3<f64> {
        self.rotation(t).inverse() * self.acceleration_n(t)
    }

    fn nav_state(&self, t: f64) -> NavState {
        NavState::new(self.pose(t), self.velocity_n(t))
    }
}

/// Screw motion with a constant body twist (ω, v)
///
/// Covers the usual test motions: standing still (zero twist), driving
/// straight (v only) and driving a circle (v and a yaw rate).
#[derive(Clone, Debug)]
pub struct ConstantTwistScenario {
    pub omega_b: Vector3<f64>,
    pub velocity_b: Vector3<f64>,
    pub start: Pose3,
}

impl ConstantTwistScenario {
    pub fn new(omega_b: Vector3<f64>, velocity_b: Vector3<f64>) -> Self {
        Self::with_start(omega_b, velocity_b, Pose3::identity())
    }

    pub fn with_start(omega_b: Vector3<f64>, velocity_b: Vector3<f64>, start: Pose3) -> Self {
        Self {
            omega_b,
            velocity_b,
            start,
        }
    }

    /// Level and not moving
    pub fn stationary() -> Self {
        Self::new(Vector3::zeros(), Vector3::zeros())
    }

    /// Straight line along body x at constant speed
    pub fn forward(speed: f64) -> Self {
        Self::new(Vector3::zeros(), Vector3::new(speed, 0.0, 0.0))
    }

    /// Horizontal circle of given radius, counter-clockwise seen from above
    pub fn circle(radius: f64, speed: f64) -> Self {
        Self::new(
            Vector3::new(0.0, 0.0, speed / radius),
            Vector3::new(speed, 0.0, 0.0),
        )
    }

    fn twist(&self) -> PoseVector {
        let (w, v) = (&self.omega_b, &self.velocity_b);
        PoseVector::new(w.x, w.y, w.z, v.x, v.y, v.z)
    }
}

impl Scenario for ConstantTwistScenario {
    fn pose(&self, t: f64) -> Pose3 {
        self.start.compose(&Pose3::expmap(&(self.twist() * t)))
    }

    fn omega_b(&self, _t: f64) -> Vector3<f64> {
        self.omega_b
    }

    fn velocity_n(&self, t: f64) -> Vector3<f64> {
        self.rotation(t) * self.velocity_b
    }

    fn acceleration_n(&self, t: f64) -> Vector3<f64> {
        // Constant body velocity in a rotating frame: a_b = ω × v
        self.rotation(t) * self.omega_b.cross(&self.velocity_b)
    }
}

/// Constant navigation-frame acceleration with a constant body rotation rate
#[derive(Clone, Debug)]
pub struct AcceleratingScenario {
    pub start_rotation: Rotation3<f64>,
    pub start_position: Vector3<f64>,
    pub start_velocity: Vector3<f64>,
    pub acceleration_n: Vector3<f64>,
    pub omega_b: Vector3<f64>,
}

impl AcceleratingScenario {
    pub fn new(
        start_rotation: Rotation3<f64>,
        start_position: Vector3<f64>,
        start_velocity: Vector3<f64>,
        acceleration_n: Vector3<f64>,
        omega_b: Vector3<f64>,
    ) -> Self {
        Self {
            start_rotation,
            start_position,
            start_velocity,
            acceleration_n,
            omega_b,
        }
    }
}

impl Scenario for AcceleratingScenario {
    fn pose(&self, t: f64) -> Pose3 {
        Pose3::new(
            self.start_rotation * so3_exp(&(self.omega_b * t)),
            self.start_position + self.start_velocity * t + 0.5 * self.acceleration_n * t * t,
        )
    }

    fn omega_b(&self, _t: f64) -> Vector3<f64> {
        self.omega_b
    }

    fn velocity_n(&self, t: f64) -> Vector3<f64> {
        self.start_velocity + self.acceleration_n * t
    }

    fn acceleration_n(&self, _t: f64) -> Vector3<f64> {
        self.acceleration_n
    }
}
