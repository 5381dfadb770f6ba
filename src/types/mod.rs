pub mod linalg;

pub use linalg::*;

use nalgebra::{Rotation3, Vector3};
use serde::{Deserialize, Serialize};

use crate::geometry::Pose3;

/// Constant IMU bias [accelerometer (m/s²), gyroscope (rad/s)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ImuBias {
    pub accelerometer: Vector3<f64>,
    pub gyroscope: Vector3<f64>,
}

impl ImuBias {
    pub fn new(accelerometer: Vector3<f64>, gyroscope: Vector3<f64>) -> Self {
        Self {
            accelerometer,
            gyroscope,
        }
    }

    pub fn zero() -> Self {
        Self::default()
    }

    /// Remove the accelerometer bias from a raw specific-force reading
    pub fn correct_accelerometer(&self, measured: &Vector3<f64>) -> Vector3<f64> {
        measured - self.accelerometer
    }

    /// Remove the gyroscope bias from a raw angular-velocity reading
    pub fn correct_gyroscope(&self, measured: &Vector3<f64>) -> Vector3<f64> {
        measured - self.gyroscope
    }
}

/// Navigation state: pose in navigation frame plus navigation-frame velocity
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct NavState {
    pub pose: Pose3,
    pub velocity: Vector3<f64>,
}

impl NavState {
    pub fn new(pose: Pose3, velocity: Vector3<f64>) -> Self {
        Self { pose, velocity }
    }

    pub fn rotation(&self) -> &Rotation3<f64> {
        &self.pose.rotation
    }

    pub fn position(&self) -> &Vector3<f64> {
        &self.pose.translation
    }
}

impl Default for NavState {
    fn default() -> Self {
        Self::new(Pose3::identity(), Vector3::zeros())
    }
}

/// Output of a motion prediction: end pose, end velocity and the bias used
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PoseVelocityBias {
    pub pose: Pose3,
    pub velocity: Vector3<f64>,
    pub bias: ImuBias,
}

impl PoseVelocityBias {
    pub fn new(pose: Pose3, velocity: Vector3<f64>, bias: ImuBias) -> Self {
        Self {
            pose,
            velocity,
            bias,
        }
    }

    pub fn nav_state(&self) -> NavState {
        NavState::new(self.pose, self.velocity)
    }
}
