//! Linear algebra type system for the scenario runner
//!
//! Fixed-size aliases for the preintegration error state and the pose
//! tangent space, plus the block offsets shared by every module that slices
//! a preintegrated covariance.

use nalgebra::{SMatrix, SVector};

// ===== Preintegration Error State =====
pub const PREINT_DIM: usize = 9;

/// Block offsets inside the 9-dim preintegration error state
pub const POSITION_OFFSET: usize = 0; // δp  (rows 0..3)
pub const VELOCITY_OFFSET: usize = 3; // δv  (rows 3..6)
pub const ROTATION_OFFSET: usize = 6; // δθ  (rows 6..9)

pub type Vector9 = SVector<f64, PREINT_DIM>;
pub type Matrix9 = SMatrix<f64, PREINT_DIM, PREINT_DIM>;

// ===== Pose Tangent Space =====
pub const POSE_DIM: usize = 6; // [rotation (0:3), translation (3:6)]

pub type PoseVector = SVector<f64, POSE_DIM>;
pub type PoseCovariance = SMatrix<f64, POSE_DIM, POSE_DIM>;

// Noise input to the preintegration: [accel (0:3), gyro (3:6)]
pub const IMU_NOISE_DIM: usize = 6;

pub type ImuNoiseMat = SMatrix<f64, IMU_NOISE_DIM, IMU_NOISE_DIM>;
pub type NoiseInputMat = SMatrix<f64, PREINT_DIM, IMU_NOISE_DIM>; // 9×6
