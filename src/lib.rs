//! IMU scenario simulation and preintegration covariance checks

pub mod error;
pub mod factors;
pub mod geometry;
pub mod noise;
pub mod runner;
pub mod scenario;
pub mod types;

pub use error::{Result, ScenarioError};
pub use factors::{ImuFactor, PreintegratedImuMeasurements, PreintegrationParams};
pub use geometry::Pose3;
pub use noise::{Isotropic, Sampler};
pub use runner::{MonteCarloOptions, RunnerConfig, ScenarioRunner, GRAVITY_N};
pub use scenario::{AcceleratingScenario, ConstantTwistScenario, Scenario};
pub use types::{ImuBias, NavState, PoseCovariance, PoseVelocityBias};
