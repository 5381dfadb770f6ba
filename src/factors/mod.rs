/// IMU preintegration and the factor that scores navigation states against it
pub mod imu_preintegration;

pub use imu_preintegration::{ImuFactor, PreintegratedImuMeasurements, PreintegrationParams};
