use thiserror::Error;

/// Scenario runner error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScenarioError {
    #[error("Invalid noise sigma: {0} (must be finite and non-negative)")]
    InvalidSigma(f64),

    #[error("Invalid noise model dimension: {0}")]
    InvalidDimension(usize),

    #[error("Invalid IMU sample time: {0} s (must be finite and positive)")]
    InvalidSampleTime(f64),

    #[error("Invalid integration duration: {0} s")]
    InvalidDuration(f64),

    #[error("Duration {duration} s is not a multiple of the sample time {sample_time} s")]
    NonDivisibleDuration { duration: f64, sample_time: f64 },

    #[error("Invalid integration time step: {0} s")]
    InvalidTimeStep(f64),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Invalid Monte Carlo parameters: {0}")]
    InvalidSampleCount(String),
}

/// Result type for scenario runner operations
pub type Result<T> = std::result::Result<T, ScenarioError>;
