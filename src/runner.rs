//! Scenario runner
//!
//! Turns a ground-truth `Scenario` into IMU readings, integrates them into a
//! `PreintegratedImuMeasurements`, and checks the preintegrated covariance
//! against a Monte Carlo estimate.

use std::ops::Range;
use std::panic;

use nalgebra::{Matrix3, Rotation3, Vector3};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ScenarioError};
use crate::factors::{PreintegratedImuMeasurements, PreintegrationParams};
use crate::noise::{Isotropic, Sampler};
use crate::scenario::Scenario;
use crate::types::{
    ImuBias, Matrix9, PoseCovariance, PoseVector, PoseVelocityBias, POSITION_OFFSET,
    ROTATION_OFFSET,
};

/// Gravity in navigation frame, Z up. g = 10 keeps hand-checked numbers simple.
pub const GRAVITY_N: Vector3<f64> = Vector3::new(0.0, 0.0, -10.0);

/// Relative tolerance when checking that a duration is a whole number of samples
const DIVISIBILITY_TOLERANCE: f64 = 1e-9;

/// Default Monte Carlo seeds for the gyroscope and accelerometer channels
pub const DEFAULT_GYRO_SEED: u64 = 10;
pub const DEFAULT_ACC_SEED: u64 = 29284;

/// Runner configuration, fixed for the lifetime of a `ScenarioRunner`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Seconds per IMU sample
    pub imu_sample_time: f64,
    /// Gyroscope noise density (rad/s/√Hz)
    pub gyro_sigma: f64,
    /// Accelerometer noise density (m/s²/√Hz)
    pub acc_sigma: f64,
    /// Position integration error density fed to the preintegration
    pub integration_sigma: f64,
    pub use_second_order_integration: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            imu_sample_time: 0.01,
            gyro_sigma: 0.17,
            acc_sigma: 0.01,
            integration_sigma: 0.0,
            use_second_order_integration: true,
        }
    }
}

/// Monte Carlo settings
#[derive(Clone, Debug, PartialEq)]
pub struct MonteCarloOptions {
    /// Number of noisy trials
    pub samples: usize,
    /// Gyroscope noise seed, `None` disables gyroscope noise
    pub gyro_seed: Option<u64>,
    /// Accelerometer noise seed, `None` disables accelerometer noise
    pub acc_seed: Option<u64>,
}

impl MonteCarloOptions {
    pub fn new(samples: usize) -> Self {
        Self {
            samples,
            gyro_seed: Some(DEFAULT_GYRO_SEED),
            acc_seed: Some(DEFAULT_ACC_SEED),
        }
    }

    /// Trials without any injected noise
    pub fn noiseless(samples: usize) -> Self {
        Self {
            samples,
            gyro_seed: None,
            acc_seed: None,
        }
    }

    pub fn with_seeds(mut self, gyro_seed: Option<u64>, acc_seed: Option<u64>) -> Self {
        self.gyro_seed = gyro_seed;
        self.acc_seed = acc_seed;
        self
    }
}

impl Default for MonteCarloOptions {
    fn default() -> Self {
        Self::new(1000)
    }
}

/// Simulates an IMU riding along a scenario
///
/// Borrows the scenario, which must outlive the runner.
#[derive(Clone, Debug)]
pub struct ScenarioRunner<'a, S: Scenario + ?Sized> {
    scenario: &'a S,
    config: RunnerConfig,
    gyro_noise_model: Isotropic,
    acc_noise_model: Isotropic,
    gyro_covariance: Matrix3<f64>,
    acc_covariance: Matrix3<f64>,
    integration_covariance: Matrix3<f64>,
    /// Per-sample noise: density / √dt
    discrete_gyro_noise_model: Isotropic,
    discrete_acc_noise_model: Isotropic,
}

impl<'a, S: Scenario + ?Sized> ScenarioRunner<'a, S> {
    pub fn new(scenario: &'a S, config: RunnerConfig) -> Result<Self> {
        let dt = config.imu_sample_time;
        if !dt.is_finite() || dt <= 0.0 {
            return Err(ScenarioError::InvalidSampleTime(dt));
        }

        let gyro_noise_model = Isotropic::sigma(3, config.gyro_sigma)?;
        let acc_noise_model = Isotropic::sigma(3, config.acc_sigma)?;
        let integration_noise_model = Isotropic::sigma(3, config.integration_sigma)?;

        let gyro_covariance = gyro_noise_model.covariance3()?;
        let acc_covariance = acc_noise_model.covariance3()?;
        let integration_covariance = integration_noise_model.covariance3()?;

        let per_sample = 1.0 / dt.sqrt();
        let discrete_gyro_noise_model = gyro_noise_model.scaled(per_sample)?;
        let discrete_acc_noise_model = acc_noise_model.scaled(per_sample)?;

        Ok(Self {
            scenario,
            config,
            gyro_noise_model,
            acc_noise_model,
            gyro_covariance,
            acc_covariance,
            integration_covariance,
            discrete_gyro_noise_model,
            discrete_acc_noise_model,
        })
    }

    pub fn with_defaults(scenario: &'a S) -> Result<Self> {
        Self::new(scenario, RunnerConfig::default())
    }

    pub fn gravity_n() -> Vector3<f64> {
        GRAVITY_N
    }

    /// A gyroscope measures body angular velocity directly
    pub fn measured_angular_velocity(&self, t: f64) -> Vector3<f64> {
        self.scenario.omega_b(t)
    }

    /// An accelerometer measures specific force: body acceleration minus gravity
    pub fn measured_acceleration(&self, t: f64) -> Vector3<f64> {
        let b_r_n = self.scenario.rotation(t).inverse();
        self.scenario.acceleration_b(t) - b_r_n * GRAVITY_N
    }

    pub fn scenario(&self) -> &'a S {
        self.scenario
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub fn imu_sample_time(&self) -> f64 {
        self.config.imu_sample_time
    }

    pub fn gyro_noise_model(&self) -> &Isotropic {
        &self.gyro_noise_model
    }

    pub fn acc_noise_model(&self) -> &Isotropic {
        &self.acc_noise_model
    }

    pub fn gyro_covariance(&self) -> Matrix3<f64> {
        self.gyro_covariance
    }

    pub fn acc_covariance(&self) -> Matrix3<f64> {
        self.acc_covariance
    }

    /// Gyroscope noise of a single sample at the configured rate
    pub fn discrete_gyro_noise_model(&self) -> &Isotropic {
        &self.discrete_gyro_noise_model
    }

    /// Accelerometer noise of a single sample at the configured rate
    pub fn discrete_acc_noise_model(&self) -> &Isotropic {
        &self.discrete_acc_noise_model
    }

    /// Sampler suitable for the `gyro_sampler` argument of `integrate`
    pub fn gyro_sampler(&self, seed: u64) -> Sampler {
        Sampler::new(self.discrete_gyro_noise_model.clone(), seed)
    }

    /// Sampler suitable for the `acc_sampler` argument of `integrate`
    pub fn acc_sampler(&self, seed: u64) -> Sampler {
        Sampler::new(self.discrete_acc_noise_model.clone(), seed)
    }

    fn preintegration_params(&self) -> PreintegrationParams {
        PreintegrationParams::new(self.acc_covariance, self.gyro_covariance)
            .with_integration_covariance(self.integration_covariance)
            .with_second_order_integration(self.config.use_second_order_integration)
    }

    /// Number of samples in `duration`; the duration must be a whole number of samples
    fn step_count(&self, duration: f64) -> Result<usize> {
        if !duration.is_finite() || duration < 0.0 {
            return Err(ScenarioError::InvalidDuration(duration));
        }
        let dt = self.config.imu_sample_time;
        let steps = (duration / dt).round();
        if (steps * dt - duration).abs() > DIVISIBILITY_TOLERANCE * duration.max(dt) {
            return Err(ScenarioError::NonDivisibleDuration {
                duration,
                sample_time: dt,
            });
        }
        Ok(steps as usize)
    }

    /// Integrate measurements for `duration` seconds into a fresh preintegration
    ///
    /// Each supplied sampler adds one draw per step to its channel. Samplers
    /// are used as-is: bind them to `discrete_*_noise_model` (or use
    /// `gyro_sampler`/`acc_sampler`) for noise consistent with the covariance.
    pub fn integrate(
        &self,
        duration: f64,
        mut gyro_sampler: Option<&mut Sampler>,
        mut acc_sampler: Option<&mut Sampler>,
    ) -> Result<PreintegratedImuMeasurements> {
        let steps = self.step_count(duration)?;
        let dt = self.config.imu_sample_time;
        log::debug!(
            "Integrating {} IMU samples (dt = {} s, gyro noise: {}, acc noise: {})",
            steps,
            dt,
            gyro_sampler.is_some(),
            acc_sampler.is_some()
        );

        let mut pim = PreintegratedImuMeasurements::new(self.preintegration_params(), ImuBias::zero());
        for k in 0..steps {
            let t = k as f64 * dt;

            let mut measured_omega = self.measured_angular_velocity(t);
            if let Some(sampler) = gyro_sampler.as_deref_mut() {
                measured_omega += sampler.sample3()?;
            }

            let mut measured_acc = self.measured_acceleration(t);
            if let Some(sampler) = acc_sampler.as_deref_mut() {
                measured_acc += sampler.sample3()?;
            }

            pim.integrate_measurement(&measured_acc, &measured_omega, dt)?;
        }
        Ok(pim)
    }

    /// Predict the end state from the scenario's start state
    pub fn predict(&self, pim: &PreintegratedImuMeasurements) -> PoseVelocityBias {
        let state_i = self.scenario.nav_state(0.0);
        pim.predict(&state_i, &ImuBias::zero(), &GRAVITY_N)
    }

    /// Pose covariance [rotation, translation] taken from the preintegrated covariance
    pub fn pose_covariance(&self, pim: &PreintegratedImuMeasurements) -> PoseCovariance {
        pose_covariance_from_preint(pim.preint_meas_cov())
    }

    /// Monte Carlo estimate of the pose covariance from `samples` noisy trials
    pub fn estimate_pose_covariance(&self, duration: f64, samples: usize) -> Result<PoseCovariance> {
        self.estimate_pose_covariance_with(duration, &MonteCarloOptions::new(samples))
    }

    /// Monte Carlo estimate with explicit seeds
    ///
    /// Trials run one after another, each channel drawing from a single
    /// sampler advanced across all trials.
    pub fn estimate_pose_covariance_with(
        &self,
        duration: f64,
        options: &MonteCarloOptions,
    ) -> Result<PoseCovariance> {
        if options.samples == 0 {
            return Err(ScenarioError::InvalidSampleCount(
                "at least one sample is required".to_string(),
            ));
        }
        let reference = self.monte_carlo_reference(duration)?;
        log::info!(
            "Monte Carlo pose covariance: {} trials over {} s",
            options.samples,
            duration
        );

        let mut gyro = options.gyro_seed.map(|seed| self.gyro_sampler(seed));
        let mut acc = options.acc_seed.map(|seed| self.acc_sampler(seed));

        let deviations = (0..options.samples)
            .map(|_| self.trial_deviation(duration, gyro.as_mut(), acc.as_mut(), &reference))
            .collect::<Result<Vec<_>>>()?;

        Ok(sample_covariance(&deviations))
    }

    /// Noiseless prediction and the inverse start rotation
    fn monte_carlo_reference(&self, duration: f64) -> Result<MonteCarloReference> {
        let nominal = self.predict(&self.integrate(duration, None, None)?);
        let start_rotation_inv = self.scenario.rotation(0.0).inverse();
        Ok(MonteCarloReference {
            nominal,
            start_rotation_inv,
        })
    }

    /// One noisy integration, returned as a deviation from the nominal pose
    ///
    /// Rotation is the right perturbation of the end attitude; translation is
    /// expressed in the start body frame, the frame of the preintegrated
    /// position error.
    fn trial_deviation(
        &self,
        duration: f64,
        gyro_sampler: Option<&mut Sampler>,
        acc_sampler: Option<&mut Sampler>,
        reference: &MonteCarloReference,
    ) -> Result<PoseVector> {
        let sampled = self.predict(&self.integrate(duration, gyro_sampler, acc_sampler)?);
        let mut xi = reference.nominal.pose.local_coordinates(&sampled.pose);
        let translation = reference.start_rotation_inv * xi.fixed_rows::<3>(3).into_owned();
        xi.fixed_rows_mut::<3>(3).copy_from(&translation);
        Ok(xi)
    }
}

impl<'a, S: Scenario + Sync + ?Sized> ScenarioRunner<'a, S> {
    /// Monte Carlo estimate spread over `threads` scoped worker threads
    ///
    /// Trial `k` draws from its own ChaCha stream `k` of each seed, so the
    /// estimate is the same for any thread count.
    pub fn estimate_pose_covariance_parallel(
        &self,
        duration: f64,
        options: &MonteCarloOptions,
        threads: usize,
    ) -> Result<PoseCovariance> {
        if options.samples == 0 {
            return Err(ScenarioError::InvalidSampleCount(
                "at least one sample is required".to_string(),
            ));
        }
        if threads == 0 {
            return Err(ScenarioError::InvalidSampleCount(
                "at least one worker thread is required".to_string(),
            ));
        }
        let reference = self.monte_carlo_reference(duration)?;
        let chunks = trial_chunks(options.samples, threads);
        log::info!(
            "Monte Carlo pose covariance: {} trials over {} s on {} threads",
            options.samples,
            duration,
            chunks.len()
        );

        let reference = &reference;
        let per_chunk: Vec<Result<Vec<PoseVector>>> = crossbeam::thread::scope(|scope| {
            let handles: Vec<_> = chunks
                .into_iter()
                .map(|range| {
                    scope.spawn(move |_| {
                        log::debug!("Worker running trials {:?}", range);
                        range
                            .map(|trial| {
                                let stream = trial as u64;
                                let mut gyro = options.gyro_seed.map(|seed| {
                                    Sampler::with_stream(
                                        self.discrete_gyro_noise_model.clone(),
                                        seed,
                                        stream,
                                    )
                                });
                                let mut acc = options.acc_seed.map(|seed| {
                                    Sampler::with_stream(
                                        self.discrete_acc_noise_model.clone(),
                                        seed,
                                        stream,
                                    )
                                });
                                self.trial_deviation(duration, gyro.as_mut(), acc.as_mut(), reference)
                            })
                            .collect::<Result<Vec<_>>>()
                    })
                })
                .collect();

            handles
                .into_iter()
                .map(|handle| handle.join().unwrap_or_else(|e| panic::resume_unwind(e)))
                .collect()
        })
        .unwrap_or_else(|e| panic::resume_unwind(e));

        let mut deviations = Vec::with_capacity(options.samples);
        for chunk in per_chunk {
            deviations.extend(chunk?);
        }
        Ok(sample_covariance(&deviations))
    }
}

struct MonteCarloReference {
    nominal: PoseVelocityBias,
    start_rotation_inv: Rotation3<f64>,
}

/// Split `samples` trials into at most `threads` contiguous, ordered ranges
fn trial_chunks(samples: usize, threads: usize) -> Vec<Range<usize>> {
    let chunk = samples.div_ceil(threads);
    (0..samples)
        .step_by(chunk)
        .map(|start| start..(start + chunk).min(samples))
        .collect()
}

/// Zero-mean sample covariance: Σ ξ ξᵀ / N
fn sample_covariance(deviations: &[PoseVector]) -> PoseCovariance {
    let sum = deviations
        .iter()
        .fold(PoseCovariance::zeros(), |acc, xi| acc + xi * xi.transpose());
    sum / deviations.len() as f64
}

/// Rearrange a [position, velocity, rotation] covariance into pose order
///
/// Result blocks: [[R-R, R-P], [P-R, P-P]]. Plain copies, no arithmetic.
pub fn pose_covariance_from_preint(cov: &Matrix9) -> PoseCovariance {
    let mut pose_cov = PoseCovariance::zeros();
    pose_cov
        .fixed_view_mut::<3, 3>(0, 0)
        .copy_from(&cov.fixed_view::<3, 3>(ROTATION_OFFSET, ROTATION_OFFSET));
    pose_cov
        .fixed_view_mut::<3, 3>(0, 3)
        .copy_from(&cov.fixed_view::<3, 3>(ROTATION_OFFSET, POSITION_OFFSET));
    pose_cov
        .fixed_view_mut::<3, 3>(3, 0)
        .copy_from(&cov.fixed_view::<3, 3>(POSITION_OFFSET, ROTATION_OFFSET));
    pose_cov
        .fixed_view_mut::<3, 3>(3, 3)
        .copy_from(&cov.fixed_view::<3, 3>(POSITION_OFFSET, POSITION_OFFSET));
    pose_cov
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{so3_exp, so3_log, Pose3};
    use crate::scenario::{AcceleratingScenario, ConstantTwistScenario};
    use approx::assert_relative_eq;

    fn noiseless_config() -> RunnerConfig {
        RunnerConfig {
            gyro_sigma: 0.0,
            acc_sigma: 0.0,
            ..RunnerConfig::default()
        }
    }

    fn tilted_accelerating() -> AcceleratingScenario {
        AcceleratingScenario::new(
            so3_exp(&Vector3::new(0.1, -0.2, 0.6)),
            Vector3::new(1.0, 2.0, 3.0),
            Vector3::new(0.5, 0.0, 0.2),
            Vector3::new(0.3, -0.1, 0.05),
            Vector3::zeros(),
        )
    }

    #[test]
    fn test_gravity_constant() {
        assert_eq!(GRAVITY_N, Vector3::new(0.0, 0.0, -10.0));
        assert_eq!(ScenarioRunner::<ConstantTwistScenario>::gravity_n(), GRAVITY_N);
    }

    #[test]
    fn test_default_config_and_accessors() {
        let scenario = ConstantTwistScenario::stationary();
        let runner = ScenarioRunner::with_defaults(&scenario).unwrap();
        assert_eq!(runner.imu_sample_time(), 0.01);
        assert_eq!(runner.gyro_noise_model().sigma_value(), 0.17);
        assert_eq!(runner.acc_noise_model().sigma_value(), 0.01);
        assert_relative_eq!(runner.gyro_covariance(), Matrix3::identity() * 0.0289, epsilon = 1e-15);
        assert_relative_eq!(runner.acc_covariance(), Matrix3::identity() * 1e-4, epsilon = 1e-15);
        assert_relative_eq!(runner.discrete_gyro_noise_model().sigma_value(), 1.7, epsilon = 1e-12);
        assert_relative_eq!(runner.discrete_acc_noise_model().sigma_value(), 0.1, epsilon = 1e-12);
    }

    #[test]
    fn test_construction_rejects_bad_config() {
        let scenario = ConstantTwistScenario::stationary();
        let bad_dt = RunnerConfig {
            imu_sample_time: 0.0,
            ..RunnerConfig::default()
        };
        assert_eq!(
            ScenarioRunner::new(&scenario, bad_dt).err(),
            Some(ScenarioError::InvalidSampleTime(0.0))
        );

        let bad_sigma = RunnerConfig {
            gyro_sigma: -1.0,
            ..RunnerConfig::default()
        };
        assert_eq!(
            ScenarioRunner::new(&scenario, bad_sigma).err(),
            Some(ScenarioError::InvalidSigma(-1.0))
        );
    }

    #[test]
    fn test_config_from_partial_json() {
        let config: RunnerConfig = serde_json::from_str(r#"{"gyro_sigma": 0.05}"#).unwrap();
        assert_eq!(config.gyro_sigma, 0.05);
        assert_eq!(config.imu_sample_time, 0.01);
        assert!(config.use_second_order_integration);
    }

    #[test]
    fn test_measured_angular_velocity_passthrough() {
        let scenario = ConstantTwistScenario::new(Vector3::new(0.1, -0.2, 0.3), Vector3::new(1.0, 0.0, 0.0));
        let runner = ScenarioRunner::with_defaults(&scenario).unwrap();
        for t in [0.0, 0.25, 1.0, 7.5] {
            assert_eq!(runner.measured_angular_velocity(t), scenario.omega_b(t));
        }
    }

    #[test]
    fn test_measured_acceleration_stationary() {
        let scenario = ConstantTwistScenario::stationary();
        let runner = ScenarioRunner::with_defaults(&scenario).unwrap();
        for t in [0.0, 0.5, 3.0] {
            assert_eq!(runner.measured_acceleration(t), Vector3::new(0.0, 0.0, 10.0));
        }
    }

    #[test]
    fn test_measured_acceleration_is_specific_force() {
        let scenario = tilted_accelerating();
        let runner = ScenarioRunner::with_defaults(&scenario).unwrap();
        for t in [0.0, 0.4, 2.0] {
            let expected = scenario.acceleration_b(t) - scenario.rotation(t).inverse() * GRAVITY_N;
            assert_eq!(runner.measured_acceleration(t), expected);
            // Magnitude check: |a_n - g|
            let specific_force_n = scenario.acceleration_n(t) - GRAVITY_N;
            assert_relative_eq!(
                runner.measured_acceleration(t).norm(),
                specific_force_n.norm(),
                epsilon = 1e-12
            );
        }
    }

    #[test]
    fn test_integrate_is_deterministic_without_noise() {
        let scenario = ConstantTwistScenario::circle(2.0, 1.0);
        let runner = ScenarioRunner::with_defaults(&scenario).unwrap();
        let a = runner.integrate(1.0, None, None).unwrap();
        let b = runner.integrate(1.0, None, None).unwrap();
        assert_eq!(a.preint_meas_cov(), b.preint_meas_cov());
        assert_eq!(runner.predict(&a), runner.predict(&b));
        assert_relative_eq!(a.delta_t(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_integrate_rejects_bad_duration() {
        let scenario = ConstantTwistScenario::stationary();
        let runner = ScenarioRunner::with_defaults(&scenario).unwrap();
        assert_eq!(
            runner.integrate(0.105, None, None).err(),
            Some(ScenarioError::NonDivisibleDuration {
                duration: 0.105,
                sample_time: 0.01
            })
        );
        assert_eq!(
            runner.integrate(-1.0, None, None).err(),
            Some(ScenarioError::InvalidDuration(-1.0))
        );
        assert!(runner.integrate(f64::INFINITY, None, None).is_err());
    }

    #[test]
    fn test_integrate_zero_duration() {
        let scenario = ConstantTwistScenario::forward(1.0);
        let runner = ScenarioRunner::with_defaults(&scenario).unwrap();
        let pim = runner.integrate(0.0, None, None).unwrap();
        assert_eq!(pim.delta_t(), 0.0);
        assert_eq!(runner.predict(&pim).pose, Pose3::identity());
    }

    #[test]
    fn test_static_scenario_noiseless() {
        let scenario = ConstantTwistScenario::stationary();
        let runner = ScenarioRunner::new(&scenario, noiseless_config()).unwrap();
        let pim = runner.integrate(1.0, None, None).unwrap();

        assert_eq!(*pim.preint_meas_cov(), Matrix9::zeros());
        assert_eq!(runner.pose_covariance(&pim), PoseCovariance::zeros());

        let predicted = runner.predict(&pim);
        assert_eq!(predicted.pose.rotation, Rotation3::identity());
        assert!(predicted.pose.translation.norm() < 1e-12);
        assert!(predicted.velocity.norm() < 1e-12);
    }

    #[test]
    fn test_predict_matches_ground_truth() {
        let scenario = tilted_accelerating();
        let runner = ScenarioRunner::with_defaults(&scenario).unwrap();
        let pim = runner.integrate(2.0, None, None).unwrap();
        let predicted = runner.predict(&pim);
        let truth = scenario.nav_state(2.0);

        assert!((predicted.pose.translation - truth.pose.translation).norm() < 1e-9);
        assert!((predicted.velocity - truth.velocity).norm() < 1e-9);
        assert!(so3_log(&(truth.pose.rotation.inverse() * predicted.pose.rotation)).norm() < 1e-12);
    }

    #[test]
    fn test_predict_tracks_circle() {
        // Rectangle-rule sampling of a rotating trajectory: O(dt) drift
        let scenario = ConstantTwistScenario::circle(2.0, 1.0);
        let runner = ScenarioRunner::with_defaults(&scenario).unwrap();
        let pim = runner.integrate(2.0, None, None).unwrap();
        let predicted = runner.predict(&pim);
        let truth = scenario.nav_state(2.0);

        assert!((predicted.pose.translation - truth.pose.translation).norm() < 0.02);
        assert!(so3_log(&(truth.pose.rotation.inverse() * predicted.pose.rotation)).norm() < 1e-9);
    }

    #[test]
    fn test_samplers_inject_noise() {
        let scenario = ConstantTwistScenario::forward(1.0);
        let runner = ScenarioRunner::with_defaults(&scenario).unwrap();
        let nominal = runner.predict(&runner.integrate(1.0, None, None).unwrap());

        let mut gyro = runner.gyro_sampler(1);
        let noisy = runner
            .predict(&runner.integrate(1.0, Some(&mut gyro), None).unwrap());
        assert!(so3_log(&(nominal.pose.rotation.inverse() * noisy.pose.rotation)).norm() > 1e-6);

        // Accelerometer-only noise leaves the attitude untouched
        let mut acc = runner.acc_sampler(2);
        let noisy = runner.predict(&runner.integrate(1.0, None, Some(&mut acc)).unwrap());
        assert_eq!(noisy.pose.rotation, nominal.pose.rotation);
        assert!((noisy.pose.translation - nominal.pose.translation).norm() > 1e-8);
    }

    #[test]
    fn test_sampler_dimension_mismatch_propagates() {
        let scenario = ConstantTwistScenario::stationary();
        let runner = ScenarioRunner::with_defaults(&scenario).unwrap();
        let mut wrong = Sampler::new(Isotropic::sigma(2, 0.1).unwrap(), 3);
        assert_eq!(
            runner.integrate(0.1, Some(&mut wrong), None).err(),
            Some(ScenarioError::DimensionMismatch {
                expected: 3,
                actual: 2
            })
        );
    }

    #[test]
    fn test_pose_covariance_reindexes_blocks() {
        let cov = Matrix9::from_fn(|i, j| (100 * i + j) as f64);
        let pose_cov = pose_covariance_from_preint(&cov);

        for i in 0..3 {
            for j in 0..3 {
                assert_eq!(pose_cov[(i, j)], cov[(6 + i, 6 + j)]); // R-R
                assert_eq!(pose_cov[(i, 3 + j)], cov[(6 + i, j)]); // R-P
                assert_eq!(pose_cov[(3 + i, j)], cov[(i, 6 + j)]); // P-R
                assert_eq!(pose_cov[(3 + i, 3 + j)], cov[(i, j)]); // P-P
            }
        }
    }

    #[test]
    fn test_pose_covariance_from_runner() {
        let scenario = ConstantTwistScenario::circle(2.0, 1.0);
        let runner = ScenarioRunner::with_defaults(&scenario).unwrap();
        let pim = runner.integrate(1.0, None, None).unwrap();
        let pose_cov = runner.pose_covariance(&pim);

        assert_eq!(pose_cov, pose_covariance_from_preint(pim.preint_meas_cov()));
        assert!((pose_cov - pose_cov.transpose()).norm() < 1e-12 * pose_cov.norm());
        // Rotation block: ~σg² T per axis
        assert_relative_eq!(pose_cov[(2, 2)], 0.17 * 0.17, max_relative = 1e-6);
    }

    #[test]
    fn test_monte_carlo_rejects_zero_samples() {
        let scenario = ConstantTwistScenario::stationary();
        let runner = ScenarioRunner::with_defaults(&scenario).unwrap();
        assert!(matches!(
            runner.estimate_pose_covariance(1.0, 0),
            Err(ScenarioError::InvalidSampleCount(_))
        ));
        assert!(runner
            .estimate_pose_covariance_parallel(1.0, &MonteCarloOptions::new(10), 0)
            .is_err());
    }

    #[test]
    fn test_monte_carlo_noiseless_is_zero() {
        let scenario = ConstantTwistScenario::stationary();
        let runner = ScenarioRunner::with_defaults(&scenario).unwrap();
        let estimate = runner
            .estimate_pose_covariance_with(1.0, &MonteCarloOptions::noiseless(20))
            .unwrap();
        assert_eq!(estimate, PoseCovariance::zeros());

        let scenario = ConstantTwistScenario::circle(2.0, 1.0);
        let runner = ScenarioRunner::with_defaults(&scenario).unwrap();
        let estimate = runner
            .estimate_pose_covariance_with(1.0, &MonteCarloOptions::noiseless(20))
            .unwrap();
        assert!(estimate.norm() < 1e-20);
    }

    #[test]
    fn test_monte_carlo_reproducible() {
        let scenario = ConstantTwistScenario::forward(1.0);
        let runner = ScenarioRunner::with_defaults(&scenario).unwrap();
        let a = runner.estimate_pose_covariance(0.2, 30).unwrap();
        let b = runner.estimate_pose_covariance(0.2, 30).unwrap();
        assert_eq!(a, b);
        assert!(a.norm() > 0.0);
    }

    #[test]
    fn test_parallel_independent_of_thread_count() {
        let scenario = ConstantTwistScenario::circle(2.0, 1.0);
        let runner = ScenarioRunner::with_defaults(&scenario).unwrap();
        let options = MonteCarloOptions::new(40);
        let one = runner.estimate_pose_covariance_parallel(0.2, &options, 1).unwrap();
        let three = runner.estimate_pose_covariance_parallel(0.2, &options, 3).unwrap();
        let many = runner.estimate_pose_covariance_parallel(0.2, &options, 64).unwrap();
        assert_eq!(one, three);
        assert_eq!(one, many);
    }

    #[test]
    fn test_trial_chunks_cover_all_trials() {
        let chunks = trial_chunks(10, 3);
        assert_eq!(chunks, vec![0..4, 4..8, 8..10]);
        assert_eq!(trial_chunks(2, 8), vec![0..1, 1..2]);
    }

    #[test]
    fn test_covariances_come_from_noise_models() {
        let scenario = ConstantTwistScenario::stationary();
        let config = RunnerConfig {
            integration_sigma: 0.05,
            ..RunnerConfig::default()
        };
        let runner = ScenarioRunner::new(&scenario, config).unwrap();
        assert_eq!(runner.gyro_covariance(), runner.gyro_noise_model().covariance3().unwrap());
        assert_eq!(runner.acc_covariance(), runner.acc_noise_model().covariance3().unwrap());

        let pim = runner.integrate(0.1, None, None).unwrap();
        let params = pim.params();
        assert_eq!(params.gyro_covariance, runner.gyro_covariance());
        assert_eq!(params.acc_covariance, runner.acc_covariance());
        assert_relative_eq!(params.integration_covariance, Matrix3::identity() * 0.0025, epsilon = 1e-15);
    }

    #[test]
    fn test_monte_carlo_tilted_start_matches_per_block() {
        // Non-identity start attitude: translation deviations must be taken
        // back into the start body frame to line up with the analytic blocks
        let start = Pose3::new(
            so3_exp(&Vector3::new(0.3, -0.4, 0.8)),
            Vector3::new(1.0, -2.0, 0.5),
        );
        let scenario = ConstantTwistScenario::with_start(
            Vector3::new(0.0, 0.0, 0.5),
            Vector3::new(1.0, 0.0, 0.0),
            start,
        );
        let runner = ScenarioRunner::with_defaults(&scenario).unwrap();
        let duration = 0.5;

        let analytic = runner.pose_covariance(&runner.integrate(duration, None, None).unwrap());
        let estimate = runner.estimate_pose_covariance(duration, 2000).unwrap();

        let block_error = |row: usize, col: usize| {
            let a = analytic.fixed_view::<3, 3>(row, col);
            let e = estimate.fixed_view::<3, 3>(row, col);
            (e - a).norm() / a.norm()
        };

        let rr = block_error(0, 0);
        let rp = block_error(0, 3);
        let pr = block_error(3, 0);
        let pp = block_error(3, 3);
        assert!(rr < 0.15, "R-R block relative error {}", rr);
        assert!(rp < 0.2, "R-P block relative error {}", rp);
        assert!(pr < 0.2, "P-R block relative error {}", pr);
        assert!(pp < 0.15, "P-P block relative error {}", pp);
    }

    #[test]
    fn test_monte_carlo_converges_to_analytic() {
        let scenario = ConstantTwistScenario::circle(2.0, 1.0);
        let runner = ScenarioRunner::with_defaults(&scenario).unwrap();
        let duration = 0.5;

        let analytic = runner.pose_covariance(&runner.integrate(duration, None, None).unwrap());
        let relative_error = |estimate: PoseCovariance| (estimate - analytic).norm() / analytic.norm();

        // Few samples, averaged over several seeds
        let small: f64 = (0..8u64)
            .map(|seed| {
                let options = MonteCarloOptions::new(10).with_seeds(Some(100 + seed), Some(200 + seed));
                relative_error(runner.estimate_pose_covariance_with(duration, &options).unwrap())
            })
            .sum::<f64>()
            / 8.0;

        let large = relative_error(runner.estimate_pose_covariance(duration, 2000).unwrap());

        assert!(large < 0.15, "relative error with 2000 samples: {}", large);
        assert!(large < small, "large-N error {} not below small-N error {}", large, small);
    }
}
