/// IMU Preintegration
///
/// Implements the standard Forster-style on-manifold preintegration: many
/// high-rate IMU samples are summarised into one relative motion (ΔR, Δv, Δp)
/// expressed in the body frame at the start of the interval, together with a
/// first-order propagated covariance and Jacobians for bias correction.
///
/// Error state ordering used throughout: [position (0:3), velocity (3:6), rotation (6:9)].
///
/// References:
/// - Forster et al., "On-Manifold Preintegration for Real-Time Visual-Inertial Odometry"
/// - Lupton & Sukkarieh, "Visual-Inertial-Aided Navigation for High-Dynamic Motion"
use nalgebra::{Matrix3, Rotation3, Vector3};

use crate::error::{Result, ScenarioError};
use crate::geometry::{right_jacobian, skew_symmetric, so3_exp, so3_log, Pose3};
use crate::types::{
    ImuBias, ImuNoiseMat, Matrix9, NavState, NoiseInputMat, PoseVelocityBias, Vector9,
    POSITION_OFFSET, ROTATION_OFFSET, VELOCITY_OFFSET,
};

/// Continuous-time noise parameters of the preintegration
#[derive(Clone, Debug, PartialEq)]
pub struct PreintegrationParams {
    /// Accelerometer white noise covariance [m²/s⁴ · s]
    pub acc_covariance: Matrix3<f64>,

    /// Gyroscope white noise covariance [rad²/s² · s]
    pub gyro_covariance: Matrix3<f64>,

    /// Error added to the position integration at every step [m²/s]
    pub integration_covariance: Matrix3<f64>,

    /// Include the ½·a·dt² term when integrating position
    pub use_second_order_integration: bool,
}

impl PreintegrationParams {
    pub fn new(acc_covariance: Matrix3<f64>, gyro_covariance: Matrix3<f64>) -> Self {
        Self {
            acc_covariance,
            gyro_covariance,
            integration_covariance: Matrix3::zeros(),
            use_second_order_integration: true,
        }
    }

    pub fn with_integration_covariance(mut self, integration_covariance: Matrix3<f64>) -> Self {
        self.integration_covariance = integration_covariance;
        self
    }

    pub fn with_second_order_integration(mut self, enabled: bool) -> Self {
        self.use_second_order_integration = enabled;
        self
    }
}

/// Preintegrated IMU measurements over one interval
///
/// Always starts from identity rotation, zero velocity/position deltas and a
/// zero covariance; a new accumulator is needed for every interval.
#[derive(Clone, Debug)]
pub struct PreintegratedImuMeasurements {
    params: PreintegrationParams,

    /// Bias assumed while integrating
    bias_hat: ImuBias,

    /// Position delta: ∫∫ ΔR(t) a(t) dt dt
    delta_p: Vector3<f64>,

    /// Velocity delta: ∫ ΔR(t) a(t) dt
    delta_v: Vector3<f64>,

    /// Rotation delta: Π Exp(ω dt)
    delta_r: Rotation3<f64>,

    /// Total integrated time [seconds]
    delta_t: f64,

    // Jacobians w.r.t. biases (first-order bias correction)
    dp_dba: Matrix3<f64>,
    dp_dbg: Matrix3<f64>,
    dv_dba: Matrix3<f64>,
    dv_dbg: Matrix3<f64>,
    dr_dbg: Matrix3<f64>,

    /// Covariance of the preintegrated error state [position, velocity, rotation]
    preint_meas_cov: Matrix9,
}

impl PreintegratedImuMeasurements {
    /// Create an empty preintegration
    pub fn new(params: PreintegrationParams, bias_hat: ImuBias) -> Self {
        Self {
            params,
            bias_hat,
            delta_p: Vector3::zeros(),
            delta_v: Vector3::zeros(),
            delta_r: Rotation3::identity(),
            delta_t: 0.0,
            dp_dba: Matrix3::zeros(),
            dp_dbg: Matrix3::zeros(),
            dv_dba: Matrix3::zeros(),
            dv_dbg: Matrix3::zeros(),
            dr_dbg: Matrix3::zeros(),
            preint_meas_cov: Matrix9::zeros(),
        }
    }

    /// Drop all integrated data, keeping parameters and bias estimate
    pub fn reset_integration(&mut self) {
        *self = Self::new(self.params.clone(), self.bias_hat);
    }

    /// Integrate one accelerometer / gyroscope sample held constant over `dt`
    ///
    /// # Arguments
    /// * `measured_acc` - Specific force in body frame [m/s²]
    /// * `measured_omega` - Angular velocity in body frame [rad/s]
    /// * `dt` - Sample duration [seconds], must be positive
    pub fn integrate_measurement(
        &mut self,
        measured_acc: &Vector3<f64>,
        measured_omega: &Vector3<f64>,
        dt: f64,
    ) -> Result<()> {
        if !dt.is_finite() || dt <= 0.0 {
            return Err(ScenarioError::InvalidTimeStep(dt));
        }

        let acc = self.bias_hat.correct_accelerometer(measured_acc);
        let omega = self.bias_hat.correct_gyroscope(measured_omega);
        let second_order = self.params.use_second_order_integration;

        let r_i = *self.delta_r.matrix();
        let theta_incr = omega * dt;
        let r_incr = so3_exp(&theta_incr);
        let r_incr_t = r_incr.matrix().transpose();
        let jr = right_jacobian(&theta_incr);
        let acc_skew = skew_symmetric(&acc);
        let dt2 = dt * dt;

        // Bias Jacobians, all updated from the values at the start of the step
        if second_order {
            self.dp_dba += self.dv_dba * dt - 0.5 * r_i * dt2;
            self.dp_dbg += self.dv_dbg * dt - 0.5 * r_i * acc_skew * self.dr_dbg * dt2;
        } else {
            self.dp_dba += self.dv_dba * dt;
            self.dp_dbg += self.dv_dbg * dt;
        }
        self.dv_dba -= r_i * dt;
        self.dv_dbg -= r_i * acc_skew * self.dr_dbg * dt;
        self.dr_dbg = r_incr_t * self.dr_dbg - jr * dt;

        self.propagate_covariance(r_i, r_incr_t, jr, acc_skew, dt);

        // Nominal state
        let rotated_acc = r_i * acc;
        if second_order {
            self.delta_p += self.delta_v * dt + 0.5 * rotated_acc * dt2;
        } else {
            self.delta_p += self.delta_v * dt;
        }
        self.delta_v += rotated_acc * dt;
        self.delta_r *= r_incr;
        self.delta_t += dt;

        Ok(())
    }

    /// P ← A P Aᵀ + B Q Bᵀ (+ integration error on the position block)
    ///
    /// Q = diag(Σa, Σg) / dt is the covariance of one discrete sample of
    /// continuous white noise with densities Σa, Σg.
    fn propagate_covariance(
        &mut self,
        r_i: Matrix3<f64>,
        r_incr_t: Matrix3<f64>,
        jr: Matrix3<f64>,
        acc_skew: Matrix3<f64>,
        dt: f64,
    ) {
        let dt2 = dt * dt;
        let second_order = self.params.use_second_order_integration;

        let mut a = Matrix9::identity();
        a.fixed_view_mut::<3, 3>(POSITION_OFFSET, VELOCITY_OFFSET)
            .copy_from(&(Matrix3::identity() * dt));
        if second_order {
            a.fixed_view_mut::<3, 3>(POSITION_OFFSET, ROTATION_OFFSET)
                .copy_from(&(-0.5 * r_i * acc_skew * dt2));
        }
        a.fixed_view_mut::<3, 3>(VELOCITY_OFFSET, ROTATION_OFFSET)
            .copy_from(&(-r_i * acc_skew * dt));
        a.fixed_view_mut::<3, 3>(ROTATION_OFFSET, ROTATION_OFFSET)
            .copy_from(&r_incr_t);

        // Noise input columns: [accel (0:3), gyro (3:6)]
        let mut b = NoiseInputMat::zeros();
        if second_order {
            b.fixed_view_mut::<3, 3>(POSITION_OFFSET, 0)
                .copy_from(&(0.5 * r_i * dt2));
        }
        b.fixed_view_mut::<3, 3>(VELOCITY_OFFSET, 0)
            .copy_from(&(r_i * dt));
        b.fixed_view_mut::<3, 3>(ROTATION_OFFSET, 3)
            .copy_from(&(jr * dt));

        let mut q = ImuNoiseMat::zeros();
        q.fixed_view_mut::<3, 3>(0, 0)
            .copy_from(&(self.params.acc_covariance / dt));
        q.fixed_view_mut::<3, 3>(3, 3)
            .copy_from(&(self.params.gyro_covariance / dt));

        self.preint_meas_cov =
            a * self.preint_meas_cov * a.transpose() + b * q * b.transpose();

        let mut pp = self
            .preint_meas_cov
            .fixed_view_mut::<3, 3>(POSITION_OFFSET, POSITION_OFFSET);
        pp += self.params.integration_covariance * dt;
    }

    /// Predict the navigation state at the end of the interval
    ///
    /// Composes the preintegrated relative motion with `state_i`, the effect of
    /// `gravity` over the interval, and a first-order correction for the
    /// difference between `bias` and the bias used while integrating.
    pub fn predict(
        &self,
        state_i: &NavState,
        bias: &ImuBias,
        gravity: &Vector3<f64>,
    ) -> PoseVelocityBias {
        let (delta_r, delta_v, delta_p) = self.correct_for_bias(bias);

        let r_i = state_i.pose.rotation;
        let p_i = state_i.pose.translation;
        let v_i = state_i.velocity;
        let t = self.delta_t;

        let rotation = r_i * delta_r;
        let velocity = v_i + gravity * t + r_i * delta_v;
        let position = p_i + v_i * t + gravity * (0.5 * t * t) + r_i * delta_p;

        PoseVelocityBias::new(Pose3::new(rotation, position), velocity, *bias)
    }

    /// First-order bias correction of (ΔR, Δv, Δp)
    pub fn correct_for_bias(&self, bias: &ImuBias) -> (Rotation3<f64>, Vector3<f64>, Vector3<f64>) {
        let delta_ba = bias.accelerometer - self.bias_hat.accelerometer;
        let delta_bg = bias.gyroscope - self.bias_hat.gyroscope;

        let delta_r = self.delta_r * so3_exp(&(self.dr_dbg * delta_bg));
        let delta_v = self.delta_v + self.dv_dba * delta_ba + self.dv_dbg * delta_bg;
        let delta_p = self.delta_p + self.dp_dba * delta_ba + self.dp_dbg * delta_bg;

        (delta_r, delta_v, delta_p)
    }

    pub fn params(&self) -> &PreintegrationParams {
        &self.params
    }

    pub fn bias_hat(&self) -> &ImuBias {
        &self.bias_hat
    }

    pub fn delta_p(&self) -> &Vector3<f64> {
        &self.delta_p
    }

    pub fn delta_v(&self) -> &Vector3<f64> {
        &self.delta_v
    }

    pub fn delta_r(&self) -> &Rotation3<f64> {
        &self.delta_r
    }

    pub fn delta_t(&self) -> f64 {
        self.delta_t
    }

    /// 9×9 covariance, ordered [position, velocity, rotation]
    pub fn preint_meas_cov(&self) -> &Matrix9 {
        &self.preint_meas_cov
    }
}

/// IMU Preintegration Factor
///
/// Scores a pair of navigation states against the preintegrated motion.
/// The residual is the difference between the actual end state and the end
/// state predicted from the start state, in the start body frame.
#[derive(Clone, Debug)]
pub struct ImuFactor {
    /// Preintegrated measurements between the two states
    pub preintegration: PreintegratedImuMeasurements,

    /// Gravity in navigation frame used for prediction
    pub gravity: Vector3<f64>,

    /// Information matrix (inverse of covariance) [9x9]
    pub information: Matrix9,
}

impl ImuFactor {
    pub fn new(preintegration: PreintegratedImuMeasurements, gravity: Vector3<f64>) -> Self {
        let information = match preintegration.preint_meas_cov.try_inverse() {
            Some(information) => information,
            None => {
                log::warn!("Preintegrated covariance is singular, using identity information");
                Matrix9::identity()
            }
        };

        Self {
            preintegration,
            gravity,
            information,
        }
    }

    /// Residual [position error (0:3), velocity error (3:6), rotation error (6:9)]
    pub fn evaluate_error(&self, state_i: &NavState, state_j: &NavState, bias: &ImuBias) -> Vector9 {
        let predicted = self.preintegration.predict(state_i, bias, &self.gravity);
        let r_i_t = state_i.pose.rotation.inverse();

        let pos_error = r_i_t * (state_j.pose.translation - predicted.pose.translation);
        let vel_error = r_i_t * (state_j.velocity - predicted.velocity);
        let rot_error = so3_log(&(predicted.pose.rotation.inverse() * state_j.pose.rotation));

        let mut residual = Vector9::zeros();
        residual
            .fixed_rows_mut::<3>(POSITION_OFFSET)
            .copy_from(&pos_error);
        residual
            .fixed_rows_mut::<3>(VELOCITY_OFFSET)
            .copy_from(&vel_error);
        residual
            .fixed_rows_mut::<3>(ROTATION_OFFSET)
            .copy_from(&rot_error);
        residual
    }

    /// Weighted squared error (residualᵀ · Information · residual)
    pub fn compute_weighted_error(
        &self,
        state_i: &NavState,
        state_j: &NavState,
        bias: &ImuBias,
    ) -> f64 {
        let residual = self.evaluate_error(state_i, state_j, bias);
        (residual.transpose() * self.information * residual)[0]
    }
}
