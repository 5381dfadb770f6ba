//! Isotropic Gaussian noise models and seeded samplers
//!
//! A noise model only describes the distribution. Drawing from it needs a
//! `Sampler`, which owns its random state so independent trials can each hold
//! their own stream.

use nalgebra::{DMatrix, DVector, Matrix3, Vector3};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;

use crate::error::{Result, ScenarioError};

/// Gaussian noise with the same standard deviation on every axis
#[derive(Clone, Debug, PartialEq)]
pub struct Isotropic {
    dim: usize,
    sigma: f64,
}

impl Isotropic {
    /// Create a `dim`-dimensional model with per-axis standard deviation `sigma`
    pub fn sigma(dim: usize, sigma: f64) -> Result<Self> {
        if dim == 0 {
            return Err(ScenarioError::InvalidDimension(dim));
        }
        if !sigma.is_finite() || sigma < 0.0 {
            return Err(ScenarioError::InvalidSigma(sigma));
        }
        Ok(Self { dim, sigma })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn sigma_value(&self) -> f64 {
        self.sigma
    }

    pub fn variance(&self) -> f64 {
        self.sigma * self.sigma
    }

    /// Covariance σ² I
    pub fn covariance(&self) -> DMatrix<f64> {
        DMatrix::identity(self.dim, self.dim) * self.variance()
    }

    /// Covariance of a 3-axis model as a fixed-size matrix
    pub fn covariance3(&self) -> Result<Matrix3<f64>> {
        self.expect_dim(3)?;
        Ok(Matrix3::identity() * self.variance())
    }

    /// Same model with sigma multiplied by `factor`
    pub fn scaled(&self, factor: f64) -> Result<Self> {
        Self::sigma(self.dim, self.sigma * factor)
    }

    fn expect_dim(&self, expected: usize) -> Result<()> {
        if self.dim != expected {
            return Err(ScenarioError::DimensionMismatch {
                expected,
                actual: self.dim,
            });
        }
        Ok(())
    }
}

/// Draws noise vectors from an `Isotropic` model
///
/// Deterministic for a given (seed, stream) pair.
#[derive(Clone, Debug)]
pub struct Sampler {
    model: Isotropic,
    rng: ChaCha8Rng,
}

impl Sampler {
    pub fn new(model: Isotropic, seed: u64) -> Self {
        Self {
            model,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Sampler on an independent ChaCha stream of the same seed
    ///
    /// Streams never overlap, so trials keyed by stream index get
    /// statistically independent draws.
    pub fn with_stream(model: Isotropic, seed: u64, stream: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        rng.set_stream(stream);
        Self { model, rng }
    }

    pub fn model(&self) -> &Isotropic {
        &self.model
    }

    /// Draw one sample of the model's dimension
    pub fn sample(&mut self) -> DVector<f64> {
        let sigma = self.model.sigma;
        let rng = &mut self.rng;
        DVector::from_fn(self.model.dim, |_, _| sigma * rng.sample::<f64, _>(StandardNormal))
    }

    /// Draw one 3-axis sample
    pub fn sample3(&mut self) -> Result<Vector3<f64>> {
        self.model.expect_dim(3)?;
        let sigma = self.model.sigma;
        let rng = &mut self.rng;
        let mut draw = || sigma * rng.sample::<f64, _>(StandardNormal);
        Ok(Vector3::new(draw(), draw(), draw()))
    }
}
