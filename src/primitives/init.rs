//! Weight Initialization
//!
//! Every trainable layer takes an [`Initializer`] at construction and draws
//! its own weights from it, so a model is fully initialized the moment its
//! constructor returns. Strategies own a seeded RNG, which makes a given
//! `(config, seed)` pair reproduce identical parameters.
//!
//! | Strategy | Weights | Bias |
//! |---|---|---|
//! | [`XavierUniform`] | `U(-a, a)`, `a = gain·√(6 / (fan_in + fan_out))` | zeros |
//! | [`UniformFanIn`] | `U(-k, k)`, `k = 1 / √fan_in` | `U(-k, k)` |

use crate::{DiffPoolError, Result};
use candle_core::{DType, Device, Tensor};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Strategy object that produces initial parameter values.
pub trait Initializer {
    /// Weight matrix of shape `[fan_in, fan_out]`.
    fn weight(&mut self, fan_in: usize, fan_out: usize, device: &Device) -> Result<Tensor>;

    /// Bias vector of shape `[fan_out]`. Zeros unless overridden.
    fn bias(&mut self, _fan_in: usize, fan_out: usize, device: &Device) -> Result<Tensor> {
        Tensor::zeros(fan_out, DType::F32, device)
            .map_err(|e| DiffPoolError::Tensor(format!("Failed to create bias: {}", e)))
    }
}

fn uniform(
    rng: &mut StdRng,
    bound: f64,
    shape: (usize, usize),
    device: &Device,
) -> Result<Tensor> {
    let bound = bound as f32;
    let data: Vec<f32> = (0..shape.0 * shape.1)
        .map(|_| rng.gen_range(-bound..=bound))
        .collect();
    Tensor::from_vec(data, shape, device)
        .map_err(|e| DiffPoolError::Tensor(format!("Failed to create weight: {}", e)))
}

/// Glorot/Xavier uniform initialization with an activation gain.
///
/// The gain for rectified-linear activations is `√2`, see [`XavierUniform::relu`].
#[derive(Debug, Clone)]
pub struct XavierUniform {
    gain: f64,
    rng: StdRng,
}

impl XavierUniform {
    /// Create with an explicit gain and seed
    pub fn new(gain: f64, seed: u64) -> Self {
        Self {
            gain,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Variance scaling for ReLU networks (gain `√2`)
    pub fn relu(seed: u64) -> Self {
        Self::new(std::f64::consts::SQRT_2, seed)
    }

    /// The configured gain
    pub fn gain(&self) -> f64 {
        self.gain
    }
}

impl Initializer for XavierUniform {
    fn weight(&mut self, fan_in: usize, fan_out: usize, device: &Device) -> Result<Tensor> {
        let bound = self.gain * (6.0 / (fan_in + fan_out).max(1) as f64).sqrt();
        uniform(&mut self.rng, bound, (fan_in, fan_out), device)
    }
}

/// Fan-in scaled uniform initialization for weights and biases.
///
/// Matches the conventional default for fully connected layers.
#[derive(Debug, Clone)]
pub struct UniformFanIn {
    rng: StdRng,
}

impl UniformFanIn {
    /// Create with a seed
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Initializer for UniformFanIn {
    fn weight(&mut self, fan_in: usize, fan_out: usize, device: &Device) -> Result<Tensor> {
        let bound = 1.0 / (fan_in.max(1) as f64).sqrt();
        uniform(&mut self.rng, bound, (fan_in, fan_out), device)
    }

    fn bias(&mut self, fan_in: usize, fan_out: usize, device: &Device) -> Result<Tensor> {
        let bound = 1.0 / (fan_in.max(1) as f64).sqrt();
        uniform(&mut self.rng, bound, (1, fan_out), device)?
            .squeeze(0)
            .map_err(|e| DiffPoolError::Tensor(format!("Failed to shape bias: {}", e)))
    }
}
