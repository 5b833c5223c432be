//! Batch normalization over the batch × node population.
//!
//! Statistics are computed per feature across every node row of every graph
//! in the batch (padded rows included). Training mode normalizes with batch
//! statistics and folds them into the running estimates; evaluation mode
//! uses the running estimates only, which keeps inference deterministic and
//! row-independent.

use crate::{DiffPoolError, Result};
use candle_core::{DType, Device, Tensor, Var};

const BN_EPS: f64 = 1e-5;
const BN_MOMENTUM: f64 = 0.1;

#[derive(Debug, Clone)]
pub struct NodeBatchNorm {
    gamma: Var,
    beta: Var,
    running_mean: Var,
    running_var: Var,
    num_features: usize,
}

impl NodeBatchNorm {
    pub fn new(num_features: usize, device: &Device) -> Result<Self> {
        let make = |value: f32, what: &str| {
            Tensor::full(value, num_features, device)
                .and_then(|t| Var::from_tensor(&t))
                .map_err(|e| DiffPoolError::Tensor(format!("batch norm {} init failed: {}", what, e)))
        };

        Ok(Self {
            gamma: make(1.0, "gamma")?,
            beta: make(0.0, "beta")?,
            running_mean: make(0.0, "running mean")?,
            running_var: make(1.0, "running var")?,
            num_features,
        })
    }

    pub fn num_features(&self) -> usize {
        self.num_features
    }

    /// Normalize `x [B, N, F]`.
    pub fn forward_t(&self, x: &Tensor, train: bool) -> Result<Tensor> {
        let (b, n, f) = x
            .dims3()
            .map_err(|e| DiffPoolError::Shape(format!("batch norm expects [B, N, F]: {}", e)))?;
        if f != self.num_features {
            return Err(DiffPoolError::Shape(format!(
                "batch norm over {} features got {}",
                self.num_features, f
            )));
        }

        let (mean, var) = if train {
            let rows = x
                .reshape((b * n, f))
                .map_err(|e| DiffPoolError::Tensor(format!("batch norm reshape failed: {}", e)))?;
            let mean = rows
                .mean(0)
                .map_err(|e| DiffPoolError::Tensor(format!("batch norm mean failed: {}", e)))?;
            let var = rows
                .broadcast_sub(&mean)
                .and_then(|c| c.sqr())
                .and_then(|c| c.mean(0))
                .map_err(|e| DiffPoolError::Tensor(format!("batch norm var failed: {}", e)))?;

            self.update_running(&mean, &var, b * n)?;
            (mean, var)
        } else {
            (
                self.running_mean.as_tensor().clone(),
                self.running_var.as_tensor().clone(),
            )
        };

        let std = var
            .affine(1.0, BN_EPS)
            .and_then(|v| v.sqrt())
            .map_err(|e| DiffPoolError::Tensor(format!("batch norm std failed: {}", e)))?;

        x.broadcast_sub(&mean)
            .and_then(|c| c.broadcast_div(&std))
            .and_then(|c| c.broadcast_mul(self.gamma.as_tensor()))
            .and_then(|c| c.broadcast_add(self.beta.as_tensor()))
            .map_err(|e| DiffPoolError::Tensor(format!("batch norm scale failed: {}", e)))
    }

    fn update_running(&self, mean: &Tensor, var: &Tensor, population: usize) -> Result<()> {
        // Running variance tracks the unbiased estimate
        let correction = if population > 1 {
            population as f64 / (population - 1) as f64
        } else {
            1.0
        };

        let mean = mean.detach();
        let var = var
            .detach()
            .affine(correction, 0.0)
            .map_err(|e| DiffPoolError::Tensor(format!("batch norm correction failed: {}", e)))?;

        let new_mean = (self.running_mean.as_tensor().affine(1.0 - BN_MOMENTUM, 0.0)?
            + mean.affine(BN_MOMENTUM, 0.0)?)
        .map_err(|e| DiffPoolError::Tensor(format!("running mean update failed: {}", e)))?;
        let new_var = (self.running_var.as_tensor().affine(1.0 - BN_MOMENTUM, 0.0)?
            + var.affine(BN_MOMENTUM, 0.0)?)
        .map_err(|e| DiffPoolError::Tensor(format!("running var update failed: {}", e)))?;

        self.running_mean
            .set(&new_mean.to_dtype(DType::F32)?)
            .map_err(|e| DiffPoolError::Tensor(format!("running mean set failed: {}", e)))?;
        self.running_var
            .set(&new_var.to_dtype(DType::F32)?)
            .map_err(|e| DiffPoolError::Tensor(format!("running var set failed: {}", e)))?;
        Ok(())
    }

    /// Affine parameters updated by the optimizer
    pub fn trainable_vars(&self) -> Vec<Var> {
        vec![self.gamma.clone(), self.beta.clone()]
    }

    /// All persistent state, running statistics included
    pub fn named_state(&self, prefix: &str) -> Vec<(String, Var)> {
        vec![
            (format!("{}.gamma", prefix), self.gamma.clone()),
            (format!("{}.beta", prefix), self.beta.clone()),
            (format!("{}.running_mean", prefix), self.running_mean.clone()),
            (format!("{}.running_var", prefix), self.running_var.clone()),
        ]
    }
}
