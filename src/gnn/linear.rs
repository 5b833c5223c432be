//! Fully connected layer shared by the assignment projection and the
//! prediction head.

use crate::primitives::Initializer;
use crate::{DiffPoolError, Result};
use candle_core::{Device, Tensor, Var};

/// `y = x · W + b` over the last axis of a rank-2 or rank-3 input.
#[derive(Debug, Clone)]
pub struct Linear {
    weight: Var,
    bias: Option<Var>,
    input_dim: usize,
    output_dim: usize,
}

impl Linear {
    /// Create a layer whose parameters are drawn from `init`
    pub fn new(
        input_dim: usize,
        output_dim: usize,
        bias: bool,
        init: &mut dyn Initializer,
        device: &Device,
    ) -> Result<Self> {
        let weight = Var::from_tensor(&init.weight(input_dim, output_dim, device)?)
            .map_err(|e| DiffPoolError::Tensor(format!("linear weight var failed: {}", e)))?;

        let bias = if bias {
            let b = init.bias(input_dim, output_dim, device)?;
            Some(
                Var::from_tensor(&b)
                    .map_err(|e| DiffPoolError::Tensor(format!("linear bias var failed: {}", e)))?,
            )
        } else {
            None
        };

        Ok(Self {
            weight,
            bias,
            input_dim,
            output_dim,
        })
    }

    pub fn input_dim(&self) -> usize {
        self.input_dim
    }

    pub fn output_dim(&self) -> usize {
        self.output_dim
    }

    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let last = x.dims().last().copied().unwrap_or(0);
        if last != self.input_dim {
            return Err(DiffPoolError::Shape(format!(
                "linear layer expects {} input features, got {:?}",
                self.input_dim,
                x.dims()
            )));
        }

        let out = x
            .broadcast_matmul(self.weight.as_tensor())
            .map_err(|e| DiffPoolError::Tensor(format!("linear matmul failed: {}", e)))?;

        match &self.bias {
            Some(b) => out
                .broadcast_add(b.as_tensor())
                .map_err(|e| DiffPoolError::Tensor(format!("linear add bias failed: {}", e))),
            None => Ok(out),
        }
    }

    pub fn trainable_vars(&self) -> Vec<Var> {
        let mut vars = vec![self.weight.clone()];
        if let Some(b) = &self.bias {
            vars.push(b.clone());
        }
        vars
    }

    pub fn named_state(&self, prefix: &str) -> Vec<(String, Var)> {
        let mut state = vec![(format!("{}.weight", prefix), self.weight.clone())];
        if let Some(b) = &self.bias {
            state.push((format!("{}.bias", prefix), b.clone()));
        }
        state
    }
}
