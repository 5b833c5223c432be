//! Assignment Module
//!
//! Learns the soft cluster assignment `S [B, N_in, N_out]` for one pooling
//! step:
//!
//! ```text
//! H = ConvStack(X_assign, A)   (no batch norm, masked)
//! S = softmax(H · W + b)       (row-wise over N_out)
//! S = S ⊙ mask                 (padded input rows become zero)
//! ```
//!
//! Valid rows of `S` sum to 1. Padded rows are zeroed after the softmax, not
//! renormalized.

use super::linear::Linear;
use super::stack::{ConvStack, StackSpec};
use crate::config::EncoderConfig;
use crate::primitives::{softmax, Initializer};
use crate::{DiffPoolError, Result};
use candle_core::{Device, Tensor, Var};

#[derive(Debug, Clone)]
pub struct AssignmentModule {
    stack: ConvStack,
    projection: Linear,
    output_nodes: usize,
}

impl AssignmentModule {
    pub fn new(spec: StackSpec, bias: bool, init: &mut dyn Initializer, device: &Device) -> Result<Self> {
        let stack = ConvStack::new(spec, init, device)?;
        let projection = Linear::new(stack.output_dim(), spec.output_dim, bias, init, device)?;

        Ok(Self {
            stack,
            projection,
            output_nodes: spec.output_dim,
        })
    }

    /// Assignment module pooling `level` into `output_nodes` clusters
    pub fn from_config(
        config: &EncoderConfig,
        level: usize,
        output_nodes: usize,
        init: &mut dyn Initializer,
        device: &Device,
    ) -> Result<Self> {
        Self::new(
            StackSpec::assignment(config, level, output_nodes),
            config.bias,
            init,
            device,
        )
    }

    /// Number of clusters `N_out`
    pub fn output_nodes(&self) -> usize {
        self.output_nodes
    }

    pub fn input_dim(&self) -> usize {
        self.stack.input_dim()
    }

    /// Compute `S` from assignment features `x [B, N, F_a]` over `adj`.
    pub fn forward(
        &self,
        x: &Tensor,
        adj: &Tensor,
        mask: Option<&Tensor>,
        train: bool,
    ) -> Result<Tensor> {
        let h = self.stack.forward(x, adj, mask, true, train)?;
        let logits = self.projection.forward(&h)?;
        let s = softmax(&logits, 2)?;

        match mask {
            Some(mask) => s
                .broadcast_mul(mask)
                .map_err(|e| DiffPoolError::Tensor(format!("assignment mask failed: {}", e))),
            None => Ok(s),
        }
    }

    pub fn trainable_vars(&self) -> Vec<Var> {
        let mut vars = self.stack.trainable_vars();
        vars.extend(self.projection.trainable_vars());
        vars
    }

    pub fn named_state(&self, prefix: &str) -> Vec<(String, Var)> {
        let mut state = self.stack.named_state(&format!("{}.stack", prefix));
        state.extend(self.projection.named_state(&format!("{}.proj", prefix)));
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::{construct_mask, XavierUniform};
    use candle_core::DType;

    fn module(nodes_out: usize) -> AssignmentModule {
        let config = EncoderConfig::new(6, 3, 2).with_dims(8, 8);
        let mut init = XavierUniform::relu(11);
        AssignmentModule::from_config(&config, 0, nodes_out, &mut init, &Device::Cpu).unwrap()
    }

    fn inputs() -> (Tensor, Tensor) {
        let x = Tensor::rand(0f32, 1.0, (2, 6, 3), &Device::Cpu).unwrap();
        let adj = Tensor::ones((2, 6, 6), DType::F32, &Device::Cpu).unwrap();
        (x, adj)
    }

    #[test]
    fn test_rows_are_stochastic() {
        let assign = module(3);
        let (x, adj) = inputs();

        let s = assign.forward(&x, &adj, None, false).unwrap();
        assert_eq!(s.dims(), &[2, 6, 3]);

        let sums: Vec<Vec<f32>> = s.sum(2).unwrap().to_vec2().unwrap();
        for row in sums.iter().flatten() {
            assert!((row - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_padded_rows_are_zero() {
        let assign = module(3);
        let (x, adj) = inputs();
        let mask = construct_mask(&[6, 4], 6, &Device::Cpu).unwrap();

        let s = assign.forward(&x, &adj, Some(&mask), false).unwrap();
        let sums: Vec<Vec<f32>> = s.sum(2).unwrap().to_vec2().unwrap();

        for (i, sum) in sums[1].iter().enumerate() {
            if i < 4 {
                assert!((sum - 1.0).abs() < 1e-5, "valid row {} sums to {}", i, sum);
            } else {
                assert_eq!(*sum, 0.0, "padded row {} sums to {}", i, sum);
            }
        }
    }

    #[test]
    fn test_stack_has_no_batch_norm() {
        let assign = module(2);
        assert!(!assign.stack.has_batch_norm());
        assert_eq!(assign.output_nodes(), 2);
        assert_eq!(assign.input_dim(), 3);
    }
}
