//! Prediction head: `[Linear, ReLU]*` followed by a final Linear to label
//! scores. With no hidden widths it is a single linear layer.

use super::linear::Linear;
use crate::primitives::{relu, Initializer};
use crate::Result;
use candle_core::{Device, Tensor, Var};

#[derive(Debug, Clone)]
pub struct PredictionHead {
    layers: Vec<Linear>,
}

impl PredictionHead {
    pub fn new(
        input_dim: usize,
        hidden_dims: &[usize],
        label_dim: usize,
        init: &mut dyn Initializer,
        device: &Device,
    ) -> Result<Self> {
        let mut layers = Vec::with_capacity(hidden_dims.len() + 1);
        let mut fan_in = input_dim;
        for &width in hidden_dims {
            layers.push(Linear::new(fan_in, width, true, init, device)?);
            fan_in = width;
        }
        layers.push(Linear::new(fan_in, label_dim, true, init, device)?);

        Ok(Self { layers })
    }

    pub fn input_dim(&self) -> usize {
        self.layers[0].input_dim()
    }

    pub fn label_dim(&self) -> usize {
        self.layers[self.layers.len() - 1].output_dim()
    }

    /// `[B, D]` representation → `[B, L]` pre-softmax scores
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let last = self.layers.len() - 1;
        let mut h = x.clone();
        for (i, layer) in self.layers.iter().enumerate() {
            h = layer.forward(&h)?;
            if i < last {
                h = relu(&h)?;
            }
        }
        Ok(h)
    }

    pub fn trainable_vars(&self) -> Vec<Var> {
        self.layers.iter().flat_map(|l| l.trainable_vars()).collect()
    }

    pub fn named_state(&self, prefix: &str) -> Vec<(String, Var)> {
        self.layers
            .iter()
            .enumerate()
            .flat_map(|(i, l)| l.named_state(&format!("{}.fc{}", prefix, i)))
            .collect()
    }
}
