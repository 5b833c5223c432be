//! Convolution Stack
//!
//! `first (F_in → H)`, `num_layers - 2` middle layers `(H → H)` and
//! `last (H → E)`. Every layer is followed by the configured nonlinearity;
//! every layer except the last is followed by batch normalization unless the
//! stack has none or the caller asks to skip it. Dropout applies to the
//! inputs of middle layers only.
//!
//! The output is either the concatenation of all layer outputs along the
//! feature axis (`H · (num_layers - 1) + E`) or the last layer's output
//! alone. An optional `[B, N, 1]` mask zeroes padded rows of the result.

use super::conv::{ConvOptions, DenseGraphConv};
use super::norm::NodeBatchNorm;
use crate::config::{Activation, EncoderConfig};
use crate::primitives::Initializer;
use crate::{DiffPoolError, Result};
use candle_core::{Device, Tensor, Var};

/// Construction parameters for a [`ConvStack`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StackSpec {
    pub input_dim: usize,
    pub hidden_dim: usize,
    pub output_dim: usize,
    pub num_layers: usize,
    pub concat: bool,
    pub add_self: bool,
    pub normalize: bool,
    pub bias: bool,
    pub dropout: f32,
    pub batch_norm: bool,
    pub activation: Activation,
}

impl StackSpec {
    /// Main-path embedding stack reading `input_dim` features
    pub fn embedding(config: &EncoderConfig, input_dim: usize) -> Self {
        Self {
            input_dim,
            hidden_dim: config.hidden_dim,
            output_dim: config.embedding_dim,
            num_layers: config.num_layers,
            concat: config.concat,
            add_self: config.add_self(),
            normalize: config.normalize_embedding,
            bias: config.bias,
            dropout: config.dropout,
            batch_norm: config.batch_norm,
            activation: config.activation,
        }
    }

    /// Assignment stack for the pooling step out of `level`; its last layer
    /// is as wide as the next level's node count and it carries no
    /// normalization layers.
    pub fn assignment(config: &EncoderConfig, level: usize, output_nodes: usize) -> Self {
        Self {
            input_dim: config.assign_input_dim(level),
            hidden_dim: config.assign_hidden_dim,
            output_dim: output_nodes,
            num_layers: config.assign_layers(),
            concat: config.concat,
            add_self: config.add_self(),
            normalize: config.normalize_embedding,
            bias: config.bias,
            dropout: config.dropout,
            batch_norm: false,
            activation: config.activation,
        }
    }

    /// Width of the stack's output tensor
    pub fn embed_dim(&self) -> usize {
        if self.concat {
            self.hidden_dim * (self.num_layers - 1) + self.output_dim
        } else {
            self.output_dim
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConvStack {
    layers: Vec<DenseGraphConv>,
    norms: Vec<NodeBatchNorm>,
    activation: Activation,
    concat: bool,
    output_dim: usize,
}

impl ConvStack {
    pub fn new(spec: StackSpec, init: &mut dyn Initializer, device: &Device) -> Result<Self> {
        if spec.num_layers < 2 {
            return Err(DiffPoolError::Config(format!(
                "convolution stack needs at least 2 layers, got {}",
                spec.num_layers
            )));
        }

        let outer = ConvOptions {
            add_self: spec.add_self,
            normalize: spec.normalize,
            bias: spec.bias,
            dropout: 0.0,
        };
        let middle = ConvOptions {
            dropout: spec.dropout,
            ..outer
        };

        let mut layers = Vec::with_capacity(spec.num_layers);
        layers.push(DenseGraphConv::new(
            spec.input_dim,
            spec.hidden_dim,
            outer,
            init,
            device,
        )?);
        for _ in 0..spec.num_layers - 2 {
            layers.push(DenseGraphConv::new(
                spec.hidden_dim,
                spec.hidden_dim,
                middle,
                init,
                device,
            )?);
        }
        layers.push(DenseGraphConv::new(
            spec.hidden_dim,
            spec.output_dim,
            outer,
            init,
            device,
        )?);

        let norms = if spec.batch_norm {
            (0..spec.num_layers - 1)
                .map(|_| NodeBatchNorm::new(spec.hidden_dim, device))
                .collect::<Result<Vec<_>>>()?
        } else {
            Vec::new()
        };

        Ok(Self {
            layers,
            norms,
            activation: spec.activation,
            concat: spec.concat,
            output_dim: spec.embed_dim(),
        })
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn input_dim(&self) -> usize {
        self.layers[0].input_dim()
    }

    /// Width of the tensor returned by [`ConvStack::forward`]
    pub fn output_dim(&self) -> usize {
        self.output_dim
    }

    pub fn has_batch_norm(&self) -> bool {
        !self.norms.is_empty()
    }

    /// Run the stack over `x [B, N, F_in]` and `adj [B, N, N]`.
    ///
    /// `skip_norm` disables batch normalization for this pass.
    pub fn forward(
        &self,
        x: &Tensor,
        adj: &Tensor,
        mask: Option<&Tensor>,
        skip_norm: bool,
        train: bool,
    ) -> Result<Tensor> {
        let last = self.layers.len() - 1;
        let mut outputs = Vec::with_capacity(self.layers.len());
        let mut h = x.clone();

        for (i, layer) in self.layers.iter().enumerate() {
            h = layer.forward(&h, adj, train)?;
            h = self.activation.apply(&h)?;
            if i < last && !skip_norm {
                if let Some(norm) = self.norms.get(i) {
                    h = norm.forward_t(&h, train)?;
                }
            }
            if self.concat {
                outputs.push(h.clone());
            }
        }

        let out = if self.concat {
            Tensor::cat(&outputs, 2)
                .map_err(|e| DiffPoolError::Tensor(format!("stack concat failed: {}", e)))?
        } else {
            h
        };

        match mask {
            Some(mask) => out
                .broadcast_mul(mask)
                .map_err(|e| DiffPoolError::Tensor(format!("stack mask failed: {}", e))),
            None => Ok(out),
        }
    }

    pub fn trainable_vars(&self) -> Vec<Var> {
        self.layers
            .iter()
            .flat_map(|l| l.trainable_vars())
            .chain(self.norms.iter().flat_map(|n| n.trainable_vars()))
            .collect()
    }

    pub fn named_state(&self, prefix: &str) -> Vec<(String, Var)> {
        let mut state = Vec::new();
        for (i, layer) in self.layers.iter().enumerate() {
            state.extend(layer.named_state(&format!("{}.conv{}", prefix, i)));
        }
        for (i, norm) in self.norms.iter().enumerate() {
            state.extend(norm.named_state(&format!("{}.bn{}", prefix, i)));
        }
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::{construct_mask, XavierUniform};
    use candle_core::DType;

    fn spec(concat: bool, num_layers: usize) -> StackSpec {
        StackSpec {
            input_dim: 3,
            hidden_dim: 4,
            output_dim: 6,
            num_layers,
            concat,
            add_self: !concat,
            normalize: true,
            bias: true,
            dropout: 0.0,
            batch_norm: true,
            activation: Activation::ReLU,
        }
    }

    fn inputs() -> (Tensor, Tensor) {
        let x = Tensor::ones((2, 5, 3), DType::F32, &Device::Cpu).unwrap();
        let adj = Tensor::ones((2, 5, 5), DType::F32, &Device::Cpu).unwrap();
        (x, adj)
    }

    #[test]
    fn test_concat_width() {
        let mut init = XavierUniform::relu(5);
        let stack = ConvStack::new(spec(true, 3), &mut init, &Device::Cpu).unwrap();
        let (x, adj) = inputs();

        let out = stack.forward(&x, &adj, None, false, true).unwrap();
        assert_eq!(stack.output_dim(), 4 + 4 + 6);
        assert_eq!(out.dims(), &[2, 5, 14]);
    }

    #[test]
    fn test_last_only_width() {
        let mut init = XavierUniform::relu(5);
        let stack = ConvStack::new(spec(false, 4), &mut init, &Device::Cpu).unwrap();
        let (x, adj) = inputs();

        let out = stack.forward(&x, &adj, None, false, false).unwrap();
        assert_eq!(stack.num_layers(), 4);
        assert_eq!(out.dims(), &[2, 5, 6]);
    }

    #[test]
    fn test_mask_zeroes_padded_rows() {
        let mut init = XavierUniform::relu(5);
        let stack = ConvStack::new(spec(true, 2), &mut init, &Device::Cpu).unwrap();
        let (x, adj) = inputs();
        let mask = construct_mask(&[5, 2], 5, &Device::Cpu).unwrap();

        let out = stack.forward(&x, &adj, Some(&mask), true, false).unwrap();
        let second: Vec<Vec<f32>> = out.get(1).unwrap().to_vec2().unwrap();
        for row in &second[2..] {
            assert!(row.iter().all(|v| *v == 0.0));
        }
    }

    #[test]
    fn test_relu_outputs_non_negative() {
        let mut init = XavierUniform::relu(9);
        let stack = ConvStack::new(spec(true, 3), &mut init, &Device::Cpu).unwrap();
        let (x, adj) = inputs();

        // Batch norm is the last op on non-final layers; skip it to see raw activations
        let out = stack.forward(&x, &adj, None, true, false).unwrap();
        let vals: Vec<f32> = out.flatten_all().unwrap().to_vec1().unwrap();
        assert!(vals.iter().all(|v| *v >= 0.0));
    }

    #[test]
    fn test_rejects_single_layer() {
        let mut init = XavierUniform::relu(5);
        assert!(matches!(
            ConvStack::new(spec(true, 1), &mut init, &Device::Cpu),
            Err(DiffPoolError::Config(_))
        ));
    }

    #[test]
    fn test_var_counts() {
        let mut init = XavierUniform::relu(5);
        let stack = ConvStack::new(spec(true, 3), &mut init, &Device::Cpu).unwrap();
        // 3 convs × (W, b) + 2 norms × (gamma, beta)
        assert_eq!(stack.trainable_vars().len(), 10);
        // plus running mean/var per norm
        assert_eq!(stack.named_state("embed0").len(), 14);
    }
}
