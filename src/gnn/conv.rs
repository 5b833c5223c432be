//! Dense Graph Convolution
//!
//! ```text
//! X' = dropout(X)                  (training mode only)
//! Z  = A · X'  (+ X' if add_self)  (neighbor aggregation over dense adjacency)
//! Y  = Z · W (+ b)                 (projection)
//! Y  = Y / max(‖Y‖₂, 1e-12)        (per-node, if normalize)
//! ```
//!
//! Inputs are batched and padded: `X [B, N, F_in]`, `A [B, N, N]`. Padded
//! adjacency rows and columns are zero, so valid nodes never aggregate from
//! padding.

use crate::primitives::{l2_normalize, Initializer};
use crate::{DiffPoolError, Result};
use candle_core::{Device, Tensor, Var};

/// Per-layer switches for [`DenseGraphConv`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConvOptions {
    pub add_self: bool,
    pub normalize: bool,
    pub bias: bool,
    pub dropout: f32,
}

impl Default for ConvOptions {
    fn default() -> Self {
        Self {
            add_self: false,
            normalize: true,
            bias: true,
            dropout: 0.0,
        }
    }
}

/// One dense graph convolution layer with its own weight and bias
#[derive(Debug, Clone)]
pub struct DenseGraphConv {
    weight: Var,
    bias: Option<Var>,
    input_dim: usize,
    output_dim: usize,
    options: ConvOptions,
}

impl DenseGraphConv {
    pub fn new(
        input_dim: usize,
        output_dim: usize,
        options: ConvOptions,
        init: &mut dyn Initializer,
        device: &Device,
    ) -> Result<Self> {
        if input_dim == 0 || output_dim == 0 {
            return Err(DiffPoolError::Config(format!(
                "graph conv dims must be positive, got {} -> {}",
                input_dim, output_dim
            )));
        }

        let weight = Var::from_tensor(&init.weight(input_dim, output_dim, device)?)
            .map_err(|e| DiffPoolError::Tensor(format!("graph conv weight var failed: {}", e)))?;

        // Bias starts at zero regardless of the weight strategy
        let bias = if options.bias {
            Some(
                Var::zeros(output_dim, candle_core::DType::F32, device)
                    .map_err(|e| DiffPoolError::Tensor(format!("graph conv bias failed: {}", e)))?,
            )
        } else {
            None
        };

        Ok(Self {
            weight,
            bias,
            input_dim,
            output_dim,
            options,
        })
    }

    pub fn input_dim(&self) -> usize {
        self.input_dim
    }

    pub fn output_dim(&self) -> usize {
        self.output_dim
    }

    pub fn options(&self) -> &ConvOptions {
        &self.options
    }

    /// Apply the layer to `x [B, N, F_in]` over `adj [B, N, N]`.
    pub fn forward(&self, x: &Tensor, adj: &Tensor, train: bool) -> Result<Tensor> {
        let (b, n, f) = x
            .dims3()
            .map_err(|e| DiffPoolError::Shape(format!("graph conv expects [B, N, F]: {}", e)))?;
        if f != self.input_dim {
            return Err(DiffPoolError::Shape(format!(
                "graph conv expects {} input features, got {}",
                self.input_dim, f
            )));
        }
        if adj.dims() != [b, n, n] {
            return Err(DiffPoolError::Shape(format!(
                "adjacency {:?} does not match features [{}, {}, {}]",
                adj.dims(),
                b,
                n,
                f
            )));
        }

        let x = if train && self.options.dropout > 0.0 {
            candle_nn::ops::dropout(x, self.options.dropout)
                .map_err(|e| DiffPoolError::Tensor(format!("graph conv dropout failed: {}", e)))?
        } else {
            x.clone()
        };

        let mut z = adj
            .matmul(&x)
            .map_err(|e| DiffPoolError::Tensor(format!("graph conv A@X failed: {}", e)))?;

        if self.options.add_self {
            z = (z + &x)
                .map_err(|e| DiffPoolError::Tensor(format!("graph conv self add failed: {}", e)))?;
        }

        let mut y = z
            .broadcast_matmul(self.weight.as_tensor())
            .map_err(|e| DiffPoolError::Tensor(format!("graph conv matmul W failed: {}", e)))?;

        if let Some(bias) = &self.bias {
            y = y
                .broadcast_add(bias.as_tensor())
                .map_err(|e| DiffPoolError::Tensor(format!("graph conv add bias failed: {}", e)))?;
        }

        if self.options.normalize {
            y = l2_normalize(&y)?;
        }

        Ok(y)
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::XavierUniform;
    use candle_core::DType;

    fn device() -> Device {
        Device::Cpu
    }

    /// Path graph 0-1-2 with one padded node, features one-hot over 3 dims
    fn small_batch() -> (Tensor, Tensor) {
        let x = Tensor::from_vec(
            vec![
                1.0f32, 0.0, 0.0, //
                0.0, 1.0, 0.0, //
                0.0, 0.0, 1.0, //
                0.0, 0.0, 0.0,
            ],
            (1, 4, 3),
            &device(),
        )
        .unwrap();
        let adj = Tensor::from_vec(
            vec![
                0.0f32, 1.0, 0.0, 0.0, //
                1.0, 0.0, 1.0, 0.0, //
                0.0, 1.0, 0.0, 0.0, //
                0.0, 0.0, 0.0, 0.0,
            ],
            (1, 4, 4),
            &device(),
        )
        .unwrap();
        (x, adj)
    }

    #[test]
    fn test_output_shape_and_unit_norm() {
        let (x, adj) = small_batch();
        let mut init = XavierUniform::relu(3);
        let conv = DenseGraphConv::new(3, 5, ConvOptions::default(), &mut init, &device()).unwrap();

        let y = conv.forward(&x, &adj, false).unwrap();
        assert_eq!(y.dims(), &[1, 4, 5]);

        let norms: Vec<f32> = y
            .sqr()
            .unwrap()
            .sum(2)
            .unwrap()
            .sqrt()
            .unwrap()
            .squeeze(0)
            .unwrap()
            .to_vec1()
            .unwrap();
        for norm in &norms[..3] {
            assert!((norm - 1.0).abs() < 1e-4, "node norm {}", norm);
        }
        // Padded node has no neighbors, zero features and zero bias
        assert!(norms[3].abs() < 1e-6);
    }

    #[test]
    fn test_identity_weight_aggregates_neighbors() {
        let (x, adj) = small_batch();
        let mut init = XavierUniform::relu(3);
        let options = ConvOptions {
            add_self: true,
            normalize: false,
            bias: false,
            dropout: 0.0,
        };
        let conv = DenseGraphConv::new(3, 3, options, &mut init, &device()).unwrap();
        conv.weight
            .set(&Tensor::eye(3, DType::F32, &device()).unwrap())
            .unwrap();

        let y = conv.forward(&x, &adj, false).unwrap().squeeze(0).unwrap();
        let rows = y.to_vec2::<f32>().unwrap();
        // (A + I) · X for the path graph
        assert_eq!(rows[0], vec![1.0, 1.0, 0.0]);
        assert_eq!(rows[1], vec![1.0, 1.0, 1.0]);
        assert_eq!(rows[2], vec![0.0, 1.0, 1.0]);
        assert_eq!(rows[3], vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_rejects_feature_mismatch() {
        let (x, adj) = small_batch();
        let mut init = XavierUniform::relu(3);
        let conv = DenseGraphConv::new(4, 5, ConvOptions::default(), &mut init, &device()).unwrap();
        assert!(matches!(
            conv.forward(&x, &adj, false),
            Err(DiffPoolError::Shape(_))
        ));
    }

    #[test]
    fn test_rejects_adjacency_mismatch() {
        let (x, _) = small_batch();
        let adj = Tensor::zeros((1, 3, 3), DType::F32, &device()).unwrap();
        let mut init = XavierUniform::relu(3);
        let conv = DenseGraphConv::new(3, 5, ConvOptions::default(), &mut init, &device()).unwrap();
        assert!(matches!(
            conv.forward(&x, &adj, false),
            Err(DiffPoolError::Shape(_))
        ));
    }

    #[test]
    fn test_bias_toggle() {
        let mut init = XavierUniform::relu(3);
        let with_bias =
            DenseGraphConv::new(3, 5, ConvOptions::default(), &mut init, &device()).unwrap();
        let without = DenseGraphConv::new(
            3,
            5,
            ConvOptions {
                bias: false,
                ..ConvOptions::default()
            },
            &mut init,
            &device(),
        )
        .unwrap();

        assert_eq!(with_bias.trainable_vars().len(), 2);
        assert_eq!(without.trainable_vars().len(), 1);
    }

    #[test]
    fn test_dropout_applies_only_in_training() {
        let mut init = XavierUniform::relu(3);
        let options = ConvOptions {
            add_self: true,
            normalize: false,
            bias: false,
            dropout: 0.5,
        };
        let conv = DenseGraphConv::new(8, 8, options, &mut init, &device()).unwrap();
        conv.weight
            .set(&Tensor::eye(8, DType::F32, &device()).unwrap())
            .unwrap();

        // No edges, so the layer reduces to dropout(X) · I
        let x = Tensor::ones((1, 64, 8), DType::F32, &device()).unwrap();
        let adj = Tensor::zeros((1, 64, 64), DType::F32, &device()).unwrap();

        let eval: Vec<f32> = conv.forward(&x, &adj, false).unwrap().flatten_all().unwrap().to_vec1().unwrap();
        assert!(eval.iter().all(|&v| v == 1.0));

        let train: Vec<f32> = conv.forward(&x, &adj, true).unwrap().flatten_all().unwrap().to_vec1().unwrap();
        assert!(train.iter().all(|&v| v == 0.0 || (v - 2.0).abs() < 1e-6));
        let dropped = train.iter().filter(|&&v| v == 0.0).count();
        assert!(dropped > 0 && dropped < train.len(), "{} of {} dropped", dropped, train.len());
    }
}
