//! Activation Functions
//!
//! Nonlinearities applied inside convolution stacks and the prediction head.

use crate::{DiffPoolError, Result};
use candle_core::Tensor;

/// Softmax activation along a dimension
///
/// Converts a vector of real numbers to a probability distribution.
pub fn softmax(tensor: &Tensor, dim: usize) -> Result<Tensor> {
    candle_nn::ops::softmax(tensor, dim)
        .map_err(|e| DiffPoolError::Tensor(format!("Softmax failed: {}", e)))
}

/// ReLU activation: max(0, x)
///
/// The default nonlinearity. Max readout over zero-padded rows relies on its
/// outputs being non-negative.
pub fn relu(tensor: &Tensor) -> Result<Tensor> {
    tensor
        .relu()
        .map_err(|e| DiffPoolError::Tensor(format!("ReLU failed: {}", e)))
}

/// Leaky ReLU activation: max(αx, x)
pub fn leaky_relu(tensor: &Tensor, negative_slope: f64) -> Result<Tensor> {
    let zeros = Tensor::zeros_like(tensor)
        .map_err(|e| DiffPoolError::Tensor(format!("zeros_like failed: {}", e)))?;

    let positive = tensor
        .maximum(&zeros)
        .map_err(|e| DiffPoolError::Tensor(format!("maximum failed: {}", e)))?;

    let negative = tensor
        .minimum(&zeros)
        .map_err(|e| DiffPoolError::Tensor(format!("minimum failed: {}", e)))?;

    let scaled_negative = negative
        .affine(negative_slope, 0.0)
        .map_err(|e| DiffPoolError::Tensor(format!("scale failed: {}", e)))?;

    (positive + scaled_negative)
        .map_err(|e| DiffPoolError::Tensor(format!("leaky_relu add failed: {}", e)))
}

/// Tanh activation
///
/// Maps any real number to (-1, 1).
pub fn tanh(tensor: &Tensor) -> Result<Tensor> {
    tensor
        .tanh()
        .map_err(|e| DiffPoolError::Tensor(format!("tanh failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn tensor(vals: &[f32]) -> Tensor {
        Tensor::from_vec(vals.to_vec(), vals.len(), &Device::Cpu).unwrap()
    }

    #[test]
    fn test_relu() {
        let t = tensor(&[-2.0, -1.0, 0.0, 1.0, 2.0]);
        let r = relu(&t).unwrap();
        let vals = r.to_vec1::<f32>().unwrap();

        assert_eq!(vals, vec![0.0, 0.0, 0.0, 1.0, 2.0]);
    }

    #[test]
    fn test_leaky_relu() {
        let t = tensor(&[-2.0, -1.0, 0.0, 1.0, 2.0]);
        let r = leaky_relu(&t, 0.1).unwrap();
        let vals = r.to_vec1::<f32>().unwrap();

        assert!((vals[0] - (-0.2)).abs() < 0.001);
        assert!((vals[1] - (-0.1)).abs() < 0.001);
        assert!(vals[2].abs() < 0.001);
        assert!((vals[3] - 1.0).abs() < 0.001);
        assert!((vals[4] - 2.0).abs() < 0.001);
    }

    #[test]
    fn test_tanh() {
        let t = tensor(&[0.0]);
        let val = tanh(&t).unwrap().to_vec1::<f32>().unwrap()[0];
        assert!(val.abs() < 0.001);
    }

    #[test]
    fn test_softmax_last_axis_of_batch() {
        // [1, 2, 3]: softmax over the last axis
        let t = Tensor::from_vec(vec![1.0f32, 2.0, 3.0, 0.0, 0.0, 0.0], (1, 2, 3), &Device::Cpu)
            .unwrap();
        let s = softmax(&t, 2).unwrap();
        let rows = s.squeeze(0).unwrap().to_vec2::<f32>().unwrap();

        for row in &rows {
            let sum: f32 = row.iter().sum();
            assert!((sum - 1.0).abs() < 1e-5);
        }
        assert!(rows[0][2] > rows[0][1]);
        assert!((rows[1][0] - 1.0 / 3.0).abs() < 1e-5);
    }
}
