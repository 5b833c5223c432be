//! Graph readout: collapse the node axis of an embedding tensor.
//!
//! Padded rows arrive as exact zeros. Under max aggregation they only drop
//! out when real activations are non-negative, which holds for ReLU stacks.

use crate::config::ReadoutMode;
use crate::{DiffPoolError, Result};
use candle_core::Tensor;

/// `[B, N, E]` → `[B, E]` (max) or `[B, 2E]` (`[max, sum]`).
pub fn readout(embedding: &Tensor, mode: ReadoutMode) -> Result<Tensor> {
    embedding
        .dims3()
        .map_err(|e| DiffPoolError::Shape(format!("readout expects [B, N, E]: {}", e)))?;

    let max = embedding
        .max(1)
        .map_err(|e| DiffPoolError::Tensor(format!("readout max failed: {}", e)))?;

    match mode {
        ReadoutMode::Max => Ok(max),
        ReadoutMode::MaxSum => {
            let sum = embedding
                .sum(1)
                .map_err(|e| DiffPoolError::Tensor(format!("readout sum failed: {}", e)))?;
            Tensor::cat(&[&max, &sum], 1)
                .map_err(|e| DiffPoolError::Tensor(format!("readout cat failed: {}", e)))
        }
    }
}
