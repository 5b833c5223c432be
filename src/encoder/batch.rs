//! Padded graph minibatch handed to the encoder.

use crate::{DiffPoolError, Result};
use candle_core::Tensor;

/// One padded minibatch of graphs.
///
/// - `features`: `[B, N, F]`, rows past a graph's node count are zero
/// - `adjacency`: `[B, N, N]`, pairs touching padded nodes are zero
/// - `node_counts`: true node count per graph; without it nothing is masked
/// - `assign_features`: optional `[B, N, F_a]` input for the first assignment
#[derive(Debug, Clone)]
pub struct GraphBatch {
    pub features: Tensor,
    pub adjacency: Tensor,
    pub node_counts: Option<Vec<usize>>,
    pub assign_features: Option<Tensor>,
}

impl GraphBatch {
    pub fn new(features: Tensor, adjacency: Tensor) -> Self {
        Self {
            features,
            adjacency,
            node_counts: None,
            assign_features: None,
        }
    }

    /// Builder: true node counts per graph
    pub fn with_node_counts(mut self, counts: Vec<usize>) -> Self {
        self.node_counts = Some(counts);
        self
    }

    /// Builder: separate assignment-path features
    pub fn with_assign_features(mut self, features: Tensor) -> Self {
        self.assign_features = Some(features);
        self
    }

    pub fn node_counts(&self) -> Option<&[usize]> {
        self.node_counts.as_deref()
    }

    pub fn batch_size(&self) -> usize {
        self.features.dims().first().copied().unwrap_or(0)
    }

    /// Padded node count `N`
    pub fn num_nodes(&self) -> usize {
        self.features.dims().get(1).copied().unwrap_or(0)
    }

    /// Check that every tensor and count agrees on `B` and `N`.
    pub fn validate(&self) -> Result<()> {
        let (b, n, _) = self.features.dims3().map_err(|e| {
            DiffPoolError::Shape(format!("features must be [B, N, F]: {}", e))
        })?;

        if self.adjacency.dims() != [b, n, n] {
            return Err(DiffPoolError::Shape(format!(
                "adjacency {:?} does not match features {:?}",
                self.adjacency.dims(),
                self.features.dims()
            )));
        }

        if let Some(counts) = &self.node_counts {
            if counts.len() != b {
                return Err(DiffPoolError::Shape(format!(
                    "{} node counts for a batch of {}",
                    counts.len(),
                    b
                )));
            }
            if let Some((i, c)) = counts.iter().enumerate().find(|(_, &c)| c > n) {
                return Err(DiffPoolError::Shape(format!(
                    "graph {} has {} nodes but the batch is padded to {}",
                    i, c, n
                )));
            }
        }

        if let Some(assign) = &self.assign_features {
            let (ab, an, _) = assign.dims3().map_err(|e| {
                DiffPoolError::Shape(format!("assignment features must be [B, N, F_a]: {}", e))
            })?;
            if (ab, an) != (b, n) {
                return Err(DiffPoolError::Shape(format!(
                    "assignment features {:?} do not match features {:?}",
                    assign.dims(),
                    self.features.dims()
                )));
            }
        }

        Ok(())
    }
}
