//! Pooling step: coarsen a graph with a soft assignment.
//!
//! ```text
//! X' = Sᵀ · X         [B, N_out, E]
//! A' = Sᵀ · A · S     [B, N_out, N_out]
//! ```
//!
//! No renormalization is applied to either result.

use crate::primitives::batch_transpose;
use crate::{DiffPoolError, Result};
use candle_core::Tensor;

/// Features and adjacency of a coarsened graph
#[derive(Debug, Clone)]
pub struct PooledGraph {
    pub features: Tensor,
    pub adjacency: Tensor,
}

/// Pool `embedding [B, N_in, E]` and `adjacency [B, N_in, N_in]` through
/// `assignment [B, N_in, N_out]`.
pub fn pool(assignment: &Tensor, embedding: &Tensor, adjacency: &Tensor) -> Result<PooledGraph> {
    let (b, n_in, _) = assignment
        .dims3()
        .map_err(|e| DiffPoolError::Shape(format!("assignment must be [B, N_in, N_out]: {}", e)))?;
    let (eb, en, _) = embedding
        .dims3()
        .map_err(|e| DiffPoolError::Shape(format!("embedding must be [B, N, E]: {}", e)))?;
    if (eb, en) != (b, n_in) || adjacency.dims() != [b, n_in, n_in] {
        return Err(DiffPoolError::Shape(format!(
            "pooling {:?} with embedding {:?} and adjacency {:?}",
            assignment.dims(),
            embedding.dims(),
            adjacency.dims()
        )));
    }

    let s_t = batch_transpose(assignment)?;

    let features = s_t
        .matmul(embedding)
        .map_err(|e| DiffPoolError::Tensor(format!("pool Sᵀ·X failed: {}", e)))?;

    let adjacency = s_t
        .matmul(adjacency)
        .and_then(|t| t.matmul(assignment))
        .map_err(|e| DiffPoolError::Tensor(format!("pool Sᵀ·A·S failed: {}", e)))?;

    Ok(PooledGraph {
        features,
        adjacency,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn test_hard_assignment_merges_nodes() {
        // Nodes 0 and 1 collapse into cluster 0, node 2 forms cluster 1
        let s = Tensor::from_vec(
            vec![
                1.0f32, 0.0, //
                1.0, 0.0, //
                0.0, 1.0,
            ],
            (1, 3, 2),
            &Device::Cpu,
        )
        .unwrap();
        // Path 0-1-2
        let adj = Tensor::from_vec(
            vec![
                0.0f32, 1.0, 0.0, //
                1.0, 0.0, 1.0, //
                0.0, 1.0, 0.0,
            ],
            (1, 3, 3),
            &Device::Cpu,
        )
        .unwrap();
        let x = Tensor::from_vec(vec![1.0f32, 2.0, 4.0], (1, 3, 1), &Device::Cpu).unwrap();

        let pooled = pool(&s, &x, &adj).unwrap();

        let feats: Vec<Vec<f32>> = pooled.features.squeeze(0).unwrap().to_vec2().unwrap();
        assert_eq!(feats, vec![vec![3.0], vec![4.0]]);

        // Internal edge 0-1 counted twice on the diagonal, one edge each way between clusters
        let a: Vec<Vec<f32>> = pooled.adjacency.squeeze(0).unwrap().to_vec2().unwrap();
        assert_eq!(a, vec![vec![2.0, 1.0], vec![1.0, 0.0]]);
    }

    #[test]
    fn test_output_shapes() {
        let s = Tensor::rand(0f32, 1.0, (2, 5, 3), &Device::Cpu).unwrap();
        let x = Tensor::rand(0f32, 1.0, (2, 5, 7), &Device::Cpu).unwrap();
        let adj = Tensor::rand(0f32, 1.0, (2, 5, 5), &Device::Cpu).unwrap();

        let pooled = pool(&s, &x, &adj).unwrap();
        assert_eq!(pooled.features.dims(), &[2, 3, 7]);
        assert_eq!(pooled.adjacency.dims(), &[2, 3, 3]);
    }

    #[test]
    fn test_rejects_mismatched_embedding() {
        let s = Tensor::rand(0f32, 1.0, (2, 5, 3), &Device::Cpu).unwrap();
        let x = Tensor::rand(0f32, 1.0, (2, 4, 7), &Device::Cpu).unwrap();
        let adj = Tensor::rand(0f32, 1.0, (2, 5, 5), &Device::Cpu).unwrap();

        assert!(matches!(pool(&s, &x, &adj), Err(DiffPoolError::Shape(_))));
    }
}
