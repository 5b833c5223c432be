//! Shared fixtures for integration tests.

#![allow(dead_code)]

use diffpool::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Padded batch of random undirected graphs.
///
/// Valid rows get features in `[0, 1)` and a random symmetric 0/1 adjacency
/// (with a path backbone so no valid node is isolated); everything touching
/// padded nodes is zero.
pub fn padded_batch(counts: &[usize], n: usize, f: usize, seed: u64) -> GraphBatch {
    let mut rng = StdRng::seed_from_u64(seed);
    let b = counts.len();
    let mut x = vec![0.0f32; b * n * f];
    let mut adj = vec![0.0f32; b * n * n];

    for (g, &count) in counts.iter().enumerate() {
        for i in 0..count {
            for k in 0..f {
                x[(g * n + i) * f + k] = rng.gen_range(0.0..1.0);
            }
        }
        for i in 0..count {
            for j in (i + 1)..count {
                if j == i + 1 || rng.gen_bool(0.3) {
                    adj[(g * n + i) * n + j] = 1.0;
                    adj[(g * n + j) * n + i] = 1.0;
                }
            }
        }
    }

    let x = Tensor::from_vec(x, (b, n, f), &Device::Cpu).unwrap();
    let adj = Tensor::from_vec(adj, (b, n, n), &Device::Cpu).unwrap();
    GraphBatch::new(x, adj).with_node_counts(counts.to_vec())
}

pub fn labels(values: &[u32]) -> Tensor {
    Tensor::from_vec(values.to_vec(), values.len(), &Device::Cpu).unwrap()
}

pub fn build(config: EncoderConfig, seed: u64) -> HierarchicalEncoder {
    HierarchicalEncoder::new(config, &mut XavierUniform::relu(seed), &Device::Cpu).unwrap()
}

pub fn to_vec2(t: &Tensor) -> Vec<Vec<f32>> {
    t.to_vec2::<f32>().unwrap()
}

pub fn to_vec3(t: &Tensor) -> Vec<Vec<Vec<f32>>> {
    t.to_vec3::<f32>().unwrap()
}

pub fn max_abs_diff(a: &Tensor, b: &Tensor) -> f32 {
    (a - b)
        .unwrap()
        .abs()
        .unwrap()
        .flatten_all()
        .unwrap()
        .max(0)
        .unwrap()
        .to_scalar::<f32>()
        .unwrap()
}
