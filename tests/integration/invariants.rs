use crate::common::{build, max_abs_diff, padded_batch, to_vec2, to_vec3};
use diffpool::prelude::*;

fn config() -> EncoderConfig {
    EncoderConfig::new(6, 3, 2)
        .with_dims(8, 8)
        .with_pooling(1, 0.5)
        .with_dropout(0.2)
}

#[test]
fn eval_forward_is_bit_identical() {
    let encoder = build(config(), 17);
    let batch = padded_batch(&[6, 4], 6, 3, 3);

    let a = encoder.forward(&batch).unwrap();
    let b = encoder.forward(&batch).unwrap();
    assert_eq!(to_vec2(&a.scores), to_vec2(&b.scores));
}

#[test]
fn same_seed_builds_identical_encoders() {
    let batch = padded_batch(&[6, 4], 6, 3, 3);
    let a = build(config(), 17).forward(&batch).unwrap();
    let b = build(config(), 17).forward(&batch).unwrap();
    assert_eq!(to_vec2(&a.scores), to_vec2(&b.scores));

    let c = build(config(), 18).forward(&batch).unwrap();
    assert_ne!(to_vec2(&a.scores), to_vec2(&c.scores));
}

#[test]
fn assignment_rows_are_stochastic_with_zero_padding() {
    let encoder = build(config(), 5);
    let counts = [6, 4];
    let batch = padded_batch(&counts, 6, 3, 8);

    let output = encoder.forward_t(&batch, true).unwrap();
    let sums = to_vec2(&output.assignment.unwrap().sum(2).unwrap());

    for (g, row_sums) in sums.iter().enumerate() {
        for (i, sum) in row_sums.iter().enumerate() {
            if i < counts[g] {
                assert!((sum - 1.0).abs() < 1e-5, "graph {} row {} sums to {}", g, i, sum);
            } else {
                assert_eq!(*sum, 0.0, "graph {} padded row {} sums to {}", g, i, sum);
            }
        }
    }
}

#[test]
fn padded_feature_perturbation_leaves_readouts_unchanged() {
    let encoder = build(config(), 23);
    let counts = [6, 3];
    let batch = padded_batch(&counts, 6, 3, 4);

    // Overwrite the padded rows of graph 1 with large values
    let mut x = to_vec3(&batch.features);
    for row in x[1].iter_mut().skip(counts[1]) {
        row.iter_mut().for_each(|v| *v = 50.0);
    }
    let flat: Vec<f32> = x.into_iter().flatten().flatten().collect();
    let perturbed_x = Tensor::from_vec(flat, (2, 6, 3), &Device::Cpu).unwrap();
    let perturbed = GraphBatch::new(perturbed_x, batch.adjacency.clone())
        .with_node_counts(counts.to_vec());

    let a = encoder.forward(&batch).unwrap();
    let b = encoder.forward(&perturbed).unwrap();

    for (ra, rb) in a.readouts.iter().zip(&b.readouts) {
        assert!(max_abs_diff(ra, rb) < 1e-5);
    }
    assert!(max_abs_diff(&a.scores, &b.scores) < 1e-5);
}

#[test]
fn pooled_adjacency_stays_symmetric() {
    let encoder = build(config(), 2);
    let batch = padded_batch(&[6, 5], 6, 3, 9);

    let output = encoder.forward(&batch).unwrap();
    let adj = &output.adjacencies[0];
    let adj_t = adj.transpose(1, 2).unwrap();
    assert!(max_abs_diff(adj, &adj_t) < 1e-5);
}

#[test]
fn oversized_counts_are_rejected() {
    let encoder = build(config(), 2);
    let batch = padded_batch(&[6, 5], 6, 3, 9);
    let bad = GraphBatch::new(batch.features.clone(), batch.adjacency.clone())
        .with_node_counts(vec![6, 7]);

    assert!(matches!(encoder.forward(&bad), Err(DiffPoolError::Shape(_))));
}
