use crate::common::{build, labels, padded_batch};
use diffpool::prelude::*;

fn two_graph_config() -> EncoderConfig {
    EncoderConfig::new(4, 2, 3)
        .with_dims(8, 6)
        .with_pooling(1, 0.5)
        .with_entropy_weight(0.1)
}

#[test]
fn two_graph_batch_single_stage() {
    let config = two_graph_config();
    let encoder = build(config.clone(), 7);
    let batch = padded_batch(&[4, 3], 4, 2, 11);

    let output = encoder.forward_t(&batch, true).unwrap();

    assert_eq!(encoder.stage_node_counts(), &[4, 2]);
    assert_eq!(output.scores.dims(), &[2, 3]);
    assert_eq!(output.adjacencies.len(), 1);
    assert_eq!(output.adjacencies[0].dims(), &[2, 2, 2]);

    // D0 + D1, both levels concatenate 8 + 8 + 6
    assert_eq!(output.readouts.len(), 2);
    assert_eq!(output.readouts[0].dims(), &[2, 22]);
    assert_eq!(output.readouts[1].dims(), &[2, 22]);
    assert_eq!(output.representation.dims(), &[2, 44]);

    let assignment = output.assignment.as_ref().unwrap();
    assert_eq!(assignment.dims(), &[2, 4, 2]);
    assert_eq!(output.assign_level, Some(0));

    let loss = encoder
        .loss(&output, &labels(&[0, 2]), batch.node_counts())
        .unwrap();
    let total = loss.total_value().unwrap();
    assert!(total.is_finite(), "total loss {}", total);
    assert!(total >= 0.0, "total loss {}", total);
    assert!(loss.link.is_some());
    assert!(loss.entropy.is_some());
    assert!(loss.warnings.is_empty());

    let grads = loss.total.backward().unwrap();
    assert!(check_gradients_health(&grads, &encoder.trainable_vars()));
}

#[test]
fn flat_classifier_uses_primary_loss_only() {
    let config = EncoderConfig::new(5, 3, 2).with_pooling(0, 0.5);
    let encoder = build(config, 3);
    let batch = padded_batch(&[5, 2, 4], 5, 3, 5);

    let output = encoder.forward(&batch).unwrap();
    assert_eq!(output.scores.dims(), &[3, 2]);
    assert!(output.assignment.is_none());

    let loss = encoder
        .loss(&output, &labels(&[0, 1, 1]), batch.node_counts())
        .unwrap();
    assert!(loss.link.is_none());
    assert!(loss.entropy.is_none());
    assert_eq!(
        loss.total_value().unwrap(),
        loss.primary_value().unwrap()
    );
}

#[test]
fn two_stage_loss_uses_dense_coarsened_level() {
    let config = EncoderConfig::new(8, 3, 2)
        .with_dims(6, 6)
        .with_pooling(2, 0.5)
        .with_readout(ReadoutMode::MaxSum)
        .with_entropy_weight(0.5);
    let encoder = build(config.clone(), 9);
    let batch = padded_batch(&[8, 5], 8, 3, 13);

    let output = encoder.forward_t(&batch, true).unwrap();
    assert_eq!(output.scores.dims(), &[2, 2]);
    assert_eq!(output.adjacencies[0].dims(), &[2, 4, 4]);
    assert_eq!(output.adjacencies[1].dims(), &[2, 2, 2]);
    assert_eq!(output.representation.dims(), &[2, config.pred_input_dim()]);
    assert_eq!(output.assign_level, Some(1));

    // Coarsened levels carry no padding: no mask and no warning even without counts
    let loss = encoder.loss(&output, &labels(&[1, 0]), None).unwrap();
    assert!(loss.warnings.is_empty());
    assert!(loss.total_value().unwrap().is_finite());

    // Pooled edge weights exceed 1, the link term still scores a clamped target
    let pooled = output.assign_adjacency.as_ref().unwrap();
    let heaviest = pooled
        .flatten_all()
        .unwrap()
        .max(0)
        .unwrap()
        .to_scalar::<f32>()
        .unwrap();
    assert!(heaviest > 1.0, "largest pooled weight {}", heaviest);
    assert!(loss.link_value().unwrap().unwrap() >= 0.0);
    assert!(loss.total_value().unwrap() >= 0.0);
}

#[test]
fn missing_counts_warn_and_fall_back() {
    let encoder = build(two_graph_config(), 7);
    let padded = padded_batch(&[4, 3], 4, 2, 11);
    let batch = GraphBatch::new(padded.features, padded.adjacency);
    let output = encoder.forward(&batch).unwrap();
    assert!(output.mask.is_none());

    let loss = encoder.loss(&output, &labels(&[0, 1]), None).unwrap();
    assert_eq!(
        loss.warnings,
        vec![LossWarning::Unmasked {
            batch_size: 2,
            num_nodes: 4
        }]
    );
    assert!(loss.total_value().unwrap().is_finite());
}

#[test]
fn forward_mask_stands_in_for_counts() {
    let encoder = build(two_graph_config(), 7);
    let batch = padded_batch(&[4, 3], 4, 2, 11);
    let output = encoder.forward(&batch).unwrap();
    let targets = labels(&[0, 1]);

    let explicit = encoder.loss(&output, &targets, batch.node_counts()).unwrap();
    let carried = encoder.loss(&output, &targets, None).unwrap();

    assert!(carried.warnings.is_empty());
    let diff = carried.total_value().unwrap() - explicit.total_value().unwrap();
    assert!(diff.abs() < 1e-6, "losses differ by {}", diff);
}

#[test]
fn non_concat_encoder_reads_last_level() {
    let config = EncoderConfig::new(6, 2, 4)
        .with_dims(5, 7)
        .with_concat(false)
        .with_pooling(1, 0.5)
        .with_pred_hidden_dims(vec![]);
    let encoder = build(config, 21);
    let batch = padded_batch(&[6, 6], 6, 2, 1);

    let output = encoder.forward(&batch).unwrap();
    assert_eq!(output.representation.dims(), &[2, 7]);
    assert_eq!(output.scores.dims(), &[2, 4]);
}

#[test]
fn separate_assignment_features() {
    let config = EncoderConfig::new(4, 2, 2)
        .with_pooling(1, 0.5)
        .with_assign_input(AssignInput::Separate { dim: 3 });
    let encoder = build(config, 4);

    let batch = padded_batch(&[4, 3], 4, 2, 2);
    let assign = Tensor::rand(0f32, 1.0, (2, 4, 3), &Device::Cpu).unwrap();
    let output = encoder
        .forward(&batch.with_assign_features(assign))
        .unwrap();

    assert_eq!(output.assignment.unwrap().dims(), &[2, 4, 2]);
}
