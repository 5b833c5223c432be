use crate::common::{build, labels, padded_batch, to_vec2};
use diffpool::prelude::*;
use diffpool::training::LearningConfig;

#[test]
fn repeated_steps_reduce_loss_on_a_fixed_batch() {
    let config = EncoderConfig::new(6, 3, 2)
        .with_dims(8, 8)
        .with_pooling(1, 0.5)
        .with_entropy_weight(0.1);
    let encoder = build(config, 31);
    let batch = padded_batch(&[6, 4, 5, 3], 6, 3, 6);
    let targets = labels(&[0, 1, 0, 1]);

    let learning = LearningConfig {
        learning_rate: 0.01,
        ..LearningConfig::default()
    };
    let mut optimizer = Optimizer::from_config(&learning, encoder.trainable_vars()).unwrap();
    let mut tracker = MetricsTracker::new();

    for _ in 0..60 {
        let result = train_step(&encoder, &mut optimizer, &batch, &targets, &learning).unwrap();
        assert!(!result.skipped);
        assert_eq!(result.samples, 4);
        tracker.record(&result);
    }

    let first = tracker.average_loss(60).unwrap();
    let last = tracker.average_loss(5).unwrap();
    assert!(last < first, "average loss {} did not drop below {}", last, first);
    assert!(encoder.check_weights_health().is_none());
}

#[test]
fn two_stage_link_loss_stays_non_negative_while_training() {
    let config = EncoderConfig::new(8, 3, 2)
        .with_dims(6, 6)
        .with_pooling(2, 0.5);
    let encoder = build(config, 17);
    let batch = padded_batch(&[8, 7, 6], 8, 3, 21);
    let targets = labels(&[0, 1, 0]);

    let learning = LearningConfig {
        learning_rate: 0.05,
        ..LearningConfig::default()
    };
    let mut optimizer = Optimizer::from_config(&learning, encoder.trainable_vars()).unwrap();

    for step in 0..30 {
        let result = train_step(&encoder, &mut optimizer, &batch, &targets, &learning).unwrap();
        let link = result.link_loss.unwrap();
        assert!(link >= 0.0, "step {}: link loss {}", step, link);
        assert!(result.loss >= result.primary_loss, "step {}: total {}", step, result.loss);
        assert!(result.loss >= 0.0);
    }
}

#[test]
fn training_mode_updates_running_statistics() {
    let config = EncoderConfig::new(6, 3, 2).with_dims(8, 8).with_pooling(1, 0.5);
    let encoder = build(config, 12);
    let batch = padded_batch(&[6, 4], 6, 3, 6);

    let before = to_vec2(&encoder.forward(&batch).unwrap().scores);
    encoder.forward_t(&batch, true).unwrap();
    let after = to_vec2(&encoder.forward(&batch).unwrap().scores);

    assert_ne!(before, after);
}

#[test]
fn accuracy_of_trained_predictions_is_a_fraction() {
    let config = EncoderConfig::new(5, 2, 3).with_pooling(1, 0.4);
    let encoder = build(config, 8);
    let batch = padded_batch(&[5, 5, 2], 5, 2, 7);

    let output = encoder.forward(&batch).unwrap();
    let predicted = predict_labels(&output.scores).unwrap();
    assert_eq!(predicted.len(), 3);
    assert!(predicted.iter().all(|&p| p < 3));

    let acc = accuracy(&output.scores, &labels(&[0, 1, 2])).unwrap();
    assert!((0.0..=1.0).contains(&acc));
}
