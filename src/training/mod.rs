//! Training Utilities
//!
//! Optimization and monitoring helpers around the encoder. Epoch iteration,
//! shuffling and batching belong to the caller; this module covers a single
//! update and what is worth measuring about it.
//!
//! - **Optimizers**: Wrapped candle-nn optimizers (AdamW, SGD)
//! - **Safe steps**: Non-finite gradients skip the update, large norms are clipped
//! - **Metrics**: Loss tracking, accuracy and convergence monitoring
//!
//! ## Example
//!
//! ```ignore
//! use diffpool::prelude::*;
//! use diffpool::training::LearningConfig;
//!
//! let learning = LearningConfig::default();
//! let mut optimizer = Optimizer::from_config(&learning, encoder.trainable_vars())?;
//! let mut tracker = MetricsTracker::new();
//!
//! for (batch, labels) in batches {
//!     let result = train_step(&encoder, &mut optimizer, &batch, &labels, &learning)?;
//!     tracker.record(&result);
//! }
//! ```

use crate::encoder::{GraphBatch, HierarchicalEncoder};
use crate::primitives::non_finite_kind;
use crate::{DiffPoolError, Result};
use candle_core::backprop::GradStore;
use candle_core::{DType, Tensor, Var};
use candle_nn::optim::Optimizer as CandleOptimizer;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

// =============================================================================
// Configuration and results
// =============================================================================

/// Configuration for learning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningConfig {
    /// Learning rate
    pub learning_rate: f64,

    /// Gradient norm clipping threshold
    pub grad_clip: f32,

    /// Use AdamW (true) or SGD (false)
    pub use_adam: bool,

    /// Weight decay for AdamW
    pub weight_decay: f64,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.001,
            grad_clip: 2.0,
            use_adam: true,
            weight_decay: 0.0,
        }
    }
}

/// Result of a training step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingResult {
    /// Total loss value
    pub loss: f32,

    /// Cross-entropy component
    pub primary_loss: f32,

    /// Link-reconstruction component, if enabled
    pub link_loss: Option<f32>,

    /// Entropy component, if enabled
    pub entropy_loss: Option<f32>,

    /// Number of graphs processed
    pub samples: usize,

    /// Gradient norm before clipping
    pub grad_norm: f32,

    /// The update was skipped because of non-finite gradients
    pub skipped: bool,
}

/// Per-epoch summary for reporting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingMetrics {
    /// Current epoch number
    pub epoch: u64,

    /// Loss value for this epoch
    pub loss: f32,

    /// Accuracy (if evaluated)
    pub accuracy: Option<f32>,

    /// Number of graphs trained on
    pub samples_trained: usize,

    /// Duration of this epoch in milliseconds
    pub duration_ms: u64,
}

impl TrainingMetrics {
    pub fn new(epoch: u64, loss: f32) -> Self {
        Self {
            epoch,
            loss,
            accuracy: None,
            samples_trained: 0,
            duration_ms: 0,
        }
    }

    /// Builder: set accuracy
    pub fn with_accuracy(mut self, accuracy: f32) -> Self {
        self.accuracy = Some(accuracy);
        self
    }

    /// Builder: set samples trained
    pub fn with_samples(mut self, samples: usize) -> Self {
        self.samples_trained = samples;
        self
    }

    /// Builder: set duration
    pub fn with_duration_ms(mut self, ms: u64) -> Self {
        self.duration_ms = ms;
        self
    }
}

/// Training metrics tracker
#[derive(Debug, Default)]
pub struct MetricsTracker {
    losses: Vec<f32>,
    best_loss: Option<f32>,
    steps_since_improvement: usize,
    skipped_steps: usize,
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a training result
    pub fn record(&mut self, result: &TrainingResult) {
        if result.skipped {
            self.skipped_steps += 1;
        }
        self.losses.push(result.loss);

        match self.best_loss {
            Some(best) if result.loss >= best => self.steps_since_improvement += 1,
            _ => {
                self.best_loss = Some(result.loss);
                self.steps_since_improvement = 0;
            }
        }
    }

    /// Average loss over the last `n` steps
    pub fn average_loss(&self, n: usize) -> Option<f32> {
        if self.losses.is_empty() {
            return None;
        }

        let start = self.losses.len().saturating_sub(n);
        let slice = &self.losses[start..];
        Some(slice.iter().sum::<f32>() / slice.len() as f32)
    }

    /// No improvement for `patience` steps
    pub fn has_converged(&self, patience: usize) -> bool {
        self.steps_since_improvement >= patience
    }

    pub fn best_loss(&self) -> Option<f32> {
        self.best_loss
    }

    pub fn total_steps(&self) -> usize {
        self.losses.len()
    }

    pub fn skipped_steps(&self) -> usize {
        self.skipped_steps
    }
}

// =============================================================================
// Optimizers
// =============================================================================

/// Wrapper around candle-nn's AdamW optimizer
pub struct AdamOptimizer {
    inner: candle_nn::optim::AdamW,
}

impl AdamOptimizer {
    pub fn new(vars: Vec<Var>, learning_rate: f64, weight_decay: f64) -> Result<Self> {
        let params = candle_nn::optim::ParamsAdamW {
            lr: learning_rate,
            weight_decay,
            ..Default::default()
        };

        let inner = <candle_nn::optim::AdamW as CandleOptimizer>::new(vars, params)
            .map_err(|e| DiffPoolError::Training(format!("AdamW init failed: {}", e)))?;

        Ok(Self { inner })
    }

    pub fn step(&mut self, grads: &GradStore) -> Result<()> {
        CandleOptimizer::step(&mut self.inner, grads)
            .map_err(|e| DiffPoolError::Training(format!("Adam step failed: {}", e)))
    }

    pub fn learning_rate(&self) -> f64 {
        CandleOptimizer::learning_rate(&self.inner)
    }

    pub fn set_learning_rate(&mut self, lr: f64) {
        CandleOptimizer::set_learning_rate(&mut self.inner, lr)
    }
}

/// Wrapper around candle-nn's SGD optimizer
pub struct SGDOptimizer {
    inner: candle_nn::optim::SGD,
}

impl SGDOptimizer {
    pub fn new(vars: Vec<Var>, learning_rate: f64) -> Result<Self> {
        let inner = <candle_nn::optim::SGD as CandleOptimizer>::new(vars, learning_rate)
            .map_err(|e| DiffPoolError::Training(format!("SGD init failed: {}", e)))?;

        Ok(Self { inner })
    }

    pub fn step(&mut self, grads: &GradStore) -> Result<()> {
        CandleOptimizer::step(&mut self.inner, grads)
            .map_err(|e| DiffPoolError::Training(format!("SGD step failed: {}", e)))
    }

    pub fn learning_rate(&self) -> f64 {
        CandleOptimizer::learning_rate(&self.inner)
    }

    pub fn set_learning_rate(&mut self, lr: f64) {
        CandleOptimizer::set_learning_rate(&mut self.inner, lr)
    }
}

/// Optimizer enum for flexibility
pub enum Optimizer {
    /// Stochastic Gradient Descent optimizer
    SGD(SGDOptimizer),
    /// Adam optimizer with decoupled weight decay (AdamW)
    Adam(AdamOptimizer),
}

impl Optimizer {
    pub fn sgd(vars: Vec<Var>, learning_rate: f64) -> Result<Self> {
        Ok(Self::SGD(SGDOptimizer::new(vars, learning_rate)?))
    }

    pub fn adam(vars: Vec<Var>, learning_rate: f64) -> Result<Self> {
        Ok(Self::Adam(AdamOptimizer::new(vars, learning_rate, 0.0)?))
    }

    /// Optimizer described by a [`LearningConfig`]
    pub fn from_config(config: &LearningConfig, vars: Vec<Var>) -> Result<Self> {
        if config.use_adam {
            Ok(Self::Adam(AdamOptimizer::new(
                vars,
                config.learning_rate,
                config.weight_decay,
            )?))
        } else {
            Self::sgd(vars, config.learning_rate)
        }
    }

    pub fn step(&mut self, grads: &GradStore) -> Result<()> {
        match self {
            Self::SGD(opt) => opt.step(grads),
            Self::Adam(opt) => opt.step(grads),
        }
    }

    pub fn learning_rate(&self) -> f64 {
        match self {
            Self::SGD(opt) => opt.learning_rate(),
            Self::Adam(opt) => opt.learning_rate(),
        }
    }

    pub fn set_learning_rate(&mut self, lr: f64) {
        match self {
            Self::SGD(opt) => opt.set_learning_rate(lr),
            Self::Adam(opt) => opt.set_learning_rate(lr),
        }
    }
}

// =============================================================================
// Gradient Utilities
// =============================================================================

/// Optimizer step with gradient norm clipping.
///
/// Non-finite gradients abort the step with [`DiffPoolError::Training`] and
/// leave every parameter untouched. When the total norm exceeds
/// `max_grad_norm`, every gradient is rescaled to that norm before the
/// optimizer sees it. Returns the pre-clipping norm.
pub fn safe_optimizer_step(
    optimizer: &mut Optimizer,
    mut grads: GradStore,
    vars: &[Var],
    max_grad_norm: f32,
) -> Result<f32> {
    if !gradients_finite(&grads, vars)? {
        return Err(DiffPoolError::Training(
            "NaN detected in gradients - skipping step".into(),
        ));
    }

    let total_norm = compute_grad_norm(&grads, vars)?;

    if total_norm > max_grad_norm && total_norm > 0.0 {
        let scale = (max_grad_norm / total_norm) as f64;
        for var in vars {
            if let Some(grad) = grads.get(var.as_tensor()) {
                let scaled = grad
                    .affine(scale, 0.0)
                    .map_err(|e| DiffPoolError::Tensor(format!("grad scale failed: {}", e)))?;
                grads.insert(var.as_tensor(), scaled);
            }
        }
        debug!("clipped gradient norm {:.4} to {:.4}", total_norm, max_grad_norm);
    }

    optimizer.step(&grads)?;
    Ok(total_norm)
}

/// Total L2 norm of all gradients
pub fn compute_grad_norm(grads: &GradStore, vars: &[Var]) -> Result<f32> {
    let mut total_sq_norm = 0.0f32;

    for var in vars {
        if let Some(grad) = grads.get(var.as_tensor()) {
            let sq_norm = grad
                .sqr()
                .and_then(|t| t.sum_all())
                .and_then(|t| t.to_dtype(DType::F32))
                .and_then(|t| t.to_scalar::<f32>())
                .map_err(|e| DiffPoolError::Tensor(format!("grad norm failed: {}", e)))?;
            total_sq_norm += sq_norm;
        }
    }

    Ok(total_sq_norm.sqrt())
}

/// `true` when no gradient contains NaN or Inf. A gradient that cannot be
/// read back counts as unhealthy.
pub fn check_gradients_health(grads: &GradStore, vars: &[Var]) -> bool {
    gradients_finite(grads, vars).unwrap_or_else(|e| {
        warn!("gradient health check failed: {}", e);
        false
    })
}

fn gradients_finite(grads: &GradStore, vars: &[Var]) -> Result<bool> {
    for var in vars {
        if let Some(grad) = grads.get(var.as_tensor()) {
            if non_finite_kind(grad)?.is_some() {
                return Ok(false);
            }
        }
    }
    Ok(true)
}

// =============================================================================
// Steps and evaluation
// =============================================================================

/// One forward + loss + backward + update cycle in training mode.
///
/// A step with non-finite gradients is logged, reported with
/// `skipped = true`, and leaves parameters unchanged. Any other failure,
/// optimizer errors included, is returned.
pub fn train_step(
    encoder: &HierarchicalEncoder,
    optimizer: &mut Optimizer,
    batch: &GraphBatch,
    labels: &Tensor,
    config: &LearningConfig,
) -> Result<TrainingResult> {
    let output = encoder.forward_t(batch, true)?;
    let loss = encoder.loss(&output, labels, batch.node_counts())?;

    let grads = loss
        .total
        .backward()
        .map_err(|e| DiffPoolError::Training(format!("backward failed: {}", e)))?;

    let vars = encoder.trainable_vars();
    let (grad_norm, skipped) = if gradients_finite(&grads, &vars)? {
        let norm = safe_optimizer_step(optimizer, grads, &vars, config.grad_clip)?;
        (norm, false)
    } else {
        warn!("Skipping optimizer step: non-finite gradients");
        (f32::NAN, true)
    };

    Ok(TrainingResult {
        loss: loss.total_value()?,
        primary_loss: loss.primary_value()?,
        link_loss: loss.link_value()?,
        entropy_loss: loss.entropy_value()?,
        samples: batch.batch_size(),
        grad_norm,
        skipped,
    })
}

/// Arg-max class per graph from `[B, L]` scores
pub fn predict_labels(scores: &Tensor) -> Result<Vec<u32>> {
    scores
        .argmax(1)
        .and_then(|t| t.to_vec1::<u32>())
        .map_err(|e| DiffPoolError::Tensor(format!("argmax failed: {}", e)))
}

/// Fraction of graphs whose arg-max class matches `labels [B]`
pub fn accuracy(scores: &Tensor, labels: &Tensor) -> Result<f32> {
    let predicted = predict_labels(scores)?;
    let expected = labels
        .to_dtype(DType::U32)
        .and_then(|t| t.to_vec1::<u32>())
        .map_err(|e| DiffPoolError::Tensor(format!("labels to vec failed: {}", e)))?;

    if predicted.len() != expected.len() {
        return Err(DiffPoolError::Shape(format!(
            "{} predictions for {} labels",
            predicted.len(),
            expected.len()
        )));
    }
    if expected.is_empty() {
        return Ok(0.0);
    }

    let correct = predicted
        .iter()
        .zip(&expected)
        .filter(|(p, e)| p == e)
        .count();
    Ok(correct as f32 / expected.len() as f32)
}
