//! # diffpool
//!
//! Hierarchical differentiable graph pooling on candle tensors.
//!
//! ## Overview
//!
//! A graph classifier that alternates dense graph convolutions with learned
//! soft cluster assignments. Each pooling stage coarsens the graph: the
//! assignment matrix `S` pools node embeddings (`Sᵀ·X`) and re-derives a
//! weighted adjacency (`Sᵀ·A·S`) for the next level. One readout vector is
//! collected per level and the concatenation feeds a prediction head.
//!
//! Core capabilities:
//!
//! - **Layers**: dense graph convolution, convolution stacks, batch norm over nodes
//! - **Pooling**: assignment module and the coarsening step
//! - **Encoder**: configuration-driven hierarchy with `K` pooling stages
//! - **Loss**: cross-entropy plus link-reconstruction and assignment-entropy terms
//! - **Checkpoints**: safetensors persistence with config hashing
//! - **Training helpers**: optimizer wrappers, gradient health, metrics
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use diffpool::prelude::*;
//!
//! let device = best_device();
//! let config = EncoderConfig::new(4, 2, 3)
//!     .with_pooling(1, 0.5)
//!     .with_dims(16, 16);
//! let mut init = XavierUniform::relu(42);
//! let encoder = HierarchicalEncoder::new(config, &mut init, &device)?;
//!
//! let batch = GraphBatch::new(features, adjacency).with_node_counts(vec![4, 3]);
//! let output = encoder.forward_t(&batch, true)?;
//! let loss = encoder.loss(&output, &labels, batch.node_counts())?;
//! let grads = loss.total.backward()?;
//! ```
//!
//! ## Feature Flags
//!
//! - `metal`: Apple Metal GPU acceleration
//! - `cuda`: NVIDIA CUDA GPU acceleration

pub mod checkpoint;
pub mod config;
pub mod encoder;
pub mod gnn;
pub mod loss;
pub mod primitives;
pub mod training;

// Re-export candle types for convenience
pub use candle_core::{DType, Device, Tensor, Var};

/// Error types for graph pooling operations
#[derive(Debug, thiserror::Error)]
pub enum DiffPoolError {
    #[error("Tensor operation failed: {0}")]
    Tensor(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Shape mismatch: {0}")]
    Shape(String),

    #[error("Numerical error: {0}")]
    Numerical(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Training error: {0}")]
    Training(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Candle error: {0}")]
    Candle(#[from] candle_core::Error),
}

/// Result type alias for graph pooling operations
pub type Result<T> = std::result::Result<T, DiffPoolError>;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{DType, Device, Tensor, Var};
    pub use crate::{DiffPoolError, Result};

    // Device selection and primitives
    pub use crate::primitives::{
        best_device, construct_mask, cpu_device, gpu_available, gpu_disabled, relu, softmax,
        Initializer, UniformFanIn, XavierUniform,
    };

    // Configuration
    pub use crate::config::{Activation, AssignInput, EncoderConfig, ReadoutMode};

    // Model
    pub use crate::encoder::{EncoderOutput, GraphBatch, HierarchicalEncoder};
    pub use crate::loss::{LossBreakdown, LossWarning, StructuralLoss};

    // Checkpoints
    pub use crate::checkpoint::{load_checkpoint, save_checkpoint, CheckpointMetadata};

    // Training utilities
    pub use crate::training::{
        accuracy, check_gradients_health, compute_grad_norm, predict_labels,
        safe_optimizer_step, train_step, MetricsTracker, Optimizer, TrainingMetrics,
    };
}
