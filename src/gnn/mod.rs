//! Graph Neural Network layers
//!
//! Dense, batched building blocks of the hierarchical encoder. All tensors
//! are batch-leading and zero-padded to a common node count.
//!
//! | Item | Role |
//! |---|---|
//! | [`DenseGraphConv`] | `A·X (+X)` → `·W + b` → L2 normalize |
//! | [`NodeBatchNorm`] | Per-feature normalization over batch × nodes |
//! | [`ConvStack`] | first / middle / last convolutions with concat output |
//! | [`readout`] | Max (or max + sum) over nodes |
//! | [`AssignmentModule`] | Row-stochastic soft assignment `S` |
//! | [`pool`] | `Sᵀ·X`, `Sᵀ·A·S` |
//! | [`PredictionHead`] | MLP from readouts to label scores |

pub mod assign;
pub mod conv;
pub mod head;
pub mod linear;
pub mod norm;
pub mod pool;
pub mod readout;
pub mod stack;

pub use assign::AssignmentModule;
pub use conv::{ConvOptions, DenseGraphConv};
pub use head::PredictionHead;
pub use linear::Linear;
pub use norm::NodeBatchNorm;
pub use pool::{pool, PooledGraph};
pub use readout::readout;
pub use stack::{ConvStack, StackSpec};
