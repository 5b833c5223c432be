//! Tensor Primitives
//!
//! Core tensor operations shared by the graph layers and losses.
//!
//! ## Submodules
//!
//! - [`tensor_ops`]: Device selection, masking, normalization, elementwise losses
//! - [`activations`]: Activation functions (relu, leaky relu, tanh, softmax)
//! - [`init`]: Weight initializer strategies injected into layer constructors

mod activations;
mod init;
mod tensor_ops;

// Re-export all primitives at module level
pub use activations::*;
pub use init::*;
pub use tensor_ops::*;
