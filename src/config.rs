//! Encoder Configuration
//!
//! One tagged configuration drives every encoder variant: `num_pooling = 0`
//! gives a flat convolution classifier, `num_pooling >= 1` the hierarchical
//! pooling encoder, and [`AssignInput`] selects where the first assignment
//! stack reads its features from.
//!
//! All derived sizes (stage node counts, embedding widths, head input width)
//! are computed here, once, from the configuration.
//!
//! ## Example
//!
//! ```rust,ignore
//! let config = EncoderConfig::new(4, 2, 3)
//!     .with_dims(16, 16)
//!     .with_pooling(1, 0.5)
//!     .with_entropy_weight(0.1);
//! config.validate()?;
//! assert_eq!(config.stage_node_counts(), vec![4, 2]);
//! ```

use crate::{DiffPoolError, Result};
use serde::{Deserialize, Serialize};

/// Nonlinearity applied after every graph convolution layer
///
/// Max readout treats zero-padded rows as "no contribution", which only holds
/// when real activations are non-negative. Only [`Activation::ReLU`] keeps
/// that guarantee; the others are accepted but leave padded rows able to win
/// the max.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub enum Activation {
    /// Rectified Linear Unit: max(0, x)
    #[default]
    ReLU,
    /// Leaky ReLU with the given negative slope
    LeakyReLU { negative_slope: f64 },
    /// Hyperbolic tangent
    Tanh,
}

impl Activation {
    /// Apply this activation function to a tensor
    pub fn apply(&self, tensor: &candle_core::Tensor) -> Result<candle_core::Tensor> {
        match self {
            Self::ReLU => crate::primitives::relu(tensor),
            Self::LeakyReLU { negative_slope } => {
                crate::primitives::leaky_relu(tensor, *negative_slope)
            }
            Self::Tanh => crate::primitives::tanh(tensor),
        }
    }

    /// Whether outputs are guaranteed non-negative
    pub fn is_non_negative(&self) -> bool {
        matches!(self, Self::ReLU)
    }
}

/// Per-graph readout over the node axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ReadoutMode {
    /// Max over nodes
    #[default]
    Max,
    /// Max and sum over nodes, concatenated `[max, sum]`
    MaxSum,
}

impl ReadoutMode {
    /// Number of aggregates concatenated per readout
    pub fn num_aggs(&self) -> usize {
        match self {
            Self::Max => 1,
            Self::MaxSum => 2,
        }
    }
}

/// Source of the first assignment stack's input features
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum AssignInput {
    /// Reuse the node features of the main path
    #[default]
    NodeFeatures,
    /// A separately supplied `[B, N, dim]` assignment-feature tensor
    Separate { dim: usize },
}

/// Configuration for [`crate::encoder::HierarchicalEncoder`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncoderConfig {
    /// Maximum node count of any input graph (padded size `N`)
    pub max_num_nodes: usize,
    /// Node feature dimensionality `F`
    pub input_dim: usize,
    /// Width of first and middle convolution layers
    pub hidden_dim: usize,
    /// Width of the last convolution layer
    pub embedding_dim: usize,
    /// Number of classes `L`
    pub label_dim: usize,
    /// Convolution layers per stack (first + middle + last, at least 2)
    pub num_layers: usize,
    /// Number of pooling stages `K`
    pub num_pooling: usize,
    /// Per-stage node shrink factor in `(0, 1]`
    pub assign_ratio: f64,
    /// Width of the assignment stacks' first and middle layers
    pub assign_hidden_dim: usize,
    /// Layers per assignment stack (defaults to `num_layers`)
    pub assign_num_layers: Option<usize>,
    /// Where the first assignment stack reads features from
    pub assign_input: AssignInput,
    /// Concatenate per-layer outputs and per-stage readouts
    pub concat: bool,
    /// Batch normalization after every non-final layer
    pub batch_norm: bool,
    /// Dropout probability on middle-layer inputs (training mode only)
    pub dropout: f32,
    /// Use bias terms in graph convolutions
    pub bias: bool,
    /// L2-normalize node vectors after each graph convolution
    pub normalize_embedding: bool,
    /// Nonlinearity after each convolution layer
    pub activation: Activation,
    /// Readout aggregation
    pub readout: ReadoutMode,
    /// Hidden widths of the prediction head (empty = single linear layer)
    pub pred_hidden_dims: Vec<usize>,
    /// Enable the link-reconstruction loss
    pub link_pred: bool,
    /// Matrix powers summed for the reconstructed adjacency
    pub link_pred_hops: usize,
    /// Weight of the assignment-entropy loss (0 disables it)
    pub entropy_weight: f64,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self::new(100, 10, 2)
    }
}

impl EncoderConfig {
    /// Create a configuration with default hyperparameters
    pub fn new(max_num_nodes: usize, input_dim: usize, label_dim: usize) -> Self {
        Self {
            max_num_nodes,
            input_dim,
            hidden_dim: 20,
            embedding_dim: 30,
            label_dim,
            num_layers: 3,
            num_pooling: 1,
            assign_ratio: 0.25,
            assign_hidden_dim: 20,
            assign_num_layers: None,
            assign_input: AssignInput::NodeFeatures,
            concat: true,
            batch_norm: true,
            dropout: 0.0,
            bias: true,
            normalize_embedding: true,
            activation: Activation::ReLU,
            readout: ReadoutMode::Max,
            pred_hidden_dims: vec![50],
            link_pred: true,
            link_pred_hops: 1,
            entropy_weight: 0.0,
        }
    }

    /// Builder: hidden and embedding widths
    pub fn with_dims(mut self, hidden_dim: usize, embedding_dim: usize) -> Self {
        self.hidden_dim = hidden_dim;
        self.embedding_dim = embedding_dim;
        self
    }

    /// Builder: convolution layers per stack
    pub fn with_layers(mut self, num_layers: usize) -> Self {
        self.num_layers = num_layers;
        self
    }

    /// Builder: pooling stages and shrink ratio
    pub fn with_pooling(mut self, num_pooling: usize, assign_ratio: f64) -> Self {
        self.num_pooling = num_pooling;
        self.assign_ratio = assign_ratio;
        self
    }

    /// Builder: assignment stack width
    pub fn with_assign_hidden_dim(mut self, dim: usize) -> Self {
        self.assign_hidden_dim = dim;
        self
    }

    /// Builder: assignment stack depth
    pub fn with_assign_layers(mut self, num_layers: usize) -> Self {
        self.assign_num_layers = Some(num_layers);
        self
    }

    /// Builder: assignment input source
    pub fn with_assign_input(mut self, input: AssignInput) -> Self {
        self.assign_input = input;
        self
    }

    /// Builder: concatenation mode
    pub fn with_concat(mut self, concat: bool) -> Self {
        self.concat = concat;
        self
    }

    /// Builder: batch normalization
    pub fn with_batch_norm(mut self, batch_norm: bool) -> Self {
        self.batch_norm = batch_norm;
        self
    }

    /// Builder: dropout probability
    pub fn with_dropout(mut self, dropout: f32) -> Self {
        self.dropout = dropout;
        self
    }

    /// Builder: bias usage
    pub fn with_bias(mut self, bias: bool) -> Self {
        self.bias = bias;
        self
    }

    /// Builder: per-node L2 normalization after convolutions
    pub fn with_normalize_embedding(mut self, normalize: bool) -> Self {
        self.normalize_embedding = normalize;
        self
    }

    /// Builder: nonlinearity
    pub fn with_activation(mut self, activation: Activation) -> Self {
        self.activation = activation;
        self
    }

    /// Builder: readout mode
    pub fn with_readout(mut self, readout: ReadoutMode) -> Self {
        self.readout = readout;
        self
    }

    /// Builder: prediction head hidden widths
    pub fn with_pred_hidden_dims(mut self, dims: Vec<usize>) -> Self {
        self.pred_hidden_dims = dims;
        self
    }

    /// Builder: link-reconstruction loss
    pub fn with_link_pred(mut self, enabled: bool) -> Self {
        self.link_pred = enabled;
        self
    }

    /// Builder: number of adjacency powers in link reconstruction
    pub fn with_link_pred_hops(mut self, hops: usize) -> Self {
        self.link_pred_hops = hops;
        self
    }

    /// Builder: entropy regularization weight
    pub fn with_entropy_weight(mut self, weight: f64) -> Self {
        self.entropy_weight = weight;
        self
    }

    // =========================================================================
    // Derived sizes
    // =========================================================================

    /// Graph convolutions add the node's own features when layer outputs are
    /// not concatenated.
    pub fn add_self(&self) -> bool {
        !self.concat
    }

    /// Layers per assignment stack
    pub fn assign_layers(&self) -> usize {
        self.assign_num_layers.unwrap_or(self.num_layers)
    }

    /// Width of an embedding tensor produced by a main-path stack
    pub fn embed_output_dim(&self) -> usize {
        if self.concat {
            self.hidden_dim * (self.num_layers - 1) + self.embedding_dim
        } else {
            self.embedding_dim
        }
    }

    /// Width of one stage's readout vector
    pub fn readout_dim(&self) -> usize {
        self.embed_output_dim() * self.readout.num_aggs()
    }

    /// Width of the aggregated representation entering the prediction head
    pub fn pred_input_dim(&self) -> usize {
        if self.concat {
            self.readout_dim() * (self.num_pooling + 1)
        } else {
            self.readout_dim()
        }
    }

    /// Input width of the assignment stack for the stage pooling `level`
    /// (level 0 is the input graph)
    pub fn assign_input_dim(&self, level: usize) -> usize {
        match (level, self.assign_input) {
            (0, AssignInput::NodeFeatures) => self.input_dim,
            (0, AssignInput::Separate { dim }) => dim,
            _ => self.embed_output_dim(),
        }
    }

    /// Node counts per level: `n_0 = max_num_nodes`, `n_i = floor(n_{i-1} · ratio)`
    pub fn stage_node_counts(&self) -> Vec<usize> {
        let mut counts = Vec::with_capacity(self.num_pooling + 1);
        let mut n = self.max_num_nodes;
        counts.push(n);
        for _ in 0..self.num_pooling {
            n = (n as f64 * self.assign_ratio).floor() as usize;
            counts.push(n);
        }
        counts
    }

    /// Whether any structural loss term is active
    pub fn structural_loss_enabled(&self) -> bool {
        self.link_pred || self.entropy_weight > 0.0
    }

    // =========================================================================
    // Validation and serialization
    // =========================================================================

    /// Check every constraint that would otherwise surface as a runtime
    /// shape mismatch.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("max_num_nodes", self.max_num_nodes),
            ("input_dim", self.input_dim),
            ("hidden_dim", self.hidden_dim),
            ("embedding_dim", self.embedding_dim),
            ("label_dim", self.label_dim),
            ("assign_hidden_dim", self.assign_hidden_dim),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(DiffPoolError::Config(format!("{} must be positive", name)));
            }
        }

        if let AssignInput::Separate { dim: 0 } = self.assign_input {
            return Err(DiffPoolError::Config(
                "separate assignment input dim must be positive".into(),
            ));
        }

        if self.num_layers < 2 {
            return Err(DiffPoolError::Config(format!(
                "num_layers must be at least 2 (first + last), got {}",
                self.num_layers
            )));
        }
        if self.assign_layers() < 2 {
            return Err(DiffPoolError::Config(format!(
                "assign_num_layers must be at least 2, got {}",
                self.assign_layers()
            )));
        }

        if !(self.assign_ratio > 0.0 && self.assign_ratio <= 1.0) {
            return Err(DiffPoolError::Config(format!(
                "assign_ratio must be in (0, 1], got {}",
                self.assign_ratio
            )));
        }

        if let Some((level, _)) = self
            .stage_node_counts()
            .iter()
            .enumerate()
            .find(|(_, &n)| n == 0)
        {
            return Err(DiffPoolError::Config(format!(
                "{} pooling stages at ratio {} leave no nodes at level {} (max_num_nodes = {})",
                self.num_pooling, self.assign_ratio, level, self.max_num_nodes
            )));
        }

        if !(0.0..1.0).contains(&self.dropout) {
            return Err(DiffPoolError::Config(format!(
                "dropout must be in [0, 1), got {}",
                self.dropout
            )));
        }

        if self.pred_hidden_dims.iter().any(|&d| d == 0) {
            return Err(DiffPoolError::Config(
                "prediction head hidden dims must be positive".into(),
            ));
        }

        if self.link_pred_hops == 0 {
            return Err(DiffPoolError::Config("link_pred_hops must be at least 1".into()));
        }

        if !(self.entropy_weight >= 0.0) {
            return Err(DiffPoolError::Config(format!(
                "entropy_weight must be non-negative, got {}",
                self.entropy_weight
            )));
        }

        Ok(())
    }

    /// Serialize to pretty JSON
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| DiffPoolError::Serialization(format!("config to json failed: {}", e)))
    }

    /// Parse from JSON and validate
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| DiffPoolError::Serialization(format!("config from json failed: {}", e)))?;
        config.validate()?;
        Ok(config)
    }
}
