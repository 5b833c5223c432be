//! Hierarchical Encoder
//!
//! Drives the convolve-then-coarsen cycle:
//!
//! ```text
//! Embed(0) ──► Assign(1) ► Pool ► Embed(1) ──► … ──► Assign(K) ► Pool ► Embed(K)
//!    │                              │                                    │
//!  readout                       readout                              readout
//!    └──────────────── concat (or last only) ──► prediction head ──► [B, L]
//! ```
//!
//! The valid-node mask is built once from the batch's node counts. It applies
//! to the level-0 embedding and the first assignment; coarsened levels are
//! dense and unmasked.
//!
//! With `num_pooling = 0` the encoder is a flat convolution classifier.
//!
//! ## Example
//!
//! ```rust,ignore
//! let encoder = HierarchicalEncoder::new(config, &mut XavierUniform::relu(42), &device)?;
//! let output = encoder.forward_t(&batch, true)?;
//! let loss = encoder.loss(&output, &labels, batch.node_counts())?;
//! ```

mod batch;

pub use batch::GraphBatch;

use crate::config::{AssignInput, EncoderConfig};
use crate::gnn::{pool, readout, AssignmentModule, ConvStack, PredictionHead, StackSpec};
use crate::loss::{LossBreakdown, StructuralLoss};
use crate::primitives::{construct_mask, non_finite_kind, Initializer};
use crate::{DiffPoolError, Result};
use candle_core::{Device, Tensor, Var};
use tracing::{debug, info, warn};

/// Everything a forward pass produces.
///
/// Only the most recent assignment matrix is retained, together with the
/// adjacency it was computed against and the level it pooled.
#[derive(Debug, Clone)]
pub struct EncoderOutput {
    /// Pre-softmax label scores `[B, L]`
    pub scores: Tensor,
    /// One readout `[B, D]` per level, level 0 first
    pub readouts: Vec<Tensor>,
    /// Input to the prediction head
    pub representation: Tensor,
    /// Pooled adjacency `[B, n_i, n_i]` for levels `1..=K`
    pub adjacencies: Vec<Tensor>,
    /// Last assignment matrix `[B, n_{K-1}, n_K]`
    pub assignment: Option<Tensor>,
    /// Adjacency the last assignment was computed against
    pub assign_adjacency: Option<Tensor>,
    /// Level pooled by the last assignment (0 = input graph)
    pub assign_level: Option<usize>,
    /// Valid-node mask `[B, N, 1]`, when node counts were supplied
    pub mask: Option<Tensor>,
}

/// Configuration-driven DiffPool encoder
#[derive(Debug, Clone)]
pub struct HierarchicalEncoder {
    config: EncoderConfig,
    embed_stacks: Vec<ConvStack>,
    assign_modules: Vec<AssignmentModule>,
    head: PredictionHead,
    stage_nodes: Vec<usize>,
    loss_fn: StructuralLoss,
    device: Device,
}

impl HierarchicalEncoder {
    /// Validate `config` and initialize every layer from `init`.
    pub fn new(config: EncoderConfig, init: &mut dyn Initializer, device: &Device) -> Result<Self> {
        config.validate()?;

        let stage_nodes = config.stage_node_counts();
        let embed_dim = config.embed_output_dim();

        let mut embed_stacks = Vec::with_capacity(config.num_pooling + 1);
        embed_stacks.push(ConvStack::new(
            StackSpec::embedding(&config, config.input_dim),
            init,
            device,
        )?);

        let mut assign_modules = Vec::with_capacity(config.num_pooling);
        for level in 0..config.num_pooling {
            assign_modules.push(AssignmentModule::from_config(
                &config,
                level,
                stage_nodes[level + 1],
                init,
                device,
            )?);
            embed_stacks.push(ConvStack::new(
                StackSpec::embedding(&config, embed_dim),
                init,
                device,
            )?);
        }

        let head = PredictionHead::new(
            config.pred_input_dim(),
            &config.pred_hidden_dims,
            config.label_dim,
            init,
            device,
        )?;

        let loss_fn = StructuralLoss::from_config(&config);

        let encoder = Self {
            config,
            embed_stacks,
            assign_modules,
            head,
            stage_nodes,
            loss_fn,
            device: device.clone(),
        };

        info!(
            "Built encoder: {} pooling stage(s), node counts {:?}, {} parameters",
            encoder.config.num_pooling,
            encoder.stage_nodes,
            encoder.param_count()
        );

        Ok(encoder)
    }

    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Node count per level, `n_0 = max_num_nodes`
    pub fn stage_node_counts(&self) -> &[usize] {
        &self.stage_nodes
    }

    pub fn num_pooling(&self) -> usize {
        self.assign_modules.len()
    }

    pub fn loss_fn(&self) -> &StructuralLoss {
        &self.loss_fn
    }

    /// Evaluation-mode forward pass (no dropout, running batch-norm statistics)
    pub fn forward(&self, batch: &GraphBatch) -> Result<EncoderOutput> {
        self.forward_t(batch, false)
    }

    /// Forward pass. `train` enables dropout and batch-norm batch statistics.
    pub fn forward_t(&self, batch: &GraphBatch, train: bool) -> Result<EncoderOutput> {
        batch.validate()?;
        self.check_conformable(batch)?;

        let n = batch.num_nodes();
        let mask = match batch.node_counts() {
            Some(counts) => Some(construct_mask(counts, n, &self.device)?),
            None => None,
        };

        let mut adj = batch.adjacency.clone();
        let mut embedding =
            self.embed_stacks[0].forward(&batch.features, &adj, mask.as_ref(), false, train)?;
        let mut readouts = vec![readout(&embedding, self.config.readout)?];
        debug!("level 0: embedding {:?}", embedding.dims());

        let mut assign_x = match self.config.assign_input {
            AssignInput::NodeFeatures => batch.features.clone(),
            AssignInput::Separate { .. } => batch.assign_features.clone().ok_or_else(|| {
                DiffPoolError::Shape("encoder expects separate assignment features".into())
            })?,
        };

        let mut adjacencies = Vec::with_capacity(self.assign_modules.len());
        let mut retained: Option<(Tensor, Tensor, usize)> = None;

        for (level, assign) in self.assign_modules.iter().enumerate() {
            let level_mask = if level == 0 { mask.as_ref() } else { None };
            let s = assign.forward(&assign_x, &adj, level_mask, train)?;

            let pooled = pool(&s, &embedding, &adj)?;
            retained = Some((s, adj, level));

            adj = pooled.adjacency;
            assign_x = pooled.features.clone();
            adjacencies.push(adj.clone());

            embedding =
                self.embed_stacks[level + 1].forward(&pooled.features, &adj, None, false, train)?;
            readouts.push(readout(&embedding, self.config.readout)?);
            debug!(
                "level {}: pooled to {} nodes, embedding {:?}",
                level + 1,
                self.stage_nodes[level + 1],
                embedding.dims()
            );
        }

        let representation = if self.config.concat {
            Tensor::cat(&readouts, 1)
                .map_err(|e| DiffPoolError::Tensor(format!("readout concat failed: {}", e)))?
        } else {
            readouts[readouts.len() - 1].clone()
        };

        let scores = self.head.forward(&representation)?;

        let (assignment, assign_adjacency, assign_level) = match retained {
            Some((s, a, level)) => (Some(s), Some(a), Some(level)),
            None => (None, None, None),
        };

        Ok(EncoderOutput {
            scores,
            readouts,
            representation,
            adjacencies,
            assignment,
            assign_adjacency,
            assign_level,
            mask,
        })
    }

    /// Primary plus structural loss for a forward result.
    pub fn loss(
        &self,
        output: &EncoderOutput,
        labels: &Tensor,
        node_counts: Option<&[usize]>,
    ) -> Result<LossBreakdown> {
        self.loss_fn.compute(output, labels, node_counts)
    }

    fn check_conformable(&self, batch: &GraphBatch) -> Result<()> {
        let f = batch.features.dims()[2];
        if f != self.config.input_dim {
            return Err(DiffPoolError::Shape(format!(
                "encoder expects {} node features, batch has {}",
                self.config.input_dim, f
            )));
        }

        if let AssignInput::Separate { dim } = self.config.assign_input {
            match &batch.assign_features {
                Some(t) if t.dims()[2] == dim => {}
                Some(t) => {
                    return Err(DiffPoolError::Shape(format!(
                        "encoder expects {} assignment features, batch has {}",
                        dim,
                        t.dims()[2]
                    )))
                }
                None => {
                    return Err(DiffPoolError::Shape(
                        "encoder expects separate assignment features".into(),
                    ))
                }
            }
        }

        Ok(())
    }

    // =========================================================================
    // Parameters
    // =========================================================================

    /// All trainable parameters (batch-norm running statistics excluded)
    pub fn trainable_vars(&self) -> Vec<Var> {
        let mut vars: Vec<Var> = Vec::new();
        for (i, stack) in self.embed_stacks.iter().enumerate() {
            vars.extend(stack.trainable_vars());
            if let Some(assign) = self.assign_modules.get(i) {
                vars.extend(assign.trainable_vars());
            }
        }
        vars.extend(self.head.trainable_vars());
        vars
    }

    /// Number of trainable scalar parameters
    pub fn param_count(&self) -> usize {
        self.trainable_vars()
            .iter()
            .map(|v| v.as_tensor().elem_count())
            .sum()
    }

    /// Every persistent variable under a stable name, running statistics included
    pub fn named_state(&self) -> Vec<(String, Var)> {
        let mut state = Vec::new();
        for (i, stack) in self.embed_stacks.iter().enumerate() {
            state.extend(stack.named_state(&format!("embed{}", i)));
        }
        for (i, assign) in self.assign_modules.iter().enumerate() {
            state.extend(assign.named_state(&format!("assign{}", i)));
        }
        state.extend(self.head.named_state("head"));
        state
    }

    /// First non-finite trainable parameter, as `(var index, kind)`.
    /// A parameter that cannot be read back is reported as `"Unreadable"`.
    pub fn check_weights_health(&self) -> Option<(usize, &'static str)> {
        for (i, var) in self.trainable_vars().iter().enumerate() {
            match non_finite_kind(var.as_tensor()) {
                Ok(None) => {}
                Ok(Some(kind)) => return Some((i, kind)),
                Err(e) => {
                    warn!("weight health check failed for var {}: {}", i, e);
                    return Some((i, "Unreadable"));
                }
            }
        }
        None
    }
}
