//! Structural Loss
//!
//! Classification loss plus two auxiliary terms computed from the retained
//! assignment matrix `S` of a forward pass:
//!
//! | Term | Formula |
//! |---|---|
//! | primary | softmax cross-entropy, mean over the batch |
//! | link | `BCE(min(P + P² + … + P^h, 1), clamp(A, 0, 1))` with `P = S·Sᵀ` |
//! | entropy | `w · H(S·Sᵀ)`, elementwise binary entropy |
//!
//! Both auxiliary terms are summed over valid node pairs (`mask · maskᵀ`) and
//! divided by the number of valid pairs `Σ count²`. The mask only exists for
//! the input graph: when the retained assignment pooled a coarsened level,
//! every pair is valid. At level 0 the pair mask comes from explicit node
//! counts, else from the mask carried in the forward output. With neither,
//! the terms fall back to an unmasked `B·N·N` average and report
//! [`LossWarning::Unmasked`].

use crate::config::EncoderConfig;
use crate::encoder::EncoderOutput;
use crate::primitives::{
    batch_transpose, binary_entropy, construct_mask, elementwise_bce, pair_mask, sum_scalar,
};
use crate::{DiffPoolError, Result};
use candle_core::Tensor;
use tracing::warn;

/// Epsilon inside every logarithm
pub const LOG_EPS: f64 = 1e-7;

/// Recoverable conditions met while computing a loss
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LossWarning {
    /// Structural terms were averaged over all `B·N·N` pairs because no node
    /// counts were supplied.
    Unmasked { batch_size: usize, num_nodes: usize },
}

impl std::fmt::Display for LossWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unmasked {
                batch_size,
                num_nodes,
            } => write!(
                f,
                "no node counts supplied; structural loss averaged over {}×{}×{} pairs",
                batch_size, num_nodes, num_nodes
            ),
        }
    }
}

/// Loss components of one batch
#[derive(Debug, Clone)]
pub struct LossBreakdown {
    /// Scalar to differentiate
    pub total: Tensor,
    pub primary: Tensor,
    pub link: Option<Tensor>,
    pub entropy: Option<Tensor>,
    pub warnings: Vec<LossWarning>,
}

impl LossBreakdown {
    pub fn total_value(&self) -> Result<f32> {
        scalar_value(&self.total)
    }

    pub fn primary_value(&self) -> Result<f32> {
        scalar_value(&self.primary)
    }

    pub fn link_value(&self) -> Result<Option<f32>> {
        self.link.as_ref().map(scalar_value).transpose()
    }

    pub fn entropy_value(&self) -> Result<Option<f32>> {
        self.entropy.as_ref().map(scalar_value).transpose()
    }
}

fn scalar_value(t: &Tensor) -> Result<f32> {
    t.to_scalar::<f32>()
        .map_err(|e| DiffPoolError::Tensor(format!("loss to scalar failed: {}", e)))
}

/// Pair weighting shared by the link and entropy terms
struct PairWeights {
    mask: Option<Tensor>,
    count: f64,
}

/// Loss settings taken from the encoder configuration
#[derive(Debug, Clone, PartialEq)]
pub struct StructuralLoss {
    link_pred: bool,
    link_hops: usize,
    entropy_weight: f64,
}

impl StructuralLoss {
    pub fn new(link_pred: bool, link_hops: usize, entropy_weight: f64) -> Self {
        Self {
            link_pred,
            link_hops: link_hops.max(1),
            entropy_weight,
        }
    }

    pub fn from_config(config: &EncoderConfig) -> Self {
        Self::new(config.link_pred, config.link_pred_hops, config.entropy_weight)
    }

    pub fn structural_enabled(&self) -> bool {
        self.link_pred || self.entropy_weight > 0.0
    }

    /// Total loss of a forward result against integer `labels [B]`.
    pub fn compute(
        &self,
        output: &EncoderOutput,
        labels: &Tensor,
        node_counts: Option<&[usize]>,
    ) -> Result<LossBreakdown> {
        let primary = self.primary(&output.scores, labels)?;
        let mut total = primary.clone();
        let mut link = None;
        let mut entropy = None;
        let mut warnings = Vec::new();

        let retained = match (&output.assignment, &output.assign_adjacency, output.assign_level) {
            (Some(s), Some(a), Some(level)) => Some((s, a, level)),
            _ => None,
        };

        if let (true, Some((s, a, level))) = (self.structural_enabled(), retained) {
            let weights =
                self.pair_weights(s, level, node_counts, output.mask.as_ref(), &mut warnings)?;
            let p = s
                .matmul(&batch_transpose(s)?)
                .map_err(|e| DiffPoolError::Tensor(format!("S·Sᵀ failed: {}", e)))?;

            if self.link_pred {
                let term = self.link_loss(&p, a, &weights)?;
                total = (total + &term)
                    .map_err(|e| DiffPoolError::Tensor(format!("add link loss failed: {}", e)))?;
                link = Some(term);
            }

            if self.entropy_weight > 0.0 {
                let term = self.entropy_loss(&p, &weights)?;
                total = (total + &term).map_err(|e| {
                    DiffPoolError::Tensor(format!("add entropy loss failed: {}", e))
                })?;
                entropy = Some(term);
            }
        }

        Ok(LossBreakdown {
            total,
            primary,
            link,
            entropy,
            warnings,
        })
    }

    /// Softmax cross-entropy averaged over the batch
    pub fn primary(&self, scores: &Tensor, labels: &Tensor) -> Result<Tensor> {
        let (b, _) = scores
            .dims2()
            .map_err(|e| DiffPoolError::Shape(format!("scores must be [B, L]: {}", e)))?;
        if labels.dims() != [b] {
            return Err(DiffPoolError::Shape(format!(
                "labels {:?} do not match a batch of {}",
                labels.dims(),
                b
            )));
        }

        candle_nn::loss::cross_entropy(scores, labels)
            .map_err(|e| DiffPoolError::Tensor(format!("cross entropy failed: {}", e)))
    }

    fn pair_weights(
        &self,
        s: &Tensor,
        level: usize,
        node_counts: Option<&[usize]>,
        mask: Option<&Tensor>,
        warnings: &mut Vec<LossWarning>,
    ) -> Result<PairWeights> {
        let (b, n, _) = s
            .dims3()
            .map_err(|e| DiffPoolError::Shape(format!("assignment must be [B, N_in, N_out]: {}", e)))?;
        let dense = PairWeights {
            mask: None,
            count: (b * n * n) as f64,
        };

        if level > 0 {
            return Ok(dense);
        }

        match (node_counts, mask) {
            (Some(counts), _) => {
                if counts.len() != b {
                    return Err(DiffPoolError::Shape(format!(
                        "{} node counts for a batch of {}",
                        counts.len(),
                        b
                    )));
                }
                let count: usize = counts.iter().map(|c| c * c).sum();
                if count == 0 {
                    return Err(DiffPoolError::Numerical(
                        "structural loss has no valid node pairs".into(),
                    ));
                }
                let mask = construct_mask(counts, n, s.device())?;
                Ok(PairWeights {
                    mask: Some(pair_mask(&mask)?),
                    count: count as f64,
                })
            }
            (None, Some(mask)) => {
                let pairs = pair_mask(mask)?;
                let count = sum_scalar(&pairs)?
                    .to_scalar::<f32>()
                    .map_err(|e| DiffPoolError::Tensor(format!("pair count failed: {}", e)))?;
                if count <= 0.0 {
                    return Err(DiffPoolError::Numerical(
                        "structural loss has no valid node pairs".into(),
                    ));
                }
                Ok(PairWeights {
                    mask: Some(pairs),
                    count: count as f64,
                })
            }
            (None, None) => {
                let warning = LossWarning::Unmasked {
                    batch_size: b,
                    num_nodes: n,
                };
                warn!("{}", warning);
                warnings.push(warning);
                Ok(dense)
            }
        }
    }

    /// Sum of masked elementwise values divided by the valid pair count
    fn masked_mean(values: &Tensor, weights: &PairWeights) -> Result<Tensor> {
        let values = match &weights.mask {
            Some(mask) => values
                .mul(mask)
                .map_err(|e| DiffPoolError::Tensor(format!("pair mask failed: {}", e)))?,
            None => values.clone(),
        };
        sum_scalar(&values)?
            .affine(1.0 / weights.count, 0.0)
            .map_err(|e| DiffPoolError::Tensor(format!("pair average failed: {}", e)))
    }

    fn link_loss(&self, p: &Tensor, adjacency: &Tensor, weights: &PairWeights) -> Result<Tensor> {
        let mut power = p.clone();
        let mut reconstructed = p.clone();
        for _ in 1..self.link_hops {
            power = power
                .matmul(p)
                .map_err(|e| DiffPoolError::Tensor(format!("link power failed: {}", e)))?;
            reconstructed = (reconstructed + &power)
                .map_err(|e| DiffPoolError::Tensor(format!("link accumulate failed: {}", e)))?;
        }
        let reconstructed = reconstructed
            .minimum(1f64)
            .map_err(|e| DiffPoolError::Tensor(format!("link clamp failed: {}", e)))?;

        // Coarsened adjacencies carry pooled edge weights above 1
        let target = adjacency
            .clamp(0f64, 1f64)
            .map_err(|e| DiffPoolError::Tensor(format!("link target clamp failed: {}", e)))?;

        // The log epsilon pushes an exact match a hair below zero
        let bce = elementwise_bce(&reconstructed, &target, LOG_EPS)?
            .maximum(0f64)
            .map_err(|e| DiffPoolError::Tensor(format!("link floor failed: {}", e)))?;
        Self::masked_mean(&bce, weights)
    }

    fn entropy_loss(&self, p: &Tensor, weights: &PairWeights) -> Result<Tensor> {
        let h = binary_entropy(p, LOG_EPS)?;
        Self::masked_mean(&h, weights)?
            .affine(self.entropy_weight, 0.0)
            .map_err(|e| DiffPoolError::Tensor(format!("entropy weight failed: {}", e)))
    }
}
