//! Core Tensor Operations
//!
//! Device selection plus the batched helpers every layer needs: validity
//! masks, batched transposes, row normalization and elementwise binary
//! cross-entropy.
//!
//! ## Device selection
//!
//! ```bash
//! export DIFFPOOL_NO_GPU=1   # force CPU even when a GPU feature is compiled in
//! ```

use crate::{DiffPoolError, Result};
use candle_core::{DType, Device, Tensor};
use tracing::info;

// ============================================================================
// Environment-controlled Device Selection
// ============================================================================

/// Check if GPU is disabled via environment variable.
///
/// Set `DIFFPOOL_NO_GPU=1` to force CPU-only mode.
pub fn gpu_disabled() -> bool {
    std::env::var("DIFFPOOL_NO_GPU")
        .map(|v| !v.is_empty() && v != "0" && v.to_lowercase() != "false")
        .unwrap_or(false)
}

/// Get the best available device for tensor operations
///
/// Priority:
/// 1. Check `DIFFPOOL_NO_GPU` env var (forces CPU if set)
/// 2. Metal (Apple Silicon)
/// 3. CUDA (NVIDIA GPUs)
/// 4. CPU (fallback)
pub fn best_device() -> Device {
    if gpu_disabled() {
        info!("Using CPU device (DIFFPOOL_NO_GPU set)");
        return Device::Cpu;
    }

    #[cfg(feature = "metal")]
    {
        if let Ok(device) = Device::new_metal(0) {
            info!("Using Metal device");
            return device;
        }
    }

    #[cfg(feature = "cuda")]
    {
        if let Ok(device) = Device::new_cuda(0) {
            info!("Using CUDA device");
            return device;
        }
    }

    info!("Using CPU device");
    Device::Cpu
}

/// Force CPU device, ignoring GPU availability.
pub fn cpu_device() -> Device {
    Device::Cpu
}

/// Check if Metal is available (respects DIFFPOOL_NO_GPU)
#[cfg(feature = "metal")]
pub fn metal_available() -> bool {
    !gpu_disabled() && Device::new_metal(0).is_ok()
}

/// Check if Metal is available (always false when `metal` feature is not enabled)
#[cfg(not(feature = "metal"))]
pub fn metal_available() -> bool {
    false
}

/// Check if CUDA is available (respects DIFFPOOL_NO_GPU)
#[cfg(feature = "cuda")]
pub fn cuda_available() -> bool {
    !gpu_disabled() && Device::new_cuda(0).is_ok()
}

/// Check if CUDA is available (always false when `cuda` feature is not enabled)
#[cfg(not(feature = "cuda"))]
pub fn cuda_available() -> bool {
    false
}

/// Check if any GPU is available and enabled
pub fn gpu_available() -> bool {
    !gpu_disabled() && (metal_available() || cuda_available())
}

// ============================================================================
// Masking
// ============================================================================

/// Build the valid-node mask `[B, max_nodes, 1]` from per-graph node counts.
///
/// `mask[b, i, 0] = 1.0` iff `i < node_counts[b]`.
pub fn construct_mask(node_counts: &[usize], max_nodes: usize, device: &Device) -> Result<Tensor> {
    let batch_size = node_counts.len();
    let mut data = vec![0.0f32; batch_size * max_nodes];

    for (b, &count) in node_counts.iter().enumerate() {
        if count > max_nodes {
            return Err(DiffPoolError::Shape(format!(
                "graph {} has {} nodes but the batch is padded to {}",
                b, count, max_nodes
            )));
        }
        let row = &mut data[b * max_nodes..b * max_nodes + count];
        row.iter_mut().for_each(|v| *v = 1.0);
    }

    Tensor::from_vec(data, (batch_size, max_nodes, 1), device)
        .map_err(|e| DiffPoolError::Tensor(format!("construct_mask failed: {}", e)))
}

/// Pairwise mask `mask · maskᵀ` → `[B, N, N]`.
pub fn pair_mask(mask: &Tensor) -> Result<Tensor> {
    let mask_t = batch_transpose(mask)?;
    mask.matmul(&mask_t)
        .map_err(|e| DiffPoolError::Tensor(format!("pair_mask matmul failed: {}", e)))
}

// ============================================================================
// Batched linear algebra helpers
// ============================================================================

/// Swap the last two axes of a rank-3 tensor, returning a contiguous copy.
pub fn batch_transpose(t: &Tensor) -> Result<Tensor> {
    t.transpose(1, 2)
        .and_then(|t| t.contiguous())
        .map_err(|e| DiffPoolError::Tensor(format!("batch_transpose failed: {}", e)))
}

/// L2-normalize each node vector along the last axis.
///
/// The norm is floored at `1e-12`, so all-zero rows stay zero.
pub fn l2_normalize(x: &Tensor) -> Result<Tensor> {
    let last = x.rank().saturating_sub(1);
    let norm = x
        .sqr()
        .map_err(|e| DiffPoolError::Tensor(format!("l2_normalize sqr failed: {}", e)))?
        .sum_keepdim(last)
        .map_err(|e| DiffPoolError::Tensor(format!("l2_normalize sum failed: {}", e)))?
        .sqrt()
        .map_err(|e| DiffPoolError::Tensor(format!("l2_normalize sqrt failed: {}", e)))?
        .maximum(1e-12f64)
        .map_err(|e| DiffPoolError::Tensor(format!("l2_normalize floor failed: {}", e)))?;

    x.broadcast_div(&norm)
        .map_err(|e| DiffPoolError::Tensor(format!("l2_normalize div failed: {}", e)))
}

// ============================================================================
// Elementwise losses
// ============================================================================

/// Elementwise binary cross-entropy, unreduced.
///
/// `-target · log(pred + eps) - (1 - target) · log(1 - pred + eps)`
///
/// `pred` is expected in `[0, 1]`; the epsilon keeps both logarithms finite
/// at the endpoints.
pub fn elementwise_bce(pred: &Tensor, target: &Tensor, eps: f64) -> Result<Tensor> {
    let log_p = pred
        .affine(1.0, eps)
        .and_then(|t| t.log())
        .map_err(|e| DiffPoolError::Tensor(format!("bce log p failed: {}", e)))?;

    // (1 - p) + eps
    let log_1_p = pred
        .affine(-1.0, 1.0)
        .and_then(|t| t.affine(1.0, eps))
        .and_then(|t| t.log())
        .map_err(|e| DiffPoolError::Tensor(format!("bce log 1-p failed: {}", e)))?;

    let one_minus_target = target
        .affine(-1.0, 1.0)
        .map_err(|e| DiffPoolError::Tensor(format!("bce 1-target failed: {}", e)))?;

    let term1 = target
        .mul(&log_p)
        .map_err(|e| DiffPoolError::Tensor(format!("bce term1 failed: {}", e)))?;
    let term2 = one_minus_target
        .mul(&log_1_p)
        .map_err(|e| DiffPoolError::Tensor(format!("bce term2 failed: {}", e)))?;

    (term1 + term2)
        .and_then(|t| t.neg())
        .map_err(|e| DiffPoolError::Tensor(format!("bce combine failed: {}", e)))
}

/// Elementwise binary entropy `H(p) = -p·log(p+eps) - (1-p)·log(1-p+eps)`.
///
/// `p` is clamped to `[0, 1]` first; products of probability rows can land a
/// rounding step above 1.
pub fn binary_entropy(p: &Tensor, eps: f64) -> Result<Tensor> {
    let p = p
        .clamp(0f32, 1f32)
        .map_err(|e| DiffPoolError::Tensor(format!("entropy clamp failed: {}", e)))?;
    elementwise_bce(&p, &p, eps)
}

/// `Some("NaN")` or `Some("Infinite")` for the first non-finite element, read
/// through an `f32` copy whatever the tensor's dtype.
pub(crate) fn non_finite_kind(t: &Tensor) -> Result<Option<&'static str>> {
    let vals = t
        .flatten_all()
        .and_then(|t| t.to_dtype(DType::F32))
        .and_then(|t| t.to_vec1::<f32>())
        .map_err(|e| DiffPoolError::Tensor(format!("finite check failed: {}", e)))?;
    if vals.iter().any(|v| v.is_nan()) {
        return Ok(Some("NaN"));
    }
    if vals.iter().any(|v| v.is_infinite()) {
        return Ok(Some("Infinite"));
    }
    Ok(None)
}

/// Sum of all elements as an `f32` scalar tensor of rank 0.
pub(crate) fn sum_scalar(t: &Tensor) -> Result<Tensor> {
    t.sum_all()
        .and_then(|t| t.to_dtype(DType::F32))
        .map_err(|e| DiffPoolError::Tensor(format!("sum_all failed: {}", e)))
}
