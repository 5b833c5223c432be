//! Checkpoint Storage
//!
//! Save and restore an encoder's parameters with safetensors.
//!
//! Every persistent variable (weights, biases, batch-norm affine parameters
//! and running statistics) is stored under its stable name, e.g.
//! `embed0.conv1.weight` or `assign0.proj.bias`. The safetensors header
//! metadata carries the encoder configuration, its SHA-256 hash, the crate
//! version and the save time, so a checkpoint is self-describing:
//!
//! ```rust,ignore
//! save_checkpoint(&encoder, "models/diffpool.safetensors")?;
//!
//! // Same config: restore into an existing encoder
//! load_checkpoint(&encoder, "models/diffpool.safetensors")?;
//!
//! // Or rebuild the encoder from the embedded config
//! let restored = load_encoder("models/diffpool.safetensors", &device)?;
//! ```

use crate::config::EncoderConfig;
use crate::encoder::HierarchicalEncoder;
use crate::primitives::XavierUniform;
use crate::{DiffPoolError, Result};
use candle_core::Device;
use chrono::{DateTime, Utc};
use safetensors::tensor::{Dtype, TensorView};
use safetensors::SafeTensors;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

const META_FORMAT: &str = "format";
const META_VERSION: &str = "crate_version";
const META_HASH: &str = "config_hash";
const META_CONFIG: &str = "config";
const META_SAVED_AT: &str = "saved_at";
const META_PARAMS: &str = "param_count";
const FORMAT_TAG: &str = "diffpool";

/// Header metadata of a checkpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    pub crate_version: String,
    pub config_hash: String,
    pub config: EncoderConfig,
    pub saved_at: DateTime<Utc>,
    pub param_count: usize,
}

impl CheckpointMetadata {
    fn to_header(&self) -> Result<HashMap<String, String>> {
        Ok(HashMap::from([
            (META_FORMAT.to_string(), FORMAT_TAG.to_string()),
            (META_VERSION.to_string(), self.crate_version.clone()),
            (META_HASH.to_string(), self.config_hash.clone()),
            (META_CONFIG.to_string(), self.config.to_json()?),
            (META_SAVED_AT.to_string(), self.saved_at.to_rfc3339()),
            (META_PARAMS.to_string(), self.param_count.to_string()),
        ]))
    }

    fn from_header(header: &HashMap<String, String>) -> Result<Self> {
        let get = |key: &str| {
            header.get(key).ok_or_else(|| {
                DiffPoolError::Serialization(format!("checkpoint metadata missing '{}'", key))
            })
        };

        if get(META_FORMAT)? != FORMAT_TAG {
            return Err(DiffPoolError::Serialization(
                "not a diffpool checkpoint".into(),
            ));
        }

        let saved_at = DateTime::parse_from_rfc3339(get(META_SAVED_AT)?)
            .map_err(|e| DiffPoolError::Serialization(format!("invalid saved_at: {}", e)))?
            .with_timezone(&Utc);
        let param_count = get(META_PARAMS)?
            .parse()
            .map_err(|e| DiffPoolError::Serialization(format!("invalid param_count: {}", e)))?;

        Ok(Self {
            crate_version: get(META_VERSION)?.clone(),
            config_hash: get(META_HASH)?.clone(),
            config: EncoderConfig::from_json(get(META_CONFIG)?)?,
            saved_at,
            param_count,
        })
    }
}

/// SHA-256 of the configuration's JSON form, hex encoded
pub fn config_hash(config: &EncoderConfig) -> Result<String> {
    let mut hasher = Sha256::new();
    hasher.update(config.to_json()?.as_bytes());
    Ok(format!("{:x}", hasher.finalize()))
}

/// Write every persistent variable of `encoder` to `path`.
pub fn save_checkpoint(
    encoder: &HierarchicalEncoder,
    path: impl AsRef<Path>,
) -> Result<CheckpointMetadata> {
    let path = path.as_ref();
    let metadata = CheckpointMetadata {
        crate_version: env!("CARGO_PKG_VERSION").to_string(),
        config_hash: config_hash(encoder.config())?,
        config: encoder.config().clone(),
        saved_at: Utc::now(),
        param_count: encoder.param_count(),
    };

    // Host copies must outlive the views that borrow them
    let mut data_store: Vec<(String, Vec<usize>, Vec<f32>)> = Vec::new();
    for (name, var) in encoder.named_state() {
        let tensor = var.as_tensor();
        let data: Vec<f32> = tensor.flatten_all()?.to_vec1()?;
        data_store.push((name, tensor.dims().to_vec(), data));
    }

    let mut views: HashMap<String, TensorView> = HashMap::with_capacity(data_store.len());
    for (name, shape, data) in &data_store {
        let view = TensorView::new(Dtype::F32, shape.clone(), bytemuck::cast_slice(data))
            .map_err(|e| DiffPoolError::Serialization(format!("tensor view '{}': {}", name, e)))?;
        views.insert(name.clone(), view);
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    safetensors::serialize_to_file(views, &Some(metadata.to_header()?), path)
        .map_err(|e| DiffPoolError::Serialization(format!("Failed to save: {}", e)))?;

    info!(
        "Saved checkpoint {} ({} tensors, {} parameters)",
        path.display(),
        data_store.len(),
        metadata.param_count
    );
    Ok(metadata)
}

/// Read only the header metadata of a checkpoint
pub fn read_metadata(path: impl AsRef<Path>) -> Result<CheckpointMetadata> {
    let data = std::fs::read(path.as_ref())?;
    metadata_from_bytes(&data)
}

fn metadata_from_bytes(data: &[u8]) -> Result<CheckpointMetadata> {
    let (_, header) = SafeTensors::read_metadata(data)
        .map_err(|e| DiffPoolError::Serialization(format!("Failed to read header: {}", e)))?;
    let header = header.metadata().as_ref().ok_or_else(|| {
        DiffPoolError::Serialization("checkpoint has no metadata".into())
    })?;
    CheckpointMetadata::from_header(header)
}

/// Restore `encoder`'s variables from `path`.
///
/// The embedded config hash must match the encoder's configuration and every
/// stored tensor must match its variable's shape; nothing is written unless
/// all checks pass.
pub fn load_checkpoint(
    encoder: &HierarchicalEncoder,
    path: impl AsRef<Path>,
) -> Result<CheckpointMetadata> {
    let path = path.as_ref();
    let data = std::fs::read(path)?;
    let metadata = metadata_from_bytes(&data)?;

    let expected = config_hash(encoder.config())?;
    if metadata.config_hash != expected {
        return Err(DiffPoolError::Config(format!(
            "checkpoint config hash {} does not match encoder config hash {}",
            metadata.config_hash, expected
        )));
    }

    let tensors = candle_core::safetensors::load_buffer(&data, encoder.device())
        .map_err(|e| DiffPoolError::Serialization(format!("Failed to deserialize: {}", e)))?;

    let state = encoder.named_state();
    let mut staged = Vec::with_capacity(state.len());
    for (name, var) in &state {
        let loaded = tensors.get(name).ok_or_else(|| {
            DiffPoolError::Serialization(format!("Missing parameter '{}'", name))
        })?;
        if loaded.dims() != var.as_tensor().dims() {
            return Err(DiffPoolError::Shape(format!(
                "parameter '{}' stored as {:?}, encoder expects {:?}",
                name,
                loaded.dims(),
                var.as_tensor().dims()
            )));
        }
        staged.push((var, loaded));
    }

    for (var, loaded) in staged {
        var.set(loaded)
            .map_err(|e| DiffPoolError::Tensor(format!("Failed to set var: {}", e)))?;
    }

    info!("Loaded checkpoint {} ({} tensors)", path.display(), state.len());
    Ok(metadata)
}

/// Build an encoder from the configuration embedded in a checkpoint and
/// restore its variables.
pub fn load_encoder(path: impl AsRef<Path>, device: &Device) -> Result<HierarchicalEncoder> {
    let path = path.as_ref();
    let metadata = read_metadata(path)?;
    // Placeholder weights, overwritten by the load below
    let mut init = XavierUniform::relu(0);
    let encoder = HierarchicalEncoder::new(metadata.config, &mut init, device)?;
    load_checkpoint(&encoder, path)?;
    Ok(encoder)
}
