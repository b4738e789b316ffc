//! Per-partition version file (`.version.data`) — §3, §6.
//!
//! Validates on-disk state before trusting it and fails the whole startup
//! on mismatch. The on-disk shape is a plain `key=value` text format, not a
//! fixed-width binary header; there is no checksum on this file.

use crate::error::BackendError;
use crate::path_encoder::VERSION_FILE_NAME;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Current (and only) version file format revision.
pub const CURRENT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRecord {
    pub backend_id: String,
    pub version: u32,
    pub block_size: u32,
    pub max_blocks: u64,
    pub b_depth: usize,
    pub k_depth: usize,
}

impl VersionRecord {
    fn to_text(&self) -> String {
        format!(
            "backend_id={}\nversion={}\nblock_size={}\nmax_blocks={}\nb_depth={}\nk_depth={}\n",
            self.backend_id, self.version, self.block_size, self.max_blocks, self.b_depth, self.k_depth
        )
    }

    fn from_text(text: &str) -> Result<Self, BackendError> {
        let mut map: HashMap<&str, &str> = HashMap::new();
        for line in text.lines() {
            if let Some((k, v)) = line.split_once('=') {
                map.insert(k.trim(), v.trim());
            }
        }
        let get = |k: &str| -> Result<&str, BackendError> {
            map.get(k)
                .copied()
                .ok_or_else(|| BackendError::ConfigError(format!("version file missing key {k}")))
        };
        let parse = |k: &str, v: &str| -> Result<u64, BackendError> {
            v.parse()
                .map_err(|_| BackendError::ConfigError(format!("version file key {k} is not numeric")))
        };

        Ok(Self {
            backend_id: get("backend_id")?.to_string(),
            version: parse("version", get("version")?)? as u32,
            block_size: parse("block_size", get("block_size")?)? as u32,
            max_blocks: parse("max_blocks", get("max_blocks")?)?,
            b_depth: parse("b_depth", get("b_depth")?)? as usize,
            k_depth: parse("k_depth", get("k_depth")?)? as usize,
        })
    }
}

/// Ensure `partition_dir/.version.data` exists and is compatible with
/// `configured`, creating it on first start. Returns `ConfigError` (fatal
/// to `start`, §7) if an existing version file is incompatible.
pub fn open_or_create(
    partition_dir: &Path,
    backend_id: &str,
    configured_block_size: u32,
    configured_max_blocks: u64,
    configured_b_depth: usize,
    configured_k_depth: usize,
) -> Result<VersionRecord, BackendError> {
    let path = partition_dir.join(VERSION_FILE_NAME);

    if path.exists() {
        let text = fs::read_to_string(&path)?;
        let stored = VersionRecord::from_text(&text)?;

        if configured_block_size > stored.block_size {
            return Err(BackendError::ConfigError(format!(
                "configured block_size {configured_block_size} exceeds stored {}",
                stored.block_size
            )));
        }
        if configured_max_blocks > stored.max_blocks {
            return Err(BackendError::ConfigError(format!(
                "configured max_blocks {configured_max_blocks} exceeds stored {}",
                stored.max_blocks
            )));
        }
        if configured_b_depth != stored.b_depth || configured_k_depth != stored.k_depth {
            return Err(BackendError::ConfigError(
                "configured b_depth/k_depth differ from stored version file".into(),
            ));
        }
        return Ok(stored);
    }

    let record = VersionRecord {
        backend_id: backend_id.to_string(),
        version: CURRENT_VERSION,
        block_size: configured_block_size,
        max_blocks: configured_max_blocks,
        b_depth: configured_b_depth,
        k_depth: configured_k_depth,
    };
    fs::create_dir_all(partition_dir)?;
    fs::write(&path, record.to_text())?;
    Ok(record)
}
