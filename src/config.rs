//! Layered configuration resolution (§6, §10.3).
//!
//! Each key may be supplied explicitly or resolved from the host process
//! environment, a config-or-env lookup suited to a crate embedded as a
//! library and not driven purely from argv.

use crate::error::BackendError;
use std::path::PathBuf;

/// Default upper bound on blocks packed into a single host file.
pub const DEFAULT_MAX_BLOCKS: u64 = 1024;
/// Default bucket-nesting depth.
pub const DEFAULT_B_DEPTH: usize = 2;
/// Default key-nesting depth.
pub const DEFAULT_K_DEPTH: usize = 2;
/// Default manifest-save tick interval.
pub const DEFAULT_MANIFEST_SAVE_INTERVAL_MS: u64 = 60_000;
/// Default writer pool size.
pub const DEFAULT_WRITER_POOL_SIZE: usize = 8;
/// Default upload buffer high-water mark.
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 16 * 1024 * 1024;

/// Partition-level configuration (§5, §6).
#[derive(Debug, Clone)]
pub struct PartitionConfig {
    pub data_root: PathBuf,
    pub block_size: u32,
    pub max_blocks: u64,
    pub b_depth: usize,
    pub k_depth: usize,
}

impl PartitionConfig {
    /// Resolve configuration from explicit fields, falling back to
    /// `BLOCKVAULT_*` environment variables for anything left `None`.
    pub fn resolve(
        data_root: Option<PathBuf>,
        block_size: Option<u32>,
        max_blocks: Option<u64>,
        b_depth: Option<usize>,
        k_depth: Option<usize>,
    ) -> Result<Self, BackendError> {
        let data_root = data_root
            .or_else(|| std::env::var("BLOCKVAULT_DATA_ROOT").ok().map(PathBuf::from))
            .ok_or_else(|| BackendError::ConfigError("data_root is required".into()))?;

        let block_size = block_size
            .or_else(|| env_u32("BLOCKVAULT_BLOCK_SIZE"))
            .ok_or_else(|| BackendError::ConfigError("block_size is required".into()))?;
        if block_size == 0 {
            return Err(BackendError::ConfigError("block_size must be positive".into()));
        }

        let max_blocks = max_blocks
            .or_else(|| env_u64("BLOCKVAULT_MAX_BLOCKS"))
            .unwrap_or(DEFAULT_MAX_BLOCKS);
        if max_blocks < 1 {
            return Err(BackendError::ConfigError("max_blocks must be >= 1".into()));
        }

        let b_depth = b_depth
            .or_else(|| env_usize("BLOCKVAULT_B_DEPTH"))
            .unwrap_or(DEFAULT_B_DEPTH);
        let k_depth = k_depth
            .or_else(|| env_usize("BLOCKVAULT_K_DEPTH"))
            .unwrap_or(DEFAULT_K_DEPTH);

        Ok(Self {
            data_root,
            block_size,
            max_blocks,
            b_depth,
            k_depth,
        })
    }
}

/// Upload-coordinator configuration (§4.7, §6).
#[derive(Debug, Clone, Copy)]
pub struct UploadConfig {
    pub max_buffer_size: usize,
    pub manifest_save_interval_ms: u64,
    pub writer_pool_size: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            manifest_save_interval_ms: DEFAULT_MANIFEST_SAVE_INTERVAL_MS,
            writer_pool_size: DEFAULT_WRITER_POOL_SIZE,
        }
    }
}

fn env_u32(key: &str) -> Option<u32> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
fn env_usize(key: &str) -> Option<usize> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
