//! Backend facade — starts a partition, validates the version file, and
//! routes `get/put/delete/fold` to block or plain operations (§4.5).
//!
//! The single entry point wrapping `FileLayout` and the version file;
//! dispatch is by key shape (block key vs. plain key), not by subcommand.

use crate::config::PartitionConfig;
use crate::error::BackendError;
use crate::fold;
use crate::layout::{self, FileLayout};
use crate::path_encoder;
use crate::version_file;
use std::fs;
use std::path::PathBuf;
use uuid::Uuid;

/// Capabilities this backend advertises (§4.5, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub async_fold: bool,
    pub write_once_keys: bool,
    pub put_plus_object: bool,
}

pub const CAPABILITIES: Capabilities = Capabilities {
    async_fold: true,
    write_once_keys: false,
    put_plus_object: true,
};

/// A started, validated partition ready to serve `get`/`put`/`delete`/fold.
pub struct Backend {
    layout: FileLayout,
}

impl Backend {
    /// `start(partition, config)` (§4.5): resolve configuration, validate
    /// `block_size`/`max_blocks`, create or check the version file, and
    /// ensure the partition directory exists.
    pub fn start(partition: &str, config: PartitionConfig) -> Result<Self, BackendError> {
        if config.block_size == 0 {
            return Err(BackendError::ConfigError("block_size must be positive".into()));
        }
        if config.max_blocks < 1 {
            return Err(BackendError::ConfigError("max_blocks must be >= 1".into()));
        }

        let partition_dir: PathBuf = config.data_root.join(partition);
        fs::create_dir_all(&partition_dir)?;
        path_encoder::check_case_sensitive(&partition_dir)?;

        version_file::open_or_create(
            &partition_dir,
            partition,
            config.block_size,
            config.max_blocks,
            config.b_depth,
            config.k_depth,
        )?;

        tracing::info!(partition, block_size = config.block_size, max_blocks = config.max_blocks, "partition_started");

        let layout = FileLayout::new(partition_dir, config.block_size, config.max_blocks, config.b_depth, config.k_depth);
        Ok(Self { layout })
    }

    pub fn layout(&self) -> &FileLayout {
        &self.layout
    }

    pub fn capabilities(&self) -> Capabilities {
        CAPABILITIES
    }

    /// Dispatch a read to block or plain storage based on the bucket prefix
    /// and key shape (§4.5, §3).
    pub fn get(&self, bucket: &[u8], key: &[u8]) -> Result<Vec<u8>, BackendError> {
        if let Some((uuid, n)) = self.as_block_key(bucket, key) {
            self.layout.read_block(bucket, &uuid, n)
        } else {
            self.layout.plain_get(bucket, key)
        }
    }

    /// `put` on a block key with an oversize value fails with
    /// `InvalidUserArgument` before any I/O (§4.5, §8 invariant 2).
    pub fn put(&self, bucket: &[u8], key: &[u8], value: &[u8]) -> Result<(), BackendError> {
        if let Some((uuid, n)) = self.as_block_key(bucket, key) {
            self.layout.put_block(bucket, &uuid, n, value, false)
        } else {
            self.layout.plain_put(bucket, key, value)
        }
    }

    pub fn delete(&self, bucket: &[u8], key: &[u8]) -> Result<(), BackendError> {
        if let Some((uuid, n)) = self.as_block_key(bucket, key) {
            self.layout.delete_block(bucket, &uuid, n)
        } else {
            self.layout.plain_delete(bucket, key)
        }
    }

    /// Mark a block tombstoned without writing new data.
    pub fn tombstone(&self, bucket: &[u8], key: &[u8]) -> Result<(), BackendError> {
        if let Some((uuid, n)) = self.as_block_key(bucket, key) {
            self.layout.put_block(bucket, &uuid, n, &[], true)
        } else {
            self.layout.plain_delete(bucket, key)
        }
    }

    pub fn fold_buckets<F: FnMut(&[u8])>(&self, f: F) -> Result<(), BackendError> {
        fold::fold_buckets(&self.layout, f)
    }

    pub fn fold_keys<F: FnMut(&[u8], &[u8])>(&self, f: F) -> Result<(), BackendError> {
        fold::fold_keys(&self.layout, f)
    }

    pub fn fold_objects<F: FnMut(&[u8], &[u8], &[u8])>(&self, f: F) -> Result<(), BackendError> {
        fold::fold_objects(&self.layout, f)
    }

    /// A thunk deferring `fold_objects` execution, for `async_fold` callers.
    pub fn fold_objects_async(&self) -> impl FnOnce() -> Result<Vec<(Vec<u8>, Vec<u8>, Vec<u8>)>, BackendError> {
        fold::fold_objects_thunk(self.layout.clone())
    }

    /// `is_empty` ≡ fold yields nothing (§4.5).
    pub fn is_empty(&self) -> Result<bool, BackendError> {
        fold::is_empty(&self.layout)
    }

    /// Recursively remove the partition directory, then recreate it (§4.5).
    pub fn drop_partition(&self) -> Result<(), BackendError> {
        let dir = self.layout.partition_dir();
        if dir.exists() {
            fs::remove_dir_all(dir)?;
        }
        fs::create_dir_all(dir)?;
        Ok(())
    }

    /// Interpret `key` as a block key iff `bucket` is a block bucket and
    /// `key` is exactly `UUID ‖ block_number` (§3).
    fn as_block_key(&self, bucket: &[u8], key: &[u8]) -> Option<(Uuid, u64)> {
        if layout::is_block_bucket(bucket) {
            layout::parse_block_key(key)
        } else {
            None
        }
    }
}
