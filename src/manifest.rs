//! Upload session manifest and the external manifest collaborator (§3, §9).
//!
//! A `serde`-derived, JSON-serialized record describing one in-flight
//! upload. Persistence is delegated to an external collaborator
//! (`SaveManifest`) instead of being written by this crate directly — the
//! cluster-wide "manifest FSM" that actually durably records it is out of
//! scope (§1); this crate only calls out to it.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Metadata describing one upload, persisted by an external collaborator on
/// every `manifest_save_tick` and on finalize.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Manifest {
    pub bucket: Vec<u8>,
    pub key: Vec<u8>,
    /// Correlates this upload's blocks under the block bucket (§3).
    pub uuid: Uuid,
    pub total_length: u64,
    pub content_type: String,
    pub block_size: u32,
    pub bytes_received: u64,
    pub blocks_written: Vec<u64>,
    /// RFC 3339 timestamp of `prepare`, for diagnostics only.
    pub created_at: String,
}

impl Manifest {
    pub fn new(bucket: Vec<u8>, key: Vec<u8>, uuid: Uuid, total_length: u64, content_type: String, block_size: u32) -> Self {
        Self {
            bucket,
            key,
            uuid,
            total_length,
            content_type,
            block_size,
            bytes_received: 0,
            blocks_written: Vec::new(),
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    pub fn is_complete(&self) -> bool {
        self.bytes_received == self.total_length
    }
}

/// The external collaborator the FSM hands manifests to on every tick and on
/// finalize (§4.7, §9). Out of scope: what it does with the manifest (e.g.
/// cluster-wide replication) — this crate only calls `save_manifest`.
pub trait SaveManifest: Send + Sync {
    fn save_manifest(&self, manifest: &Manifest);
}

/// An in-memory collaborator used by tests and single-process deployments:
/// keeps the most recent manifest for each `(bucket, key)` under a lock.
#[derive(Default)]
pub struct InMemoryManifestStore {
    saved: parking_lot::Mutex<HashMap<(Vec<u8>, Vec<u8>), Manifest>>,
}

impl InMemoryManifestStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, bucket: &[u8], key: &[u8]) -> Option<Manifest> {
        self.saved.lock().get(&(bucket.to_vec(), key.to_vec())).cloned()
    }
}

impl SaveManifest for InMemoryManifestStore {
    fn save_manifest(&self, manifest: &Manifest) {
        self.saved
            .lock()
            .insert((manifest.bucket.clone(), manifest.key.clone()), manifest.clone());
    }
}

/// A collaborator that only logs, for deployments with no manifest tier
/// wired up yet.
pub struct LoggingManifestStore;

impl SaveManifest for LoggingManifestStore {
    fn save_manifest(&self, manifest: &Manifest) {
        tracing::info!(
            bucket = ?manifest.bucket,
            key = ?manifest.key,
            bytes_received = manifest.bytes_received,
            total_length = manifest.total_length,
            "manifest_save_tick"
        );
    }
}
