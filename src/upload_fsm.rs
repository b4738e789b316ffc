//! Upload FSM — per-upload state machine coordinating the slicer, the
//! writer pool, and the manifest-save ticker (§4.7).
//!
//! A tagged-variant current state advanced by discrete events, driven by
//! real concurrent collaborators (writers, ticker): every transition is a
//! method that mutates local state and dispatches messages rather than a
//! loop over one data source (§5, §9: one serialized event queue per
//! upload, no shared mutable state across uploads).

use crate::config::UploadConfig;
use crate::error::UploadError;
use crate::manifest::{Manifest, SaveManifest};
use crate::slicer;
use crate::ticker::{ManifestSaveTick, ManifestTicker};
use crate::writer::{BlockWritten, WriteJob, WriterPool};
use crossbeam_channel::Sender;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    Prepare,
    NotFull,
    Full,
    AllReceived,
    Done,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkClass {
    LastChunk,
    Backpressure,
    Accept,
}

/// §4.7.1 chunk classification, a pure function of the five inputs it names.
fn classify_chunk(content_length: u64, bytes_received: u64, new_size: u64, current_buffer: usize, max_buffer: usize) -> ChunkClass {
    if bytes_received + new_size == content_length {
        ChunkClass::LastChunk
    } else if current_buffer + new_size as usize > max_buffer {
        ChunkClass::Backpressure
    } else {
        ChunkClass::Accept
    }
}

/// Per-upload state machine (§4.7). One instance per in-flight upload; all
/// events against one instance must be serialized by the caller (§5).
pub struct UploadFsm {
    state: UploadState,
    bucket: Vec<u8>,
    key: Vec<u8>,
    uuid: Uuid,
    total_length: u64,
    block_size: u32,
    bytes_received: u64,
    accumulator: Vec<u8>,
    /// Bytes received but not yet durable: the sub-block remainder still
    /// sitting in `accumulator` plus every byte sliced into a block that
    /// hasn't been acked by `block_written` yet (queued or in flight). This
    /// is the quantity §4.7.1's backpressure check is against — counting
    /// only `accumulator.len()` would never see bytes tied up in blocks
    /// still pending or in flight.
    current_buffer_size: usize,
    max_buffer_size: usize,
    next_block_id: u64,
    pending_blocks: VecDeque<(u64, Vec<u8>)>,
    /// Ordered set of writer ids owned by this upload and currently idle;
    /// dispatch always takes the lowest id (§4.7.2).
    free_writers: BTreeSet<usize>,
    /// Ordered by block id; empty iff the upload is `done` (§3 invariant).
    /// Values carry the dispatched block's length so `block_written` can
    /// retire it from `current_buffer_size`.
    unacked_writes: BTreeMap<u64, (usize, usize)>,
    deferred_augment: Option<Sender<Result<(), UploadError>>>,
    deferred_finalize: Option<Sender<Result<Manifest, UploadError>>>,
    manifest: Manifest,
    pool: Arc<WriterPool>,
    save_manifest: Arc<dyn SaveManifest>,
    ticker: Option<ManifestTicker>,
    failure: Option<UploadError>,
}

impl UploadFsm {
    /// `prepare` (§4.7): acquire writers, allocate the manifest, start the
    /// ticker, then transition straight to `not_full`.
    #[allow(clippy::too_many_arguments)]
    pub fn prepare(
        bucket: Vec<u8>,
        key: Vec<u8>,
        total_length: u64,
        content_type: String,
        block_size: u32,
        config: &UploadConfig,
        pool: Arc<WriterPool>,
        save_manifest: Arc<dyn SaveManifest>,
        tick_tx: Sender<ManifestSaveTick>,
    ) -> Self {
        let uuid = Uuid::new_v4();
        let manifest = Manifest::new(bucket.clone(), key.clone(), uuid, total_length, content_type, block_size);
        let writer_count = config.writer_pool_size.min(pool.size().max(1));
        let free_writers: BTreeSet<usize> = pool.acquire(writer_count).into_iter().collect();
        let ticker = ManifestTicker::start(Duration::from_millis(config.manifest_save_interval_ms), tick_tx);

        tracing::info!(bucket = ?bucket, key = ?key, uuid = %uuid, total_length, "upload_prepare");

        Self {
            state: UploadState::NotFull,
            bucket,
            key,
            uuid,
            total_length,
            block_size,
            bytes_received: 0,
            accumulator: Vec::new(),
            current_buffer_size: 0,
            max_buffer_size: config.max_buffer_size,
            next_block_id: 0,
            pending_blocks: VecDeque::new(),
            free_writers,
            unacked_writes: BTreeMap::new(),
            deferred_augment: None,
            deferred_finalize: None,
            manifest,
            pool,
            save_manifest,
            ticker: Some(ticker),
            failure: None,
        }
    }

    pub fn state(&self) -> UploadState {
        self.state
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn failure(&self) -> Option<&UploadError> {
        self.failure.as_ref()
    }

    /// `augment_data` (§4.7, §4.7.1). Accepted only in `not_full`; rejected
    /// in every other live state.
    pub fn augment_data(&mut self, new_bytes: Vec<u8>, reply: Sender<Result<(), UploadError>>) {
        if self.state != UploadState::NotFull {
            let _ = reply.send(Err(UploadError::Rejected));
            return;
        }

        let new_size = new_bytes.len() as u64;
        let class = classify_chunk(
            self.total_length,
            self.bytes_received,
            new_size,
            self.current_buffer_size,
            self.max_buffer_size,
        );

        self.accumulator.extend_from_slice(&new_bytes);
        self.bytes_received += new_size;
        self.manifest.bytes_received = self.bytes_received;
        self.current_buffer_size += new_size as usize;

        let (full_blocks, remainder) = slicer::slice(&self.accumulator, self.block_size, self.bytes_received, self.total_length);
        self.accumulator = remainder.unwrap_or_default();

        for block in full_blocks {
            let block_id = self.next_block_id;
            self.next_block_id += 1;
            self.pending_blocks.push_back((block_id, block));
        }
        self.dispatch_ready_blocks();

        match class {
            ChunkClass::LastChunk => {
                self.state = UploadState::AllReceived;
                let _ = reply.send(Ok(()));
                self.maybe_complete();
            }
            ChunkClass::Accept => {
                let _ = reply.send(Ok(()));
            }
            ChunkClass::Backpressure if self.has_outstanding_work() => {
                self.state = UploadState::Full;
                self.deferred_augment = Some(reply);
            }
            ChunkClass::Backpressure => {
                // Nothing dispatched or pending could ever trigger a
                // `block_written` to release this caller — e.g.
                // `max_buffer_size < block_size` means a sub-block chunk can
                // cross the buffer threshold without ever assembling a full
                // block. Blocking here would wedge the upload forever
                // (§8 invariant 8), so accept instead and let the buffer
                // drain naturally once more data completes a block.
                let _ = reply.send(Ok(()));
            }
        }
    }

    /// Whether any block is queued or in flight — i.e. something exists
    /// whose eventual `block_written` could shrink `current_buffer_size`.
    fn has_outstanding_work(&self) -> bool {
        !self.pending_blocks.is_empty() || !self.unacked_writes.is_empty()
    }

    /// `block_written` (§4.7). Valid in every live state; stray completions
    /// after `done`/`failed` are ignored.
    pub fn block_written(&mut self, msg: BlockWritten) {
        let BlockWritten { block_id, writer_id, result } = msg;
        let length = self.unacked_writes.remove(&block_id).map(|(_, len)| len).unwrap_or(0);
        self.free_writers.insert(writer_id);

        if matches!(self.state, UploadState::Done | UploadState::Failed) {
            self.pool.release([writer_id]);
            self.free_writers.remove(&writer_id);
            return;
        }

        if let Err(e) = result {
            self.fail(UploadError::WriterFailed(e));
            return;
        }
        self.manifest.blocks_written.push(block_id);
        self.current_buffer_size = self.current_buffer_size.saturating_sub(length);

        match self.state {
            UploadState::Full => {
                self.dispatch_ready_blocks();
                // Release once the buffer has genuinely drained, or once
                // nothing remains in flight to drain it further — the latter
                // guards the same deadlock as in `augment_data`: blocking
                // forever with no pending/unacked block left would never be
                // released (§8 invariants 8, 9).
                if self.current_buffer_size < self.max_buffer_size || !self.has_outstanding_work() {
                    self.state = UploadState::NotFull;
                    if let Some(reply) = self.deferred_augment.take() {
                        let _ = reply.send(Ok(()));
                    }
                }
            }
            UploadState::AllReceived => {
                self.dispatch_ready_blocks();
                self.maybe_complete();
            }
            UploadState::NotFull => {
                self.dispatch_ready_blocks();
            }
            UploadState::Prepare | UploadState::Done | UploadState::Failed => {}
        }
    }

    /// `finalize` (§4.7). Replies immediately from `done`; stashes the
    /// reply slot and waits from `all_received`; rejects from any other
    /// state.
    pub fn finalize(&mut self, reply: Sender<Result<Manifest, UploadError>>) {
        match self.state {
            UploadState::Done => {
                let _ = reply.send(Ok(self.manifest.clone()));
            }
            UploadState::AllReceived => {
                self.deferred_finalize = Some(reply);
            }
            UploadState::Failed => {
                let err = self.failure.clone().unwrap_or(UploadError::Rejected);
                let _ = reply.send(Err(err));
            }
            UploadState::Prepare | UploadState::NotFull | UploadState::Full => {
                let _ = reply.send(Err(UploadError::Rejected));
            }
        }
    }

    /// `manifest_save_tick` (§4.7): delegates to the external collaborator
    /// and never fails the FSM.
    pub fn manifest_save_tick(&mut self, _tick: ManifestSaveTick) {
        self.save_manifest.save_manifest(&self.manifest);
    }

    /// Cancel this upload (§5): cancels the ticker, releases writers
    /// without waiting for their outstanding I/O, and fails any deferred
    /// caller.
    pub fn cancel(&mut self) {
        self.fail(UploadError::Cancelled);
    }

    fn fail(&mut self, err: UploadError) {
        if matches!(self.state, UploadState::Done | UploadState::Failed) {
            return;
        }
        tracing::error!(bucket = ?self.bucket, key = ?self.key, uuid = %self.uuid, error = ?err, "upload_failed");
        self.state = UploadState::Failed;
        self.pool.release(self.free_writers.iter().copied());
        self.free_writers.clear();
        if let Some(t) = self.ticker.take() {
            drop(t); // Drop cancels and joins the ticker thread.
        }
        if let Some(r) = self.deferred_augment.take() {
            let _ = r.send(Err(err.clone()));
        }
        if let Some(r) = self.deferred_finalize.take() {
            let _ = r.send(Err(err.clone()));
        }
        self.failure = Some(err);
    }

    fn maybe_complete(&mut self) {
        if self.state == UploadState::AllReceived && self.unacked_writes.is_empty() {
            self.state = UploadState::Done;
            tracing::info!(bucket = ?self.bucket, key = ?self.key, uuid = %self.uuid, "upload_done");
            self.pool.release(self.free_writers.iter().copied());
            self.free_writers.clear();
            if let Some(reply) = self.deferred_finalize.take() {
                let _ = reply.send(Ok(self.manifest.clone()));
            }
        }
    }

    /// Dispatch policy (§4.7.2): lowest-id free writer takes the lowest-id
    /// queued block, FIFO over arrival order.
    fn dispatch_ready_blocks(&mut self) {
        while let (Some(&writer_id), true) = (self.free_writers.iter().next(), !self.pending_blocks.is_empty()) {
            self.free_writers.remove(&writer_id);
            let (block_id, value) = self.pending_blocks.pop_front().unwrap();
            self.unacked_writes.insert(block_id, (writer_id, value.len()));
            tracing::trace!(block_id, writer_id, "block_dispatched");
            self.pool.dispatch(
                writer_id,
                WriteJob {
                    block_id,
                    bucket: self.bucket.clone(),
                    uuid: self.uuid,
                    block_number: block_id,
                    value,
                },
            );
        }
    }
}

impl Drop for UploadFsm {
    fn drop(&mut self) {
        if !self.free_writers.is_empty() {
            self.pool.release(self.free_writers.iter().copied());
        }
    }
}
