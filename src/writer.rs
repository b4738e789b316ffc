//! Writer pool — independent actors that perform `put_block` and report
//! back by message, never by shared memory (§5, §9).
//!
//! A fixed pool of long-lived threads reading jobs off a
//! `crossbeam_channel`, with a `parking_lot`-guarded free-list in place of
//! an async runtime for a bounded worker pool.

use crate::layout::FileLayout;
use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::thread::{self, JoinHandle};
use uuid::Uuid;

/// A block write job handed from the FSM to a writer actor.
pub struct WriteJob {
    pub block_id: u64,
    pub bucket: Vec<u8>,
    pub uuid: Uuid,
    pub block_number: u64,
    pub value: Vec<u8>,
}

/// Completion message a writer actor sends back to the FSM (§4.7, §5).
#[derive(Debug, Clone)]
pub struct BlockWritten {
    pub block_id: u64,
    pub writer_id: usize,
    pub result: Result<(), String>,
}

/// A bounded pool of writer actors shared across uploads (§5).
///
/// Acquisition of writer ids is bounded and may block the caller (the
/// `prepare` transition, per §4.7) until enough are free.
pub struct WriterPool {
    senders: Vec<Sender<WriteJob>>,
    joins: Vec<JoinHandle<()>>,
    completion_rx: Receiver<BlockWritten>,
    free: Mutex<VecDeque<usize>>,
    free_cv: Condvar,
}

impl WriterPool {
    pub fn new(size: usize, layout: FileLayout) -> Self {
        let (completion_tx, completion_rx) = crossbeam_channel::unbounded();
        let mut senders = Vec::with_capacity(size);
        let mut joins = Vec::with_capacity(size);

        for id in 0..size {
            let (job_tx, job_rx) = crossbeam_channel::unbounded::<WriteJob>();
            let layout = layout.clone();
            let completion_tx = completion_tx.clone();

            let join = thread::Builder::new()
                .name(format!("blockvault-writer-{id}"))
                .spawn(move || {
                    while let Ok(job) = job_rx.recv() {
                        let result = layout
                            .put_block(&job.bucket, &job.uuid, job.block_number, &job.value, false)
                            .map_err(|e| e.to_string());
                        if let Err(ref e) = result {
                            tracing::error!(block_id = job.block_id, writer_id = id, error = %e, "writer_failed");
                        } else {
                            tracing::trace!(block_id = job.block_id, writer_id = id, "block_written");
                        }
                        if completion_tx
                            .send(BlockWritten {
                                block_id: job.block_id,
                                writer_id: id,
                                result,
                            })
                            .is_err()
                        {
                            break;
                        }
                    }
                })
                .expect("failed to spawn writer thread");

            senders.push(job_tx);
            joins.push(join);
        }

        Self {
            senders,
            joins,
            completion_rx,
            free: Mutex::new((0..size).collect()),
            free_cv: Condvar::new(),
        }
    }

    pub fn size(&self) -> usize {
        self.senders.len()
    }

    /// Block until `count` writer ids are free, then remove and return them.
    pub fn acquire(&self, count: usize) -> Vec<usize> {
        let mut guard = self.free.lock();
        while guard.len() < count {
            self.free_cv.wait(&mut guard);
        }
        (0..count).filter_map(|_| guard.pop_front()).collect()
    }

    /// Non-blocking variant of [`Self::acquire`] for a single writer.
    pub fn try_acquire_one(&self) -> Option<usize> {
        self.free.lock().pop_front()
    }

    pub fn release(&self, ids: impl IntoIterator<Item = usize>) {
        let mut guard = self.free.lock();
        for id in ids {
            guard.push_back(id);
        }
        drop(guard);
        self.free_cv.notify_all();
    }

    pub fn dispatch(&self, writer_id: usize, job: WriteJob) {
        if let Some(s) = self.senders.get(writer_id) {
            let _ = s.send(job);
        }
    }

    pub fn completions(&self) -> &Receiver<BlockWritten> {
        &self.completion_rx
    }
}

impl Drop for WriterPool {
    fn drop(&mut self) {
        self.senders.clear(); // closes every writer's channel, ending its recv loop
        for j in self.joins.drain(..) {
            let _ = j.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn acquire_and_release_round_trips() {
        let dir = tempdir().unwrap();
        let layout = FileLayout::new(dir.path().to_path_buf(), 64, 16, 2, 2);
        let pool = WriterPool::new(4, layout);

        let ids = pool.acquire(4);
        assert_eq!(ids.len(), 4);
        assert!(pool.try_acquire_one().is_none());

        pool.release(ids);
        assert!(pool.try_acquire_one().is_some());
    }

    #[test]
    fn dispatched_job_reports_completion() {
        let dir = tempdir().unwrap();
        let layout = FileLayout::new(dir.path().to_path_buf(), 64, 16, 2, 2);
        let pool = WriterPool::new(2, layout);

        let writer_id = pool.acquire(1)[0];
        pool.dispatch(
            writer_id,
            WriteJob {
                block_id: 0,
                bucket: b"blk:objects".to_vec(),
                uuid: Uuid::nil(),
                block_number: 0,
                value: b"hello".to_vec(),
            },
        );

        let done = pool.completions().recv_timeout(std::time::Duration::from_secs(5)).unwrap();
        assert_eq!(done.block_id, 0);
        assert!(done.result.is_ok());
    }
}
