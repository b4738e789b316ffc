//! Error hierarchy for the block-packed backend and upload coordinator.
//!
//! One `thiserror`-derived enum per subsystem boundary: a leaf error per
//! failure mode plus a `#[from] io::Error` escape hatch, composed upward
//! into [`BackendError`] at the facade.

use std::io;
use thiserror::Error;

/// Errors from the on-disk framing codec (§4.1, §7).
#[derive(Error, Debug)]
pub enum FramingError {
    #[error("value length {got} exceeds block size {max}")]
    ValueTooLarge { got: usize, max: u32 },
    #[error("packed block is shorter than the fixed header")]
    ShortHeader,
    #[error("packed block declares {declared} bytes but only {available} remain")]
    ShortPayload { declared: u32, available: usize },
    #[error("CRC32 mismatch: expected {expected:#010x}, got {stored:#010x}")]
    BadCrc { expected: u32, stored: u32 },
}

/// Errors from the filesystem-safe path encoder (§4.2, §9).
#[derive(Error, Debug)]
pub enum PathEncodeError {
    #[error("data_root {0:?} is on a case-insensitive filesystem; bucket/key names are not a safe bijection to paths there")]
    CaseInsensitiveFilesystem(std::path::PathBuf),
}

/// Top-level error surfaced by the file layout engine and the backend
/// facade (§7). `NotFound` subsumes CRC mismatches, short reads, tombstones
/// and missing files by design — callers never distinguish "absent" from
/// "corrupt remnant of a crash".
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("not found")]
    NotFound,

    #[error("invalid user argument: {0}")]
    InvalidUserArgument(String),

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("upload cancelled")]
    UploadCancelled,
}

impl From<PathEncodeError> for BackendError {
    fn from(e: PathEncodeError) -> Self {
        BackendError::ConfigError(e.to_string())
    }
}

/// Errors surfaced to a caller of the upload FSM (§4.7.3, §5).
#[derive(Error, Debug, Clone)]
pub enum UploadError {
    #[error("upload already finalized or rejecting further data in this state")]
    Rejected,
    #[error("writer failed: {0}")]
    WriterFailed(String),
    #[error("upload cancelled")]
    Cancelled,
}
