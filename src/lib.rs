//! # blockvault — chunked upload coordinator and block-packed file backend
//!
//! Two cooperating subsystems:
//!
//! - The **upload FSM** (`upload_fsm`) streams an object of known length
//!   from a caller, slices it into fixed-size blocks (`slicer`), and
//!   dispatches them to a pool of writer actors (`writer`) under
//!   backpressure, periodically handing the in-flight manifest to an
//!   external collaborator (`manifest`) via a wall-clock ticker (`ticker`).
//! - The **block-packed file backend** (`backend`) packs up to `MaxBlocks`
//!   blocks of one object into a single host file (`layout`) at
//!   deterministic offsets, framed with a CRC (`framing`), addressed
//!   through filesystem-safe paths (`path_encoder`), and enumerable without
//!   loading the whole tree into memory (`fold`).
//!
//! Format guarantees:
//! - All multi-byte integers in the on-disk block framing are big-endian.
//! - Every block slot is self-describing: `CRC32 ‖ LEN32 ‖ VALUE`; a CRC
//!   mismatch or short read is reported as "not found", never a partial
//!   value.
//! - Tombstones reuse the POSIX `setgid` mode bit; a tombstoned file reports
//!   as absent for reads and fold.
//! - The per-partition `.version.data` file gates startup: a partition will
//!   not open with a larger `block_size`/`max_blocks` or a different
//!   `b_depth`/`k_depth` than what was recorded on first start.

pub mod backend;
pub mod config;
pub mod error;
pub mod fold;
pub mod framing;
pub mod layout;
pub mod manifest;
pub mod path_encoder;
pub mod slicer;
pub mod ticker;
pub mod upload_fsm;
pub mod version_file;
pub mod writer;

pub use backend::{Backend, Capabilities, CAPABILITIES};
pub use config::{PartitionConfig, UploadConfig};
pub use error::{BackendError, FramingError, PathEncodeError, UploadError};
pub use manifest::{InMemoryManifestStore, LoggingManifestStore, Manifest, SaveManifest};
pub use ticker::ManifestSaveTick;
pub use upload_fsm::{UploadFsm, UploadState};
pub use writer::WriterPool;
