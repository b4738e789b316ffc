//! File layout engine — maps `(bucket, UUID, block_number)` to
//! `(file_path, offset)`, reads/writes/tombstones blocks, and enforces
//! trailer semantics (§4.3).
//!
//! Read-validate-first discipline: check before trusting, downgrade
//! anything inconsistent to a uniform error. A sparse, positionally
//! addressed multi-file store: every operation opens, `pwrite`s or
//! `pread`s, and closes a file for the duration of one slot access (§5 — no
//! long-lived handles).

use crate::error::BackendError;
use crate::framing::{self, HEADER_SIZE};
use crate::path_encoder;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::unix::fs::{FileExt, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Reserved prefix identifying block buckets (§3).
pub const BLOCK_BUCKET_PREFIX: &[u8] = b"blk:";
/// Byte length of a UUID.
pub const UUID_BYTES: usize = 16;
/// Byte length of the big-endian block number field.
pub const BLOCK_NUMBER_BYTES: usize = 8;
/// Byte length of a block key: `UUID ‖ block_number`.
pub const BLOCK_KEY_LEN: usize = UUID_BYTES + BLOCK_NUMBER_BYTES;

/// `setgid` mode bit, reused as the tombstone marker (§3, §6).
const TOMBSTONE_BIT: u32 = 0o2000;

pub fn is_block_bucket(bucket: &[u8]) -> bool {
    bucket.starts_with(BLOCK_BUCKET_PREFIX)
}

/// Encode `(uuid, block_number)` as the 24-byte block key (§3).
pub fn make_block_key(uuid: &Uuid, block_number: u64) -> Vec<u8> {
    let mut v = Vec::with_capacity(BLOCK_KEY_LEN);
    v.extend_from_slice(uuid.as_bytes());
    v.extend_from_slice(&block_number.to_be_bytes());
    v
}

/// Decode a 24-byte block key back to `(uuid, block_number)`.
pub fn parse_block_key(key: &[u8]) -> Option<(Uuid, u64)> {
    if key.len() != BLOCK_KEY_LEN {
        return None;
    }
    let uuid = Uuid::from_slice(&key[..UUID_BYTES]).ok()?;
    let n = u64::from_be_bytes(key[UUID_BYTES..].try_into().ok()?);
    Some((uuid, n))
}

/// The file layout engine for one partition.
#[derive(Debug, Clone)]
pub struct FileLayout {
    partition_dir: PathBuf,
    block_size: u32,
    max_blocks: u64,
    b_depth: usize,
    k_depth: usize,
}

impl FileLayout {
    pub fn new(partition_dir: PathBuf, block_size: u32, max_blocks: u64, b_depth: usize, k_depth: usize) -> Self {
        Self {
            partition_dir,
            block_size,
            max_blocks,
            b_depth,
            k_depth,
        }
    }

    pub fn partition_dir(&self) -> &Path {
        &self.partition_dir
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    pub fn max_blocks(&self) -> u64 {
        self.max_blocks
    }

    pub fn b_depth(&self) -> usize {
        self.b_depth
    }

    pub fn k_depth(&self) -> usize {
        self.k_depth
    }

    #[inline]
    fn slot_width(&self) -> u64 {
        HEADER_SIZE as u64 + self.block_size as u64
    }

    #[inline]
    fn trailer_offset(&self) -> u64 {
        self.max_blocks * self.slot_width()
    }

    fn file_group(&self, block_number: u64) -> u64 {
        (block_number / self.max_blocks) * self.max_blocks
    }

    fn slot_offset(&self, block_number: u64) -> u64 {
        (block_number % self.max_blocks) * self.slot_width()
    }

    /// Path to the host file holding `block_number`'s file group.
    pub fn group_path(&self, bucket: &[u8], uuid: &Uuid, block_number: u64) -> PathBuf {
        let group = self.file_group(block_number);
        let mut key_bytes = Vec::with_capacity(BLOCK_KEY_LEN);
        key_bytes.extend_from_slice(uuid.as_bytes());
        key_bytes.extend_from_slice(&group.to_be_bytes());
        self.entry_path(bucket, &key_bytes, self.k_depth)
    }

    /// Path to the plain (non-block) key's file.
    pub fn plain_path(&self, bucket: &[u8], key: &[u8]) -> PathBuf {
        self.entry_path(bucket, key, self.k_depth)
    }

    fn entry_path(&self, bucket: &[u8], key: &[u8], k_depth: usize) -> PathBuf {
        let bucket_enc = path_encoder::encode(bucket);
        let key_enc = path_encoder::encode(key);
        let mut p = self.partition_dir.clone();
        for part in path_encoder::nest(&bucket_enc, self.b_depth) {
            p.push(part);
        }
        p.push(&bucket_enc);
        for part in path_encoder::nest(&key_enc, k_depth) {
            p.push(part);
        }
        p.push(&key_enc);
        p
    }

    // ── Block operations ────────────────────────────────────────────────

    /// Read block `n` of `uuid` in `bucket`. Any I/O error, short read, or
    /// CRC mismatch downgrades to `NotFound` (§7) — crash remnants and
    /// genuine absence are indistinguishable to the caller by design.
    pub fn read_block(&self, bucket: &[u8], uuid: &Uuid, n: u64) -> Result<Vec<u8>, BackendError> {
        let path = self.group_path(bucket, uuid, n);
        let meta = match fs::metadata(&path) {
            Ok(m) => m,
            Err(_) => return Err(BackendError::NotFound),
        };
        if is_tombstoned(&meta) {
            return Err(BackendError::NotFound);
        }

        let file = match File::open(&path) {
            Ok(f) => f,
            Err(_) => return Err(BackendError::NotFound),
        };

        let offset = self.slot_offset(n);
        let slot_len = self.slot_width() as usize;
        let mut buf = vec![0u8; slot_len];
        let read = match read_exact_at(&file, &mut buf, offset) {
            Ok(n) => n,
            Err(_) => return Err(BackendError::NotFound),
        };

        framing::unpack(&buf[..read]).map_err(|_| BackendError::NotFound)
    }

    /// Write (or tombstone) block `n` of `uuid` in `bucket` (§4.3).
    pub fn put_block(
        &self,
        bucket: &[u8],
        uuid: &Uuid,
        n: u64,
        value: &[u8],
        is_tombstone_request: bool,
    ) -> Result<(), BackendError> {
        if value.len() > self.block_size as usize {
            return Err(BackendError::InvalidUserArgument(format!(
                "value length {} exceeds block size {}",
                value.len(),
                self.block_size
            )));
        }

        let path = self.group_path(bucket, uuid, n);
        let existing_meta = fs::metadata(&path).ok();

        if let Some(meta) = &existing_meta {
            if is_tombstoned(meta) {
                return Ok(()); // already tombstoned: no-op (§8 invariant 3)
            }
        }

        if is_tombstone_request {
            if existing_meta.is_none() {
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)?;
                }
                OpenOptions::new()
                    .create(true)
                    .write(true)
                    .mode(0o600)
                    .open(&path)?;
            }
            let mut perms = fs::metadata(&path)?.permissions();
            let mode = perms.mode() | TOMBSTONE_BIT;
            perms.set_mode(mode);
            fs::set_permissions(&path, perms)?;
            return Ok(());
        }

        let in_order = is_in_order(existing_meta.as_ref().map(|m| m.len()), n, self.max_blocks, self.slot_width());

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).read(true).write(true).open(&path)?;

        let packed = framing::pack(value, self.block_size)
            .map_err(|e| BackendError::InvalidUserArgument(e.to_string()))?;
        file.write_all_at(&packed, self.slot_offset(n))?;

        if !in_order {
            self.write_trailer(&file)?;
        }

        Ok(())
    }

    fn write_trailer(&self, file: &File) -> io::Result<()> {
        // Payload is a one-byte serialization of `{written_sequentially: bool}`.
        let payload = [0u8]; // false: this trailer only ever marks out-of-order writes
        let packed = framing::pack(&payload, self.block_size.max(1))
            .unwrap_or_else(|_| framing::pack(&[], 1).unwrap());
        file.write_all_at(&packed, self.trailer_offset())?;
        let footer = (packed.len() as u32).to_be_bytes();
        file.write_all_at(&footer, self.trailer_offset() + packed.len() as u64)?;
        Ok(())
    }

    /// Delete the entire host file holding `n`'s file group (§4.3 — this is
    /// destructive to every sibling block packed into the same file).
    pub fn delete_block(&self, bucket: &[u8], uuid: &Uuid, n: u64) -> Result<(), BackendError> {
        let path = self.group_path(bucket, uuid, n);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Enumerate the block numbers physically present in `base`'s file
    /// group (§4.3). Returns an empty vector if the file is tombstoned or
    /// absent.
    pub fn enumerate_chunks_in_file(&self, bucket: &[u8], uuid: &Uuid, base: u64) -> Result<Vec<u64>, BackendError> {
        let path = self.group_path(bucket, uuid, base);
        let meta = match fs::metadata(&path) {
            Ok(m) => m,
            Err(_) => return Ok(Vec::new()),
        };
        if is_tombstoned(&meta) {
            return Ok(Vec::new());
        }

        let size = meta.len();
        if size == 0 {
            return Ok(Vec::new());
        }
        let max_block = (size - 1) / self.slot_width();

        if max_block >= self.max_blocks {
            // Trailer present: the file may have holes; probe every slot.
            let mut out = Vec::new();
            for i in 0..self.max_blocks {
                if self.read_block(bucket, uuid, base + i).is_ok() {
                    out.push(base + i);
                }
            }
            Ok(out)
        } else {
            Ok((0..=max_block).map(|i| base + i).collect())
        }
    }

    // ── Plain key operations ────────────────────────────────────────────

    pub fn plain_get(&self, bucket: &[u8], key: &[u8]) -> Result<Vec<u8>, BackendError> {
        let path = self.plain_path(bucket, key);
        let meta = match fs::metadata(&path) {
            Ok(m) => m,
            Err(_) => return Err(BackendError::NotFound),
        };
        if is_tombstoned(&meta) {
            return Err(BackendError::NotFound);
        }
        fs::read(&path).map_err(|_| BackendError::NotFound)
    }

    pub fn plain_put(&self, bucket: &[u8], key: &[u8], value: &[u8]) -> Result<(), BackendError> {
        let path = self.plain_path(bucket, key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp_path = path.with_extension("tmpwrite");
        fs::write(&tmp_path, value)?;
        fs::rename(&tmp_path, &path)?;
        Ok(())
    }

    pub fn plain_delete(&self, bucket: &[u8], key: &[u8]) -> Result<(), BackendError> {
        let path = self.plain_path(bucket, key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn is_tombstoned(meta: &fs::Metadata) -> bool {
    meta.permissions().mode() & TOMBSTONE_BIT != 0
}

/// `n` is in-order (§4.3.1) iff the file doesn't exist and `n` starts a
/// fresh group, or the file exists and `n` is exactly the next block after
/// the group's current extent.
fn is_in_order(existing_size: Option<u64>, n: u64, max_blocks: u64, slot_width: u64) -> bool {
    match existing_size {
        None | Some(0) => n % max_blocks == 0,
        Some(size) => {
            let max_block_from_size = (size - 1) / slot_width;
            n % max_blocks == max_block_from_size + 1
        }
    }
}

/// `pread` into `buf`, returning the number of bytes actually read (which
/// may be less than `buf.len()` if the slot runs past EOF).
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    let mut total = 0usize;
    loop {
        match file.read_at(&mut buf[total..], offset + total as u64) {
            Ok(0) => break,
            Ok(n) => {
                total += n;
                if total == buf.len() {
                    break;
                }
            }
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn layout(dir: &Path, block_size: u32, max_blocks: u64) -> FileLayout {
        FileLayout::new(dir.to_path_buf(), block_size, max_blocks, 2, 2)
    }

    #[test]
    fn s1_sequential_two_blocks() {
        let dir = tempdir().unwrap();
        let l = layout(dir.path(), 22, 1024);
        let bucket = b"blk:objects";
        let uuid = Uuid::nil();

        l.put_block(bucket, &uuid, 0, &[0x2Au8; 22], false).unwrap();
        l.put_block(bucket, &uuid, 1, &[0x2Bu8; 22], false).unwrap();

        assert_eq!(l.read_block(bucket, &uuid, 0).unwrap(), vec![0x2Au8; 22]);
        assert_eq!(l.read_block(bucket, &uuid, 1).unwrap(), vec![0x2Bu8; 22]);

        let path = l.group_path(bucket, &uuid, 0);
        let size = fs::metadata(&path).unwrap().len();
        assert_eq!(size, 2 * (HEADER_SIZE as u64 + 22));
    }

    #[test]
    fn s2_out_of_order_two_blocks() {
        let dir = tempdir().unwrap();
        let l = layout(dir.path(), 22, 1024);
        let bucket = b"blk:objects";
        let uuid = Uuid::nil();

        l.put_block(bucket, &uuid, 1, &[0x2Bu8; 22], false).unwrap();
        l.put_block(bucket, &uuid, 0, &[0x2Au8; 22], false).unwrap();

        assert_eq!(l.read_block(bucket, &uuid, 0).unwrap(), vec![0x2Au8; 22]);
        assert_eq!(l.read_block(bucket, &uuid, 1).unwrap(), vec![0x2Bu8; 22]);

        let path = l.group_path(bucket, &uuid, 0);
        let size = fs::metadata(&path).unwrap().len();
        assert!(size >= l.trailer_offset());

        let mut chunks = l.enumerate_chunks_in_file(bucket, &uuid, 0).unwrap();
        chunks.sort();
        assert_eq!(chunks, vec![0, 1]);
    }

    #[test]
    fn s3_oversize_rejection() {
        let dir = tempdir().unwrap();
        let l = layout(dir.path(), 10, 1024);
        let bucket = b"blk:objects";
        let uuid = Uuid::nil();

        let err = l.put_block(bucket, &uuid, 0, &[0u8; 11], false).unwrap_err();
        assert!(matches!(err, BackendError::InvalidUserArgument(_)));

        let path = l.group_path(bucket, &uuid, 0);
        assert!(!path.exists());
    }

    #[test]
    fn out_of_order_skip_one() {
        let dir = tempdir().unwrap();
        let l = layout(dir.path(), 8, 1024);
        let bucket = b"blk:objects";
        let uuid = Uuid::nil();

        l.put_block(bucket, &uuid, 0, b"aaaaaaaa", false).unwrap();
        l.put_block(bucket, &uuid, 2, b"cccccccc", false).unwrap();

        let mut chunks = l.enumerate_chunks_in_file(bucket, &uuid, 0).unwrap();
        chunks.sort();
        assert_eq!(chunks, vec![0, 2]);
    }

    #[test]
    fn s5_tombstone_hides_siblings() {
        let dir = tempdir().unwrap();
        let l = layout(dir.path(), 8, 1024);
        let bucket = b"blk:objects";
        let uuid = Uuid::nil();

        l.put_block(bucket, &uuid, 0, b"v0______", false).unwrap();
        l.put_block(bucket, &uuid, 1, b"v1______", false).unwrap();
        l.put_block(bucket, &uuid, 1, b"", true).unwrap(); // tombstone request

        assert!(matches!(l.read_block(bucket, &uuid, 0), Err(BackendError::NotFound)));
        assert!(matches!(l.read_block(bucket, &uuid, 1), Err(BackendError::NotFound)));
        assert_eq!(l.enumerate_chunks_in_file(bucket, &uuid, 0).unwrap(), Vec::<u64>::new());
    }

    #[test]
    fn tombstone_put_is_idempotent_noop() {
        let dir = tempdir().unwrap();
        let l = layout(dir.path(), 8, 1024);
        let bucket = b"blk:objects";
        let uuid = Uuid::nil();

        l.put_block(bucket, &uuid, 0, b"", true).unwrap();
        // Further puts after tombstone are no-ops (§8 invariant 3).
        l.put_block(bucket, &uuid, 0, b"ignoredd", false).unwrap();
        assert!(matches!(l.read_block(bucket, &uuid, 0), Err(BackendError::NotFound)));
    }

    #[test]
    fn plain_round_trip() {
        let dir = tempdir().unwrap();
        let l = layout(dir.path(), 8, 1024);
        l.plain_put(b"images", b"cat.png", b"meow").unwrap();
        assert_eq!(l.plain_get(b"images", b"cat.png").unwrap(), b"meow");
        l.plain_delete(b"images", b"cat.png").unwrap();
        assert!(matches!(l.plain_get(b"images", b"cat.png"), Err(BackendError::NotFound)));
    }

    #[test]
    fn delete_block_removes_whole_group() {
        let dir = tempdir().unwrap();
        let l = layout(dir.path(), 8, 1024);
        let bucket = b"blk:objects";
        let uuid = Uuid::nil();
        l.put_block(bucket, &uuid, 0, b"v0______", false).unwrap();
        l.put_block(bucket, &uuid, 1, b"v1______", false).unwrap();
        l.delete_block(bucket, &uuid, 1).unwrap();
        assert!(matches!(l.read_block(bucket, &uuid, 0), Err(BackendError::NotFound)));
    }
}
