//! Fold engine — explicit-stack directory traversal (§4.4).
//!
//! Walks a directory tree to enumerate buckets/keys/objects without holding
//! the whole tree in memory: a three-level wildcard expansion (bucket
//! nesting → bucket → key nesting → key) driven by an explicit work stack
//! rather than recursion, so memory stays bounded regardless of partition
//! size (§9).
//!
//! Sorted order (§8 invariant 5) falls out of pushing each directory
//! level's children in *reverse* sorted order: the stack is LIFO, so the
//! lexicographically smallest child is popped (and fully expanded) before
//! its siblings.

use crate::error::BackendError;
use crate::layout::{self, FileLayout};
use crate::path_encoder;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

enum Op {
    BucketIntermediate { level: usize, prefix: PathBuf },
    BucketDir { bucket: Vec<u8>, prefix: PathBuf },
    KeyIntermediate { level: usize, bucket: Vec<u8>, prefix: PathBuf },
    KeyFile { bucket: Vec<u8>, path: PathBuf },
    BKey { bucket: Vec<u8>, key: Vec<u8> },
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Depth {
    Buckets,
    Keys,
    Objects,
}

/// List `dir`'s entries sorted ascending by name. A missing directory folds
/// to no entries rather than an error — an unpopulated partition yields
/// nothing, not a failure.
fn list_sorted(dir: &Path) -> Vec<(String, PathBuf)> {
    let mut entries: Vec<(String, PathBuf)> = match fs::read_dir(dir) {
        Ok(rd) => rd
            .filter_map(|e| e.ok())
            .filter_map(|e| e.file_name().into_string().ok().map(|n| (n, e.path())))
            .collect(),
        Err(_) => return Vec::new(),
    };
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    entries
}

fn drive<F>(layout: &FileLayout, depth: Depth, mut emit: F) -> Result<(), BackendError>
where
    F: FnMut(&[u8], Option<&[u8]>, Option<&[u8]>),
{
    let mut stack = vec![Op::BucketIntermediate {
        level: 0,
        prefix: layout.partition_dir().to_path_buf(),
    }];
    let mut seen_buckets: HashSet<Vec<u8>> = HashSet::new();

    while let Some(op) = stack.pop() {
        match op {
            Op::BucketIntermediate { level, prefix } => {
                let entries = list_sorted(&prefix);
                if level == layout.b_depth() {
                    for (name, child) in entries.into_iter().rev() {
                        if let Some(bucket) = path_encoder::decode(&name) {
                            stack.push(Op::BucketDir { bucket, prefix: child });
                        }
                    }
                } else {
                    for (_, child) in entries.into_iter().rev() {
                        stack.push(Op::BucketIntermediate {
                            level: level + 1,
                            prefix: child,
                        });
                    }
                }
            }
            Op::BucketDir { bucket, prefix } => {
                if depth == Depth::Buckets {
                    if seen_buckets.insert(bucket.clone()) {
                        emit(&bucket, None, None);
                    }
                    continue;
                }
                stack.push(Op::KeyIntermediate {
                    level: 0,
                    bucket,
                    prefix,
                });
            }
            Op::KeyIntermediate { level, bucket, prefix } => {
                let entries = list_sorted(&prefix);
                if level == layout.k_depth() {
                    for (_, child) in entries.into_iter().rev() {
                        stack.push(Op::KeyFile {
                            bucket: bucket.clone(),
                            path: child,
                        });
                    }
                } else {
                    for (_, child) in entries.into_iter().rev() {
                        stack.push(Op::KeyIntermediate {
                            level: level + 1,
                            bucket: bucket.clone(),
                            prefix: child,
                        });
                    }
                }
            }
            Op::KeyFile { bucket, path } => {
                let name = match path.file_name().and_then(|n| n.to_str()) {
                    Some(n) => n,
                    None => continue,
                };
                let decoded = match path_encoder::decode(name) {
                    Some(d) => d,
                    None => continue,
                };

                if layout::is_block_bucket(&bucket) {
                    let (uuid, file_group) = match layout::parse_block_key(&decoded) {
                        Some(pair) => pair,
                        None => continue,
                    };
                    let blocks = match layout.enumerate_chunks_in_file(&bucket, &uuid, file_group) {
                        Ok(b) => b,
                        Err(_) => continue,
                    };
                    for n in blocks.into_iter().rev() {
                        stack.push(Op::BKey {
                            bucket: bucket.clone(),
                            key: layout::make_block_key(&uuid, n),
                        });
                    }
                } else {
                    stack.push(Op::BKey { bucket, key: decoded });
                }
            }
            Op::BKey { bucket, key } => match depth {
                Depth::Buckets => unreachable!("Buckets depth never reaches BKey"),
                Depth::Keys => emit(&bucket, Some(&key), None),
                Depth::Objects => {
                    let value = if layout::is_block_bucket(&bucket) {
                        layout::parse_block_key(&key).and_then(|(uuid, n)| layout.read_block(&bucket, &uuid, n).ok())
                    } else {
                        layout.plain_get(&bucket, &key).ok()
                    };
                    if let Some(v) = value {
                        emit(&bucket, Some(&key), Some(&v));
                    }
                    // Read failures are silently skipped (§4.4, §7): fold
                    // is an approximate-correctness contract.
                }
            },
        }
    }

    Ok(())
}

/// Emit each bucket exactly once, on first sighting, in sorted order.
pub fn fold_buckets<F: FnMut(&[u8])>(layout: &FileLayout, mut f: F) -> Result<(), BackendError> {
    drive(layout, Depth::Buckets, |b, _, _| f(b))
}

/// Emit every key in sorted `(bucket, key)` order.
pub fn fold_keys<F: FnMut(&[u8], &[u8])>(layout: &FileLayout, mut f: F) -> Result<(), BackendError> {
    drive(layout, Depth::Keys, |b, k, _| f(b, k.expect("Keys depth always supplies a key")))
}

/// Emit every `(bucket, key, value)` triple in sorted order (§8 invariant 5).
pub fn fold_objects<F: FnMut(&[u8], &[u8], &[u8])>(layout: &FileLayout, mut f: F) -> Result<(), BackendError> {
    drive(layout, Depth::Objects, |b, k, v| {
        f(
            b,
            k.expect("Objects depth always supplies a key"),
            v.expect("Objects depth always supplies a value"),
        )
    })
}

/// Build a thunk that runs `fold_objects` and collects its results, for
/// callers that requested `async_fold` (§4.4, §6 capabilities).
pub fn fold_objects_thunk(layout: FileLayout) -> impl FnOnce() -> Result<Vec<(Vec<u8>, Vec<u8>, Vec<u8>)>, BackendError> {
    move || {
        let mut out = Vec::new();
        fold_objects(&layout, |b, k, v| out.push((b.to_vec(), k.to_vec(), v.to_vec())))?;
        Ok(out)
    }
}

/// `true` iff the partition holds no objects at all (§4.5 `is_empty`).
pub fn is_empty(layout: &FileLayout) -> Result<bool, BackendError> {
    let mut any = false;
    fold_keys(layout, |_, _| any = true)?;
    Ok(!any)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use uuid::Uuid;

    fn layout(dir: &Path) -> FileLayout {
        FileLayout::new(dir.to_path_buf(), 8, 1024, 2, 2)
    }

    #[test]
    fn s4_bucket_fold_dedup() {
        let dir = tempdir().unwrap();
        let l = layout(dir.path());
        l.plain_put(b"A", b"k1", b"v1").unwrap();
        l.plain_put(b"B", b"k1", b"v1").unwrap();
        l.plain_put(b"B", b"k2", b"v2").unwrap();
        l.plain_put(b"C", b"k1", b"v1").unwrap();

        let mut buckets = Vec::new();
        fold_buckets(&l, |b| buckets.push(b.to_vec())).unwrap();
        assert_eq!(buckets, vec![b"A".to_vec(), b"B".to_vec(), b"C".to_vec()]);
    }

    #[test]
    fn sorted_object_order() {
        let dir = tempdir().unwrap();
        let l = layout(dir.path());
        l.plain_put(b"bucket", b"zzz", b"3").unwrap();
        l.plain_put(b"bucket", b"aaa", b"1").unwrap();
        l.plain_put(b"bucket", b"mmm", b"2").unwrap();

        let mut seen = Vec::new();
        fold_objects(&l, |b, k, v| seen.push((b.to_vec(), k.to_vec(), v.to_vec()))).unwrap();
        let keys: Vec<Vec<u8>> = seen.into_iter().map(|(_, k, _)| k).collect();
        assert_eq!(keys, vec![b"aaa".to_vec(), b"mmm".to_vec(), b"zzz".to_vec()]);
    }

    #[test]
    fn s5_tombstone_hides_from_fold() {
        let dir = tempdir().unwrap();
        let l = layout(dir.path());
        let bucket = b"blk:objects";
        let uuid = Uuid::nil();
        l.put_block(bucket, &uuid, 0, b"v0______", false).unwrap();
        l.put_block(bucket, &uuid, 1, b"v1______", false).unwrap();
        l.delete_block(bucket, &uuid, 1).unwrap();

        let mut seen = Vec::new();
        fold_objects(&l, |b, k, v| seen.push((b.to_vec(), k.to_vec(), v.to_vec()))).unwrap();
        assert!(seen.is_empty());
    }

    #[test]
    fn fold_over_block_bucket_emits_every_block() {
        let dir = tempdir().unwrap();
        let l = layout(dir.path());
        let bucket = b"blk:objects";
        let uuid = Uuid::nil();
        l.put_block(bucket, &uuid, 0, b"blockaaa", false).unwrap();
        l.put_block(bucket, &uuid, 1, b"blockbbb", false).unwrap();

        let mut values = Vec::new();
        fold_objects(&l, |_, _, v| values.push(v.to_vec())).unwrap();
        values.sort();
        assert_eq!(values, vec![b"blockaaa".to_vec(), b"blockbbb".to_vec()]);
    }

    #[test]
    fn empty_partition_is_empty() {
        let dir = tempdir().unwrap();
        let l = layout(dir.path());
        assert!(is_empty(&l).unwrap());
        l.plain_put(b"bucket", b"key", b"value").unwrap();
        assert!(!is_empty(&l).unwrap());
    }
}
