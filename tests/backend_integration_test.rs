use blockvault::layout::make_block_key;
use blockvault::{Backend, PartitionConfig};
use std::sync::Arc;
use tempfile::TempDir;
use uuid::Uuid;

fn start(dir: &TempDir, block_size: u32, max_blocks: u64) -> Backend {
    let config = PartitionConfig::resolve(Some(dir.path().to_path_buf()), Some(block_size), Some(max_blocks), Some(2), Some(2)).unwrap();
    Backend::start("p0", config).unwrap()
}

#[test]
fn s1_sequential_two_blocks_round_trip() {
    let dir = TempDir::new().unwrap();
    let backend = start(&dir, 22, 1024);
    let uuid = Uuid::nil();

    let k0 = make_block_key(&uuid, 0);
    let k1 = make_block_key(&uuid, 1);
    backend.put(b"blk:objects", &k0, &[0x2Au8; 22]).unwrap();
    backend.put(b"blk:objects", &k1, &[0x2Bu8; 22]).unwrap();

    assert_eq!(backend.get(b"blk:objects", &k0).unwrap(), vec![0x2Au8; 22]);
    assert_eq!(backend.get(b"blk:objects", &k1).unwrap(), vec![0x2Bu8; 22]);
}

#[test]
fn s2_out_of_order_writes_still_read_back_correctly() {
    let dir = TempDir::new().unwrap();
    let backend = start(&dir, 22, 1024);
    let uuid = Uuid::nil();

    let k0 = make_block_key(&uuid, 0);
    let k1 = make_block_key(&uuid, 1);
    backend.put(b"blk:objects", &k1, &[0x2Bu8; 22]).unwrap();
    backend.put(b"blk:objects", &k0, &[0x2Au8; 22]).unwrap();

    assert_eq!(backend.get(b"blk:objects", &k0).unwrap(), vec![0x2Au8; 22]);
    assert_eq!(backend.get(b"blk:objects", &k1).unwrap(), vec![0x2Bu8; 22]);

    let mut keys = Vec::new();
    backend.fold_keys(|_, k| keys.push(k.to_vec())).unwrap();
    assert_eq!(keys.len(), 2);
}

#[test]
fn s3_oversize_put_rejected_before_any_io() {
    let dir = TempDir::new().unwrap();
    let backend = start(&dir, 10, 1024);
    let key = make_block_key(&Uuid::nil(), 0);

    let err = backend.put(b"blk:objects", &key, &[0u8; 11]).unwrap_err();
    assert!(matches!(err, blockvault::BackendError::InvalidUserArgument(_)));
    assert!(matches!(backend.get(b"blk:objects", &key), Err(blockvault::BackendError::NotFound)));
}

#[test]
fn s4_fold_buckets_dedups() {
    let dir = TempDir::new().unwrap();
    let backend = start(&dir, 64, 16);
    backend.put(b"A", b"k1", b"v").unwrap();
    backend.put(b"B", b"k1", b"v").unwrap();
    backend.put(b"B", b"k2", b"v").unwrap();
    backend.put(b"C", b"k1", b"v").unwrap();

    let mut buckets = Vec::new();
    backend.fold_buckets(|b| buckets.push(b.to_vec())).unwrap();
    assert_eq!(buckets, vec![b"A".to_vec(), b"B".to_vec(), b"C".to_vec()]);
}

#[test]
fn s5_tombstone_hides_sibling_blocks() {
    let dir = TempDir::new().unwrap();
    let backend = start(&dir, 8, 1024);
    let uuid = Uuid::nil();

    backend.put(b"blk:objects", &make_block_key(&uuid, 0), b"v0______").unwrap();
    backend.put(b"blk:objects", &make_block_key(&uuid, 1), b"v1______").unwrap();
    backend.tombstone(b"blk:objects", &make_block_key(&uuid, 1)).unwrap();

    assert!(matches!(
        backend.get(b"blk:objects", &make_block_key(&uuid, 0)),
        Err(blockvault::BackendError::NotFound)
    ));
    assert!(matches!(
        backend.get(b"blk:objects", &make_block_key(&uuid, 1)),
        Err(blockvault::BackendError::NotFound)
    ));
}

#[test]
fn reopening_partition_with_stricter_config_fails() {
    let dir = TempDir::new().unwrap();
    let _backend = start(&dir, 4096, 1024);

    let bad = PartitionConfig::resolve(Some(dir.path().to_path_buf()), Some(8192), Some(1024), Some(2), Some(2)).unwrap();
    let err = Backend::start("p0", bad).unwrap_err();
    assert!(matches!(err, blockvault::BackendError::ConfigError(_)));
}

#[test]
fn end_to_end_upload_through_the_fsm_lands_readable_blocks() {
    use blockvault::manifest::InMemoryManifestStore;
    use blockvault::upload_fsm::UploadFsm;
    use blockvault::writer::WriterPool;
    use blockvault::UploadConfig;

    let dir = TempDir::new().unwrap();
    let backend = start(&dir, 8, 1024);

    let pool = Arc::new(WriterPool::new(2, backend.layout().clone()));
    let save_manifest = Arc::new(InMemoryManifestStore::new());
    let (tick_tx, tick_rx) = crossbeam_channel::unbounded();
    let config = UploadConfig {
        max_buffer_size: 1024,
        manifest_save_interval_ms: 10,
        writer_pool_size: 2,
    };

    let mut fsm = UploadFsm::prepare(
        b"blk:objects".to_vec(),
        b"report.bin".to_vec(),
        16,
        "application/octet-stream".into(),
        8,
        &config,
        pool.clone(),
        save_manifest.clone(),
        tick_tx,
    );

    // Block on the tick channel first so at least one `manifest_save_tick`
    // lands before the upload races to completion, exercising the periodic
    // save end-to-end rather than leaving it untested dead code.
    let first_tick = tick_rx.recv_timeout(std::time::Duration::from_secs(2)).unwrap();
    fsm.manifest_save_tick(first_tick);
    assert_eq!(save_manifest.get(b"blk:objects", b"report.bin").unwrap().bytes_received, 0);

    let (ack_tx, ack_rx) = crossbeam_channel::unbounded();
    fsm.augment_data(b"0123456789abcdef".to_vec(), ack_tx);
    ack_rx.recv().unwrap().unwrap();

    while !matches!(fsm.state(), blockvault::UploadState::Done) {
        crossbeam_channel::select! {
            recv(pool.completions()) -> msg => fsm.block_written(msg.unwrap()),
            recv(tick_rx) -> tick => fsm.manifest_save_tick(tick.unwrap()),
        }
    }

    let (fin_tx, fin_rx) = crossbeam_channel::unbounded();
    fsm.finalize(fin_tx);
    let manifest = fin_rx.recv().unwrap().unwrap();
    assert_eq!(manifest.bytes_received, 16);

    assert_eq!(backend.get(b"blk:objects", &make_block_key(&manifest.uuid, 0)).unwrap(), b"01234567");
    assert_eq!(backend.get(b"blk:objects", &make_block_key(&manifest.uuid, 1)).unwrap(), b"89abcdef");
}
