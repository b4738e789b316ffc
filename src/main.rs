use blockvault::{
    Backend, InMemoryManifestStore, ManifestSaveTick, PartitionConfig, SaveManifest, UploadConfig, UploadFsm, UploadState,
    WriterPool,
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "blockvault", version = "0.1.0", about = "Chunked upload coordinator and block-packed file backend")]
struct Cli {
    /// Root directory holding all partitions
    #[arg(long, global = true, default_value = "./data")]
    data_root: PathBuf,
    /// Partition name
    #[arg(long, global = true, default_value = "default")]
    partition: String,
    #[arg(long, global = true, default_value = "4194304")]
    block_size: u32,
    #[arg(long, global = true)]
    max_blocks: Option<u64>,
    #[arg(long, global = true)]
    b_depth: Option<usize>,
    #[arg(long, global = true)]
    k_depth: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start (or validate) a partition and print its configuration
    Start,
    /// Write a value at bucket/key
    Put {
        bucket: String,
        key: String,
        /// Value to write; reads stdin if omitted
        value: Option<String>,
    },
    /// Read a value at bucket/key
    Get { bucket: String, key: String },
    /// Delete a value at bucket/key
    Delete { bucket: String, key: String },
    /// Tombstone a block without writing new data
    Tombstone { bucket: String, key: String },
    /// Enumerate buckets, keys, or objects
    Fold {
        #[arg(value_enum)]
        kind: FoldKind,
    },
    /// Recursively remove and recreate the partition directory
    Drop,
    /// Stream a local file through the upload coordinator into a block bucket
    Upload {
        bucket: String,
        key: String,
        input: PathBuf,
        #[arg(long, default_value = "application/octet-stream")]
        content_type: String,
        #[arg(long, default_value = "65536")]
        upload_chunk_size: usize,
        #[arg(long, default_value = "4")]
        writer_pool_size: usize,
    },
}

#[derive(Clone, clap::ValueEnum)]
enum FoldKind {
    Buckets,
    Keys,
    Objects,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = PartitionConfig::resolve(
        Some(cli.data_root.clone()),
        Some(cli.block_size),
        cli.max_blocks,
        cli.b_depth,
        cli.k_depth,
    )?;

    match cli.command {
        Commands::Start => {
            let backend = Backend::start(&cli.partition, config)?;
            println!("── Partition ─────────────────────────────────────────────");
            println!("  Path           {}", backend.layout().partition_dir().display());
            println!("  Block size     {} B", backend.layout().block_size());
            println!("  Max blocks     {}", backend.layout().max_blocks());
            let caps = backend.capabilities();
            println!(
                "  Capabilities   async_fold={} write_once_keys={} put_plus_object={}",
                caps.async_fold, caps.write_once_keys, caps.put_plus_object
            );
            println!("  Empty          {}", backend.is_empty()?);
        }

        Commands::Put { bucket, key, value } => {
            let backend = Backend::start(&cli.partition, config)?;
            let value = match value {
                Some(v) => v.into_bytes(),
                None => {
                    use std::io::Read;
                    let mut buf = Vec::new();
                    std::io::stdin().read_to_end(&mut buf)?;
                    buf
                }
            };
            backend.put(bucket.as_bytes(), key.as_bytes(), &value)?;
            println!("put {} B at {bucket}/{key}", value.len());
        }

        Commands::Get { bucket, key } => {
            let backend = Backend::start(&cli.partition, config)?;
            let value = backend.get(bucket.as_bytes(), key.as_bytes())?;
            println!("{} B: {}", value.len(), hex::encode(&value));
        }

        Commands::Delete { bucket, key } => {
            let backend = Backend::start(&cli.partition, config)?;
            backend.delete(bucket.as_bytes(), key.as_bytes())?;
            println!("deleted {bucket}/{key}");
        }

        Commands::Tombstone { bucket, key } => {
            let backend = Backend::start(&cli.partition, config)?;
            backend.tombstone(bucket.as_bytes(), key.as_bytes())?;
            println!("tombstoned {bucket}/{key}");
        }

        Commands::Fold { kind } => {
            let backend = Backend::start(&cli.partition, config)?;
            match kind {
                FoldKind::Buckets => backend.fold_buckets(|b| println!("{}", String::from_utf8_lossy(b)))?,
                FoldKind::Keys => backend.fold_keys(|b, k| {
                    println!("{}\t{}", String::from_utf8_lossy(b), hex::encode(k));
                })?,
                FoldKind::Objects => backend.fold_objects(|b, k, v| {
                    println!("{}\t{}\t{} B", String::from_utf8_lossy(b), hex::encode(k), v.len());
                })?,
            }
        }

        Commands::Drop => {
            let backend = Backend::start(&cli.partition, config)?;
            backend.drop_partition()?;
            println!("dropped partition {}", cli.partition);
        }

        Commands::Upload {
            bucket,
            key,
            input,
            content_type,
            upload_chunk_size,
            writer_pool_size,
        } => {
            let backend = Backend::start(&cli.partition, config)?;
            let total_length = std::fs::metadata(&input)?.len();

            let pool = Arc::new(WriterPool::new(writer_pool_size, backend.layout().clone()));
            let save_manifest: Arc<dyn SaveManifest> = Arc::new(InMemoryManifestStore::new());
            let upload_config = UploadConfig {
                writer_pool_size,
                ..UploadConfig::default()
            };
            let (tick_tx, tick_rx) = crossbeam_channel::unbounded::<ManifestSaveTick>();

            let mut fsm = UploadFsm::prepare(
                bucket.clone().into_bytes(),
                key.clone().into_bytes(),
                total_length,
                content_type,
                backend.layout().block_size(),
                &upload_config,
                pool.clone(),
                save_manifest,
                tick_tx,
            );

            let mut file = std::fs::File::open(&input)?;
            use std::io::Read;
            let mut buf = vec![0u8; upload_chunk_size];

            loop {
                let n = file.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                let (ack_tx, ack_rx) = crossbeam_channel::unbounded();
                fsm.augment_data(buf[..n].to_vec(), ack_tx);

                // Wait for this chunk's ack, but keep draining writer
                // completions and manifest ticks while we do — the ack can be
                // deferred behind backpressure, and only a `block_written`
                // delivered here can ever release it.
                loop {
                    crossbeam_channel::select! {
                        recv(ack_rx) -> ack => {
                            ack??;
                            break;
                        }
                        recv(pool.completions()) -> msg => {
                            fsm.block_written(msg?);
                        }
                        recv(tick_rx) -> tick => {
                            fsm.manifest_save_tick(tick?);
                        }
                    }
                }
            }

            while !matches!(fsm.state(), UploadState::Done | UploadState::Failed) {
                crossbeam_channel::select! {
                    recv(pool.completions()) -> msg => fsm.block_written(msg?),
                    recv(tick_rx) -> tick => fsm.manifest_save_tick(tick?),
                }
            }

            let (fin_tx, fin_rx) = crossbeam_channel::unbounded();
            fsm.finalize(fin_tx);
            let manifest = fin_rx.recv()??;

            println!("uploaded {} B as {} blocks (uuid {})", manifest.bytes_received, manifest.blocks_written.len(), manifest.uuid);
        }
    }

    Ok(())
}
