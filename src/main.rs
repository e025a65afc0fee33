//! Command-line interface for chunkstream
//!
//! # Usage Examples
//!
//! ```bash
//! # Upload a file with gzip compression
//! chunkstream upload --bucket my-bucket --key data/file.json.gz \
//!   --file local.json --compress gzip
//!
//! # Upload with compression auto-detected from the key extension
//! chunkstream upload --bucket my-bucket --key data/file.json.gz --file local.json
//!
//! # Download with automatic decompression and a custom chunk size
//! chunkstream download --bucket my-bucket --key data/file.json.gz \
//!   --file local.json --chunk-size 1048576
//!
//! # Use a specific AWS profile and region
//! chunkstream download --bucket my-bucket --key data/file.txt \
//!   --file local.txt --profile production --region us-west-2
//! ```

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use aws_config::BehaviorVersion;
use clap::{Args, Parser, Subcommand, ValueEnum};
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use chunkstream::{
    decompressed_reader, CompressedWriter, Compression, MultipartWriter, ObjectStore, RangeReader,
    S3ObjectStore, DEFAULT_BUFFER_SIZE, DEFAULT_CHUNK_SIZE, DEFAULT_PART_SIZE,
};

#[derive(Parser)]
#[command(name = "chunkstream")]
#[command(about = "Stream files to/from S3 with bounded memory and automatic compression")]
#[command(long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct StoreOpts {
    /// S3 bucket name
    #[arg(long)]
    bucket: String,

    /// S3 object key
    #[arg(long)]
    key: String,

    /// Local file path
    #[arg(long)]
    file: std::path::PathBuf,

    /// AWS region (uses the default from config/environment if not set)
    #[arg(long)]
    region: Option<String>,

    /// AWS profile to use (uses the default profile if not set)
    #[arg(long)]
    profile: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a file to S3 as a multipart upload, with optional compression
    #[command(visible_alias = "up")]
    Upload {
        #[command(flatten)]
        opts: StoreOpts,

        /// Compression for the upload (auto-detected from the key/file
        /// extension if not specified)
        #[arg(long, value_enum)]
        compress: Option<CompressArg>,

        /// Part size in bytes for the multipart upload (minimum 5MiB)
        #[arg(long, default_value_t = DEFAULT_PART_SIZE)]
        part_size: usize,
    },

    /// Download an object from S3 with automatic decompression
    #[command(visible_alias = "down")]
    Download {
        #[command(flatten)]
        opts: StoreOpts,

        /// Chunk size in bytes for range fetches
        #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
        chunk_size: u64,
    },
}

#[derive(ValueEnum, Clone, Copy)]
enum CompressArg {
    Gzip,
    Bzip2,
    None,
}

impl CompressArg {
    fn to_compression(self) -> Compression {
        match self {
            CompressArg::Gzip => Compression::Gzip,
            CompressArg::Bzip2 => Compression::Bzip2,
            CompressArg::None => Compression::Uncompressed,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Upload {
            opts,
            compress,
            part_size,
        } => {
            let store = connect(&opts).await?;
            upload(store, &opts, compress, part_size).await
        }
        Commands::Download { opts, chunk_size } => {
            let store = connect(&opts).await?;
            download(store, &opts, chunk_size).await
        }
    }
}

async fn connect(opts: &StoreOpts) -> Result<Arc<S3ObjectStore>> {
    let mut loader = aws_config::defaults(BehaviorVersion::latest());
    if let Some(profile) = &opts.profile {
        loader = loader.profile_name(profile);
    }
    if let Some(region) = &opts.region {
        loader = loader.region(aws_config::Region::new(region.clone()));
    }
    let sdk_config = loader.load().await;
    Ok(Arc::new(S3ObjectStore::new(aws_sdk_s3::Client::new(
        &sdk_config,
    ))))
}

/// Pick the upload compression: the explicit flag wins, otherwise the key
/// extension, otherwise the local file extension.
fn resolve_compression(
    flag: Option<CompressArg>,
    key: &str,
    file: &std::path::Path,
) -> Compression {
    if let Some(flag) = flag {
        return flag.to_compression();
    }
    match Compression::from_extension(key) {
        Compression::Uncompressed => Compression::from_extension(&file.to_string_lossy()),
        detected => detected,
    }
}

async fn upload(
    store: Arc<S3ObjectStore>,
    opts: &StoreOpts,
    compress: Option<CompressArg>,
    part_size: usize,
) -> Result<()> {
    let mut file = tokio::fs::File::open(&opts.file)
        .await
        .with_context(|| format!("failed to open file {}", opts.file.display()))?;
    let file_size = file
        .metadata()
        .await
        .context("failed to get file metadata")?
        .len();

    let compression = resolve_compression(compress, &opts.key, &opts.file);

    // Ctrl-C cancels the upload; the writer's close path then aborts the
    // session so no server-side parts are left behind.
    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling upload");
            signal_cancel.cancel();
        }
    });

    info!(
        bucket = %opts.bucket,
        key = %opts.key,
        file_size,
        part_size,
        compression = ?compression,
        "starting upload"
    );

    let writer = MultipartWriter::new(
        store,
        opts.bucket.clone(),
        opts.key.clone(),
        part_size,
        cancel,
    )
    .await?;
    let mut writer = CompressedWriter::new(writer, compression);

    let start = Instant::now();
    let mut buf = vec![0u8; 64 * 1024];
    let mut written: u64 = 0;
    loop {
        let n = file.read(&mut buf).await.context("failed to read file")?;
        if n == 0 {
            break;
        }
        if let Err(e) = writer.write(&buf[..n]).await {
            if let Err(abort_err) = writer.abort().await {
                warn!("failed to abort upload: {abort_err}");
            }
            return Err(e).context("failed to upload file");
        }
        written += n as u64;
    }

    writer.close().await.context("failed to finalize upload")?;

    let elapsed = start.elapsed();
    info!(
        bytes = written,
        elapsed = ?elapsed,
        throughput_mib_s = format!("{:.2}", written as f64 / elapsed.as_secs_f64() / (1024.0 * 1024.0)),
        "upload completed"
    );
    Ok(())
}

async fn download(store: Arc<S3ObjectStore>, opts: &StoreOpts, chunk_size: u64) -> Result<()> {
    let object_size = store
        .head_object(&opts.bucket, &opts.key)
        .await
        .context("failed to get object metadata")?;

    info!(
        bucket = %opts.bucket,
        key = %opts.key,
        object_size,
        chunk_size,
        "starting download"
    );

    let reader = RangeReader::new(
        store,
        opts.bucket.clone(),
        opts.key.clone(),
        0,
        object_size,
        chunk_size,
    );
    let mut reader = decompressed_reader(reader, DEFAULT_BUFFER_SIZE).await?;

    let path = opts.file.clone();
    let start = Instant::now();
    let written = tokio::task::spawn_blocking(move || -> Result<u64> {
        let mut out = std::fs::File::create(&path)
            .with_context(|| format!("failed to create file {}", path.display()))?;
        std::io::copy(&mut reader, &mut out).context("failed to download object")
    })
    .await
    .context("download task panicked")??;

    let elapsed = start.elapsed();
    info!(
        bytes = written,
        elapsed = ?elapsed,
        throughput_mib_s = format!("{:.2}", written as f64 / elapsed.as_secs_f64() / (1024.0 * 1024.0)),
        "download completed"
    );
    Ok(())
}
