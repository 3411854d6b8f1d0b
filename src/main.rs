//! Tsumiki CLI - drive uploads against a configured storage backend.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use clap::{Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use tsumiki::config::{Config, StorageConfig};
use tsumiki::provider::{
    FsProvider, IncomingFile, MemoryProvider, Metadata, MultiProvider, S3Provider,
    StorageProvider,
};
use tsumiki::{Manager, Validator};

/// Tsumiki - storage-agnostic upload toolkit
#[derive(Parser, Debug)]
#[command(name = "tsumiki")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload a local file
    Upload {
        /// Local file to read
        file: PathBuf,
        /// Destination path prefix, e.g. "photos"
        #[arg(short, long)]
        path: Option<String>,
        /// Declared content type
        #[arg(short = 't', long, default_value = "image/png")]
        content_type: String,
    },
    /// Fetch an object and write it to stdout or a file
    Get {
        key: String,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Delete an object
    Delete { key: String },
    /// Mint a presigned read URL
    Presign {
        key: String,
        /// Validity in seconds
        #[arg(short, long, default_value_t = 600)]
        expires: u64,
    },
    /// Upload a local file through the chunked session flow
    ChunkedUpload {
        file: PathBuf,
        /// Destination object key
        key: String,
        /// Chunk size in bytes
        #[arg(short, long, default_value_t = 5 * 1024 * 1024)]
        part_size: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = Config::load(&args.config)?;
    info!("Loaded configuration from {:?}", args.config);

    let provider = build_provider(&config.storage).await?;
    let manager = Manager::builder()
        .provider(provider)
        .validator(Validator::new().with_max_file_size(config.limits.max_file_size))
        .chunk_part_size(config.limits.chunk_part_size)
        .build();

    match args.command {
        Command::Upload {
            file,
            path,
            content_type,
        } => {
            let content = tokio::fs::read(&file).await?;
            let name = file
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "upload.bin".to_string());
            let incoming = IncomingFile::new(name, content_type, content);
            let meta = manager.handle_file(&incoming, path.as_deref()).await?;
            println!("{}", serde_json::to_string_pretty(&meta)?);
        }
        Command::Get { key, output } => {
            let content = manager.get_file(&key).await?;
            match output {
                Some(path) => {
                    tokio::fs::write(&path, &content).await?;
                    info!("Wrote {} bytes to {:?}", content.len(), path);
                }
                None => {
                    use std::io::Write;
                    std::io::stdout().write_all(&content)?;
                }
            }
        }
        Command::Delete { key } => {
            manager.delete_file(&key).await?;
            info!("Deleted {key}");
        }
        Command::Presign { key, expires } => {
            let url = manager
                .presigned_url(&key, Duration::from_secs(expires))
                .await?;
            println!("{url}");
        }
        Command::ChunkedUpload {
            file,
            key,
            part_size,
        } => {
            let content = tokio::fs::read(&file).await?;
            let total_size = content.len() as u64;

            let session = manager
                .initiate_chunked(&key, total_size, Metadata::new())
                .await?;
            info!(session_id = %session.id, "chunked session started");

            let part_size = part_size.max(1) as usize;
            for (index, chunk) in content.chunks(part_size).enumerate() {
                manager
                    .upload_chunk(&session.id, index as u32, Bytes::copy_from_slice(chunk))
                    .await?;
            }

            let meta = manager.complete_chunked(&session.id).await?;
            println!("{}", serde_json::to_string_pretty(&meta)?);
        }
    }

    Ok(())
}

async fn build_provider(storage: &StorageConfig) -> anyhow::Result<Arc<dyn StorageProvider>> {
    match storage {
        StorageConfig::Fs { root, url_prefix } => {
            let mut provider = FsProvider::new(root);
            if let Some(prefix) = url_prefix {
                provider = provider.with_url_prefix(prefix);
            }
            Ok(Arc::new(provider))
        }
        StorageConfig::S3 {
            bucket,
            region,
            base_path,
            local_mirror,
        } => {
            let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
            if let Some(region) = region {
                loader = loader.region(aws_config::Region::new(region.clone()));
            }
            let sdk_config = loader.load().await;
            let client = aws_sdk_s3::Client::new(&sdk_config);

            let mut provider = S3Provider::new(client, bucket);
            if let Some(base_path) = base_path {
                provider = provider.with_base_path(base_path);
            }

            match local_mirror {
                Some(mirror) => Ok(Arc::new(MultiProvider::new(
                    FsProvider::new(mirror),
                    Arc::new(provider),
                ))),
                None => Ok(Arc::new(provider)),
            }
        }
        StorageConfig::Memory => Ok(Arc::new(MemoryProvider::new())),
    }
}
