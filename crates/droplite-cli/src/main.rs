//! Droplite CLI: operator commands for the file ingestion core.
//!
//! Reads configuration from the environment (and `.env`). Every command
//! except `migrate` applies pending migrations before it runs.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use droplite_cli::{
    init_tracing, mime_from_path, normalize_mime_type, parse_metadata_pair, print_json,
    report_error,
};
use droplite_core::models::{FileStatus, ListFilesParams};
use droplite_core::Config;
use droplite_db::{db::run_migrations, setup, PgFileRepository};
use droplite_services::{create_storage, FileService, RegisterFileInput};
use futures::TryStreamExt;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "droplite", about = "Droplite file ingestion CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending schema migrations
    Migrate,
    /// Upload a local file and register it
    Put {
        /// Path to the file to upload
        file: PathBuf,
        /// Display name (defaults to the file name)
        #[arg(long)]
        name: Option<String>,
        /// MIME type (guessed from the extension when omitted)
        #[arg(long)]
        mime: Option<String>,
        /// Explicit storage key (generated when omitted)
        #[arg(long)]
        key: Option<String>,
        /// Caller-supplied checksum, stored as-is
        #[arg(long)]
        checksum: Option<String>,
        /// Metadata entry as key=value; repeatable
        #[arg(long = "meta")]
        meta: Vec<String>,
    },
    /// Register a record for content already placed under a key
    Register {
        #[arg(long)]
        name: String,
        #[arg(long)]
        mime: String,
        /// Declared size in bytes
        #[arg(long)]
        size: i64,
        /// Storage key the content lives under
        #[arg(long)]
        key: String,
    },
    /// List file records, newest first
    List {
        /// Status filter: pending, stored, failed, deleted; repeatable
        #[arg(long = "status")]
        status: Vec<String>,
        /// Maximum number of records
        #[arg(long)]
        limit: Option<i64>,
        /// Offset for pagination
        #[arg(long)]
        offset: Option<i64>,
    },
    /// Show a single file record
    Get {
        /// File UUID
        id: Uuid,
    },
    /// Write a stored file's content to stdout or a file
    Cat {
        /// File UUID
        id: Uuid,
        /// Output path (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Mark a file deleted
    Rm {
        /// File UUID
        id: Uuid,
    },
}

async fn build_service(config: &Config) -> anyhow::Result<FileService> {
    let pool = setup::setup_database(config).await?;
    let repository = Arc::new(PgFileRepository::new(pool));
    let storage = create_storage(config)
        .await
        .context("Failed to initialize storage backend")?;
    Ok(FileService::from_config(config, storage, repository))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env().context("Failed to load configuration")?;
    init_tracing(&config);
    config.validate()?;

    if let Err(err) = run(cli.command, &config).await {
        std::process::exit(report_error(&err));
    }
    Ok(())
}

async fn run(command: Commands, config: &Config) -> anyhow::Result<()> {
    if let Commands::Migrate = command {
        let pool = setup::connect(config).await?;
        let applied = run_migrations(&pool).await?;
        print_json(&serde_json::json!({ "applied": applied }))?;
        return Ok(());
    }

    let service = build_service(config).await?;

    match command {
        Commands::Migrate => {}
        Commands::Put {
            file,
            name,
            mime,
            key,
            checksum,
            meta,
        } => {
            let size = tokio::fs::metadata(&file)
                .await
                .with_context(|| format!("Failed to stat {}", file.display()))?
                .len();
            let handle = tokio::fs::File::open(&file)
                .await
                .with_context(|| format!("Failed to open {}", file.display()))?;

            let name = name.unwrap_or_else(|| {
                file.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default()
            });
            let mime = mime
                .map(|m| normalize_mime_type(&m))
                .unwrap_or_else(|| mime_from_path(&file).to_string());
            let metadata = meta
                .iter()
                .map(|raw| parse_metadata_pair(raw))
                .collect::<anyhow::Result<HashMap<_, _>>>()?;

            let mut input = RegisterFileInput::new(name, mime, i64::try_from(size)?)
                .with_content(Box::pin(handle))
                .with_metadata(metadata);
            if let Some(key) = key {
                input = input.with_storage_key(key);
            }
            if let Some(checksum) = checksum {
                input = input.with_checksum(checksum);
            }

            let record = service.register_file(input).await?;
            print_json(&record)?;
        }
        Commands::Register {
            name,
            mime,
            size,
            key,
        } => {
            let input = RegisterFileInput::new(name, normalize_mime_type(&mime), size)
                .with_storage_key(key);
            let record = service.register_file(input).await?;
            print_json(&record)?;
        }
        Commands::List {
            status,
            limit,
            offset,
        } => {
            let statuses = status
                .iter()
                .map(|s| s.parse::<FileStatus>())
                .collect::<Result<Vec<_>, _>>()?;
            let records = service
                .list_files(ListFilesParams {
                    statuses,
                    limit,
                    offset,
                })
                .await?;
            print_json(&records)?;
        }
        Commands::Get { id } => {
            let record = service.get_file(id).await?;
            print_json(&record)?;
        }
        Commands::Cat { id, output } => {
            let (record, mut stream) = service.open_file(id).await?;
            let mut written: u64 = 0;

            match output {
                Some(path) => {
                    let mut out = tokio::fs::File::create(&path)
                        .await
                        .with_context(|| format!("Failed to create {}", path.display()))?;
                    while let Some(chunk) = stream.try_next().await? {
                        out.write_all(&chunk).await?;
                        written += chunk.len() as u64;
                    }
                    out.flush().await?;
                }
                None => {
                    let mut out = tokio::io::stdout();
                    while let Some(chunk) = stream.try_next().await? {
                        out.write_all(&chunk).await?;
                        written += chunk.len() as u64;
                    }
                    out.flush().await?;
                }
            }

            tracing::debug!(
                file_id = %record.id,
                storage_key = %record.storage_key,
                size_bytes = written,
                "Content written"
            );
        }
        Commands::Rm { id } => {
            service.delete_file(id).await?;
            print_json(&serde_json::json!({ "deleted": id }))?;
        }
    }

    Ok(())
}
