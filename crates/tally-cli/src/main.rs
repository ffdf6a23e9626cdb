//! `tally`: upload tabular files into a local SQLite store, profile them and
//! ask questions about them.
//!
//! # Usage
//!
//! ```text
//! tally upload sales.csv
//! tally summary
//! tally ask "which region sells the most?"
//! tally uploads list --limit 5
//! ```

mod commands;
mod completion;
mod decode;
mod settings;

use std::path::PathBuf;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use commands::Session;
use settings::Settings;
use tally_store_sqlite::SqliteStore;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

// ─── CLI args ─────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "tally", version, about = "Profile and query uploaded business data")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "tally.toml")]
  config: PathBuf,

  /// Data table to act on (overrides `table` in the config).
  #[arg(long, global = true)]
  table: Option<String>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Bring the store schema up to date.
  Migrate,
  /// Register a CSV, TSV or JSON file and materialise it into the data table.
  Upload { file: PathBuf },
  /// Profile the data table.
  Summary {
    /// Rows to sample (defaults to `sample_size` in the config).
    #[arg(long)]
    sample: Option<usize>,
  },
  /// Answer a natural-language question with a query and a chart.
  Ask { question: String },
  /// Print one page of the data table.
  Rows {
    #[arg(long, default_value_t = 1)]
    page:      u64,
    #[arg(long, default_value_t = 20)]
    page_size: u64,
  },
  /// Inspect or manage registered uploads.
  #[command(subcommand)]
  Uploads(UploadsCommand),
}

#[derive(Subcommand)]
enum UploadsCommand {
  /// List uploads, newest first.
  List {
    /// Show soft-deleted uploads instead of active ones.
    #[arg(long)]
    deleted: bool,
    #[arg(long, default_value_t = 20)]
    limit:   u64,
    #[arg(long, default_value_t = 0)]
    offset:  u64,
  },
  /// Show one active upload.
  Show { id: i64 },
  /// Soft-delete an upload, or remove it entirely with `--hard`.
  Delete {
    id:   i64,
    #[arg(long)]
    hard: bool,
  },
  /// Counts and total size of active uploads.
  Stats,
}

// ─── Entry point ──────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_writer(std::io::stderr)
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();
  let settings = Settings::load(&cli.config)?;

  let store = SqliteStore::open(&settings.store_path)
    .await
    .with_context(|| format!("failed to open store at {:?}", settings.store_path))?;
  tracing::debug!(path = ?settings.store_path, "store opened");

  let table = cli.table.unwrap_or_else(|| settings.table.clone());
  let session = Session { settings, store, table };
  let result = run(&session, cli.command).await;

  session.store.close().await.context("failed to close store")?;
  result
}

async fn run(session: &Session, command: Command) -> anyhow::Result<()> {
  match command {
    Command::Migrate => commands::migrate(session).await,
    Command::Upload { file } => commands::upload(session, &file).await,
    Command::Summary { sample } => commands::summary(session, sample).await,
    Command::Ask { question } => commands::ask(session, &question).await,
    Command::Rows { page, page_size } => commands::rows(session, page, page_size).await,
    Command::Uploads(UploadsCommand::List { deleted, limit, offset }) => {
      commands::list_uploads(session, deleted, limit, offset).await
    }
    Command::Uploads(UploadsCommand::Show { id }) => commands::show_upload(session, id).await,
    Command::Uploads(UploadsCommand::Delete { id, hard }) => {
      commands::delete_upload(session, id, hard).await
    }
    Command::Uploads(UploadsCommand::Stats) => commands::upload_stats(session).await,
  }
}
