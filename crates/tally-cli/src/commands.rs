//! One function per sub-command. Results are printed to stdout as JSON.

use std::{
  fs::File,
  io,
  path::{Path, PathBuf},
};

use anyhow::{Context as _, Result, bail};
use chrono::Utc;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tally_core::{
  analyst::{AnalysisReport, Analyst, QueryAnswer},
  page::PageRequest,
  profile::summarize,
  store::{DatasetStore, IngestOutcome, IngestReport, UploadRegistry},
  upload::{DeleteMode, IngestMetadata, NewUpload, UploadMetadata, UploadStatus},
};
use tally_store_sqlite::SqliteStore;

use crate::{completion::Completion, decode, settings::Settings};

/// Everything a sub-command needs.
pub struct Session {
  pub settings: Settings,
  pub store:    SqliteStore,
  /// Data table the command acts on.
  pub table:    String,
}

impl Session {
  fn analyst(&self) -> Result<Analyst<SqliteStore, Completion>> {
    let completion = Completion::from_settings(self.settings.completion.as_ref())?;
    Ok(
      Analyst::new(self.store.clone(), completion, self.table.clone())
        .with_sample_size(self.settings.sample_size)
        .with_chart_row_limit(self.settings.chart_row_limit),
    )
  }
}

fn print_json(value: &impl Serialize) -> Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}

// ─── Schema ──────────────────────────────────────────────────────────────────

pub async fn migrate(ctx: &Session) -> Result<()> {
  let report = ctx.store.ensure_schema().await?;
  println!("schema at version {}", report.version);
  Ok(())
}

// ─── Upload ──────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct UploadOutput {
  upload_id: i64,
  stored_at: PathBuf,
  ingest:    IngestReport,
  analysis:  Option<AnalysisReport>,
}

/// Copy `file` into the upload directory, register it, materialise it into
/// the data table and analyse the result.
///
/// Each batch commits on its own. When a later batch is rejected the upload is
/// soft-deleted, but the data table keeps the batches committed before it
/// (their count is in the printed rejection). A rejected first batch leaves
/// the previous table untouched.
pub async fn upload(ctx: &Session, file: &Path) -> Result<()> {
  let format = decode::detect_format(file)?;
  let name = file
    .file_name()
    .and_then(|n| n.to_str())
    .with_context(|| format!("{file:?} has no usable file name"))?;

  tokio::fs::create_dir_all(&ctx.settings.upload_dir)
    .await
    .with_context(|| format!("failed to create {:?}", ctx.settings.upload_dir))?;
  let stored = ctx.settings.upload_dir.join(format!("{}_{name}", Utc::now().timestamp()));
  tokio::fs::copy(file, &stored)
    .await
    .with_context(|| format!("failed to copy {file:?} to {stored:?}"))?;
  let hash = hash_file(stored.clone()).await?;

  let batch_size = ctx.settings.batch_size;
  let path = stored.clone();
  let decoded = tokio::task::spawn_blocking(move || decode::open(&path, format, batch_size))
    .await
    .context("decoder setup panicked")??;
  let ingest = IngestMetadata {
    format,
    encoding: Some(decoded.encoding.name().to_owned()),
    table: Some(ctx.table.clone()),
  };
  let upload_id = ctx
    .store
    .insert(
      NewUpload::new(name, &stored)
        .with_hash(hash)
        .with_metadata(UploadMetadata::new().with_ingest(&ingest)?),
    )
    .await?;

  let (batches, decoder) = decode::spawn_decoder(decoded.batches);
  let outcome = ctx.store.ingest(&ctx.table, Some(upload_id), batches).await?;
  decoder.await.context("decoder panicked")?;

  let report = match outcome {
    IngestOutcome::Completed(report) => report,
    rejected @ IngestOutcome::Rejected { .. } => {
      ctx.store.delete(upload_id, DeleteMode::Soft).await?;
      print_json(&rejected)?;
      bail!("upload {upload_id} was rejected");
    }
  };

  let analysis = ctx.analyst()?.analyze().await?;
  print_json(&UploadOutput { upload_id, stored_at: stored, ingest: report, analysis })
}

async fn hash_file(path: PathBuf) -> Result<String> {
  tokio::task::spawn_blocking(move || -> Result<String> {
    let mut file = File::open(&path).with_context(|| format!("failed to open {path:?}"))?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher).with_context(|| format!("failed to hash {path:?}"))?;
    Ok(hex::encode(hasher.finalize()))
  })
  .await
  .context("hashing task panicked")?
}

// ─── Reads ───────────────────────────────────────────────────────────────────

pub async fn summary(ctx: &Session, sample: Option<usize>) -> Result<()> {
  let sample = sample.unwrap_or(ctx.settings.sample_size);
  let Some(summary) = summarize(&ctx.store, &ctx.table, Some(sample)).await? else {
    bail!("table {:?} does not exist", ctx.table);
  };
  print_json(&summary)
}

pub async fn ask(ctx: &Session, question: &str) -> Result<()> {
  let answer = ctx.analyst()?.answer(question).await?;
  print_json(&answer)?;
  if let QueryAnswer::Rejected { reason, .. } = answer {
    bail!("question could not be answered: {reason}");
  }
  Ok(())
}

pub async fn rows(ctx: &Session, page: u64, page_size: u64) -> Result<()> {
  let request = PageRequest::new(page, page_size)?;
  let Some(page) = ctx.store.read_page(&ctx.table, request).await? else {
    bail!("table {:?} does not exist", ctx.table);
  };
  print_json(&page)
}

// ─── Upload registry ─────────────────────────────────────────────────────────

pub async fn list_uploads(ctx: &Session, deleted: bool, limit: u64, offset: u64) -> Result<()> {
  let status = if deleted { UploadStatus::Deleted } else { UploadStatus::Active };
  let records = ctx.store.list(status, limit, offset).await?;
  print_json(&records)
}

pub async fn show_upload(ctx: &Session, id: i64) -> Result<()> {
  let Some(record) = ctx.store.get(id).await? else {
    bail!("no active upload with id {id}");
  };
  print_json(&record)
}

pub async fn delete_upload(ctx: &Session, id: i64, hard: bool) -> Result<()> {
  let mode = if hard { DeleteMode::Hard } else { DeleteMode::Soft };
  if ctx.store.delete(id, mode).await? == 0 {
    bail!("no matching upload with id {id}");
  }
  println!("deleted upload {id}");
  Ok(())
}

pub async fn upload_stats(ctx: &Session) -> Result<()> {
  print_json(&ctx.store.stats().await?)
}
