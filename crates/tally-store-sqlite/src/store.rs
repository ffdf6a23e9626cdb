//! [`SqliteStore`]: connection lifecycle, schema management and the
//! [`UploadRegistry`] implementation.

use std::{path::Path, time::Duration};

use chrono::Utc;
use rusqlite::{OptionalExtension as _, TransactionBehavior};
use tally_core::{
  store::UploadRegistry,
  upload::{DeleteMode, NewUpload, RegistryStats, UploadRecord, UploadStatus},
};

use crate::{
  Result,
  encode::{RawUpload, UPLOAD_COLUMNS, encode_dt, encode_path},
  schema::{self, CONNECTION_PRAGMAS, SchemaReport},
};

/// How long a writer waits on another connection's lock before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

// ─── Store ───────────────────────────────────────────────────────────────────

/// A Tally store backed by a single SQLite file.
///
/// Cloning is cheap; clones share one connection and its worker thread.
#[derive(Clone)]
pub struct SqliteStore {
  pub(crate) conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and bring its schema up to date.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    Self::init(conn).await
  }

  /// Open an in-memory store, for tests.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    Self::init(conn).await
  }

  async fn init(conn: tokio_rusqlite::Connection) -> Result<Self> {
    conn
      .call(|conn| {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(CONNECTION_PRAGMAS)?;
        Ok(())
      })
      .await?;
    let store = Self { conn };
    store.ensure_schema().await?;
    Ok(store)
  }

  /// Apply any pending migrations. Safe to call repeatedly; a failed step
  /// aborts the call and leaves the schema at the last completed version.
  pub async fn ensure_schema(&self) -> Result<SchemaReport> {
    let report = self.conn.call(schema::apply_pending).await?;
    tracing::debug!(version = report.version, applied = ?report.applied, "schema ensured");
    Ok(report)
  }

  pub async fn schema_version(&self) -> Result<i64> {
    Ok(self.conn.call(|conn| Ok(schema::current_version(conn)?)).await?)
  }

  /// Close the connection, waiting for queued work to finish. Other clones
  /// of this store fail with a connection-closed error afterwards.
  pub async fn close(self) -> Result<()> {
    self.conn.close().await?;
    Ok(())
  }
}

// ─── UploadRegistry impl ─────────────────────────────────────────────────────

impl UploadRegistry for SqliteStore {
  type Error = crate::Error;

  async fn insert(&self, upload: NewUpload) -> Result<i64> {
    let file_size = match tokio::fs::metadata(&upload.filepath).await {
      Ok(meta) if meta.is_file() => i64::try_from(meta.len()).ok(),
      _ => None,
    };
    let metadata = upload
      .metadata
      .as_ref()
      .filter(|m| !m.is_empty())
      .map(|m| m.to_blob())
      .transpose()?;
    let filepath = encode_path(&upload.filepath);
    let uploaded_at = encode_dt(Utc::now());
    let NewUpload { filename, file_hash, .. } = upload;

    let (id, created) = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let existing: Option<i64> = tx
          .query_row(
            "SELECT id FROM uploads WHERE filepath = ?1",
            rusqlite::params![filepath],
            |r| r.get(0),
          )
          .optional()?;
        let out = match existing {
          Some(id) => (id, false),
          None => {
            tx.execute(
              "INSERT INTO uploads (filename, filepath, uploaded_at, file_size, status, file_hash, metadata)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
              rusqlite::params![
                filename,
                filepath,
                uploaded_at,
                file_size,
                UploadStatus::Active.as_ref(),
                file_hash,
                metadata,
              ],
            )?;
            (tx.last_insert_rowid(), true)
          }
        };
        tx.commit()?;
        Ok(out)
      })
      .await?;

    if created {
      tracing::info!(id, "registered upload");
    } else {
      tracing::debug!(id, "upload already registered");
    }
    Ok(id)
  }

  async fn get(&self, id: i64) -> Result<Option<UploadRecord>> {
    let raw: Option<RawUpload> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!("SELECT {UPLOAD_COLUMNS} FROM uploads WHERE id = ?1 AND status = ?2"),
              rusqlite::params![id, UploadStatus::Active.as_ref()],
              RawUpload::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawUpload::into_record).transpose()
  }

  async fn delete(&self, id: i64, mode: DeleteMode) -> Result<usize> {
    let affected = self
      .conn
      .call(move |conn| {
        let n = match mode {
          DeleteMode::Soft => conn.execute(
            "UPDATE uploads SET status = ?2 WHERE id = ?1 AND status = ?3",
            rusqlite::params![
              id,
              UploadStatus::Deleted.as_ref(),
              UploadStatus::Active.as_ref()
            ],
          )?,
          DeleteMode::Hard => {
            conn.execute("DELETE FROM uploads WHERE id = ?1", rusqlite::params![id])?
          }
        };
        Ok(n)
      })
      .await?;

    tracing::info!(id, ?mode, affected, "deleted upload");
    Ok(affected)
  }

  async fn list(&self, status: UploadStatus, limit: u64, offset: u64) -> Result<Vec<UploadRecord>> {
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    let offset = i64::try_from(offset).unwrap_or(i64::MAX);

    let raws: Vec<RawUpload> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {UPLOAD_COLUMNS} FROM uploads
           WHERE status = ?1
           ORDER BY uploaded_at DESC, id DESC
           LIMIT ?2 OFFSET ?3"
        ))?;
        let rows = stmt
          .query_map(
            rusqlite::params![status.as_ref(), limit, offset],
            RawUpload::from_row,
          )?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawUpload::into_record).collect()
  }

  async fn stats(&self) -> Result<RegistryStats> {
    let (active, deleted, active_bytes): (i64, i64, i64) = self
      .conn
      .call(|conn| {
        Ok(conn.query_row(
          "SELECT
             COALESCE(SUM(status = 'active'), 0),
             COALESCE(SUM(status = 'deleted'), 0),
             COALESCE(SUM(CASE WHEN status = 'active' THEN file_size END), 0)
           FROM uploads",
          [],
          |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )?)
      })
      .await?;

    let count = |n: i64| u64::try_from(n).unwrap_or(0);
    Ok(RegistryStats {
      active:       count(active),
      deleted:      count(deleted),
      active_bytes: count(active_bytes),
    })
  }
}
