//! Versioned schema for the Tally SQLite store.
//!
//! Migrations are forward-only and strictly additive. Each one runs in its
//! own `IMMEDIATE` transaction that re-reads the current version first, so
//! two processes racing on the same file apply every step exactly once.

use chrono::Utc;
use rusqlite::{Connection, TransactionBehavior};
use thiserror::Error;

use crate::encode::encode_dt;

/// Applied to every connection when it is opened.
pub const CONNECTION_PRAGMAS: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;
";

const VERSION_TABLE: &str = "
CREATE TABLE IF NOT EXISTS schema_version (
    version     INTEGER PRIMARY KEY,
    applied_at  TEXT NOT NULL
);
";

pub struct Migration {
  pub version:     i64,
  pub description: &'static str,
  pub statements:  &'static [&'static str],
}

pub const MIGRATIONS: &[Migration] = &[
  Migration {
    version:     1,
    description: "uploads",
    statements:  &["CREATE TABLE IF NOT EXISTS uploads (
           id          INTEGER PRIMARY KEY AUTOINCREMENT,
           filename    TEXT NOT NULL,
           filepath    TEXT NOT NULL UNIQUE,
           uploaded_at TEXT NOT NULL
         )"],
  },
  Migration {
    version:     2,
    description: "upload size and lifecycle status",
    statements:  &[
      "ALTER TABLE uploads ADD COLUMN file_size INTEGER",
      "ALTER TABLE uploads ADD COLUMN status TEXT NOT NULL DEFAULT 'active'",
    ],
  },
  Migration {
    version:     3,
    description: "upload hash and metadata",
    statements:  &[
      "ALTER TABLE uploads ADD COLUMN file_hash TEXT",
      // Opaque blob; only `UploadMetadata` interprets it.
      "ALTER TABLE uploads ADD COLUMN metadata TEXT",
      "CREATE INDEX IF NOT EXISTS uploads_status_idx ON uploads (status, uploaded_at)",
    ],
  },
  Migration {
    version:     4,
    description: "dataset catalogue",
    statements:  &["CREATE TABLE IF NOT EXISTS datasets (
           table_name   TEXT PRIMARY KEY,
           upload_id    INTEGER REFERENCES uploads(id) ON DELETE SET NULL,
           columns_json TEXT NOT NULL,
           row_count    INTEGER NOT NULL DEFAULT 0,
           created_at   TEXT NOT NULL,
           updated_at   TEXT NOT NULL
         )"],
  },
];

/// A migration step failed for a reason other than an already-present column.
/// The step's transaction was rolled back.
#[derive(Debug, Error)]
#[error("migration to version {version} failed: {source}")]
pub struct MigrationFailed {
  pub version: i64,
  pub source:  rusqlite::Error,
}

/// Outcome of [`SqliteStore::ensure_schema`](crate::SqliteStore::ensure_schema).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaReport {
  pub version: i64,
  /// Versions applied by this call, ascending. Empty when already current.
  pub applied: Vec<i64>,
}

pub fn current_version(conn: &Connection) -> rusqlite::Result<i64> {
  conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| {
    r.get(0)
  })
}

/// Bring the schema up to the latest version.
pub fn apply_pending(conn: &mut Connection) -> Result<SchemaReport, tokio_rusqlite::Error> {
  conn.execute_batch(VERSION_TABLE)?;

  let mut applied = Vec::new();
  for migration in MIGRATIONS {
    if apply_step(conn, migration).map_err(|e| tokio_rusqlite::Error::Other(Box::new(e)))? {
      applied.push(migration.version);
    }
  }

  Ok(SchemaReport { version: current_version(conn)?, applied })
}

fn apply_step(conn: &mut Connection, migration: &Migration) -> Result<bool, MigrationFailed> {
  let failed = |source| MigrationFailed { version: migration.version, source };

  let tx = conn
    .transaction_with_behavior(TransactionBehavior::Immediate)
    .map_err(failed)?;
  if current_version(&tx).map_err(failed)? >= migration.version {
    return Ok(false);
  }

  for statement in migration.statements {
    match tx.execute_batch(statement) {
      Ok(()) => {}
      Err(e) if is_duplicate_column(&e) => {
        tracing::warn!(
          version = migration.version,
          error = %e,
          "column already present, continuing"
        );
      }
      Err(e) => return Err(failed(e)),
    }
  }

  tx.execute(
    "INSERT INTO schema_version (version, applied_at) VALUES (?1, ?2)",
    rusqlite::params![migration.version, encode_dt(Utc::now())],
  )
  .map_err(failed)?;
  tx.commit().map_err(failed)?;

  tracing::info!(
    version = migration.version,
    description = migration.description,
    "applied migration"
  );
  Ok(true)
}

fn is_duplicate_column(e: &rusqlite::Error) -> bool {
  matches!(
    e,
    rusqlite::Error::SqliteFailure(_, Some(msg)) if msg.contains("duplicate column name")
  )
}
