//! Conversions between domain types and what SQLite stores.
//!
//! Timestamps are RFC 3339 strings with microsecond precision and a `Z`
//! suffix, so lexical order matches chronological order. Column descriptors
//! are stored as compact JSON.

use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::{Value, ValueRef};
use tally_core::{
  table::{CellValue, TableSchema},
  upload::{UploadRecord, UploadStatus},
};

use crate::{Error, Result};

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339_opts(SecondsFormat::Micros, true) }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

pub fn encode_path(path: &Path) -> String { path.to_string_lossy().into_owned() }

// ─── Cells ───────────────────────────────────────────────────────────────────

pub fn encode_cell(cell: &CellValue) -> Value {
  match cell {
    CellValue::Null => Value::Null,
    CellValue::Integer(i) => Value::Integer(*i),
    CellValue::Real(f) => Value::Real(*f),
    CellValue::Text(s) => Value::Text(s.clone()),
  }
}

/// Blobs have no cell counterpart and are rendered as hex.
pub fn decode_cell(value: ValueRef<'_>) -> CellValue {
  match value {
    ValueRef::Null => CellValue::Null,
    ValueRef::Integer(i) => CellValue::Integer(i),
    ValueRef::Real(f) => CellValue::Real(f),
    ValueRef::Text(bytes) => CellValue::Text(String::from_utf8_lossy(bytes).into_owned()),
    ValueRef::Blob(bytes) => CellValue::Text(hex::encode(bytes)),
  }
}

// ─── Schemas ─────────────────────────────────────────────────────────────────

pub fn encode_columns(schema: &TableSchema) -> Result<String> { Ok(serde_json::to_string(schema)?) }

pub fn decode_columns(s: &str) -> Result<TableSchema> { Ok(serde_json::from_str(s)?) }

// ─── Raw row types ───────────────────────────────────────────────────────────

pub const UPLOAD_COLUMNS: &str =
  "id, filename, filepath, uploaded_at, file_size, status, file_hash, metadata";

/// Intermediate representation of an `uploads` row, read by
/// [`RawUpload::from_row`] in [`UPLOAD_COLUMNS`] order.
pub struct RawUpload {
  pub id:          i64,
  pub filename:    String,
  pub filepath:    String,
  pub uploaded_at: String,
  pub file_size:   Option<i64>,
  pub status:      String,
  pub file_hash:   Option<String>,
  pub metadata:    Option<String>,
}

impl RawUpload {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:          row.get(0)?,
      filename:    row.get(1)?,
      filepath:    row.get(2)?,
      uploaded_at: row.get(3)?,
      file_size:   row.get(4)?,
      status:      row.get(5)?,
      file_hash:   row.get(6)?,
      metadata:    row.get(7)?,
    })
  }

  pub fn into_record(self) -> Result<UploadRecord> {
    let status: UploadStatus = self
      .status
      .parse()
      .map_err(|_| Error::Decode(format!("upload status {:?}", self.status)))?;
    Ok(UploadRecord {
      id: self.id,
      filename: self.filename,
      filepath: PathBuf::from(self.filepath),
      uploaded_at: decode_dt(&self.uploaded_at)?,
      file_size: self.file_size.and_then(|n| u64::try_from(n).ok()),
      status,
      file_hash: self.file_hash,
      metadata: self.metadata,
    })
  }
}
