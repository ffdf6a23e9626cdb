//! Upload records: the registry's view of every ingested file.
//!
//! A record is identified by its filesystem path. The `metadata` column is an
//! opaque blob at the storage layer; [`UploadMetadata`] and
//! [`IngestMetadata`] are the only places that interpret it.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use strum::{AsRefStr, Display, EnumString};

use crate::{Error, Result};

// ─── Status ──────────────────────────────────────────────────────────────────

/// Lifecycle status of an upload record.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Default,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum UploadStatus {
  #[default]
  Active,
  Deleted,
}

/// How [`UploadRegistry::delete`](crate::store::UploadRegistry::delete)
/// removes a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteMode {
  /// Flip an active record to `deleted`; the row is kept.
  Soft,
  /// Physically remove the row, whatever its status.
  Hard,
}

// ─── Records ─────────────────────────────────────────────────────────────────

/// A persisted upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadRecord {
  pub id:          i64,
  pub filename:    String,
  pub filepath:    PathBuf,
  pub uploaded_at: DateTime<Utc>,
  /// Best-effort; absent when the file did not exist at insert time.
  pub file_size:   Option<u64>,
  pub status:      UploadStatus,
  pub file_hash:   Option<String>,
  /// Raw metadata blob exactly as stored.
  pub metadata:    Option<String>,
}

impl UploadRecord {
  /// Parse the stored metadata blob, if any.
  pub fn metadata(&self) -> Result<Option<UploadMetadata>> {
    self
      .metadata
      .as_deref()
      .map(UploadMetadata::from_blob)
      .transpose()
  }
}

/// Input to [`UploadRegistry::insert`](crate::store::UploadRegistry::insert).
#[derive(Debug, Clone)]
pub struct NewUpload {
  pub filename:  String,
  pub filepath:  PathBuf,
  pub file_hash: Option<String>,
  pub metadata:  Option<UploadMetadata>,
}

impl NewUpload {
  pub fn new(filename: impl Into<String>, filepath: impl Into<PathBuf>) -> Self {
    Self {
      filename:  filename.into(),
      filepath:  filepath.into(),
      file_hash: None,
      metadata:  None,
    }
  }

  pub fn with_hash(mut self, hash: impl Into<String>) -> Self {
    self.file_hash = Some(hash.into());
    self
  }

  pub fn with_metadata(mut self, metadata: UploadMetadata) -> Self {
    self.metadata = Some(metadata);
    self
  }
}

/// Aggregate counters over the whole registry, computed on demand.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryStats {
  pub active:       u64,
  pub deleted:      u64,
  pub active_bytes: u64,
}

// ─── Metadata ────────────────────────────────────────────────────────────────

const INGEST_KEY: &str = "ingest";

/// Free-form key/value metadata attached to an upload.
///
/// The registry stores and returns this verbatim. Callers that need structure
/// go through [`UploadMetadata::get`] or [`UploadMetadata::ingest`] rather than
/// poking at the JSON themselves.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UploadMetadata(serde_json::Map<String, serde_json::Value>);

impl UploadMetadata {
  pub fn new() -> Self { Self::default() }

  pub fn from_blob(blob: &str) -> Result<Self> {
    match serde_json::from_str::<serde_json::Value>(blob)? {
      serde_json::Value::Object(map) => Ok(Self(map)),
      other => Err(Error::InvalidMetadata(format!(
        "expected a JSON object, found {other}"
      ))),
    }
  }

  pub fn to_blob(&self) -> Result<String> { Ok(serde_json::to_string(&self.0)?) }

  pub fn insert(&mut self, key: impl Into<String>, value: impl Serialize) -> Result<()> {
    self.0.insert(key.into(), serde_json::to_value(value)?);
    Ok(())
  }

  /// Typed read of a single key. `Ok(None)` when the key is absent.
  pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
    self
      .0
      .get(key)
      .map(|v| serde_json::from_value(v.clone()))
      .transpose()
      .map_err(Error::from)
  }

  pub fn ingest(&self) -> Result<Option<IngestMetadata>> { self.get(INGEST_KEY) }

  pub fn with_ingest(mut self, ingest: &IngestMetadata) -> Result<Self> {
    self.insert(INGEST_KEY, ingest)?;
    Ok(self)
  }

  pub fn is_empty(&self) -> bool { self.0.is_empty() }
}

/// The part of an upload's metadata that the ingestion pipeline writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestMetadata {
  pub format:   SourceFormat,
  /// Character encoding the decoder settled on, e.g. `"UTF-8"`.
  #[serde(default)]
  pub encoding: Option<String>,
  /// Name of the data table the upload was materialised into.
  #[serde(default)]
  pub table:    Option<String>,
}

/// File formats an upload may arrive in.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum SourceFormat {
  Csv,
  Tsv,
  Json,
  Xlsx,
  Parquet,
}

impl SourceFormat {
  /// Guess the format from a file extension.
  pub fn from_path(path: &Path) -> Option<Self> {
    path
      .extension()
      .and_then(|ext| ext.to_str())
      .and_then(|ext| match ext.to_ascii_lowercase().as_str() {
        "jsonl" | "ndjson" => Some(Self::Json),
        other => other.parse().ok(),
      })
  }
}
