//! Storage traits and the outcome types they return.
//!
//! Implemented by storage backends (e.g. `tally-store-sqlite`). The profiler
//! and the [`Analyst`](crate::analyst::Analyst) depend on these abstractions,
//! never on a concrete backend.
//!
//! Every backend handle is explicitly passed and cheap to clone; nothing here
//! assumes exclusive ownership of the underlying database between calls.

use std::future::Future;

use serde::Serialize;

use crate::{
  Rejection,
  page::{PageRequest, RowPage},
  table::{ChartPoint, QueryRows, RowBatch, TableSchema},
  upload::{DeleteMode, NewUpload, RegistryStats, UploadRecord, UploadStatus},
};

// ─── Batch sources ───────────────────────────────────────────────────────────

/// Lazy, possibly asynchronous, sequence of decoded row batches.
///
/// `Err` items are data-quality failures of the source itself (a malformed
/// record, undecodable bytes) and stop the ingest.
pub trait BatchSource: Send {
  fn next_batch(
    &mut self,
  ) -> impl Future<Output = Option<Result<RowBatch, Rejection>>> + Send + '_;
}

/// Batches already in memory or produced without blocking.
impl<I> BatchSource for I
where
  I: Iterator<Item = Result<RowBatch, Rejection>> + Send,
{
  async fn next_batch(&mut self) -> Option<Result<RowBatch, Rejection>> { self.next() }
}

// ─── Outcomes ────────────────────────────────────────────────────────────────

/// Summary of a completed ingest.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestReport {
  pub table:           String,
  pub schema:          TableSchema,
  pub rows_written:    u64,
  pub batches:         u64,
  /// Categorical columns that received a supporting index.
  pub indexed_columns: Vec<String>,
}

/// Result of [`DatasetStore::ingest`].
#[must_use]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum IngestOutcome {
  Completed(IngestReport),
  /// A batch was refused. Batches before it stay committed; nothing from the
  /// refused batch was written.
  Rejected {
    #[serde(serialize_with = "serialize_display")]
    reason:         Rejection,
    /// 1-based position of the refused batch (0 when refused up front).
    batch:          u64,
    committed_rows: u64,
  },
}

impl IngestOutcome {
  pub fn rejected(reason: Rejection, batch: u64, committed_rows: u64) -> Self {
    Self::Rejected { reason, batch, committed_rows }
  }
}

fn serialize_display<S: serde::Serializer>(
  value: &Rejection,
  serializer: S,
) -> Result<S::Ok, S::Error> {
  serializer.collect_str(value)
}

/// Result of [`DatasetStore::run_query`].
#[must_use]
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
  Rows(QueryRows),
  Rejected(Rejection),
}

// ─── Traits ──────────────────────────────────────────────────────────────────

/// Registry of ingested files.
///
/// A filepath maps to at most one record; inserting a known path is a no-op
/// that returns the existing id, so inserts are safe to retry.
pub trait UploadRegistry: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Register a file and return its id. The file size is read from disk if
  /// the file exists.
  fn insert(
    &self,
    upload: NewUpload,
  ) -> impl Future<Output = Result<i64, Self::Error>> + Send + '_;

  /// Fetch an active record. Deleted and unknown ids both yield `None`.
  fn get(
    &self,
    id: i64,
  ) -> impl Future<Output = Result<Option<UploadRecord>, Self::Error>> + Send + '_;

  /// Delete a record and return the number of rows affected (0 or 1).
  fn delete(
    &self,
    id: i64,
    mode: DeleteMode,
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send + '_;

  /// Records with `status`, most recent first.
  fn list(
    &self,
    status: UploadStatus,
    limit: u64,
    offset: u64,
  ) -> impl Future<Output = Result<Vec<UploadRecord>, Self::Error>> + Send + '_;

  fn stats(&self) -> impl Future<Output = Result<RegistryStats, Self::Error>> + Send + '_;
}

/// Dynamically-shaped data tables: materialisation and reads.
///
/// Read methods return `None` when the table does not exist.
pub trait DatasetStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Materialise `batches` into `table`.
  ///
  /// The first batch replaces any existing table of that name and fixes its
  /// schema; later batches are appended under that schema. Each batch is
  /// committed in its own transaction.
  fn ingest<'a, B>(
    &'a self,
    table: &'a str,
    upload_id: Option<i64>,
    batches: B,
  ) -> impl Future<Output = Result<IngestOutcome, Self::Error>> + Send + 'a
  where
    B: BatchSource + 'a;

  /// Column set and declared types, read from the table's own metadata.
  fn table_schema<'a>(
    &'a self,
    table: &'a str,
  ) -> impl Future<Output = Result<Option<TableSchema>, Self::Error>> + Send + 'a;

  fn row_count<'a>(
    &'a self,
    table: &'a str,
  ) -> impl Future<Output = Result<Option<u64>, Self::Error>> + Send + 'a;

  /// The first `limit` rows in insertion order.
  fn sample<'a>(
    &'a self,
    table: &'a str,
    limit: usize,
  ) -> impl Future<Output = Result<Option<QueryRows>, Self::Error>> + Send + 'a;

  fn read_page<'a>(
    &'a self,
    table: &'a str,
    page: PageRequest,
  ) -> impl Future<Output = Result<Option<RowPage>, Self::Error>> + Send + 'a;

  /// Run a read-only statement, returning at most `max_rows` rows. Statements
  /// that fail the destructive-keyword guard or would write are rejected.
  fn run_query<'a>(
    &'a self,
    sql: &'a str,
    max_rows: usize,
  ) -> impl Future<Output = Result<QueryOutcome, Self::Error>> + Send + 'a;

  /// `x` grouped with `SUM(y)` (or `COUNT(*)` when `y` is `None`). Unknown
  /// columns yield an empty series.
  fn chart_data<'a>(
    &'a self,
    table: &'a str,
    x: &'a str,
    y: Option<&'a str>,
    limit: usize,
  ) -> impl Future<Output = Result<Vec<ChartPoint>, Self::Error>> + Send + 'a;
}
