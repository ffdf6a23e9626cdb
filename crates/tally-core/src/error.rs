//! Error types for `tally-core`.
//!
//! [`Error`] covers genuine failures. [`Rejection`] covers bad input: it is
//! carried inside typed outcomes so callers must inspect it explicitly, and
//! it never means the store was left half-written.

use thiserror::Error;

use crate::table::ColumnType;

#[derive(Debug, Error)]
pub enum Error {
  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),

  #[error("invalid metadata: {0}")]
  InvalidMetadata(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Why a request was refused. The store is unchanged by a rejected unit of
/// work.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Rejection {
  #[error("unsupported file format: {0}")]
  UnsupportedFormat(String),

  #[error("malformed input: {0}")]
  Malformed(String),

  #[error("input contained no batches")]
  EmptyInput,

  #[error("batch has no columns")]
  NoColumns,

  #[error("invalid identifier {0:?}")]
  InvalidIdentifier(String),

  #[error("table name {0:?} is reserved")]
  ReservedTable(String),

  #[error("table {0:?} does not exist")]
  UnknownTable(String),

  #[error("duplicate column {0:?} after normalisation")]
  DuplicateColumn(String),

  #[error("row {row} has {found} cells, expected {expected}")]
  RaggedRow {
    row:      usize,
    expected: usize,
    found:    usize,
  },

  #[error("column {0:?} is not part of the established table schema")]
  UnknownColumn(String),

  #[error("column {column:?} holds {expected} values, got {found}")]
  IncompatibleType {
    column:   String,
    expected: ColumnType,
    found:    &'static str,
  },

  #[error("page must be >= 1 and page size > 0 (got page {page}, size {page_size})")]
  InvalidPage { page: u64, page_size: u64 },

  #[error("unsafe SQL: {0}")]
  UnsafeSql(String),

  #[error("invalid SQL: {0}")]
  InvalidSql(String),
}
