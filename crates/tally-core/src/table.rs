//! Dynamically-shaped data tables.
//!
//! A data table's columns are fixed by the first batch written to it. Schema
//! inference ([`infer_schema`]) runs before anything is persisted and yields a
//! [`TableSchema`]; every batch, including the first, is then conformed to that
//! descriptor ([`TableSchema::conform`]) so the writer only ever sees rows that
//! already fit.

use std::{collections::HashSet, fmt};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::Rejection;

// ─── Cells ───────────────────────────────────────────────────────────────────

/// A single decoded cell.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
  #[default]
  Null,
  Integer(i64),
  Real(f64),
  Text(String),
}

impl CellValue {
  /// Parse a raw text cell the way the CSV decoder sees it: blank is null,
  /// then integer, then finite float, otherwise text.
  pub fn from_text(raw: &str) -> Self {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
      return Self::Null;
    }
    if let Ok(i) = trimmed.parse::<i64>() {
      return Self::Integer(i);
    }
    match trimmed.parse::<f64>() {
      Ok(f) if f.is_finite() => Self::Real(f),
      _ => Self::Text(raw.to_owned()),
    }
  }

  /// Absent and empty (or whitespace-only) text both count as missing.
  pub fn is_missing(&self) -> bool {
    match self {
      Self::Null => true,
      Self::Text(s) => s.trim().is_empty(),
      _ => false,
    }
  }

  /// Numeric view of the cell. Text is parsed; anything unparseable is `None`.
  pub fn as_f64(&self) -> Option<f64> {
    match self {
      Self::Null => None,
      Self::Integer(i) => Some(*i as f64),
      Self::Real(f) => Some(*f),
      Self::Text(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
    }
  }

  pub fn type_name(&self) -> &'static str {
    match self {
      Self::Null => "null",
      Self::Integer(_) => "integer",
      Self::Real(_) => "real",
      Self::Text(_) => "text",
    }
  }
}

impl fmt::Display for CellValue {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Null => Ok(()),
      Self::Integer(i) => write!(f, "{i}"),
      Self::Real(r) => write!(f, "{r}"),
      Self::Text(s) => f.write_str(s),
    }
  }
}

// ─── Column descriptors ──────────────────────────────────────────────────────

/// Storage type of a column. `Unknown` only appears when reading back a table
/// whose declared types fall outside what Tally writes.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "UPPERCASE")]
pub enum ColumnType {
  Integer,
  Real,
  Text,
  Unknown,
}

impl ColumnType {
  /// Classify a declared SQL type using SQLite's affinity rules.
  pub fn from_declared(declared: &str) -> Self {
    let upper = declared.to_ascii_uppercase();
    if upper.contains("INT") {
      Self::Integer
    } else if upper.contains("CHAR") || upper.contains("CLOB") || upper.contains("TEXT") {
      Self::Text
    } else if ["REAL", "FLOA", "DOUB", "NUMERIC", "DECIMAL"]
      .iter()
      .any(|t| upper.contains(t))
    {
      Self::Real
    } else {
      Self::Unknown
    }
  }

  pub fn declared_type(self) -> &'static str {
    match self {
      Self::Integer => "INTEGER",
      Self::Real => "REAL",
      Self::Text | Self::Unknown => "TEXT",
    }
  }

  pub fn kind(self) -> ColumnKind {
    match self {
      Self::Integer | Self::Real => ColumnKind::Numeric,
      Self::Text => ColumnKind::Categorical,
      Self::Unknown => ColumnKind::Unknown,
    }
  }

  /// Widen `self` just enough to also hold `cell`.
  fn widen(current: Option<Self>, cell: &CellValue) -> Option<Self> {
    match (current, cell) {
      (current, CellValue::Null) => current,
      (Some(Self::Text), _) | (_, CellValue::Text(_)) => Some(Self::Text),
      (None | Some(Self::Integer), CellValue::Integer(_)) => Some(Self::Integer),
      (_, CellValue::Integer(_) | CellValue::Real(_)) => Some(Self::Real),
    }
  }
}

/// How the profiler treats a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
  Numeric,
  Categorical,
  Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
  pub name:        String,
  pub column_type: ColumnType,
}

/// Ordered column descriptors for one data table.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TableSchema {
  pub columns: Vec<ColumnDescriptor>,
}

impl TableSchema {
  pub fn new(columns: Vec<ColumnDescriptor>) -> Self { Self { columns } }

  pub fn len(&self) -> usize { self.columns.len() }

  pub fn is_empty(&self) -> bool { self.columns.is_empty() }

  pub fn names(&self) -> impl Iterator<Item = &str> {
    self.columns.iter().map(|c| c.name.as_str())
  }

  pub fn index_of(&self, name: &str) -> Option<usize> {
    self.columns.iter().position(|c| c.name == name)
  }

  pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
    self.columns.iter().find(|c| c.name == name)
  }

  /// `(name, kind)` pairs in column order.
  pub fn column_kinds(&self) -> Vec<(String, ColumnKind)> {
    self
      .columns
      .iter()
      .map(|c| (c.name.clone(), c.column_type.kind()))
      .collect()
  }

  /// Map `batch` onto this schema.
  ///
  /// Columns are matched by normalised name; columns missing from the batch
  /// are filled with nulls. Unseen columns and values that cannot be stored
  /// in the declared type are rejected rather than coerced. Integers are
  /// widened into `Real` columns and anything is rendered into `Text` columns.
  pub fn conform(&self, batch: &RowBatch) -> Result<Vec<Vec<CellValue>>, Rejection> {
    let positions = normalized_columns(&batch.columns)?
      .into_iter()
      .map(|name| self.index_of(&name).ok_or(Rejection::UnknownColumn(name)))
      .collect::<Result<Vec<_>, _>>()?;

    let mut out = Vec::with_capacity(batch.rows.len());
    for (row_idx, row) in batch.rows.iter().enumerate() {
      if row.len() != positions.len() {
        return Err(Rejection::RaggedRow {
          row:      row_idx + 1,
          expected: positions.len(),
          found:    row.len(),
        });
      }
      let mut conformed = vec![CellValue::Null; self.columns.len()];
      for (cell, &pos) in row.iter().zip(&positions) {
        let column = &self.columns[pos];
        conformed[pos] = coerce(column, cell)?;
      }
      out.push(conformed);
    }
    Ok(out)
  }
}

fn coerce(column: &ColumnDescriptor, cell: &CellValue) -> Result<CellValue, Rejection> {
  if cell.is_missing() {
    return Ok(CellValue::Null);
  }
  let incompatible = || Rejection::IncompatibleType {
    column:   column.name.clone(),
    expected: column.column_type,
    found:    cell.type_name(),
  };
  match (column.column_type, cell) {
    (ColumnType::Integer, CellValue::Integer(_)) => Ok(cell.clone()),
    (ColumnType::Real, CellValue::Real(_)) => Ok(cell.clone()),
    (ColumnType::Real, CellValue::Integer(i)) => Ok(CellValue::Real(*i as f64)),
    (ColumnType::Text | ColumnType::Unknown, CellValue::Text(_)) => Ok(cell.clone()),
    (ColumnType::Text | ColumnType::Unknown, other) => Ok(CellValue::Text(other.to_string())),
    _ => Err(incompatible()),
  }
}

// ─── Batches ─────────────────────────────────────────────────────────────────

/// One chunk of decoded rows, with the raw column headers as they appeared in
/// the source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RowBatch {
  pub columns: Vec<String>,
  pub rows:    Vec<Vec<CellValue>>,
}

impl RowBatch {
  pub fn new(columns: Vec<String>, rows: Vec<Vec<CellValue>>) -> Self {
    Self { columns, rows }
  }

  pub fn len(&self) -> usize { self.rows.len() }

  pub fn is_empty(&self) -> bool { self.rows.is_empty() }
}

/// Rows read back out of the store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryRows {
  pub columns: Vec<String>,
  pub rows:    Vec<Vec<CellValue>>,
}

impl QueryRows {
  /// One JSON object per row, keyed by column name.
  pub fn records(&self) -> Vec<serde_json::Map<String, serde_json::Value>> {
    self
      .rows
      .iter()
      .map(|row| {
        self
          .columns
          .iter()
          .cloned()
          .zip(row.iter().map(|c| serde_json::to_value(c).unwrap_or_default()))
          .collect()
      })
      .collect()
  }
}

/// One bar/point of a dashboard: a group label and its aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartPoint {
  pub name:  CellValue,
  pub value: Option<f64>,
}

// ─── Inference ───────────────────────────────────────────────────────────────

/// Infer a typed descriptor list from the first batch of an upload.
///
/// Column names are normalised with [`normalize_column_name`]. A column with
/// no non-null values in the batch is typed `Text`.
pub fn infer_schema(batch: &RowBatch) -> Result<TableSchema, Rejection> {
  if batch.columns.is_empty() {
    return Err(Rejection::NoColumns);
  }
  let names = normalized_columns(&batch.columns)?;

  let mut types: Vec<Option<ColumnType>> = vec![None; names.len()];
  for (row_idx, row) in batch.rows.iter().enumerate() {
    if row.len() != names.len() {
      return Err(Rejection::RaggedRow {
        row:      row_idx + 1,
        expected: names.len(),
        found:    row.len(),
      });
    }
    for (slot, cell) in types.iter_mut().zip(row) {
      if !cell.is_missing() {
        *slot = ColumnType::widen(*slot, cell);
      }
    }
  }

  Ok(TableSchema::new(
    names
      .into_iter()
      .zip(types)
      .map(|(name, ty)| ColumnDescriptor {
        name,
        column_type: ty.unwrap_or(ColumnType::Text),
      })
      .collect(),
  ))
}

/// Trim a header, lower-case it and replace inner whitespace with underscores.
pub fn normalize_column_name(raw: &str) -> String {
  raw
    .trim()
    .chars()
    .map(|c| if c.is_whitespace() { '_' } else { c })
    .collect::<String>()
    .to_lowercase()
}

/// Names SQLite resolves to the row id when no real column shadows them.
/// Data columns may not take them, so `ORDER BY rowid` keeps insertion order.
const ROWID_ALIASES: &[&str] = &["rowid", "oid", "_rowid_"];

fn normalized_columns(raw: &[String]) -> Result<Vec<String>, Rejection> {
  let mut seen = HashSet::new();
  raw
    .iter()
    .enumerate()
    .map(|(idx, header)| {
      let mut name = normalize_column_name(header);
      if name.is_empty() {
        name = format!("column_{}", idx + 1);
      } else if ROWID_ALIASES.contains(&name.as_str()) {
        name.push_str("_1");
      }
      if !seen.insert(name.clone()) {
        return Err(Rejection::DuplicateColumn(name));
      }
      Ok(name)
    })
    .collect()
}

// ─── Identifiers ─────────────────────────────────────────────────────────────

/// Tables owned by the store itself; data tables may not reuse these names.
pub const RESERVED_TABLES: &[&str] = &["schema_version", "uploads", "datasets"];

/// Normalise and validate a data table name.
///
/// Accepted names are ASCII letters, digits and underscores, not starting
/// with a digit, and not one of [`RESERVED_TABLES`] or the `sqlite_` prefix.
pub fn validate_table_name(raw: &str) -> Result<String, Rejection> {
  let name = normalize_column_name(raw);
  let well_formed = name
    .chars()
    .next()
    .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
    && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
  if !well_formed {
    return Err(Rejection::InvalidIdentifier(raw.to_owned()));
  }
  if RESERVED_TABLES.contains(&name.as_str()) || name.starts_with("sqlite_") {
    return Err(Rejection::ReservedTable(name));
  }
  Ok(name)
}

/// Always-quoted SQL identifier.
pub fn quote_ident(name: &str) -> String { format!("\"{}\"", name.replace('"', "\"\"")) }

const SQL_KEYWORDS: &[&str] = &[
  "all", "and", "as", "asc", "between", "by", "case", "cast", "column", "create", "date",
  "default", "delete", "desc", "distinct", "drop", "else", "end", "from", "group",
  "having", "in", "index", "insert", "into", "is", "join", "key", "like", "limit", "not",
  "null", "offset", "on", "or", "order", "select", "set", "table", "then", "to", "union",
  "update", "values", "when", "where",
];

/// Identifier quoted only when it has to be, for SQL meant to be read.
pub fn sql_ident(name: &str) -> String {
  let plain = name
    .chars()
    .next()
    .is_some_and(|c| c.is_ascii_lowercase() || c == '_')
    && name
      .chars()
      .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    && !SQL_KEYWORDS.contains(&name);
  if plain { name.to_owned() } else { quote_ident(name) }
}
