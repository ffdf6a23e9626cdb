//! Decoding uploaded files into lazy sequences of row batches.
//!
//! CSV and TSV are streamed record by record. JSON (an array of objects or
//! one object per line) is parsed whole, since its column set is the union of
//! every record's keys. Text encoding is sniffed from the head of the file:
//! UTF-8 when it decodes cleanly, windows-1252 otherwise.

use std::{
  fs::File,
  io::{self, Read},
  path::Path,
};

use anyhow::Context as _;
use encoding_rs::{Encoding, UTF_8, WINDOWS_1252};
use encoding_rs_io::DecodeReaderBytesBuilder;
use tally_core::{
  Rejection,
  store::BatchSource,
  table::{CellValue, RowBatch},
  upload::SourceFormat,
};
use tokio::{sync::mpsc, task::JoinHandle};

/// Bytes inspected when guessing a file's text encoding.
const SNIFF_BYTES: u64 = 10_000;

pub type Batches = Box<dyn Iterator<Item = Result<RowBatch, Rejection>> + Send>;

pub struct Decoded {
  pub encoding: &'static Encoding,
  pub batches:  Batches,
}

/// Supported source format for `path`, judged by extension.
pub fn detect_format(path: &Path) -> Result<SourceFormat, Rejection> {
  let unsupported = || {
    Rejection::UnsupportedFormat(
      path
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_else(|| "no extension".into()),
    )
  };
  match SourceFormat::from_path(path) {
    Some(format @ (SourceFormat::Csv | SourceFormat::Tsv | SourceFormat::Json)) => Ok(format),
    Some(SourceFormat::Xlsx | SourceFormat::Parquet) | None => Err(unsupported()),
  }
}

/// Open `path` for decoding in chunks of `batch_size` rows.
///
/// I/O failures are errors. Content problems (bad headers, malformed
/// records, invalid JSON) surface as `Err` items of the returned batches.
pub fn open(path: &Path, format: SourceFormat, batch_size: usize) -> anyhow::Result<Decoded> {
  let batch_size = batch_size.max(1);
  let encoding = sniff_encoding(path)?;
  let file = File::open(path).with_context(|| format!("failed to open {path:?}"))?;
  let reader = DecodeReaderBytesBuilder::new()
    .encoding(Some(encoding))
    .strip_bom(true)
    .build(file);

  let batches: Batches = match format {
    SourceFormat::Csv | SourceFormat::Tsv => {
      let delimiter = if format == SourceFormat::Tsv { b'\t' } else { b',' };
      let reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .delimiter(delimiter)
        .double_quote(true)
        .flexible(false)
        .from_reader(reader);
      Box::new(CsvBatches::new(reader, batch_size))
    }
    SourceFormat::Json => {
      Box::new(std::iter::once_with(move || json_batches(reader, batch_size)).flatten())
    }
    SourceFormat::Xlsx | SourceFormat::Parquet => {
      return Err(Rejection::UnsupportedFormat(format.to_string()).into());
    }
  };

  tracing::debug!(?path, %format, encoding = encoding.name(), "decoding upload");
  Ok(Decoded { encoding, batches })
}

fn sniff_encoding(path: &Path) -> anyhow::Result<&'static Encoding> {
  let mut head = Vec::new();
  File::open(path)
    .and_then(|f| f.take(SNIFF_BYTES).read_to_end(&mut head))
    .with_context(|| format!("failed to read {path:?}"))?;
  Ok(guess_encoding(&head))
}

fn guess_encoding(head: &[u8]) -> &'static Encoding {
  if let Some((encoding, _)) = Encoding::for_bom(head) {
    return encoding;
  }
  match std::str::from_utf8(head) {
    Ok(_) => UTF_8,
    // A multi-byte character cut off by the sniff window.
    Err(e) if e.error_len().is_none() => UTF_8,
    Err(_) => WINDOWS_1252,
  }
}

/// Batches decoded on the blocking pool, at most one waiting to be ingested.
pub struct ChannelBatches(mpsc::Receiver<Result<RowBatch, Rejection>>);

impl BatchSource for ChannelBatches {
  async fn next_batch(&mut self) -> Option<Result<RowBatch, Rejection>> { self.0.recv().await }
}

/// Read `batches` on a blocking thread. The task ends when the source is
/// exhausted or the [`ChannelBatches`] side is dropped.
pub fn spawn_decoder(batches: Batches) -> (ChannelBatches, JoinHandle<()>) {
  let (tx, rx) = mpsc::channel(1);
  let task = tokio::task::spawn_blocking(move || {
    for batch in batches {
      if tx.blocking_send(batch).is_err() {
        tracing::debug!("ingest stopped early; decoder exiting");
        break;
      }
    }
  });
  (ChannelBatches(rx), task)
}

fn malformed(e: impl std::fmt::Display) -> Rejection { Rejection::Malformed(e.to_string()) }

// ─── CSV ─────────────────────────────────────────────────────────────────────

struct CsvBatches<R> {
  reader:     csv::Reader<R>,
  columns:    Option<Vec<String>>,
  batch_size: usize,
  yielded:    bool,
  done:       bool,
}

impl<R: io::Read> CsvBatches<R> {
  fn new(reader: csv::Reader<R>, batch_size: usize) -> Self {
    Self { reader, columns: None, batch_size, yielded: false, done: false }
  }

  fn columns(&mut self) -> Result<Vec<String>, Rejection> {
    if let Some(columns) = &self.columns {
      return Ok(columns.clone());
    }
    let columns: Vec<String> =
      self.reader.headers().map_err(malformed)?.iter().map(str::to_owned).collect();
    self.columns = Some(columns.clone());
    Ok(columns)
  }
}

impl<R: io::Read> Iterator for CsvBatches<R> {
  type Item = Result<RowBatch, Rejection>;

  fn next(&mut self) -> Option<Self::Item> {
    if self.done {
      return None;
    }
    let columns = match self.columns() {
      Ok(columns) => columns,
      Err(reason) => {
        self.done = true;
        return Some(Err(reason));
      }
    };

    let mut rows = Vec::new();
    let mut record = csv::StringRecord::new();
    while rows.len() < self.batch_size {
      match self.reader.read_record(&mut record) {
        Ok(true) => rows.push(record.iter().map(CellValue::from_text).collect()),
        Ok(false) => {
          self.done = true;
          break;
        }
        Err(e) => {
          self.done = true;
          return Some(Err(malformed(e)));
        }
      }
    }

    // A header-only file still yields one batch so the table gets created.
    if rows.is_empty() && self.yielded {
      return None;
    }
    self.yielded = true;
    Some(Ok(RowBatch::new(columns, rows)))
  }
}

// ─── JSON ────────────────────────────────────────────────────────────────────

type Record = serde_json::Map<String, serde_json::Value>;

fn json_batches(mut reader: impl Read, batch_size: usize) -> Vec<Result<RowBatch, Rejection>> {
  let mut text = String::new();
  if let Err(e) = reader.read_to_string(&mut text) {
    return vec![Err(malformed(e))];
  }
  let records = match parse_records(&text) {
    Ok(records) => records,
    Err(reason) => return vec![Err(reason)],
  };

  let mut columns: Vec<String> = Vec::new();
  for key in records.iter().flat_map(|r| r.keys()) {
    if !columns.contains(key) {
      columns.push(key.clone());
    }
  }
  let rows: Vec<Vec<CellValue>> = records
    .iter()
    .map(|record| columns.iter().map(|c| json_cell(record.get(c))).collect())
    .collect();

  if rows.is_empty() {
    return vec![Ok(RowBatch::new(columns, rows))];
  }
  let mut rows = rows.into_iter();
  let mut batches = Vec::new();
  loop {
    let chunk: Vec<_> = rows.by_ref().take(batch_size).collect();
    if chunk.is_empty() {
      break;
    }
    batches.push(Ok(RowBatch::new(columns.clone(), chunk)));
  }
  batches
}

/// A top-level array of objects, or newline-delimited objects.
fn parse_records(text: &str) -> Result<Vec<Record>, Rejection> {
  if text.trim_start().starts_with('[') {
    return serde_json::from_str(text).map_err(malformed);
  }
  text
    .lines()
    .enumerate()
    .filter(|(_, line)| !line.trim().is_empty())
    .map(|(idx, line)| {
      serde_json::from_str(line).map_err(|e| Rejection::Malformed(format!("line {}: {e}", idx + 1)))
    })
    .collect()
}

fn json_cell(value: Option<&serde_json::Value>) -> CellValue {
  use serde_json::Value;
  match value {
    None | Some(Value::Null) => CellValue::Null,
    Some(Value::Bool(b)) => CellValue::Integer(i64::from(*b)),
    Some(Value::Number(n)) => match n.as_i64() {
      Some(i) => CellValue::Integer(i),
      None => n.as_f64().map_or(CellValue::Null, CellValue::Real),
    },
    Some(Value::String(s)) if s.trim().is_empty() => CellValue::Null,
    Some(Value::String(s)) => CellValue::Text(s.clone()),
    Some(nested) => CellValue::Text(nested.to_string()),
  }
}
