//! Dataset profiling.
//!
//! [`summarize`] turns a stored table into a bounded statistical digest: per
//! column type, distinct and missing counts, moments for numeric columns and
//! the mode for categorical ones, plus a handful of derived facts for columns
//! whose names suggest a known role (a sales figure, a grouping label, a
//! yes/no flag, a date). Only the first `sample_size` rows are scanned.
//!
//! The profiler never mutates the store. Values that cannot be read as the
//! type a statistic needs are skipped for that statistic only.

use std::collections::{HashMap, HashSet};

use serde::{Serialize, Serializer, ser::SerializeMap};

use crate::{
  store::DatasetStore,
  table::{CellValue, ColumnKind, QueryRows, TableSchema},
};

/// Rows scanned when the caller does not choose a sample size.
pub const DEFAULT_SAMPLE_SIZE: usize = 10_000;

// ─── Summary ─────────────────────────────────────────────────────────────────

/// Read-only statistical digest of a data table. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
  #[serde(skip)]
  pub table:         String,
  /// Rows in the whole table, not just the sample.
  pub num_rows:      u64,
  pub num_columns:   usize,
  pub sampled_rows:  usize,
  #[serde(serialize_with = "columns_as_map")]
  pub columns:       Vec<ColumnProfile>,
  pub trends:        Vec<DerivedFact>,
  pub key_takeaways: Vec<DerivedFact>,
}

impl Summary {
  pub fn column(&self, name: &str) -> Option<&ColumnProfile> {
    self.columns.iter().find(|c| c.name == name)
  }

  /// `(name, kind)` pairs in column order.
  pub fn column_kinds(&self) -> Vec<(String, ColumnKind)> {
    self.columns.iter().map(|c| (c.name.clone(), c.kind)).collect()
  }

  pub fn is_empty(&self) -> bool { self.num_rows == 0 || self.sampled_rows == 0 }
}

fn columns_as_map<S: Serializer>(columns: &[ColumnProfile], s: S) -> Result<S::Ok, S::Error> {
  let mut map = s.serialize_map(Some(columns.len()))?;
  for column in columns {
    map.serialize_entry(&column.name, column)?;
  }
  map.end()
}

/// Statistics for one column over the sampled rows.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnProfile {
  #[serde(skip)]
  pub name:           String,
  #[serde(rename = "type")]
  pub kind:           ColumnKind,
  pub unique_values:  usize,
  pub missing_values: usize,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub mean:           Option<f64>,
  /// Population standard deviation.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub std:            Option<f64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub min:            Option<f64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub max:            Option<f64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub top_value:      Option<String>,
}

/// A template-filled sentence and the number it was derived from.
///
/// Serialises as the bare sentence.
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedFact {
  pub statement: String,
  pub basis:     f64,
}

impl DerivedFact {
  fn new(statement: String, basis: f64) -> Self { Self { statement, basis } }
}

impl Serialize for DerivedFact {
  fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&self.statement)
  }
}

// ─── Entry point ─────────────────────────────────────────────────────────────

/// Profile `table`, scanning at most `sample_size` rows
/// ([`DEFAULT_SAMPLE_SIZE`] when `None`). Returns `None` if the table does not
/// exist.
pub async fn summarize<S: DatasetStore>(
  store: &S,
  table: &str,
  sample_size: Option<usize>,
) -> Result<Option<Summary>, S::Error> {
  let Some(schema) = store.table_schema(table).await? else {
    return Ok(None);
  };
  let total = store.row_count(table).await?.unwrap_or(0);
  let limit = sample_size.unwrap_or(DEFAULT_SAMPLE_SIZE);
  let sample = store.sample(table, limit).await?.unwrap_or_default();
  tracing::debug!(table, total, sampled = sample.rows.len(), "profiling table");
  Ok(Some(profile(table, &schema, total, &sample)))
}

/// Pure profiling over an already-read sample.
pub fn profile(table: &str, schema: &TableSchema, total_rows: u64, sample: &QueryRows) -> Summary {
  let positions: Vec<Option<usize>> = schema
    .names()
    .map(|name| sample.columns.iter().position(|c| c == name))
    .collect();

  let columns: Vec<ColumnProfile> = schema
    .columns
    .iter()
    .zip(&positions)
    .map(|(descriptor, pos)| {
      let kind = descriptor.column_type.kind();
      let cells = column_cells(sample, *pos);
      profile_column(&descriptor.name, kind, cells)
    })
    .collect();

  let mut summary = Summary {
    table: table.to_owned(),
    num_rows: total_rows,
    num_columns: schema.len(),
    sampled_rows: sample.rows.len(),
    columns,
    trends: Vec::new(),
    key_takeaways: Vec::new(),
  };

  if summary.is_empty() {
    summary
      .key_takeaways
      .push(DerivedFact::new("The dataset contains no rows.".into(), 0.0));
    return summary;
  }

  let (takeaways, trends) = {
    let roles = Roles::detect(&summary, sample);
    (roles.takeaways(sample), roles.trends(sample))
  };
  summary.key_takeaways = takeaways;
  summary.trends = trends;
  summary
}

fn column_cells(sample: &QueryRows, pos: Option<usize>) -> impl Iterator<Item = &CellValue> {
  static NULL: CellValue = CellValue::Null;
  sample
    .rows
    .iter()
    .map(move |row| pos.and_then(|p| row.get(p)).unwrap_or(&NULL))
}

// ─── Per-column statistics ───────────────────────────────────────────────────

/// Running mean and variance (Welford), plus extremes.
#[derive(Debug, Default)]
struct Moments {
  count: usize,
  mean:  f64,
  m2:    f64,
  min:   f64,
  max:   f64,
}

impl Moments {
  fn push(&mut self, x: f64) {
    if self.count == 0 {
      self.min = x;
      self.max = x;
    } else {
      self.min = self.min.min(x);
      self.max = self.max.max(x);
    }
    self.count += 1;
    let delta = x - self.mean;
    self.mean += delta / self.count as f64;
    self.m2 += delta * (x - self.mean);
  }

  fn present(&self) -> Option<&Self> { (self.count > 0).then_some(self) }

  fn population_std(&self) -> f64 { (self.m2 / self.count as f64).max(0.0).sqrt() }
}

/// Frequency table remembering first-seen order, for scan-order tie breaks.
#[derive(Debug, Default)]
struct Frequencies {
  counts: HashMap<String, (usize, usize)>,
}

impl Frequencies {
  fn push(&mut self, label: String) {
    let next = self.counts.len();
    self.counts.entry(label).or_insert((0, next)).0 += 1;
  }

  /// Most frequent label; ties go to whichever was seen first.
  fn mode(&self) -> Option<(&str, usize)> {
    self
      .counts
      .iter()
      .max_by(|(_, (ca, fa)), (_, (cb, fb))| ca.cmp(cb).then(fb.cmp(fa)))
      .map(|(label, (count, _))| (label.as_str(), *count))
  }

  fn distinct(&self) -> usize { self.counts.len() }
}

fn profile_column<'a>(
  name: &str,
  kind: ColumnKind,
  cells: impl Iterator<Item = &'a CellValue>,
) -> ColumnProfile {
  let mut missing = 0;
  let mut distinct = HashSet::new();
  let mut moments = Moments::default();
  let mut freqs = Frequencies::default();

  for cell in cells {
    if cell.is_missing() {
      missing += 1;
      continue;
    }
    let label = cell.to_string();
    match kind {
      ColumnKind::Numeric => {
        if let Some(x) = cell.as_f64() {
          moments.push(x);
        }
        distinct.insert(label);
      }
      ColumnKind::Categorical => freqs.push(label),
      ColumnKind::Unknown => {
        distinct.insert(label);
      }
    }
  }

  let stats = moments.present();
  ColumnProfile {
    name: name.to_owned(),
    kind,
    unique_values: match kind {
      ColumnKind::Categorical => freqs.distinct(),
      _ => distinct.len(),
    },
    missing_values: missing,
    mean: stats.map(|m| m.mean),
    std: stats.map(Moments::population_std),
    min: stats.map(|m| m.min),
    max: stats.map(|m| m.max),
    top_value: freqs.mode().map(|(label, _)| label.to_owned()),
  }
}

// ─── Derived facts ───────────────────────────────────────────────────────────

const MEASURE_HINTS: &[&str] = &[
  "sales", "revenue", "amount", "price", "total", "quantity", "qty", "profit", "cost",
  "units", "income", "spend",
];
const GROUP_HINTS: &[&str] = &[
  "product", "category", "region", "segment", "type", "customer", "store", "country",
  "city", "department", "brand", "channel",
];
const INDICATOR_HINTS: &[&str] = &[
  "churn", "churned", "flag", "active", "converted", "returned", "is", "has", "fraud",
  "target",
];
const TEMPORAL_HINTS: &[&str] = &[
  "date", "time", "timestamp", "year", "month", "day", "week", "quarter", "period",
];
const POSITIVE_LABELS: &[&str] = &["1", "true", "yes", "y", "t"];
const NEGATIVE_LABELS: &[&str] = &["0", "false", "no", "n", "f"];

fn name_matches(name: &str, hints: &[&str]) -> bool {
  name.split('_').any(|token| hints.contains(&token))
}

/// Column positions (in the sample) for each semantic role that was found.
struct Roles<'a> {
  summary:   &'a Summary,
  measure:   Option<(&'a str, usize)>,
  group:     Option<(&'a str, usize)>,
  indicator: Option<(&'a str, usize)>,
  temporal:  Option<(&'a str, usize)>,
}

impl<'a> Roles<'a> {
  fn detect(summary: &'a Summary, sample: &QueryRows) -> Self {
    let temporal = locate(summary, sample, |c| name_matches(&c.name, TEMPORAL_HINTS));
    let is_temporal = |c: &ColumnProfile| temporal.is_some_and(|(t, _)| t == c.name);

    let measure = locate(summary, sample, |c| {
      c.kind == ColumnKind::Numeric && name_matches(&c.name, MEASURE_HINTS) && !is_temporal(c)
    });
    let group = locate(summary, sample, |c| {
      c.kind == ColumnKind::Categorical && name_matches(&c.name, GROUP_HINTS)
    })
    .or_else(|| {
      locate(summary, sample, |c| c.kind == ColumnKind::Categorical && !is_temporal(c))
    });
    let indicator = locate(summary, sample, |c| {
      c.unique_values == 2
        && (name_matches(&c.name, INDICATOR_HINTS) || binary_labels(sample, &c.name))
    });

    Self { summary, measure, group, indicator, temporal }
  }

  fn takeaways(&self, sample: &QueryRows) -> Vec<DerivedFact> {
    let mut facts = Vec::new();

    if let Some((measure, pos)) = self.measure
      && let Some(profile) = self.summary.column(measure)
      && let Some(mean) = profile.mean
    {
      let (sum, n) = sample
        .rows
        .iter()
        .filter_map(|row| row.get(pos).and_then(CellValue::as_f64))
        .fold((0.0, 0usize), |(s, n), x| (s + x, n + 1));
      facts.push(DerivedFact::new(
        format!("Total {measure} is {} across {n} rows.", format_number(sum)),
        sum,
      ));
      facts.push(DerivedFact::new(
        format!("Average {measure} per row is {}.", format_number(mean)),
        mean,
      ));
    }

    if let Some((group, gpos)) = self.group {
      match self.measure {
        Some((measure, mpos)) => {
          if let Some((label, total)) = top_group_by_sum(sample, gpos, mpos) {
            facts.push(DerivedFact::new(
              format!(
                "{label} leads {group} by {measure} with {}.",
                format_number(total)
              ),
              total,
            ));
          }
        }
        None => {
          if let Some(top) = self.summary.column(group).and_then(|c| c.top_value.as_deref()) {
            let count = sample
              .rows
              .iter()
              .filter(|row| row.get(gpos).is_some_and(|c| c.to_string() == top))
              .count();
            facts.push(DerivedFact::new(
              format!("The most common {group} is {top} ({count} rows)."),
              count as f64,
            ));
          }
        }
      }
    }

    if let Some((indicator, pos)) = self.indicator
      && let Some((positive, share)) = indicator_share(sample, pos)
    {
      facts.push(DerivedFact::new(
        format!("{share:.1}% of rows have {indicator} = {positive}."),
        share,
      ));
    }

    facts
  }

  /// Coarse trend: compare the first and last sampled values of a numeric
  /// column among rows where the temporal column is present. Not a
  /// regression.
  fn trends(&self, sample: &QueryRows) -> Vec<DerivedFact> {
    let Some((temporal, tpos)) = self.temporal else {
      return Vec::new();
    };
    let subject = self.measure.or_else(|| {
      locate(self.summary, sample, |c| {
        c.kind == ColumnKind::Numeric && c.name != temporal
      })
    });
    let Some((measure, mpos)) = subject else {
      return Vec::new();
    };

    let points: Vec<(&CellValue, f64)> = sample
      .rows
      .iter()
      .filter_map(|row| {
        let t = row.get(tpos).filter(|c| !c.is_missing())?;
        let y = row.get(mpos).and_then(CellValue::as_f64)?;
        Some((t, y))
      })
      .collect();
    let (Some((t0, first)), Some((t1, last))) = (points.first(), points.last()) else {
      return Vec::new();
    };
    if points.len() < 2 {
      return Vec::new();
    }

    let change = last - first;
    let movement = if change > 0.0 {
      format!("rose from {} to {}", format_number(*first), format_number(*last))
    } else if change < 0.0 {
      format!("fell from {} to {}", format_number(*first), format_number(*last))
    } else {
      format!("held steady at {}", format_number(*first))
    };
    vec![DerivedFact::new(
      format!("{measure} {movement} between {temporal} {t0} and {t1}."),
      change,
    )]
  }
}

/// First profiled column matching `pred` that is also present in the sample.
fn locate<'a>(
  summary: &'a Summary,
  sample: &QueryRows,
  pred: impl Fn(&ColumnProfile) -> bool,
) -> Option<(&'a str, usize)> {
  summary
    .columns
    .iter()
    .filter(|c| pred(c))
    .find_map(|c| {
      sample
        .columns
        .iter()
        .position(|n| *n == c.name)
        .map(|pos| (c.name.as_str(), pos))
    })
}

fn binary_labels(sample: &QueryRows, column: &str) -> bool {
  let Some(pos) = sample.columns.iter().position(|c| c == column) else {
    return false;
  };
  sample
    .rows
    .iter()
    .filter_map(|row| row.get(pos).filter(|c| !c.is_missing()))
    .all(|c| {
      let label = c.to_string().to_ascii_lowercase();
      POSITIVE_LABELS.contains(&label.as_str()) || NEGATIVE_LABELS.contains(&label.as_str())
    })
}

fn top_group_by_sum(sample: &QueryRows, gpos: usize, mpos: usize) -> Option<(String, f64)> {
  let mut order: Vec<String> = Vec::new();
  let mut sums: HashMap<String, f64> = HashMap::new();
  for row in &sample.rows {
    let (Some(g), Some(y)) = (
      row.get(gpos).filter(|c| !c.is_missing()),
      row.get(mpos).and_then(CellValue::as_f64),
    ) else {
      continue;
    };
    let label = g.to_string();
    if !sums.contains_key(&label) {
      order.push(label.clone());
    }
    *sums.entry(label).or_insert(0.0) += y;
  }
  // Scan order decides ties: only a strictly larger sum displaces the leader.
  order.into_iter().fold(None, |best, label| {
    let total = sums[&label];
    match best {
      Some((_, best_total)) if best_total >= total => best,
      _ => Some((label, total)),
    }
  })
}

/// Share (in percent) of present values equal to the positive label.
fn indicator_share(sample: &QueryRows, pos: usize) -> Option<(String, f64)> {
  let labels: Vec<String> = sample
    .rows
    .iter()
    .filter_map(|row| row.get(pos).filter(|c| !c.is_missing()))
    .map(CellValue::to_string)
    .collect();
  if labels.is_empty() {
    return None;
  }
  let positive = labels
    .iter()
    .find(|l| POSITIVE_LABELS.contains(&l.to_ascii_lowercase().as_str()))
    .or_else(|| labels.first())?
    .clone();
  let hits = labels.iter().filter(|l| **l == positive).count();
  Some((positive, hits as f64 * 100.0 / labels.len() as f64))
}

fn format_number(value: f64) -> String {
  if value.fract() == 0.0 && value.abs() < 1e15 {
    format!("{value:.0}")
  } else {
    format!("{value:.2}")
  }
}
