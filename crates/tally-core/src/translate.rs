//! Boundary with the external text-completion service.
//!
//! The service is a black box: it receives a prompt and returns free text
//! that is expected, but not guaranteed, to contain one JSON object. This
//! module builds the prompts, pulls the first balanced `{...}` out of the
//! reply, and supplies deterministic fallbacks when that fails. It also owns
//! the keyword guard applied to any SQL before it reaches the store.

use std::future::Future;

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use thiserror::Error;

use crate::{
  Rejection,
  profile::Summary,
  table::{ChartPoint, ColumnKind, TableSchema, sql_ident},
};

// ─── Service contract ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionRequest {
  pub prompt: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionResponse {
  pub text: String,
}

/// The service could not be reached or returned something unusable.
#[derive(Debug, Error)]
#[error("text completion failed: {0}")]
pub struct CompletionError(pub String);

/// A text-completion service: one request in, one response out.
pub trait TextCompletion: Send + Sync {
  fn complete(
    &self,
    request: CompletionRequest,
  ) -> impl Future<Output = Result<CompletionResponse, CompletionError>> + Send + '_;
}

// ─── Response shapes ─────────────────────────────────────────────────────────

/// A suggested chart: `x` grouped, `y` summed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dashboard {
  #[serde(rename = "type", default = "default_chart")]
  pub chart: String,
  pub x:     String,
  /// `None` charts row counts per `x`.
  #[serde(default)]
  pub y:     Option<String>,
  #[serde(default)]
  pub title: String,
  #[serde(default)]
  pub data:  Vec<ChartPoint>,
}

fn default_chart() -> String { "bar".to_owned() }

/// Reply to a question: the SQL that answers it and a chart for the result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryPlan {
  pub sql:       String,
  pub dashboard: Dashboard,
}

/// Reply to a dataset overview request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
  pub insights:   String,
  #[serde(default)]
  pub dashboards: Vec<Dashboard>,
}

// ─── Extraction ──────────────────────────────────────────────────────────────

/// The first balanced brace-delimited substring of `text`.
///
/// Braces inside JSON string literals (including escaped quotes) do not count
/// toward the depth. Returns `None` if no object closes.
pub fn extract_json_object(text: &str) -> Option<&str> {
  let start = text.find('{')?;
  let mut depth = 0usize;
  let mut in_string = false;
  let mut escaped = false;

  for (offset, ch) in text[start..].char_indices() {
    if in_string {
      match ch {
        _ if escaped => escaped = false,
        '\\' => escaped = true,
        '"' => in_string = false,
        _ => {}
      }
      continue;
    }
    match ch {
      '"' => in_string = true,
      '{' => depth += 1,
      '}' => {
        depth -= 1;
        if depth == 0 {
          return Some(&text[start..start + offset + 1]);
        }
      }
      _ => {}
    }
  }
  None
}

/// Extract and deserialize the embedded JSON object, if there is a usable one.
pub fn parse_embedded<T: DeserializeOwned>(text: &str) -> Option<T> {
  let Some(json) = extract_json_object(text) else {
    tracing::warn!("no JSON object found in completion");
    return None;
  };
  serde_json::from_str(json)
    .inspect_err(|e| tracing::warn!(error = %e, "completion JSON did not parse"))
    .ok()
}

// ─── Prompts ─────────────────────────────────────────────────────────────────

pub fn query_prompt(table: &str, schema: &TableSchema, question: &str) -> String {
  let columns = schema
    .columns
    .iter()
    .map(|c| format!("{} ({})", c.name, c.column_type.declared_type()))
    .collect::<Vec<_>>()
    .join(", ");
  format!(
    "You are an analyst for the SQLite table '{table}' with columns: {columns}.\n\
     For the question \"{question}\":\n\
     1. Write one read-only SQL query that answers it.\n\
     2. Suggest a dashboard as {{\"type\": \"bar\", \"x\": column, \"y\": column, \"title\": text}}.\n\
     Return only a JSON object of the form {{\"sql\": \"...\", \"dashboard\": {{...}}}}."
  )
}

pub fn analysis_prompt(summary: &Summary) -> String {
  let digest = serde_json::to_string_pretty(summary).unwrap_or_default();
  format!(
    "You are an analyst. The table '{table}' has {rows} rows; this statistical \
     profile covers the first {sampled}:\n{digest}\n\
     Provide key insights (totals, trends, top values) and suggest dashboards.\n\
     Return only a JSON object of the form \
     {{\"insights\": \"text\", \"dashboards\": [{{\"type\", \"x\", \"y\", \"title\"}}]}}.",
    table = summary.table,
    rows = summary.num_rows,
    sampled = summary.sampled_rows,
  )
}

// ─── Fallbacks ───────────────────────────────────────────────────────────────

/// Deterministic plan used when the service's reply is missing or unusable:
/// the first categorical column grouped by the second numeric column (or the
/// first, when there is only one).
pub fn fallback_plan(table: &str, columns: &[(String, ColumnKind)]) -> QueryPlan {
  let of_kind = |kind| {
    columns
      .iter()
      .filter(move |(_, k)| *k == kind)
      .map(|(n, _)| n.as_str())
  };
  let numeric: Vec<&str> = of_kind(ColumnKind::Numeric).collect();
  let x = of_kind(ColumnKind::Categorical)
    .next()
    .or_else(|| columns.first().map(|(n, _)| n.as_str()));
  let y = numeric.get(1).or(numeric.first()).copied();
  let from = sql_ident(table);

  let Some(x) = x else {
    return QueryPlan {
      sql:       format!("SELECT COUNT(*) AS row_count FROM {from}"),
      dashboard: Dashboard {
        chart: default_chart(),
        x:     String::new(),
        y:     None,
        title: "Row count".into(),
        data:  Vec::new(),
      },
    };
  };

  let (sql, title) = match y {
    Some(y) => (
      format!(
        "SELECT {gx}, SUM({gy}) AS {total} FROM {from} GROUP BY {gx}",
        gx = sql_ident(x),
        gy = sql_ident(y),
        total = sql_ident(&format!("total_{y}")),
      ),
      format!("{} by {}", capitalize(y), capitalize(x)),
    ),
    None => (
      format!(
        "SELECT {gx}, COUNT(*) AS row_count FROM {from} GROUP BY {gx}",
        gx = sql_ident(x),
      ),
      format!("Rows by {}", capitalize(x)),
    ),
  };

  QueryPlan {
    sql,
    dashboard: Dashboard {
      chart: default_chart(),
      x: x.to_owned(),
      y: y.map(str::to_owned),
      title,
      data: Vec::new(),
    },
  }
}

pub fn fallback_plan_for_schema(table: &str, schema: &TableSchema) -> QueryPlan {
  fallback_plan(table, &schema.column_kinds())
}

pub fn fallback_plan_for_summary(summary: &Summary) -> QueryPlan {
  fallback_plan(&summary.table, &summary.column_kinds())
}

/// Overview assembled from the profile alone.
pub fn fallback_analysis(summary: &Summary) -> Analysis {
  let insights = summary
    .key_takeaways
    .iter()
    .chain(&summary.trends)
    .map(|f| f.statement.as_str())
    .collect::<Vec<_>>()
    .join(" ");
  let insights = if insights.is_empty() {
    format!(
      "The table has {} rows across {} columns.",
      summary.num_rows, summary.num_columns
    )
  } else {
    insights
  };
  let plan = fallback_plan_for_summary(summary);
  let dashboards = if plan.dashboard.x.is_empty() { Vec::new() } else { vec![plan.dashboard] };
  Analysis { insights, dashboards }
}

fn capitalize(s: &str) -> String {
  let lower = s.to_lowercase();
  let mut chars = lower.chars();
  match chars.next() {
    Some(first) => first.to_uppercase().chain(chars).collect(),
    None => String::new(),
  }
}

// ─── SQL guard ───────────────────────────────────────────────────────────────

/// Keywords that never appear in a read-only query.
const DESTRUCTIVE_KEYWORDS: &[&str] = &[
  "DROP", "DELETE", "TRUNCATE", "ALTER", "UPDATE", "INSERT", "CREATE", "ATTACH", "DETACH",
  "PRAGMA", "VACUUM", "REINDEX",
];

/// Refuse SQL containing a destructive keyword or more than one statement.
///
/// This is a word-level denylist meant to stop accidental destructive output
/// from the completion service. It is not an injection-proof parser.
pub fn guard_sql(sql: &str) -> Result<(), Rejection> {
  let trimmed = sql.trim().trim_end_matches(';').trim_end();
  if trimmed.is_empty() {
    return Err(Rejection::UnsafeSql("empty statement".into()));
  }
  if trimmed.contains(';') {
    return Err(Rejection::UnsafeSql("multiple statements".into()));
  }
  let upper = trimmed.to_ascii_uppercase();
  if let Some(keyword) = upper
    .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
    .find(|word| DESTRUCTIVE_KEYWORDS.contains(word))
  {
    return Err(Rejection::UnsafeSql(format!("contains {keyword}")));
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    profile::profile,
    table::{CellValue, ColumnDescriptor, ColumnType, QueryRows},
  };

  #[test]
  fn extracts_first_balanced_object() {
    let text = "Sure! Here you go:\n```json\n{\"sql\": \"SELECT 1\", \"dashboard\": {\"x\": \"a\"}}\n```\nAnd {\"more\": 1}";
    assert_eq!(
      extract_json_object(text),
      Some("{\"sql\": \"SELECT 1\", \"dashboard\": {\"x\": \"a\"}}")
    );
  }

  #[test]
  fn braces_inside_strings_are_ignored() {
    let text = r#"{"insights": "use {curly} \"quotes\" }", "dashboards": []} trailing }"#;
    assert_eq!(
      extract_json_object(text),
      Some(r#"{"insights": "use {curly} \"quotes\" }", "dashboards": []}"#)
    );
  }

  #[test]
  fn unbalanced_text_yields_none() {
    assert_eq!(extract_json_object("no json here"), None);
    assert_eq!(extract_json_object("{\"sql\": \"SELECT 1\""), None);
  }

  #[test]
  fn parse_embedded_rejects_wrong_shape() {
    assert!(parse_embedded::<QueryPlan>("{\"answer\": 42}").is_none());
    let plan: QueryPlan = parse_embedded(
      "{\"sql\": \"SELECT region FROM t\", \"dashboard\": {\"type\": \"line\", \"x\": \"region\", \"y\": \"sales\"}}",
    )
    .unwrap();
    assert_eq!(plan.dashboard.chart, "line");
    assert_eq!(plan.dashboard.y.as_deref(), Some("sales"));
  }

  fn region_sales_summary() -> Summary {
    let schema = TableSchema::new(vec![
      ColumnDescriptor { name: "region".into(), column_type: ColumnType::Text },
      ColumnDescriptor { name: "sales".into(), column_type: ColumnType::Integer },
    ]);
    let sample = QueryRows {
      columns: vec!["region".into(), "sales".into()],
      rows:    vec![
        vec![CellValue::Text("north".into()), CellValue::Integer(10)],
        vec![CellValue::Text("south".into()), CellValue::Integer(20)],
      ],
    };
    profile("business_data", &schema, 2, &sample)
  }

  #[test]
  fn fallback_groups_first_categorical_by_numeric() {
    let summary = region_sales_summary();
    let malformed = "I think the answer is {sql: SELECT";
    let plan = parse_embedded::<QueryPlan>(malformed)
      .unwrap_or_else(|| fallback_plan_for_summary(&summary));
    assert_eq!(
      plan.sql,
      "SELECT region, SUM(sales) AS total_sales FROM business_data GROUP BY region"
    );
    assert_eq!(plan.dashboard.x, "region");
    assert_eq!(plan.dashboard.y.as_deref(), Some("sales"));
    assert_eq!(plan.dashboard.title, "Sales by Region");
  }

  #[test]
  fn fallback_prefers_second_numeric_column() {
    let columns = vec![
      ("units".to_owned(), ColumnKind::Numeric),
      ("region".to_owned(), ColumnKind::Categorical),
      ("revenue".to_owned(), ColumnKind::Numeric),
    ];
    let plan = fallback_plan("t", &columns);
    assert!(plan.sql.contains("SUM(revenue)"));
    assert!(plan.sql.ends_with("GROUP BY region"));
  }

  #[test]
  fn fallback_quotes_punctuated_names_and_aliases() {
    let columns = vec![
      ("region".to_owned(), ColumnKind::Categorical),
      ("unit-price".to_owned(), ColumnKind::Numeric),
    ];
    let plan = fallback_plan("t", &columns);
    assert_eq!(
      plan.sql,
      r#"SELECT region, SUM("unit-price") AS "total_unit-price" FROM t GROUP BY region"#
    );
    assert!(guard_sql(&plan.sql).is_ok());
  }

  #[test]
  fn fallback_without_numeric_counts_rows() {
    let plan = fallback_plan("t", &[("region".to_owned(), ColumnKind::Categorical)]);
    assert_eq!(plan.sql, "SELECT region, COUNT(*) AS row_count FROM t GROUP BY region");
    assert!(plan.dashboard.y.is_none());

    let plan = fallback_plan("t", &[]);
    assert_eq!(plan.sql, "SELECT COUNT(*) AS row_count FROM t");
  }

  #[test]
  fn fallback_analysis_uses_takeaways() {
    let analysis = fallback_analysis(&region_sales_summary());
    assert_eq!(analysis.dashboards.len(), 1);
    assert!(analysis.insights.contains("leads region"));
  }

  #[test]
  fn guard_rejects_destructive_statements() {
    for sql in [
      "DROP TABLE business_data",
      "delete from business_data where 1 = 1",
      "SELECT * FROM t; DROP TABLE t",
      "  ",
      "UPDATE t SET a = 1",
    ] {
      assert!(guard_sql(sql).is_err(), "{sql} should be rejected");
    }
  }

  #[test]
  fn guard_allows_reads_with_similar_words() {
    guard_sql("SELECT dropped_at, deleted FROM t WHERE status = 'updated';").unwrap();
    guard_sql("SELECT region, SUM(sales) FROM t GROUP BY region").unwrap();
  }
}
