//! Ties the profiler, the completion service and the store together.

use serde::Serialize;

use crate::{
  Rejection,
  profile::{DEFAULT_SAMPLE_SIZE, Summary, summarize},
  store::{DatasetStore, QueryOutcome},
  table::QueryRows,
  translate::{
    Analysis, CompletionRequest, Dashboard, QueryPlan, TextCompletion, analysis_prompt,
    fallback_analysis, fallback_plan_for_schema, guard_sql, parse_embedded, query_prompt,
  },
};

/// Default cap on rows fetched for a chart.
pub const DEFAULT_CHART_ROW_LIMIT: usize = 1_000;

/// Overview of a table: its profile plus the service's (or the fallback's)
/// reading of it.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
  pub summary:       Summary,
  #[serde(flatten)]
  pub analysis:      Analysis,
  pub fallback_used: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum QueryAnswer {
  Answered {
    sql:           String,
    #[serde(serialize_with = "serialize_rows")]
    rows:          QueryRows,
    dashboard:     Dashboard,
    fallback_used: bool,
  },
  /// The generated SQL was refused or the table is unknown. Nothing ran.
  Rejected {
    sql:    Option<String>,
    #[serde(serialize_with = "serialize_display")]
    reason: Rejection,
  },
}

fn serialize_rows<S: serde::Serializer>(rows: &QueryRows, serializer: S) -> Result<S::Ok, S::Error> {
  rows.records().serialize(serializer)
}

fn serialize_display<S: serde::Serializer>(
  value: &Rejection,
  serializer: S,
) -> Result<S::Ok, S::Error> {
  serializer.collect_str(value)
}

pub struct Analyst<S, C> {
  store:           S,
  completion:      C,
  table:           String,
  sample_size:     usize,
  chart_row_limit: usize,
}

impl<S: DatasetStore, C: TextCompletion> Analyst<S, C> {
  pub fn new(store: S, completion: C, table: impl Into<String>) -> Self {
    Self {
      store,
      completion,
      table: table.into(),
      sample_size: DEFAULT_SAMPLE_SIZE,
      chart_row_limit: DEFAULT_CHART_ROW_LIMIT,
    }
  }

  pub fn with_sample_size(mut self, sample_size: usize) -> Self {
    self.sample_size = sample_size;
    self
  }

  pub fn with_chart_row_limit(mut self, limit: usize) -> Self {
    self.chart_row_limit = limit;
    self
  }

  pub fn table(&self) -> &str { &self.table }

  /// Profile the table and ask the service for insights and dashboards.
  /// Returns `None` if the table does not exist.
  pub async fn analyze(&self) -> Result<Option<AnalysisReport>, S::Error> {
    let Some(summary) = summarize(&self.store, &self.table, Some(self.sample_size)).await? else {
      return Ok(None);
    };

    let request = CompletionRequest { prompt: analysis_prompt(&summary) };
    let parsed = match self.completion.complete(request).await {
      Ok(response) => parse_embedded::<Analysis>(&response.text),
      Err(e) => {
        tracing::warn!(error = %e, "completion service unavailable");
        None
      }
    };
    let fallback_used = parsed.is_none();
    let mut analysis = parsed.unwrap_or_else(|| {
      tracing::warn!(table = %self.table, "using fallback analysis");
      fallback_analysis(&summary)
    });

    for dashboard in &mut analysis.dashboards {
      self.fill(dashboard).await?;
    }

    Ok(Some(AnalysisReport { summary, analysis, fallback_used }))
  }

  /// Translate `question` into SQL, run it and chart the result.
  pub async fn answer(&self, question: &str) -> Result<QueryAnswer, S::Error> {
    let Some(schema) = self.store.table_schema(&self.table).await? else {
      return Ok(QueryAnswer::Rejected {
        sql:    None,
        reason: Rejection::UnknownTable(self.table.clone()),
      });
    };

    let request = CompletionRequest { prompt: query_prompt(&self.table, &schema, question) };
    let parsed = match self.completion.complete(request).await {
      Ok(response) => parse_embedded::<QueryPlan>(&response.text),
      Err(e) => {
        tracing::warn!(error = %e, "completion service unavailable");
        None
      }
    };
    let fallback_used = parsed.is_none();
    let QueryPlan { sql, mut dashboard } = parsed.unwrap_or_else(|| {
      tracing::warn!(table = %self.table, "using fallback query");
      fallback_plan_for_schema(&self.table, &schema)
    });

    if let Err(reason) = guard_sql(&sql) {
      tracing::warn!(%sql, %reason, "refusing generated SQL");
      return Ok(QueryAnswer::Rejected { sql: Some(sql), reason });
    }

    let rows = match self.store.run_query(&sql, self.chart_row_limit).await? {
      QueryOutcome::Rows(rows) => rows,
      QueryOutcome::Rejected(reason) => {
        return Ok(QueryAnswer::Rejected { sql: Some(sql), reason });
      }
    };
    self.fill(&mut dashboard).await?;

    Ok(QueryAnswer::Answered { sql, rows, dashboard, fallback_used })
  }

  async fn fill(&self, dashboard: &mut Dashboard) -> Result<(), S::Error> {
    if dashboard.x.is_empty() {
      return Ok(());
    }
    dashboard.data = self
      .store
      .chart_data(&self.table, &dashboard.x, dashboard.y.as_deref(), self.chart_row_limit)
      .await?;
    Ok(())
  }
}
