//! Integration tests for `SqliteStore` against in-memory and on-disk
//! databases.

use tally_core::{
  Rejection,
  page::PageRequest,
  profile::summarize,
  store::{DatasetStore, IngestOutcome, QueryOutcome, UploadRegistry},
  table::{CellValue, ColumnType, RowBatch},
  translate::fallback_plan_for_summary,
  upload::{DeleteMode, IngestMetadata, NewUpload, SourceFormat, UploadMetadata, UploadStatus},
};

use crate::{Error, SqliteStore, schema::MIGRATIONS};

const TABLE: &str = "business_data";

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
}

fn text(s: &str) -> CellValue { CellValue::Text(s.to_owned()) }

fn sales_batch(rows: &[(&str, i64)]) -> Result<RowBatch, Rejection> {
  Ok(RowBatch::new(
    vec!["Region".into(), "Sales".into()],
    rows
      .iter()
      .map(|(region, sales)| vec![text(region), CellValue::Integer(*sales)])
      .collect(),
  ))
}

fn completed(outcome: IngestOutcome) -> tally_core::store::IngestReport {
  match outcome {
    IngestOutcome::Completed(report) => report,
    IngestOutcome::Rejected { reason, .. } => panic!("ingest rejected: {reason}"),
  }
}

async fn object_names(s: &SqliteStore) -> Vec<String> {
  s.conn
    .call(|conn| {
      let mut stmt = conn.prepare("SELECT type || ':' || name FROM sqlite_master ORDER BY 1")?;
      let names = stmt
        .query_map([], |r| r.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
      Ok(names)
    })
    .await
    .unwrap()
}

// ─── Schema ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn ensure_schema_is_idempotent() {
  let s = store().await;
  let latest = MIGRATIONS.last().unwrap().version;
  assert_eq!(s.schema_version().await.unwrap(), latest);
  let before = object_names(&s).await;

  let report = s.ensure_schema().await.unwrap();
  assert_eq!(report.version, latest);
  assert!(report.applied.is_empty());
  assert_eq!(object_names(&s).await, before);
}

#[tokio::test]
async fn migration_tolerates_existing_column() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("tally.db");
  {
    let conn = rusqlite::Connection::open(&path).unwrap();
    conn
      .execute_batch(
        "CREATE TABLE schema_version (version INTEGER PRIMARY KEY, applied_at TEXT NOT NULL);
         INSERT INTO schema_version VALUES (1, '2024-01-01T00:00:00.000000Z');
         CREATE TABLE uploads (
           id INTEGER PRIMARY KEY AUTOINCREMENT,
           filename TEXT NOT NULL,
           filepath TEXT NOT NULL UNIQUE,
           uploaded_at TEXT NOT NULL
         );
         ALTER TABLE uploads ADD COLUMN file_size INTEGER;",
      )
      .unwrap();
  }

  let s = SqliteStore::open(&path).await.unwrap();
  assert_eq!(s.schema_version().await.unwrap(), 4);
  let id = s.insert(NewUpload::new("a.csv", "/data/a.csv")).await.unwrap();
  assert_eq!(s.get(id).await.unwrap().unwrap().status, UploadStatus::Active);
}

#[tokio::test]
async fn failed_migration_aborts_and_keeps_last_version() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("tally.db");
  {
    // An `uploads` table without `uploaded_at` breaks the v3 index.
    let conn = rusqlite::Connection::open(&path).unwrap();
    conn
      .execute_batch(
        "CREATE TABLE uploads (id INTEGER PRIMARY KEY, filename TEXT, filepath TEXT UNIQUE);",
      )
      .unwrap();
  }

  let err = SqliteStore::open(&path).await.err().expect("open should fail");
  assert!(matches!(err, Error::Database(_)));

  let conn = rusqlite::Connection::open(&path).unwrap();
  let version: i64 = conn
    .query_row("SELECT MAX(version) FROM schema_version", [], |r| r.get(0))
    .unwrap();
  assert_eq!(version, 2);
}

// ─── Upload registry ─────────────────────────────────────────────────────────

#[tokio::test]
async fn insert_is_idempotent_per_path() {
  let s = store().await;
  let first = s.insert(NewUpload::new("a.csv", "/data/a.csv")).await.unwrap();
  let second = s.insert(NewUpload::new("renamed.csv", "/data/a.csv")).await.unwrap();
  assert_eq!(first, second);

  let stats = s.stats().await.unwrap();
  assert_eq!(stats.active, 1);
  assert_eq!(stats.deleted, 0);
  assert_eq!(s.get(first).await.unwrap().unwrap().filename, "a.csv");
}

#[tokio::test]
async fn insert_records_size_hash_and_metadata() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("sales.csv");
  std::fs::write(&path, "region,sales\nnorth,10\n").unwrap();

  let ingest = IngestMetadata {
    format:   SourceFormat::Csv,
    encoding: Some("utf-8".into()),
    table:    Some(TABLE.into()),
  };
  let s = store().await;
  let id = s
    .insert(
      NewUpload::new("sales.csv", &path)
        .with_hash("abc123")
        .with_metadata(UploadMetadata::new().with_ingest(&ingest).unwrap()),
    )
    .await
    .unwrap();

  let record = s.get(id).await.unwrap().unwrap();
  assert_eq!(record.file_size, Some(22));
  assert_eq!(record.file_hash.as_deref(), Some("abc123"));
  assert_eq!(record.filepath, path);
  let metadata = record.metadata().unwrap().unwrap();
  assert_eq!(metadata.ingest().unwrap(), Some(ingest));

  assert_eq!(s.stats().await.unwrap().active_bytes, 22);
}

#[tokio::test]
async fn missing_file_has_no_size() {
  let s = store().await;
  let id = s.insert(NewUpload::new("gone.csv", "/nonexistent/gone.csv")).await.unwrap();
  let record = s.get(id).await.unwrap().unwrap();
  assert_eq!(record.file_size, None);
  assert!(record.metadata().unwrap().is_none());
}

#[tokio::test]
async fn soft_then_hard_delete() {
  let s = store().await;
  let id = s.insert(NewUpload::new("a.csv", "/data/a.csv")).await.unwrap();

  assert_eq!(s.delete(id, DeleteMode::Soft).await.unwrap(), 1);
  assert!(s.get(id).await.unwrap().is_none());
  assert_eq!(s.delete(id, DeleteMode::Soft).await.unwrap(), 0);

  let deleted = s.list(UploadStatus::Deleted, 10, 0).await.unwrap();
  assert_eq!(deleted.len(), 1);
  assert_eq!(deleted[0].status, UploadStatus::Deleted);

  // A soft-deleted path still blocks a duplicate row.
  assert_eq!(s.insert(NewUpload::new("a.csv", "/data/a.csv")).await.unwrap(), id);

  assert_eq!(s.delete(id, DeleteMode::Hard).await.unwrap(), 1);
  assert!(s.get(id).await.unwrap().is_none());
  assert!(s.list(UploadStatus::Deleted, 10, 0).await.unwrap().is_empty());
  assert_eq!(s.delete(id, DeleteMode::Hard).await.unwrap(), 0);
}

#[tokio::test]
async fn hard_delete_removes_exactly_one_row() {
  let s = store().await;
  let a = s.insert(NewUpload::new("a.csv", "/data/a.csv")).await.unwrap();
  s.insert(NewUpload::new("b.csv", "/data/b.csv")).await.unwrap();
  s.delete(a, DeleteMode::Hard).await.unwrap();

  let stats = s.stats().await.unwrap();
  assert_eq!(stats.active + stats.deleted, 1);
}

#[tokio::test]
async fn list_is_newest_first_and_paginated() {
  let s = store().await;
  let mut ids = Vec::new();
  for name in ["a", "b", "c"] {
    ids.push(
      s.insert(NewUpload::new(format!("{name}.csv"), format!("/data/{name}.csv")))
        .await
        .unwrap(),
    );
  }

  let first = s.list(UploadStatus::Active, 2, 0).await.unwrap();
  let rest = s.list(UploadStatus::Active, 2, 2).await.unwrap();
  let listed: Vec<i64> = first.iter().chain(&rest).map(|r| r.id).collect();
  assert_eq!(first.len(), 2);
  assert_eq!(listed, vec![ids[2], ids[1], ids[0]]);
}

// ─── Materialisation ─────────────────────────────────────────────────────────

#[tokio::test]
async fn first_batch_fixes_normalised_schema() {
  let s = store().await;
  let batch = RowBatch::new(
    vec!["Region".into(), "Sales Amount".into(), "Discount".into()],
    vec![
      vec![text("north"), CellValue::Integer(10), CellValue::Real(0.5)],
      vec![text("south"), CellValue::Integer(20), CellValue::Null],
    ],
  );
  let report = completed(s.ingest(TABLE, None, vec![Ok(batch)].into_iter()).await.unwrap());
  assert_eq!(report.rows_written, 2);
  assert_eq!(report.indexed_columns, vec!["region".to_owned()]);

  let schema = s.table_schema(TABLE).await.unwrap().unwrap();
  let names: Vec<&str> = schema.names().collect();
  assert_eq!(names, ["region", "sales_amount", "discount"]);
  assert_eq!(schema.columns[0].column_type, ColumnType::Text);
  assert_eq!(schema.columns[1].column_type, ColumnType::Integer);
  assert_eq!(schema.columns[2].column_type, ColumnType::Real);
  assert_eq!(s.row_count(TABLE).await.unwrap(), Some(2));

  let objects = object_names(&s).await;
  assert!(objects.contains(&"index:idx_business_data__0".to_owned()));
}

#[tokio::test]
async fn index_names_do_not_collide_across_tables() {
  let s = store().await;
  let first = RowBatch::new(vec!["b_c".into()], vec![vec![text("x")]]);
  let second = RowBatch::new(vec!["c".into()], vec![vec![text("y")]]);

  let a = completed(s.ingest("a", None, vec![Ok(first)].into_iter()).await.unwrap());
  let a_b = completed(s.ingest("a_b", None, vec![Ok(second)].into_iter()).await.unwrap());
  assert_eq!(a.indexed_columns, ["b_c"]);
  assert_eq!(a_b.indexed_columns, ["c"]);

  let objects = object_names(&s).await;
  assert!(objects.contains(&"index:idx_a__0".to_owned()));
  assert!(objects.contains(&"index:idx_a_b__0".to_owned()));
}

#[tokio::test]
async fn append_with_unseen_column_is_rejected_cleanly() {
  let s = store().await;
  let extra = RowBatch::new(
    vec!["region".into(), "sales".into(), "margin".into()],
    vec![vec![text("east"), CellValue::Integer(5), CellValue::Real(0.1)]],
  );
  let outcome = s
    .ingest(
      TABLE,
      None,
      vec![sales_batch(&[("north", 10), ("south", 20)]), Ok(extra)].into_iter(),
    )
    .await
    .unwrap();

  assert_eq!(
    outcome,
    IngestOutcome::Rejected {
      reason:         Rejection::UnknownColumn("margin".into()),
      batch:          2,
      committed_rows: 2,
    }
  );
  assert_eq!(s.row_count(TABLE).await.unwrap(), Some(2));
  let rows = s.sample(TABLE, 10).await.unwrap().unwrap();
  assert_eq!(rows.rows[1], vec![text("south"), CellValue::Integer(20)]);
}

#[tokio::test]
async fn append_with_incompatible_type_is_rejected() {
  let s = store().await;
  let bad = RowBatch::new(
    vec!["region".into(), "sales".into()],
    vec![vec![text("east"), text("lots")]],
  );
  let outcome = s
    .ingest(TABLE, None, vec![sales_batch(&[("north", 10)]), Ok(bad)].into_iter())
    .await
    .unwrap();
  assert!(matches!(
    outcome,
    IngestOutcome::Rejected { reason: Rejection::IncompatibleType { .. }, batch: 2, .. }
  ));
  assert_eq!(s.row_count(TABLE).await.unwrap(), Some(1));
}

#[tokio::test]
async fn later_batches_may_omit_columns() {
  let s = store().await;
  let partial = RowBatch::new(vec!["sales".into()], vec![vec![CellValue::Integer(7)]]);
  let report = completed(
    s.ingest(TABLE, None, vec![sales_batch(&[("north", 10)]), Ok(partial)].into_iter())
      .await
      .unwrap(),
  );
  assert_eq!(report.batches, 2);
  let rows = s.sample(TABLE, 10).await.unwrap().unwrap();
  assert_eq!(rows.rows[1], vec![CellValue::Null, CellValue::Integer(7)]);
}

#[tokio::test]
async fn decode_failure_mid_stream_keeps_committed_batches() {
  let s = store().await;
  let outcome = s
    .ingest(
      TABLE,
      None,
      vec![
        sales_batch(&[("north", 10)]),
        Err(Rejection::Malformed("line 3: unterminated quote".into())),
      ].into_iter(),
    )
    .await
    .unwrap();
  assert!(matches!(outcome, IngestOutcome::Rejected { batch: 2, committed_rows: 1, .. }));
  assert_eq!(s.row_count(TABLE).await.unwrap(), Some(1));
}

#[tokio::test]
async fn reingest_replaces_table() {
  let s = store().await;
  let batches = vec![sales_batch(&[("north", 10), ("south", 20)])];
  completed(s.ingest(TABLE, None, batches.into_iter()).await.unwrap());
  let other = RowBatch::new(vec!["product".into()], vec![vec![text("widget")]]);
  completed(s.ingest(TABLE, None, vec![Ok(other)].into_iter()).await.unwrap());

  let schema = s.table_schema(TABLE).await.unwrap().unwrap();
  assert_eq!(schema.names().collect::<Vec<_>>(), ["product"]);
  assert_eq!(s.row_count(TABLE).await.unwrap(), Some(1));
  assert_eq!(s.dataset(TABLE).await.unwrap().unwrap().row_count, 1);
}

#[tokio::test]
async fn rejected_first_batch_leaves_previous_table() {
  let s = store().await;
  completed(s.ingest(TABLE, None, vec![sales_batch(&[("north", 10)])].into_iter()).await.unwrap());
  let dup = RowBatch::new(vec!["A".into(), "a".into()], vec![]);
  let outcome = s.ingest(TABLE, None, vec![Ok(dup)].into_iter()).await.unwrap();
  assert!(matches!(
    outcome,
    IngestOutcome::Rejected { reason: Rejection::DuplicateColumn(_), batch: 1, .. }
  ));
  assert_eq!(s.row_count(TABLE).await.unwrap(), Some(1));
}

#[tokio::test]
async fn empty_and_reserved_targets_are_rejected() {
  let s = store().await;
  let nothing = std::iter::empty::<Result<RowBatch, Rejection>>();
  let empty = s.ingest(TABLE, None, nothing).await.unwrap();
  assert_eq!(empty, IngestOutcome::rejected(Rejection::EmptyInput, 0, 0));

  let reserved = s
    .ingest("uploads", None, vec![sales_batch(&[("north", 1)])].into_iter())
    .await
    .unwrap();
  assert!(matches!(
    reserved,
    IngestOutcome::Rejected { reason: Rejection::ReservedTable(_), .. }
  ));
  assert_eq!(s.schema_version().await.unwrap(), 4);
  assert!(s.table_schema("uploads").await.unwrap().is_none());
}

#[tokio::test]
async fn catalogue_tracks_rows_and_source_upload() {
  let s = store().await;
  let upload = s.insert(NewUpload::new("a.csv", "/data/a.csv")).await.unwrap();
  completed(
    s.ingest(
      TABLE,
      Some(upload),
      vec![sales_batch(&[("north", 1), ("south", 2)]), sales_batch(&[("east", 3)])].into_iter(),
    )
    .await
    .unwrap(),
  );

  let entry = s.dataset(TABLE).await.unwrap().unwrap();
  assert_eq!(entry.row_count, 3);
  assert_eq!(entry.upload_id, Some(upload));
  assert_eq!(entry.schema.len(), 2);

  s.delete(upload, DeleteMode::Hard).await.unwrap();
  assert_eq!(s.dataset(TABLE).await.unwrap().unwrap().upload_id, None);
}

// ─── Reads ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn pages_reassemble_the_full_table() {
  let s = store().await;
  let rows: Vec<(String, i64)> = (0..23).map(|i| (format!("r{}", i % 4), i)).collect();
  let rows: Vec<(&str, i64)> = rows.iter().map(|(r, v)| (r.as_str(), *v)).collect();
  let batches: Vec<_> = rows.chunks(8).map(sales_batch).collect();
  completed(s.ingest(TABLE, None, batches.into_iter()).await.unwrap());

  let all = s.sample(TABLE, usize::MAX).await.unwrap().unwrap();
  assert_eq!(all.rows.len(), 23);

  let mut collected = Vec::new();
  let first = s.read_page(TABLE, PageRequest::new(1, 5).unwrap()).await.unwrap().unwrap();
  assert_eq!(first.total_rows, 23);
  assert_eq!(first.total_pages, 5);
  for page in 1..=first.total_pages {
    let p = s.read_page(TABLE, PageRequest::new(page, 5).unwrap()).await.unwrap().unwrap();
    collected.extend(p.rows);
  }
  assert_eq!(collected, all.rows);

  let beyond = s.read_page(TABLE, PageRequest::new(6, 5).unwrap()).await.unwrap().unwrap();
  assert!(beyond.rows.is_empty());
}

#[tokio::test]
async fn reads_of_unknown_tables_are_none() {
  let s = store().await;
  assert!(s.table_schema("nope").await.unwrap().is_none());
  assert!(s.row_count("nope").await.unwrap().is_none());
  assert!(s.sample("nope", 5).await.unwrap().is_none());
  let page = PageRequest::new(1, 5).unwrap();
  assert!(s.read_page("nope", page).await.unwrap().is_none());
  assert!(s.chart_data("nope", "x", None, 5).await.unwrap().is_empty());
}

#[tokio::test]
async fn destructive_sql_is_refused_and_store_unchanged() {
  let s = store().await;
  let batches = vec![sales_batch(&[("north", 10), ("south", 20)])];
  completed(s.ingest(TABLE, None, batches.into_iter()).await.unwrap());

  for sql in [
    "DROP TABLE business_data",
    "DELETE FROM business_data",
    "SELECT 1; DROP TABLE business_data",
  ] {
    let outcome = s.run_query(sql, 100).await.unwrap();
    assert!(matches!(outcome, QueryOutcome::Rejected(Rejection::UnsafeSql(_))), "{sql}");
  }
  // Passes the keyword guard but still writes.
  let outcome = s
    .run_query("REPLACE INTO business_data (region, sales) VALUES ('x', 1)", 100)
    .await
    .unwrap();
  assert!(matches!(outcome, QueryOutcome::Rejected(Rejection::UnsafeSql(_))));

  assert_eq!(s.row_count(TABLE).await.unwrap(), Some(2));
}

#[tokio::test]
async fn queries_return_bounded_rows() {
  let s = store().await;
  completed(
    s.ingest(
      TABLE,
      None,
      vec![sales_batch(&[("north", 10), ("south", 20), ("north", 5)])].into_iter(),
    )
    .await
    .unwrap(),
  );

  let QueryOutcome::Rows(rows) = s
    .run_query("SELECT region, sales FROM business_data ORDER BY sales", 2)
    .await
    .unwrap()
  else {
    panic!("query rejected");
  };
  assert_eq!(rows.columns, ["region", "sales"]);
  assert_eq!(rows.rows.len(), 2);
  assert_eq!(rows.rows[0][1], CellValue::Integer(5));

  let outcome = s.run_query("SELECT nope FROM business_data", 2).await.unwrap();
  assert!(matches!(outcome, QueryOutcome::Rejected(Rejection::InvalidSql(_))));
}

#[tokio::test]
async fn chart_data_groups_and_sums() {
  let s = store().await;
  completed(
    s.ingest(
      TABLE,
      None,
      vec![sales_batch(&[("north", 10), ("south", 20), ("north", 5)])].into_iter(),
    )
    .await
    .unwrap(),
  );

  let mut points = s.chart_data(TABLE, "Region", Some("sales"), 10).await.unwrap();
  points.sort_by(|a, b| a.name.to_string().cmp(&b.name.to_string()));
  assert_eq!(points.len(), 2);
  assert_eq!(points[0].name, text("north"));
  assert_eq!(points[0].value, Some(15.0));

  let counts = s.chart_data(TABLE, "region", None, 10).await.unwrap();
  assert!(counts.iter().any(|p| p.value == Some(2.0)));

  assert!(s.chart_data(TABLE, "region", Some("profit"), 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn fallback_plan_runs_against_the_store() {
  let s = store().await;
  completed(
    s.ingest(
      TABLE,
      None,
      vec![sales_batch(&[("north", 10), ("south", 20), ("north", 5)])].into_iter(),
    )
    .await
    .unwrap(),
  );
  let summary = summarize(&s, TABLE, None).await.unwrap().unwrap();
  let plan = fallback_plan_for_summary(&summary);
  assert!(plan.sql.contains("GROUP BY region"));

  let QueryOutcome::Rows(rows) = s.run_query(&plan.sql, 100).await.unwrap() else {
    panic!("fallback SQL rejected");
  };
  assert_eq!(rows.rows.len(), 2);
}

#[tokio::test]
async fn fallback_plan_survives_punctuated_headers() {
  let s = store().await;
  let batch = RowBatch::new(
    vec!["Region".into(), "Units".into(), "Unit-Price".into()],
    vec![
      vec![text("north"), CellValue::Integer(2), CellValue::Real(1.5)],
      vec![text("south"), CellValue::Integer(1), CellValue::Real(4.0)],
      vec![text("north"), CellValue::Integer(3), CellValue::Real(2.5)],
    ],
  );
  completed(s.ingest(TABLE, None, vec![Ok(batch)].into_iter()).await.unwrap());

  let summary = summarize(&s, TABLE, None).await.unwrap().unwrap();
  let plan = fallback_plan_for_summary(&summary);
  assert_eq!(plan.dashboard.y.as_deref(), Some("unit-price"));

  match s.run_query(&plan.sql, 100).await.unwrap() {
    QueryOutcome::Rows(rows) => {
      assert_eq!(rows.columns, ["region", "total_unit-price"]);
      assert_eq!(rows.rows.len(), 2);
    }
    QueryOutcome::Rejected(reason) => panic!("fallback SQL rejected: {reason}"),
  }
}

#[tokio::test]
async fn rowid_header_keeps_insertion_order() {
  let s = store().await;
  let batch = RowBatch::new(
    vec!["rowid".into(), "sales".into()],
    vec![
      vec![CellValue::Integer(3), CellValue::Integer(100)],
      vec![CellValue::Integer(2), CellValue::Integer(200)],
      vec![CellValue::Integer(1), CellValue::Integer(300)],
    ],
  );
  completed(s.ingest(TABLE, None, vec![Ok(batch)].into_iter()).await.unwrap());

  let sample = s.sample(TABLE, 10).await.unwrap().unwrap();
  assert_eq!(sample.columns, ["rowid_1", "sales"]);
  let sales: Vec<&CellValue> = sample.rows.iter().map(|r| &r[1]).collect();
  assert_eq!(
    sales,
    [&CellValue::Integer(100), &CellValue::Integer(200), &CellValue::Integer(300)]
  );

  let page = s.read_page(TABLE, PageRequest::new(1, 2).unwrap()).await.unwrap().unwrap();
  assert_eq!(page.rows[0][0], CellValue::Integer(3));
}

#[tokio::test]
async fn summary_reads_from_store() {
  let s = store().await;
  let batch = RowBatch::new(
    vec!["score".into(), "note".into()],
    vec![
      vec![CellValue::Integer(10), text("a")],
      vec![CellValue::Integer(20), CellValue::Null],
      vec![CellValue::Integer(30), text("a")],
    ],
  );
  completed(s.ingest(TABLE, None, vec![Ok(batch)].into_iter()).await.unwrap());

  let summary = summarize(&s, TABLE, Some(2)).await.unwrap().unwrap();
  assert_eq!(summary.num_rows, 3);
  assert_eq!(summary.sampled_rows, 2);

  let summary = summarize(&s, TABLE, None).await.unwrap().unwrap();
  let score = summary.column("score").unwrap();
  assert_eq!(score.mean, Some(20.0));
  assert_eq!(score.min, Some(10.0));
  assert_eq!(score.max, Some(30.0));
  assert_eq!(score.missing_values, 0);
  assert_eq!(summary.column("note").unwrap().missing_values, 1);
}

#[tokio::test]
async fn data_survives_reopen() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("tally.db");

  let s = SqliteStore::open(&path).await.unwrap();
  let batches = vec![sales_batch(&[("north", 10)])];
  completed(s.ingest(TABLE, None, batches.into_iter()).await.unwrap());
  s.close().await.unwrap();

  let s = SqliteStore::open(&path).await.unwrap();
  assert_eq!(s.row_count(TABLE).await.unwrap(), Some(1));
  assert!(s.ensure_schema().await.unwrap().applied.is_empty());
}
