//! Table materialisation and dataset reads: the [`DatasetStore`] side of
//! [`SqliteStore`].

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension as _, TransactionBehavior};
use tally_core::{
  Rejection,
  page::{PageRequest, RowPage},
  store::{BatchSource, DatasetStore, IngestOutcome, IngestReport, QueryOutcome},
  table::{
    CellValue, ChartPoint, ColumnDescriptor, ColumnType, QueryRows, TableSchema,
    infer_schema, normalize_column_name, quote_ident, validate_table_name,
  },
  translate::guard_sql,
};

use crate::{
  Result, SqliteStore,
  encode::{decode_cell, decode_columns, decode_dt, encode_cell, encode_columns, encode_dt},
};

/// Catalogue entry for a materialised table.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetEntry {
  pub table:      String,
  /// Source upload; cleared when that upload is hard-deleted.
  pub upload_id:  Option<i64>,
  pub schema:     TableSchema,
  pub row_count:  u64,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

// ─── SQL builders ────────────────────────────────────────────────────────────

fn create_table_sql(table: &str, schema: &TableSchema) -> String {
  let columns = schema
    .columns
    .iter()
    .map(|c| format!("{} {}", quote_ident(&c.name), c.column_type.declared_type()))
    .collect::<Vec<_>>()
    .join(", ");
  format!("CREATE TABLE {} ({columns})", quote_ident(table))
}

fn insert_sql(table: &str, schema: &TableSchema) -> String {
  let names = schema.names().map(quote_ident).collect::<Vec<_>>().join(", ");
  let slots = (1..=schema.len()).map(|i| format!("?{i}")).collect::<Vec<_>>().join(", ");
  format!("INSERT INTO {} ({names}) VALUES ({slots})", quote_ident(table))
}

/// Index names share one namespace across tables. The digits after the last
/// `__` are the column ordinal, so `idx_{table}__{ordinal}` is unique.
fn index_sql(table: &str, ordinal: usize, column: &str) -> String {
  format!(
    "CREATE INDEX {} ON {} ({})",
    quote_ident(&format!("idx_{table}__{ordinal}")),
    quote_ident(table),
    quote_ident(column),
  )
}

fn insert_rows(
  tx: &rusqlite::Transaction<'_>,
  sql: &str,
  rows: &[Vec<CellValue>],
) -> rusqlite::Result<u64> {
  let mut stmt = tx.prepare_cached(sql)?;
  for row in rows {
    stmt.execute(rusqlite::params_from_iter(row.iter().map(encode_cell)))?;
  }
  Ok(rows.len() as u64)
}

fn table_exists(conn: &rusqlite::Connection, table: &str) -> rusqlite::Result<bool> {
  Ok(
    conn
      .query_row(
        "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [table],
        |_| Ok(()),
      )
      .optional()?
      .is_some(),
  )
}

fn count_rows(conn: &rusqlite::Connection, table: &str) -> rusqlite::Result<u64> {
  let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {}", quote_ident(table)), [], |r| {
    r.get(0)
  })?;
  Ok(u64::try_from(n).unwrap_or(0))
}

/// Read up to `max_rows` rows of an already-prepared statement.
fn collect_rows(
  stmt: &mut rusqlite::Statement<'_>,
  params: impl rusqlite::Params,
  max_rows: usize,
) -> rusqlite::Result<QueryRows> {
  let columns: Vec<String> = stmt.column_names().into_iter().map(str::to_owned).collect();
  let width = columns.len();
  let mut rows = stmt.query(params)?;
  let mut out = Vec::new();
  while out.len() < max_rows {
    let Some(row) = rows.next()? else { break };
    let cells = (0..width)
      .map(|i| row.get_ref(i).map(decode_cell))
      .collect::<rusqlite::Result<Vec<_>>>()?;
    out.push(cells);
  }
  Ok(QueryRows { columns, rows: out })
}

/// Data tables are addressed by their normalised name; store-owned tables
/// are never readable through the dataset API.
fn data_table(table: &str) -> Option<String> { validate_table_name(table).ok() }

fn sql_limit(n: impl TryInto<i64>) -> i64 { n.try_into().unwrap_or(i64::MAX) }

// ─── Writes ──────────────────────────────────────────────────────────────────

impl SqliteStore {
  /// Replace `table` with a fresh one holding `rows`, index its text columns
  /// and record it in the catalogue, all in one transaction. Returns the
  /// indexed column names.
  async fn create_table(
    &self,
    table: &str,
    schema: &TableSchema,
    upload_id: Option<i64>,
    rows: Vec<Vec<CellValue>>,
  ) -> Result<Vec<String>> {
    let table = table.to_owned();
    let ddl = create_table_sql(&table, schema);
    let insert = insert_sql(&table, schema);
    let indexes: Vec<(String, String)> = schema
      .columns
      .iter()
      .enumerate()
      .filter(|(_, c)| c.column_type == ColumnType::Text)
      .map(|(ordinal, c)| (c.name.clone(), index_sql(&table, ordinal, &c.name)))
      .collect();
    let columns_json = encode_columns(schema)?;
    let now = encode_dt(Utc::now());

    let indexed = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute_batch(&format!("DROP TABLE IF EXISTS {}", quote_ident(&table)))?;
        tx.execute_batch(&ddl)?;
        let written = insert_rows(&tx, &insert, &rows)?;
        for (_, sql) in &indexes {
          tx.execute_batch(sql)?;
        }
        tx.execute(
          "INSERT INTO datasets (table_name, upload_id, columns_json, row_count, created_at, updated_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?5)
           ON CONFLICT (table_name) DO UPDATE SET
             upload_id    = excluded.upload_id,
             columns_json = excluded.columns_json,
             row_count    = excluded.row_count,
             created_at   = excluded.created_at,
             updated_at   = excluded.updated_at",
          rusqlite::params![table, upload_id, columns_json, sql_limit(written), now],
        )?;
        tx.commit()?;
        Ok(indexes.into_iter().map(|(column, _)| column).collect())
      })
      .await?;
    Ok(indexed)
  }

  async fn append_rows(
    &self,
    table: &str,
    schema: &TableSchema,
    rows: Vec<Vec<CellValue>>,
  ) -> Result<()> {
    let table = table.to_owned();
    let insert = insert_sql(&table, schema);
    let now = encode_dt(Utc::now());

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let written = insert_rows(&tx, &insert, &rows)?;
        tx.execute(
          "UPDATE datasets SET row_count = row_count + ?1, updated_at = ?2 WHERE table_name = ?3",
          rusqlite::params![sql_limit(written), now, table],
        )?;
        tx.commit()?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Catalogue entry for `table`, if it has been materialised.
  pub async fn dataset(&self, table: &str) -> Result<Option<DatasetEntry>> {
    let Some(table) = data_table(table) else {
      return Ok(None);
    };

    type Raw = (String, Option<i64>, String, i64, String, String);
    let raw: Option<Raw> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT table_name, upload_id, columns_json, row_count, created_at, updated_at
               FROM datasets WHERE table_name = ?1",
              [table],
              |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?, r.get(5)?)),
            )
            .optional()?,
        )
      })
      .await?;

    raw
      .map(|(table, upload_id, columns, row_count, created_at, updated_at)| -> Result<_> {
        Ok(DatasetEntry {
          table,
          upload_id,
          schema: decode_columns(&columns)?,
          row_count: u64::try_from(row_count).unwrap_or(0),
          created_at: decode_dt(&created_at)?,
          updated_at: decode_dt(&updated_at)?,
        })
      })
      .transpose()
  }
}

// ─── DatasetStore impl ───────────────────────────────────────────────────────

impl DatasetStore for SqliteStore {
  type Error = crate::Error;

  async fn ingest<'a, B>(
    &'a self,
    table: &'a str,
    upload_id: Option<i64>,
    mut batches: B,
  ) -> Result<IngestOutcome>
  where
    B: BatchSource + 'a,
  {
    let name = match validate_table_name(table) {
      Ok(name) => name,
      Err(reason) => return Ok(IngestOutcome::rejected(reason, 0, 0)),
    };

    let mut schema: Option<TableSchema> = None;
    let mut indexed_columns = Vec::new();
    let mut rows_written = 0u64;
    let mut batches_written = 0u64;

    while let Some(batch) = batches.next_batch().await {
      let position = batches_written + 1;
      let committed = rows_written;
      let rejected = move |reason: Rejection| -> Result<IngestOutcome> {
        tracing::warn!(table, batch = position, %reason, "batch rejected");
        Ok(IngestOutcome::rejected(reason, position, committed))
      };

      let batch = match batch {
        Ok(batch) => batch,
        Err(reason) => return rejected(reason),
      };
      let len = batch.len() as u64;

      match &schema {
        None => {
          let inferred = match infer_schema(&batch) {
            Ok(inferred) => inferred,
            Err(reason) => return rejected(reason),
          };
          let rows = match inferred.conform(&batch) {
            Ok(rows) => rows,
            Err(reason) => return rejected(reason),
          };
          indexed_columns = self.create_table(&name, &inferred, upload_id, rows).await?;
          schema = Some(inferred);
        }
        Some(established) => {
          let rows = match established.conform(&batch) {
            Ok(rows) => rows,
            Err(reason) => return rejected(reason),
          };
          self.append_rows(&name, established, rows).await?;
        }
      }

      rows_written += len;
      batches_written = position;
      tracing::debug!(table = %name, batch = position, rows = len, "batch committed");
    }

    let Some(schema) = schema else {
      return Ok(IngestOutcome::rejected(Rejection::EmptyInput, 0, 0));
    };
    tracing::info!(table = %name, rows = rows_written, batches = batches_written, "ingest complete");
    Ok(IngestOutcome::Completed(IngestReport {
      table: name,
      schema,
      rows_written,
      batches: batches_written,
      indexed_columns,
    }))
  }

  async fn table_schema<'a>(&'a self, table: &'a str) -> Result<Option<TableSchema>> {
    let Some(table) = data_table(table) else {
      return Ok(None);
    };
    Ok(
      self
        .conn
        .call(move |conn| {
          if !table_exists(conn, &table)? {
            return Ok(None);
          }
          let mut stmt = conn.prepare("SELECT name, type FROM pragma_table_info(?1) ORDER BY cid")?;
          let columns = stmt
            .query_map([&table], |r| {
              let declared: String = r.get(1)?;
              Ok(ColumnDescriptor {
                name:        r.get(0)?,
                column_type: ColumnType::from_declared(&declared),
              })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
          Ok(Some(TableSchema::new(columns)))
        })
        .await?,
    )
  }

  async fn row_count<'a>(&'a self, table: &'a str) -> Result<Option<u64>> {
    let Some(table) = data_table(table) else {
      return Ok(None);
    };
    Ok(
      self
        .conn
        .call(move |conn| {
          if !table_exists(conn, &table)? {
            return Ok(None);
          }
          Ok(Some(count_rows(conn, &table)?))
        })
        .await?,
    )
  }

  async fn sample<'a>(&'a self, table: &'a str, limit: usize) -> Result<Option<QueryRows>> {
    let Some(table) = data_table(table) else {
      return Ok(None);
    };
    Ok(
      self
        .conn
        .call(move |conn| {
          if !table_exists(conn, &table)? {
            return Ok(None);
          }
          let mut stmt =
            conn.prepare(&format!("SELECT * FROM {} ORDER BY rowid LIMIT ?1", quote_ident(&table)))?;
          Ok(Some(collect_rows(&mut stmt, [sql_limit(limit)], limit)?))
        })
        .await?,
    )
  }

  async fn read_page<'a>(&'a self, table: &'a str, page: PageRequest) -> Result<Option<RowPage>> {
    let Some(table) = data_table(table) else {
      return Ok(None);
    };
    Ok(
      self
        .conn
        .call(move |conn| {
          if !table_exists(conn, &table)? {
            return Ok(None);
          }
          let total_rows = count_rows(conn, &table)?;
          let mut stmt = conn.prepare(&format!(
            "SELECT * FROM {} ORDER BY rowid LIMIT ?1 OFFSET ?2",
            quote_ident(&table)
          ))?;
          let rows = collect_rows(
            &mut stmt,
            [sql_limit(page.page_size()), sql_limit(page.offset())],
            usize::MAX,
          )?;
          Ok(Some(RowPage {
            columns: rows.columns,
            rows: rows.rows,
            page: page.page(),
            page_size: page.page_size(),
            total_rows,
            total_pages: page.total_pages(total_rows),
          }))
        })
        .await?,
    )
  }

  async fn run_query<'a>(&'a self, sql: &'a str, max_rows: usize) -> Result<QueryOutcome> {
    if let Err(reason) = guard_sql(sql) {
      tracing::warn!(%sql, %reason, "query refused");
      return Ok(QueryOutcome::Rejected(reason));
    }
    let sql = sql.to_owned();

    let outcome = self
      .conn
      .call(move |conn| {
        let mut stmt = match conn.prepare(&sql) {
          Ok(stmt) => stmt,
          Err(e) => return Ok(QueryOutcome::Rejected(Rejection::InvalidSql(e.to_string()))),
        };
        if !stmt.readonly() {
          return Ok(QueryOutcome::Rejected(Rejection::UnsafeSql(
            "statement would modify the database".into(),
          )));
        }
        Ok(match collect_rows(&mut stmt, [], max_rows) {
          Ok(rows) => QueryOutcome::Rows(rows),
          Err(e) => QueryOutcome::Rejected(Rejection::InvalidSql(e.to_string())),
        })
      })
      .await?;

    if let QueryOutcome::Rejected(reason) = &outcome {
      tracing::warn!(%reason, "query refused");
    }
    Ok(outcome)
  }

  async fn chart_data<'a>(
    &'a self,
    table: &'a str,
    x: &'a str,
    y: Option<&'a str>,
    limit: usize,
  ) -> Result<Vec<ChartPoint>> {
    let Some(schema) = self.table_schema(table).await? else {
      return Ok(Vec::new());
    };
    let x = normalize_column_name(x);
    let y = y.map(normalize_column_name);
    if schema.index_of(&x).is_none() || y.as_deref().is_some_and(|y| schema.index_of(y).is_none()) {
      tracing::debug!(%x, ?y, "chart columns not in table");
      return Ok(Vec::new());
    }

    let aggregate = match &y {
      Some(y) => format!("SUM({})", quote_ident(y)),
      None => "COUNT(*)".to_owned(),
    };
    let sql = format!(
      "SELECT {gx}, {aggregate} FROM {t} GROUP BY {gx} LIMIT ?1",
      gx = quote_ident(&x),
      t = quote_ident(&normalize_column_name(table)),
    );

    Ok(
      self
        .conn
        .call(move |conn| {
          let mut stmt = conn.prepare(&sql)?;
          let points = stmt
            .query_map([sql_limit(limit)], |r| {
              Ok(ChartPoint { name: decode_cell(r.get_ref(0)?), value: r.get(1)? })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
          Ok(points)
        })
        .await?,
    )
  }
}
