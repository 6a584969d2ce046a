// SPDX-License-Identifier: Apache-2.0

//! Shared embedded DuckDB engine.
//!
//! All attachments land in one DuckDB connection owned by the caller and
//! shared with this layer. The `duckdb` crate is synchronous and `Connection`
//! is `Send` but `!Sync`, so the handle wraps it in a `std::sync::Mutex` and
//! runs every operation inside `tokio::task::spawn_blocking`.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use duckdb::types::Value as DuckValue;
use duckdb::{params_from_iter, Connection};
use serde_json::Value as JsonValue;

use crate::error::{FederationError, FederationResult};
use crate::types::{ColumnMeta, QueryStat, ResultSet, SimpleColumn};
use crate::value::duckdb_ref_to_json;

/// Rows inserted per statement when materializing fetched data.
const INSERT_BATCH_SIZE: usize = 1000;

/// Quotes a SQL identifier for DuckDB.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quotes a string literal for DuckDB.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Cloneable async handle over the shared DuckDB connection.
#[derive(Clone)]
pub struct EngineConnection {
    conn: Arc<Mutex<Connection>>,
}

impl EngineConnection {
    /// Opens a fresh in-memory engine. Used by tests and by drivers that keep
    /// a private instance per datasource.
    pub fn open_in_memory() -> FederationResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| FederationError::connection_failed(format!("failed to open engine: {e}")))?;
        Ok(Self::from_connection(conn))
    }

    /// Wraps an existing connection, e.g. the caller's shared query engine.
    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Runs a synchronous closure against the connection on the blocking pool.
    pub async fn with_conn<F, R>(&self, f: F) -> FederationResult<R>
    where
        F: FnOnce(&Connection) -> FederationResult<R> + Send + 'static,
        R: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|e| FederationError::internal(format!("engine lock poisoned: {e}")))?;
            f(&conn)
        })
        .await
        .map_err(|e| FederationError::internal(format!("engine task panicked: {e}")))?
    }

    /// Executes a single statement, discarding any result.
    pub async fn run(&self, sql: &str) -> FederationResult<()> {
        let sql = sql.to_string();
        self.with_conn(move |conn| {
            conn.execute_batch(&sql)
                .map_err(|e| FederationError::query_execution(e.to_string()))
        })
        .await
    }

    /// Executes several statements in order.
    pub async fn run_batch(&self, statements: &[String]) -> FederationResult<()> {
        let script = statements.join(";\n");
        self.run(&script).await
    }

    /// Executes a SELECT and returns normalized rows.
    ///
    /// The `duckdb` crate only exposes column names after execution, so rows
    /// are collected first and names extracted afterwards.
    pub async fn query_rows(&self, sql: &str) -> FederationResult<ResultSet> {
        let sql = sql.to_string();
        self.with_conn(move |conn| {
            let start = Instant::now();
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| FederationError::query_execution(e.to_string()))?;

            let mut collected: Vec<Vec<JsonValue>> = Vec::new();
            {
                let mut rows = stmt
                    .query([])
                    .map_err(|e| FederationError::query_execution(e.to_string()))?;
                while let Some(row) = rows
                    .next()
                    .map_err(|e| FederationError::query_execution(e.to_string()))?
                {
                    let ncols = row.as_ref().column_count();
                    let mut values = Vec::with_capacity(ncols);
                    for idx in 0..ncols {
                        let cell = row
                            .get_ref(idx)
                            .map_err(|e| FederationError::query_execution(e.to_string()))?;
                        values.push(duckdb_ref_to_json(cell));
                    }
                    collected.push(values);
                }
            }

            let columns: Vec<ColumnMeta> = (0..stmt.column_count())
                .map(|i| {
                    let name = stmt
                        .column_name(i)
                        .map(|s| s.to_string())
                        .unwrap_or_else(|_| format!("col{i}"));
                    ColumnMeta::named(name)
                })
                .collect();

            let rows = collected
                .into_iter()
                .map(|values| {
                    columns
                        .iter()
                        .zip(values)
                        .map(|(col, v)| (col.name.clone(), v))
                        .collect::<serde_json::Map<String, JsonValue>>()
                })
                .collect::<Vec<_>>();

            let stat = QueryStat {
                rows_read: rows.len() as u64,
                query_duration_ms: Some(start.elapsed().as_secs_f64() * 1000.0),
                ..QueryStat::default()
            };
            Ok(ResultSet { columns, rows, stat })
        })
        .await
    }

    /// Describes one relation as `SimpleColumn`s via `DESCRIBE`.
    pub async fn describe(&self, schema: &str, table: &str) -> FederationResult<Vec<SimpleColumn>> {
        let sql = format!("DESCRIBE {}.{}", quote_ident(schema), quote_ident(table));
        let result = self.query_rows(&sql).await?;
        Ok(result
            .rows
            .iter()
            .map(|row| SimpleColumn {
                column_name: row
                    .get("column_name")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                column_type: row
                    .get("column_type")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
            })
            .collect())
    }

    /// True when a catalog of the given name is already attached.
    pub async fn catalog_exists(&self, name: &str) -> FederationResult<bool> {
        let sql = format!(
            "SELECT name FROM pragma_database_list WHERE name = {}",
            quote_literal(name)
        );
        let result = self.query_rows(&sql).await?;
        Ok(!result.rows.is_empty())
    }

    /// Attaches an in-memory catalog under `name`, idempotently.
    pub async fn attach_memory_catalog(&self, name: &str) -> FederationResult<()> {
        if self.catalog_exists(name).await? {
            return Ok(());
        }
        self.run(&format!("ATTACH ':memory:' AS {}", quote_ident(name)))
            .await
    }

    /// Attaches a file-backed catalog under `name`, idempotently.
    pub async fn attach_file_catalog(&self, name: &str, path: &str) -> FederationResult<()> {
        if self.catalog_exists(name).await? {
            return Ok(());
        }
        self.run(&format!(
            "ATTACH {} AS {}",
            quote_literal(path),
            quote_ident(name)
        ))
        .await
    }

    /// Detaches a catalog. Best effort: a failed DETACH (catalog gone, open
    /// dependents) is logged and swallowed.
    pub async fn detach_catalog(&self, name: &str) -> FederationResult<()> {
        let sql = format!("DETACH {}", quote_ident(name));
        if let Err(e) = self.run(&sql).await {
            tracing::debug!(catalog = name, error = %e, "detach skipped");
        }
        Ok(())
    }

    /// Materializes fetched rows into `schema.table`, replacing any previous
    /// copy. Column types are inferred from the first row; inserts run in
    /// batches.
    pub async fn create_table_with_rows(
        &self,
        schema: &str,
        table: &str,
        columns: &[ColumnMeta],
        rows: &[serde_json::Map<String, JsonValue>],
    ) -> FederationResult<()> {
        if columns.is_empty() {
            return Err(FederationError::schema_extraction(format!(
                "cannot materialize {schema}.{table}: no columns"
            )));
        }

        let column_defs: Vec<String> = columns
            .iter()
            .map(|col| {
                let ty = infer_column_type(col, rows.first());
                format!("{} {}", quote_ident(&col.name), ty)
            })
            .collect();
        let create = format!(
            "CREATE OR REPLACE TABLE {}.{} ({})",
            quote_ident(schema),
            quote_ident(table),
            column_defs.join(", ")
        );
        self.run(&create).await?;

        if rows.is_empty() {
            return Ok(());
        }

        let schema = schema.to_string();
        let table = table.to_string();
        let names: Vec<String> = columns.iter().map(|c| c.name.clone()).collect();
        let rows = rows.to_vec();
        self.with_conn(move |conn| {
            for chunk in rows.chunks(INSERT_BATCH_SIZE) {
                let placeholders = (0..chunk.len())
                    .map(|_| format!("({})", vec!["?"; names.len()].join(", ")))
                    .collect::<Vec<_>>()
                    .join(", ");
                let insert = format!(
                    "INSERT INTO {}.{} VALUES {}",
                    quote_ident(&schema),
                    quote_ident(&table),
                    placeholders
                );
                let params: Vec<DuckValue> = chunk
                    .iter()
                    .flat_map(|row| {
                        names.iter().map(|name| {
                            json_to_duckdb_param(row.get(name).unwrap_or(&JsonValue::Null))
                        })
                    })
                    .collect();
                conn.execute(&insert, params_from_iter(params))
                    .map_err(|e| FederationError::query_execution(e.to_string()))?;
            }
            Ok(())
        })
        .await
    }
}

/// Picks a DuckDB column type for a materialized column: the driver's native
/// type name when present, otherwise inferred from the first row's value.
fn infer_column_type(
    col: &ColumnMeta,
    first_row: Option<&serde_json::Map<String, JsonValue>>,
) -> &'static str {
    if let Some(native) = col.original_type.as_deref() {
        let native = native.to_ascii_lowercase();
        if native.contains("int") {
            return "BIGINT";
        }
        if native.contains("float") || native.contains("double") || native.contains("numeric") {
            return "DOUBLE";
        }
        if native.contains("bool") {
            return "BOOLEAN";
        }
        if native.contains("date") || native.contains("time") {
            return "VARCHAR";
        }
    }
    match first_row.and_then(|row| row.get(&col.name)) {
        Some(JsonValue::Bool(_)) => "BOOLEAN",
        Some(JsonValue::Number(n)) if n.is_i64() || n.is_u64() => "BIGINT",
        Some(JsonValue::Number(_)) => "DOUBLE",
        _ => "VARCHAR",
    }
}

fn json_to_duckdb_param(value: &JsonValue) -> DuckValue {
    match value {
        JsonValue::Null => DuckValue::Null,
        JsonValue::Bool(b) => DuckValue::Boolean(*b),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                DuckValue::BigInt(i)
            } else if let Some(u) = n.as_u64() {
                DuckValue::UBigInt(u)
            } else {
                DuckValue::Double(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        JsonValue::String(s) => DuckValue::Text(s.clone()),
        other => DuckValue::Text(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn query_rows_returns_named_json_rows() {
        let engine = EngineConnection::open_in_memory().unwrap();
        let result = engine
            .query_rows("SELECT 1 AS id, 'a' AS label UNION ALL SELECT 2, 'b' ORDER BY id")
            .await
            .unwrap();
        assert_eq!(result.columns.len(), 2);
        assert_eq!(result.rows.len(), 2);
        assert_eq!(result.rows[0]["id"], json!(1));
        assert_eq!(result.rows[1]["label"], json!("b"));
        assert_eq!(result.stat.rows_read, 2);
    }

    #[tokio::test]
    async fn big_integers_round_trip_as_strings() {
        let engine = EngineConnection::open_in_memory().unwrap();
        let result = engine
            .query_rows("SELECT 9007199254740993 AS big, 42 AS small")
            .await
            .unwrap();
        assert_eq!(result.rows[0]["big"], json!("9007199254740993"));
        assert_eq!(result.rows[0]["small"], json!(42));
    }

    #[tokio::test]
    async fn memory_catalog_attach_is_idempotent() {
        let engine = EngineConnection::open_in_memory().unwrap();
        engine.attach_memory_catalog("ds1").await.unwrap();
        engine.attach_memory_catalog("ds1").await.unwrap();
        assert!(engine.catalog_exists("ds1").await.unwrap());

        engine.detach_catalog("ds1").await.unwrap();
        assert!(!engine.catalog_exists("ds1").await.unwrap());
        // detaching an absent catalog is not an error
        engine.detach_catalog("ds1").await.unwrap();
    }

    #[tokio::test]
    async fn materialized_table_is_queryable() {
        let engine = EngineConnection::open_in_memory().unwrap();
        engine.attach_memory_catalog("wh").await.unwrap();

        let columns = vec![ColumnMeta::named("id"), ColumnMeta::named("name")];
        let rows: Vec<serde_json::Map<String, JsonValue>> = (1..=3)
            .map(|i| {
                let mut m = serde_json::Map::new();
                m.insert("id".into(), json!(i));
                m.insert("name".into(), json!(format!("row{i}")));
                m
            })
            .collect();

        engine
            .create_table_with_rows("wh", "events", &columns, &rows)
            .await
            .unwrap();

        let result = engine
            .query_rows("SELECT count(*) AS n FROM wh.events")
            .await
            .unwrap();
        assert_eq!(result.rows[0]["n"], json!(3));
    }

    #[tokio::test]
    async fn describe_reports_columns() {
        let engine = EngineConnection::open_in_memory().unwrap();
        engine
            .run("CREATE TABLE t (id BIGINT, label VARCHAR)")
            .await
            .unwrap();
        let cols = engine.describe("main", "t").await.unwrap();
        assert_eq!(cols.len(), 2);
        assert_eq!(cols[0].column_name, "id");
        assert_eq!(cols[0].column_type, "BIGINT");
    }
}
