// SPDX-License-Identifier: Apache-2.0

//! Embedded-store driver (SQLite database files).
//!
//! Backs the "embedded" provider: a local relational store the app ships
//! with. Pools are cached per database path. Introspection reads
//! `sqlite_master` plus `pragma_table_info`, mapped into the same flattened
//! metadata shape the networked drivers produce under the fixed schema name
//! `main`.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Row, TypeInfo};

use crate::cache::SessionCache;
use crate::connection_url::resolve_url;
use crate::driver::{bounded, DataSourceDriver, DriverContext};
use crate::error::{FederationError, FederationResult};
use crate::provider::ProviderFamily;
use crate::types::{ColumnMeta, DatasourceMetadata, QueryStat, ResultSet};
use crate::value::json_i64;

pub struct SqliteDriver {
    ctx: DriverContext,
    pools: SessionCache<SqlitePool>,
}

impl SqliteDriver {
    pub fn new(ctx: DriverContext) -> Self {
        Self {
            ctx,
            pools: SessionCache::new(),
        }
    }

    fn dsn(config: &JsonValue) -> FederationResult<String> {
        let raw = resolve_url(ProviderFamily::Sqlite, config)?;
        if raw.starts_with("sqlite:") {
            Ok(raw)
        } else {
            Ok(format!("sqlite://{raw}"))
        }
    }

    async fn pool_for(&self, config: &JsonValue) -> FederationResult<SqlitePool> {
        let url = Self::dsn(config)?;
        let ctx = &self.ctx;
        let session = self
            .pools
            .get_or_try_insert(&url, || async {
                bounded(ctx, ctx.connect_timeout_ms, async {
                    SqlitePoolOptions::new()
                        .max_connections(1)
                        .acquire_timeout(Duration::from_secs(10))
                        .connect(&url)
                        .await
                        .map_err(|e| FederationError::connection_failed(e.to_string()))
                })
                .await
            })
            .await?;
        Ok((*session).clone())
    }

    fn extract_json(row: &SqliteRow, idx: usize) -> JsonValue {
        if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
            return v.map(json_i64).unwrap_or(JsonValue::Null);
        }
        if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
            return v.map(|f| serde_json::json!(f)).unwrap_or(JsonValue::Null);
        }
        if let Ok(v) = row.try_get::<Option<bool>, _>(idx) {
            return v.map(|b| serde_json::json!(b)).unwrap_or(JsonValue::Null);
        }
        if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
            return v.map(JsonValue::String).unwrap_or(JsonValue::Null);
        }
        if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(idx) {
            return v
                .map(|b| {
                    JsonValue::String(b.iter().map(|x| format!("{x:02x}")).collect::<String>())
                })
                .unwrap_or(JsonValue::Null);
        }
        JsonValue::Null
    }

    fn convert_rows(
        rows: &[SqliteRow],
    ) -> (Vec<ColumnMeta>, Vec<serde_json::Map<String, JsonValue>>) {
        let columns: Vec<ColumnMeta> = rows
            .first()
            .map(|row| {
                row.columns()
                    .iter()
                    .map(|col| ColumnMeta {
                        name: col.name().to_string(),
                        display_name: col.name().to_string(),
                        original_type: Some(col.type_info().name().to_string()),
                    })
                    .collect()
            })
            .unwrap_or_default();

        let converted = rows
            .iter()
            .map(|row| {
                columns
                    .iter()
                    .enumerate()
                    .map(|(idx, col)| (col.name.clone(), Self::extract_json(row, idx)))
                    .collect()
            })
            .collect();
        (columns, converted)
    }
}

#[async_trait]
impl DataSourceDriver for SqliteDriver {
    fn provider_id(&self) -> &'static str {
        "sqlite"
    }

    async fn test_connection(&self, config: &JsonValue) -> FederationResult<()> {
        let pool = self.pool_for(config).await?;
        sqlx::query("SELECT 1")
            .execute(&pool)
            .await
            .map_err(|e| FederationError::query_execution(e.to_string()))?;
        Ok(())
    }

    async fn query(&self, sql: &str, config: &JsonValue) -> FederationResult<ResultSet> {
        let pool = self.pool_for(config).await?;
        let start = std::time::Instant::now();
        let sq_rows = sqlx::query(sql)
            .fetch_all(&pool)
            .await
            .map_err(|e| FederationError::query_execution(e.to_string()))?;

        let (columns, rows) = Self::convert_rows(&sq_rows);
        let stat = QueryStat {
            rows_read: rows.len() as u64,
            query_duration_ms: Some(start.elapsed().as_secs_f64() * 1000.0),
            ..QueryStat::default()
        };
        Ok(ResultSet { columns, rows, stat })
    }

    async fn metadata(&self, config: &JsonValue) -> FederationResult<DatasourceMetadata> {
        let pool = self.pool_for(config).await?;

        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master \
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%' \
             ORDER BY name",
        )
        .fetch_all(&pool)
        .await
        .map_err(|e| FederationError::schema_extraction(e.to_string()))?;

        let mut column_rows = Vec::new();
        let mut primary_keys: Vec<(String, String)> = Vec::new();
        for (table,) in &tables {
            let cols: Vec<(i64, String, String, i64, i64)> = sqlx::query_as(
                "SELECT cid, name, type, \"notnull\", pk FROM pragma_table_info(?)",
            )
            .bind(table)
            .fetch_all(&pool)
            .await
            .map_err(|e| FederationError::schema_extraction(e.to_string()))?;

            for (cid, name, data_type, notnull, pk) in cols {
                if pk > 0 {
                    primary_keys.push((table.clone(), name.clone()));
                }
                column_rows.push((
                    "main".to_string(),
                    table.clone(),
                    name,
                    data_type,
                    (cid + 1).max(1) as u32,
                    notnull == 0,
                ));
            }
        }

        let mut metadata =
            DatasourceMetadata::from_information_schema(self.provider_id(), column_rows);
        for (table, column) in primary_keys {
            if let Some(t) = metadata.tables.iter_mut().find(|t| t.name == table) {
                t.primary_keys.push(column);
            }
        }
        Ok(metadata)
    }

    async fn close(&self) -> FederationResult<()> {
        for pool in self.pools.drain().await {
            pool.close().await;
        }
        Ok(())
    }
}
