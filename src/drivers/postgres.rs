// SPDX-License-Identifier: Apache-2.0

//! PostgreSQL driver.
//!
//! Pools are cached per resolved connection URL, so repeated operations with
//! an equivalent config share one pool. Introspection reads
//! `information_schema` filtered to non-system schemas and enriches tables
//! with primary keys and foreign-key relationships.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Column, Row, TypeInfo};

use crate::cache::SessionCache;
use crate::connection_url::resolve_url;
use crate::driver::{bounded, DataSourceDriver, DriverContext};
use crate::error::{FederationError, FederationResult};
use crate::provider::ProviderFamily;
use crate::types::{ColumnMeta, DatasourceMetadata, QueryStat, RelationshipInfo, ResultSet};
use crate::value::{json_i64, normalize_json};

const SYSTEM_SCHEMAS: &str = "('information_schema', 'pg_catalog')";

pub struct PostgresDriver {
    ctx: DriverContext,
    pools: SessionCache<PgPool>,
}

impl PostgresDriver {
    pub fn new(ctx: DriverContext) -> Self {
        Self {
            ctx,
            pools: SessionCache::new(),
        }
    }

    async fn pool_for(&self, config: &JsonValue) -> FederationResult<PgPool> {
        let url = resolve_url(ProviderFamily::Postgres, config)?;
        let ctx = &self.ctx;
        let session = self
            .pools
            .get_or_try_insert(&url, || async {
                bounded(ctx, ctx.connect_timeout_ms, async {
                    PgPoolOptions::new()
                        .max_connections(5)
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

    fn extract_json(row: &PgRow, idx: usize) -> JsonValue {
        if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
            return v.map(json_i64).unwrap_or(JsonValue::Null);
        }
        if let Ok(v) = row.try_get::<Option<i32>, _>(idx) {
            return v.map(|i| serde_json::json!(i)).unwrap_or(JsonValue::Null);
        }
        if let Ok(v) = row.try_get::<Option<i16>, _>(idx) {
            return v.map(|i| serde_json::json!(i)).unwrap_or(JsonValue::Null);
        }
        if let Ok(v) = row.try_get::<Option<bool>, _>(idx) {
            return v.map(|b| serde_json::json!(b)).unwrap_or(JsonValue::Null);
        }
        if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
            return v.map(|f| serde_json::json!(f)).unwrap_or(JsonValue::Null);
        }
        if let Ok(v) = row.try_get::<Option<f32>, _>(idx) {
            return v.map(|f| serde_json::json!(f)).unwrap_or(JsonValue::Null);
        }
        if let Ok(v) = row.try_get::<Option<rust_decimal::Decimal>, _>(idx) {
            return v
                .map(|d| JsonValue::String(d.to_string()))
                .unwrap_or(JsonValue::Null);
        }
        if let Ok(v) = row.try_get::<Option<uuid::Uuid>, _>(idx) {
            return v
                .map(|u| JsonValue::String(u.to_string()))
                .unwrap_or(JsonValue::Null);
        }
        if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
            return v.map(JsonValue::String).unwrap_or(JsonValue::Null);
        }
        if let Ok(v) = row.try_get::<Option<serde_json::Value>, _>(idx) {
            return v.map(normalize_json).unwrap_or(JsonValue::Null);
        }
        if let Ok(v) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(idx) {
            return v
                .map(|dt| JsonValue::String(dt.to_rfc3339()))
                .unwrap_or(JsonValue::Null);
        }
        if let Ok(v) = row.try_get::<Option<chrono::NaiveDateTime>, _>(idx) {
            return v
                .map(|dt| JsonValue::String(dt.format("%Y-%m-%d %H:%M:%S%.6f").to_string()))
                .unwrap_or(JsonValue::Null);
        }
        if let Ok(v) = row.try_get::<Option<chrono::NaiveDate>, _>(idx) {
            return v
                .map(|d| JsonValue::String(d.format("%Y-%m-%d").to_string()))
                .unwrap_or(JsonValue::Null);
        }
        if let Ok(v) = row.try_get::<Option<chrono::NaiveTime>, _>(idx) {
            return v
                .map(|t| JsonValue::String(t.format("%H:%M:%S%.6f").to_string()))
                .unwrap_or(JsonValue::Null);
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

    fn convert_rows(rows: &[PgRow]) -> (Vec<ColumnMeta>, Vec<serde_json::Map<String, JsonValue>>) {
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
impl DataSourceDriver for PostgresDriver {
    fn provider_id(&self) -> &'static str {
        "postgresql"
    }

    async fn test_connection(&self, config: &JsonValue) -> FederationResult<()> {
        let url = resolve_url(ProviderFamily::Postgres, config)?;
        bounded(&self.ctx, self.ctx.connect_timeout_ms, async {
            let pool = PgPoolOptions::new()
                .max_connections(1)
                .acquire_timeout(Duration::from_secs(10))
                .connect(&url)
                .await
                .map_err(|e| FederationError::connection_failed(e.to_string()))?;
            sqlx::query("SELECT 1")
                .execute(&pool)
                .await
                .map_err(|e| FederationError::query_execution(e.to_string()))?;
            pool.close().await;
            Ok(())
        })
        .await
    }

    async fn query(&self, sql: &str, config: &JsonValue) -> FederationResult<ResultSet> {
        let pool = self.pool_for(config).await?;
        let start = std::time::Instant::now();
        let pg_rows = sqlx::query(sql)
            .fetch_all(&pool)
            .await
            .map_err(|e| FederationError::query_execution(e.to_string()))?;

        let (columns, rows) = Self::convert_rows(&pg_rows);
        let stat = QueryStat {
            rows_read: rows.len() as u64,
            query_duration_ms: Some(start.elapsed().as_secs_f64() * 1000.0),
            ..QueryStat::default()
        };
        Ok(ResultSet { columns, rows, stat })
    }

    async fn metadata(&self, config: &JsonValue) -> FederationResult<DatasourceMetadata> {
        let pool = self.pool_for(config).await?;

        let column_rows: Vec<(String, String, String, String, i32, String)> = sqlx::query_as(
            &format!(
                "SELECT table_schema::text, table_name::text, column_name::text, \
                        data_type::text, ordinal_position::int4, is_nullable::text \
                 FROM information_schema.columns \
                 WHERE table_schema NOT IN {SYSTEM_SCHEMAS} \
                 ORDER BY table_schema, table_name, ordinal_position"
            ),
        )
        .fetch_all(&pool)
        .await
        .map_err(|e| FederationError::schema_extraction(e.to_string()))?;

        let mut metadata = DatasourceMetadata::from_information_schema(
            self.provider_id(),
            column_rows
                .into_iter()
                .map(|(schema, table, column, data_type, ordinal, nullable)| {
                    (
                        schema,
                        table,
                        column,
                        data_type,
                        ordinal.max(0) as u32,
                        nullable.eq_ignore_ascii_case("yes"),
                    )
                })
                .collect(),
        );

        let pk_rows: Vec<(String, String, String)> = sqlx::query_as(
            &format!(
                "SELECT tc.table_schema::text, tc.table_name::text, kcu.column_name::text \
                 FROM information_schema.table_constraints tc \
                 JOIN information_schema.key_column_usage kcu \
                   ON tc.constraint_name = kcu.constraint_name \
                  AND tc.table_schema = kcu.table_schema \
                 WHERE tc.constraint_type = 'PRIMARY KEY' \
                   AND tc.table_schema NOT IN {SYSTEM_SCHEMAS} \
                 ORDER BY kcu.ordinal_position"
            ),
        )
        .fetch_all(&pool)
        .await
        .map_err(|e| FederationError::schema_extraction(e.to_string()))?;

        for (schema, table, column) in pk_rows {
            if let Some(t) = metadata
                .tables
                .iter_mut()
                .find(|t| t.schema == schema && t.name == table)
            {
                t.primary_keys.push(column);
            }
        }

        let fk_rows: Vec<(String, String, String, String, String, String, String)> =
            sqlx::query_as(&format!(
                "SELECT tc.constraint_name::text, tc.table_schema::text, tc.table_name::text, \
                        kcu.column_name::text, ccu.table_schema::text, ccu.table_name::text, \
                        ccu.column_name::text \
                 FROM information_schema.table_constraints tc \
                 JOIN information_schema.key_column_usage kcu \
                   ON tc.constraint_name = kcu.constraint_name \
                  AND tc.table_schema = kcu.table_schema \
                 JOIN information_schema.constraint_column_usage ccu \
                   ON ccu.constraint_name = tc.constraint_name \
                  AND ccu.table_schema = tc.table_schema \
                 WHERE tc.constraint_type = 'FOREIGN KEY' \
                   AND tc.table_schema NOT IN {SYSTEM_SCHEMAS}"
            ))
            .fetch_all(&pool)
            .await
            .map_err(|e| FederationError::schema_extraction(e.to_string()))?;

        metadata.relationships = fk_rows
            .into_iter()
            .map(
                |(constraint, src_schema, src_table, src_col, tgt_schema, tgt_table, tgt_col)| {
                    RelationshipInfo {
                        constraint_name: constraint,
                        source_schema: src_schema,
                        source_table: src_table,
                        source_column: src_col,
                        target_schema: tgt_schema,
                        target_table: tgt_table,
                        target_column: tgt_col,
                    }
                },
            )
            .collect();

        Ok(metadata)
    }

    async fn close(&self) -> FederationResult<()> {
        for pool in self.pools.drain().await {
            pool.close().await;
        }
        Ok(())
    }
}
