// SPDX-License-Identifier: Apache-2.0

//! ClickHouse driver over the HTTP interface.
//!
//! Queries are POSTed with `default_format=JSONCompact`; the response carries
//! column metadata, row arrays and execution statistics in one payload.
//! Credentials travel in the `X-ClickHouse-User`/`X-ClickHouse-Key` headers.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::connection_url::resolve_url;
use crate::driver::{bounded, DataSourceDriver, DriverContext};
use crate::error::{FederationError, FederationResult};
use crate::provider::ProviderFamily;
use crate::types::{ColumnMeta, DatasourceMetadata, QueryStat, ResultSet};
use crate::value::normalize_json;

const SYSTEM_DATABASES: &str = "('system', 'INFORMATION_SCHEMA', 'information_schema')";

#[derive(Debug, Deserialize)]
struct CompactMeta {
    name: String,
    #[serde(rename = "type")]
    column_type: String,
}

#[derive(Debug, Deserialize, Default)]
struct CompactStatistics {
    #[serde(default)]
    elapsed: f64,
    #[serde(default)]
    rows_read: u64,
}

#[derive(Debug, Deserialize)]
struct CompactResponse {
    #[serde(default)]
    meta: Vec<CompactMeta>,
    #[serde(default)]
    data: Vec<Vec<JsonValue>>,
    #[serde(default)]
    statistics: CompactStatistics,
}

pub struct ClickHouseDriver {
    ctx: DriverContext,
    client: reqwest::Client,
}

impl ClickHouseDriver {
    pub fn new(ctx: DriverContext) -> Self {
        Self {
            ctx,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(60))
                .build()
                .unwrap_or_default(),
        }
    }

    fn credentials(&self, config: &JsonValue) -> (String, String) {
        let user = config
            .get("username")
            .and_then(|v| v.as_str())
            .unwrap_or("default");
        let pass = config
            .get("password")
            .and_then(|v| v.as_str())
            .map(|p| self.ctx.resolve_secret(p))
            .unwrap_or_default();
        (user.to_string(), pass)
    }

    async fn execute(&self, sql: &str, config: &JsonValue) -> FederationResult<CompactResponse> {
        let base = resolve_url(ProviderFamily::ClickHouse, config)?;
        let (user, pass) = self.credentials(config);

        let mut request = self
            .client
            .post(&base)
            .query(&[("default_format", "JSONCompact")])
            .header("X-ClickHouse-User", user)
            .header("X-ClickHouse-Key", pass)
            .body(sql.to_string());
        if let Some(database) = config.get("database").and_then(|v| v.as_str()) {
            request = request.query(&[("database", database)]);
        }

        let response = request
            .send()
            .await
            .map_err(|e| FederationError::connection_failed(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| FederationError::connection_failed(e.to_string()))?;
        if !status.is_success() {
            return Err(FederationError::query_execution(format!(
                "clickhouse returned {status}: {}",
                body.trim()
            )));
        }

        serde_json::from_str(&body)
            .map_err(|e| FederationError::query_execution(format!("malformed response: {e}")))
    }

    fn to_result_set(response: CompactResponse) -> ResultSet {
        let columns: Vec<ColumnMeta> = response
            .meta
            .iter()
            .map(|m| ColumnMeta {
                name: m.name.clone(),
                display_name: m.name.clone(),
                original_type: Some(m.column_type.clone()),
            })
            .collect();

        let rows = response
            .data
            .into_iter()
            .map(|values| {
                columns
                    .iter()
                    .zip(values)
                    .map(|(col, v)| (col.name.clone(), normalize_json(v)))
                    .collect()
            })
            .collect::<Vec<serde_json::Map<String, JsonValue>>>();

        let stat = QueryStat {
            rows_read: response.statistics.rows_read,
            query_duration_ms: Some(response.statistics.elapsed * 1000.0),
            ..QueryStat::default()
        };
        ResultSet { columns, rows, stat }
    }
}

#[async_trait]
impl DataSourceDriver for ClickHouseDriver {
    fn provider_id(&self) -> &'static str {
        "clickhouse"
    }

    async fn test_connection(&self, config: &JsonValue) -> FederationResult<()> {
        bounded(&self.ctx, self.ctx.connect_timeout_ms, async {
            self.execute("SELECT 1", config).await.map(|_| ())
        })
        .await
    }

    async fn query(&self, sql: &str, config: &JsonValue) -> FederationResult<ResultSet> {
        let response = self.execute(sql, config).await?;
        Ok(Self::to_result_set(response))
    }

    async fn metadata(&self, config: &JsonValue) -> FederationResult<DatasourceMetadata> {
        let sql = format!(
            "SELECT database, table, name, type, position, 'YES' \
             FROM system.columns \
             WHERE database NOT IN {SYSTEM_DATABASES} \
             ORDER BY database, table, position"
        );
        let response = self
            .execute(&sql, config)
            .await
            .map_err(|e| FederationError::schema_extraction(e.to_string()))?;

        let column_rows = response
            .data
            .into_iter()
            .filter_map(|row| {
                let mut it = row.into_iter();
                let schema = it.next()?.as_str()?.to_string();
                let table = it.next()?.as_str()?.to_string();
                let column = it.next()?.as_str()?.to_string();
                let data_type = it.next()?.as_str()?.to_string();
                let ordinal = it.next()?.as_u64().unwrap_or(0) as u32;
                Some((schema, table, column, data_type, ordinal, true))
            })
            .collect();

        let mut metadata =
            DatasourceMetadata::from_information_schema(self.provider_id(), column_rows);

        let pk_sql = format!(
            "SELECT database, name, primary_key FROM system.tables \
             WHERE database NOT IN {SYSTEM_DATABASES} AND primary_key != ''"
        );
        if let Ok(pk_response) = self.execute(&pk_sql, config).await {
            for row in pk_response.data {
                let (Some(schema), Some(table), Some(pk)) = (
                    row.first().and_then(|v| v.as_str()),
                    row.get(1).and_then(|v| v.as_str()),
                    row.get(2).and_then(|v| v.as_str()),
                ) else {
                    continue;
                };
                if let Some(t) = metadata
                    .tables
                    .iter_mut()
                    .find(|t| t.schema == schema && t.name == table)
                {
                    t.primary_keys = pk.split(',').map(|s| s.trim().to_string()).collect();
                }
            }
        }

        Ok(metadata)
    }

    async fn close(&self) -> FederationResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn compact_response_parses_and_converts() {
        let body = json!({
            "meta": [
                {"name": "id", "type": "UInt64"},
                {"name": "name", "type": "String"},
            ],
            "data": [[1, "a"], [9007199254740993u64, "b"]],
            "rows": 2,
            "statistics": {"elapsed": 0.004, "rows_read": 2, "bytes_read": 128},
        })
        .to_string();

        let parsed: CompactResponse = serde_json::from_str(&body).unwrap();
        let result = ClickHouseDriver::to_result_set(parsed);
        assert_eq!(result.columns.len(), 2);
        assert_eq!(result.columns[0].original_type.as_deref(), Some("UInt64"));
        assert_eq!(result.rows[0]["id"], json!(1));
        assert_eq!(result.rows[1]["id"], json!("9007199254740993"));
        assert_eq!(result.stat.rows_read, 2);
    }

    #[test]
    fn statistics_default_when_absent() {
        let parsed: CompactResponse =
            serde_json::from_str(r#"{"meta": [], "data": []}"#).unwrap();
        let result = ClickHouseDriver::to_result_set(parsed);
        assert_eq!(result.stat.rows_read, 0);
        assert!(result.rows.is_empty());
    }
}
