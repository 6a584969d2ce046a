// SPDX-License-Identifier: Apache-2.0

//! Remote Parquet driver.
//!
//! A single Parquet file served over HTTP(S) becomes a `data` view. The
//! driver owns its attach lifecycle: in the shared engine it attaches an
//! in-memory catalog named after the datasource (skipping the ATTACH when
//! the catalog already exists) and creates the view inside it.

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::cache::SessionCache;
use crate::driver::{bounded, AttachOptions, DataSourceDriver, DetachOptions, DriverContext};
use crate::engine::{quote_ident, quote_literal, EngineConnection};
use crate::error::{FederationError, FederationResult};
use crate::types::{
    AttachedTable, DatasourceMetadata, DriverAttachResult, ResultSet, SimpleSchema, SimpleTable,
};

struct ParquetSession {
    engine: EngineConnection,
}

pub struct ParquetHttpDriver {
    ctx: DriverContext,
    sessions: SessionCache<ParquetSession>,
}

impl ParquetHttpDriver {
    pub fn new(ctx: DriverContext) -> Self {
        Self {
            ctx,
            sessions: SessionCache::new(),
        }
    }

    fn file_url(config: &JsonValue) -> FederationResult<String> {
        let url = config
            .get("url")
            .or_else(|| config.get("connection_url"))
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                FederationError::config_validation("url is required", vec!["url".into()])
            })?;
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(FederationError::config_validation(
                "url must be http(s)",
                vec!["url".into()],
            ));
        }
        Ok(url.to_string())
    }

    async fn session_for(&self, url: &str) -> FederationResult<std::sync::Arc<ParquetSession>> {
        self.sessions
            .get_or_try_insert(url, || async {
                let engine = EngineConnection::open_in_memory()?;
                engine.run("INSTALL httpfs; LOAD httpfs;").await?;
                engine
                    .run(&format!(
                        "CREATE OR REPLACE VIEW data AS SELECT * FROM read_parquet({})",
                        quote_literal(url)
                    ))
                    .await?;
                Ok(ParquetSession { engine })
            })
            .await
    }
}

#[async_trait]
impl DataSourceDriver for ParquetHttpDriver {
    fn provider_id(&self) -> &'static str {
        "parquet-http"
    }

    async fn test_connection(&self, config: &JsonValue) -> FederationResult<()> {
        let url = Self::file_url(config)?;
        bounded(&self.ctx, self.ctx.connect_timeout_ms, async {
            let session = self.session_for(&url).await?;
            session
                .engine
                .query_rows("SELECT * FROM data LIMIT 1")
                .await?;
            Ok(())
        })
        .await
    }

    async fn query(&self, sql: &str, config: &JsonValue) -> FederationResult<ResultSet> {
        let url = Self::file_url(config)?;
        let session = self.session_for(&url).await?;
        session.engine.query_rows(sql).await
    }

    async fn metadata(&self, config: &JsonValue) -> FederationResult<DatasourceMetadata> {
        let url = Self::file_url(config)?;
        let session = self.session_for(&url).await?;
        let columns = session.engine.describe("main", "data").await?;

        Ok(DatasourceMetadata::from_information_schema(
            self.provider_id(),
            columns
                .into_iter()
                .enumerate()
                .map(|(idx, col)| {
                    (
                        "main".to_string(),
                        "data".to_string(),
                        col.column_name,
                        col.column_type,
                        (idx + 1) as u32,
                        true,
                    )
                })
                .collect(),
        ))
    }

    fn supports_attach(&self) -> bool {
        true
    }

    async fn attach(&self, options: AttachOptions) -> FederationResult<DriverAttachResult> {
        let url = Self::file_url(&options.config)?;
        let engine = &options.engine;
        let db = &options.database_name;

        engine.run("INSTALL httpfs; LOAD httpfs;").await?;
        engine.attach_memory_catalog(db).await?;
        engine
            .run(&format!(
                "CREATE OR REPLACE VIEW {}.main.{} AS SELECT * FROM read_parquet({})",
                quote_ident(db),
                quote_ident("data"),
                quote_literal(&url),
            ))
            .await?;

        let columns = engine.describe(db, "data").await.ok();
        Ok(DriverAttachResult {
            tables: vec![AttachedTable {
                schema: db.clone(),
                table: "data".to_string(),
                path: format!("{db}.data"),
                schema_definition: columns.map(|cols| SimpleSchema {
                    database_name: db.clone(),
                    schema_name: "main".to_string(),
                    tables: vec![SimpleTable {
                        table_name: "data".to_string(),
                        columns: cols,
                    }],
                }),
            }],
        })
    }

    async fn detach(&self, options: DetachOptions) -> FederationResult<()> {
        let engine = &options.engine;
        let db = &options.database_name;
        if let Err(e) = engine
            .run(&format!(
                "DROP VIEW IF EXISTS {}.main.{}",
                quote_ident(db),
                quote_ident("data")
            ))
            .await
        {
            tracing::debug!(catalog = %db, error = %e, "drop view skipped");
        }
        engine.detach_catalog(db).await
    }

    async fn close(&self) -> FederationResult<()> {
        self.sessions.drain().await;
        Ok(())
    }
}
