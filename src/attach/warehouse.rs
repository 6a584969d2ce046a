// SPDX-License-Identifier: Apache-2.0

//! Warehouse attachment strategy.
//!
//! Analytical warehouses (ClickHouse) have no native DuckDB attach, so their
//! tables are materialized: rows are fetched through the driver and loaded
//! into a durable file-backed catalog scoped to the conversation. Without a
//! conversation id and workspace directory there is nowhere durable to put
//! the catalog, which is a `MissingContext` error.

use async_trait::async_trait;

use super::{AttachmentStrategy, StrategyContext};
use crate::engine::quote_ident;
use crate::error::{FederationError, FederationResult};
use crate::provider::ProviderFamily;
use crate::types::{AttachedTable, AttachmentResult, SimpleSchema, SimpleTable};

/// Upper bound on rows pulled per table during materialization.
const MAX_MATERIALIZED_ROWS: usize = 100_000;

pub struct WarehouseStrategy;

#[async_trait]
impl AttachmentStrategy for WarehouseStrategy {
    fn name(&self) -> &'static str {
        "warehouse"
    }

    fn handles(&self, family: ProviderFamily) -> bool {
        family == ProviderFamily::ClickHouse
    }

    async fn attach(&self, ctx: &StrategyContext) -> FederationResult<AttachmentResult> {
        let conversation_id = ctx.conversation_id.as_deref().ok_or_else(|| {
            FederationError::missing_context("warehouse attach requires a conversation id")
        })?;
        let workspace = ctx.workspace_dir.as_deref().ok_or_else(|| {
            FederationError::missing_context("warehouse attach requires a workspace directory")
        })?;

        let db = &ctx.database_name;
        let catalog_path = workspace
            .join(conversation_id)
            .join(format!("{db}.duckdb"));
        if let Some(parent) = catalog_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| FederationError::internal(format!("workspace unavailable: {e}")))?;
        }
        ctx.engine
            .attach_file_catalog(db, &catalog_path.to_string_lossy())
            .await?;

        let driver = ctx.registry.driver_for(ProviderFamily::ClickHouse).await?;
        let metadata = driver.metadata(&ctx.datasource.config).await?;

        let mut attached = Vec::new();
        for table in &metadata.tables {
            let select = format!(
                "SELECT * FROM {}.{} LIMIT {MAX_MATERIALIZED_ROWS}",
                quote_ident(&table.schema),
                quote_ident(&table.name),
            );
            let result = driver.query(&select, &ctx.datasource.config).await?;
            ctx.engine
                .create_table_with_rows(db, &table.name, &result.columns, &result.rows)
                .await?;

            let columns = ctx.engine.describe(db, &table.name).await.ok();
            attached.push(AttachedTable {
                schema: db.clone(),
                table: table.name.clone(),
                path: format!("{db}.{}", table.name),
                schema_definition: columns.map(|cols| SimpleSchema {
                    database_name: db.clone(),
                    schema_name: "main".to_string(),
                    tables: vec![SimpleTable {
                        table_name: table.name.clone(),
                        columns: cols,
                    }],
                }),
            });
        }

        Ok(AttachmentResult::Catalog {
            attached_database_name: db.clone(),
            tables: attached,
        })
    }
}
