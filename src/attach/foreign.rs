// SPDX-License-Identifier: Apache-2.0

//! Foreign-database attachment strategy.
//!
//! Relational providers with a native DuckDB scanner (postgres, mysql,
//! sqlite) are attached read-only as a catalog; DuckDB pushes federated
//! queries down to the source. Always tried last: it is the catch-all for
//! every family with a [`crate::provider::provider_mapping`] entry.

use async_trait::async_trait;

use super::{AttachmentStrategy, StrategyContext};
use crate::connection_url::resolve_url;
use crate::engine::{quote_ident, quote_literal};
use crate::error::{FederationError, FederationResult};
use crate::provider::{provider_mapping, ProviderFamily};
use crate::types::{AttachedTable, AttachmentResult, SimpleSchema, SimpleTable};

pub struct ForeignStrategy;

#[async_trait]
impl AttachmentStrategy for ForeignStrategy {
    fn name(&self) -> &'static str {
        "foreign"
    }

    fn handles(&self, family: ProviderFamily) -> bool {
        provider_mapping(family).is_some()
    }

    async fn attach(&self, ctx: &StrategyContext) -> FederationResult<AttachmentResult> {
        let family = ProviderFamily::from_id(&ctx.datasource.provider)?;
        let mapping = provider_mapping(family).ok_or_else(|| {
            FederationError::unsupported_provider(ctx.datasource.provider.clone())
        })?;
        let db = &ctx.database_name;

        let dsn = resolve_url(family, &ctx.datasource.config)?;
        // the sqlite scanner wants a bare file path
        let dsn = match family {
            ProviderFamily::Sqlite => dsn
                .trim_start_matches("sqlite://")
                .trim_start_matches("sqlite:")
                .to_string(),
            _ => dsn,
        };

        ctx.engine
            .run(&format!(
                "INSTALL {ext}; LOAD {ext};",
                ext = mapping.duckdb_type
            ))
            .await?;

        if !ctx.engine.catalog_exists(db).await? {
            ctx.engine
                .run(&format!(
                    "ATTACH {} AS {} (TYPE {}, READ_ONLY)",
                    quote_literal(&dsn),
                    quote_ident(db),
                    mapping.duckdb_type,
                ))
                .await?;
        }

        let tables = self.list_tables(ctx, db).await?;
        Ok(AttachmentResult::Catalog {
            attached_database_name: db.clone(),
            tables,
        })
    }
}

impl ForeignStrategy {
    /// Enumerates the attached catalog's tables through the engine's
    /// information_schema, with per-table column definitions.
    async fn list_tables(
        &self,
        ctx: &StrategyContext,
        db: &str,
    ) -> FederationResult<Vec<AttachedTable>> {
        let sql = format!(
            "SELECT table_schema, table_name FROM information_schema.tables \
             WHERE table_catalog = {} \
               AND table_schema NOT IN ('information_schema', 'pg_catalog') \
             ORDER BY table_schema, table_name",
            quote_literal(db)
        );
        let result = ctx.engine.query_rows(&sql).await?;

        let mut tables = Vec::with_capacity(result.rows.len());
        for row in &result.rows {
            let (Some(schema), Some(name)) = (
                row.get("table_schema").and_then(|v| v.as_str()),
                row.get("table_name").and_then(|v| v.as_str()),
            ) else {
                continue;
            };

            let describe_target = format!("{db}.{schema}.{name}");
            let describe_sql = format!(
                "DESCRIBE {}.{}.{}",
                quote_ident(db),
                quote_ident(schema),
                quote_ident(name)
            );
            let columns = ctx.engine.query_rows(&describe_sql).await.ok().map(|r| {
                r.rows
                    .iter()
                    .map(|row| crate::types::SimpleColumn {
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
                    .collect::<Vec<_>>()
            });
            tables.push(AttachedTable {
                schema: db.to_string(),
                table: name.to_string(),
                path: describe_target,
                schema_definition: columns.map(|cols| SimpleSchema {
                    database_name: db.to_string(),
                    schema_name: schema.to_string(),
                    tables: vec![SimpleTable {
                        table_name: name.to_string(),
                        columns: cols,
                    }],
                }),
            });
        }
        Ok(tables)
    }
}
