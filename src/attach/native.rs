// SPDX-License-Identifier: Apache-2.0

//! Native attachment strategy.
//!
//! Sources DuckDB can read directly through httpfs (object storage globs,
//! remote Parquet) are attached as an in-memory catalog holding a view over
//! the remote data. Nothing is copied; the view reads on demand.

use async_trait::async_trait;

use super::{AttachmentStrategy, StrategyContext};
use crate::driver::AttachOptions;
use crate::drivers::object_store::{ObjectStoreConfig, ObjectStoreDriver};
use crate::engine::quote_ident;
use crate::error::FederationResult;
use crate::provider::ProviderFamily;
use crate::types::{AttachedTable, AttachmentResult, SimpleSchema, SimpleTable};

pub struct NativeStrategy;

#[async_trait]
impl AttachmentStrategy for NativeStrategy {
    fn name(&self) -> &'static str {
        "native"
    }

    fn handles(&self, family: ProviderFamily) -> bool {
        matches!(
            family,
            ProviderFamily::ObjectStore(_) | ProviderFamily::ParquetHttp
        )
    }

    async fn attach(&self, ctx: &StrategyContext) -> FederationResult<AttachmentResult> {
        let family = ProviderFamily::from_id(&ctx.datasource.provider)?;
        let db = &ctx.database_name;

        let tables = match family {
            // the variant resolved from the provider id carries the
            // addressing style; the raw config may not name a provider
            ProviderFamily::ObjectStore(variant) => {
                let config = ObjectStoreConfig::parse_with_variant(
                    ctx.registry.context(),
                    &ctx.datasource.config,
                    variant,
                )?;
                ObjectStoreDriver::apply_settings(&ctx.engine, &config).await?;
                ctx.engine.attach_memory_catalog(db).await?;
                ctx.engine
                    .run(&format!(
                        "CREATE OR REPLACE VIEW {}.main.{} AS SELECT * FROM {}",
                        quote_ident(db),
                        quote_ident("data"),
                        ObjectStoreDriver::source_expression(&config),
                    ))
                    .await?;

                let columns = ctx.engine.describe(db, "data").await.ok();
                vec![AttachedTable {
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
                }]
            }
            // parquet-http normally self-attaches; this is the fallback path
            _ => {
                let driver = ctx.registry.driver_for(family).await?;
                driver
                    .attach(AttachOptions {
                        config: ctx.datasource.config.clone(),
                        database_name: db.clone(),
                        engine: ctx.engine.clone(),
                    })
                    .await?
                    .tables
            }
        };

        Ok(AttachmentResult::Catalog {
            attached_database_name: db.clone(),
            tables,
        })
    }
}
