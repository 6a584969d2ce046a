// SPDX-License-Identifier: Apache-2.0

//! Attachment orchestration.
//!
//! Wires a datasource into the shared engine. Drivers that own their attach
//! lifecycle (spreadsheets, remote Parquet) are tried first; when the driver
//! declines or fails, the orchestrator falls through to the attachment
//! strategies in fixed precedence: sheet, warehouse, native, foreign. The
//! foreign-database strategy is the catch-all for every provider with a
//! native DuckDB scanner.

mod foreign;
mod native;
mod sheet;
mod warehouse;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::instrument;

pub use foreign::ForeignStrategy;
pub use native::NativeStrategy;
pub use sheet::SheetStrategy;
pub use warehouse::WarehouseStrategy;

use serde_json::Value as JsonValue;

use crate::driver::{AttachOptions, DetachOptions, DriverRegistry};
use crate::engine::{quote_ident, EngineConnection};
use crate::error::{FederationError, FederationResult};
use crate::provider::{provider_mapping, ProviderFamily};
use crate::types::{AttachmentResult, DataSource, SimpleSchema};

/// Configs handed to drivers carry the datasource's provider id; the raw
/// config often omits it because the id lives on the datasource record.
fn config_with_provider(datasource: &DataSource) -> JsonValue {
    let mut config = datasource.config.clone();
    if let JsonValue::Object(map) = &mut config {
        map.entry("provider".to_string())
            .or_insert_with(|| JsonValue::String(datasource.provider.clone()));
    }
    config
}

/// Everything a strategy needs to perform one attachment.
pub struct StrategyContext {
    pub engine: EngineConnection,
    pub datasource: DataSource,
    /// Catalog/schema name the attachment lands under.
    pub database_name: String,
    pub registry: Arc<DriverRegistry>,
    pub conversation_id: Option<String>,
    pub workspace_dir: Option<PathBuf>,
}

/// One way of wiring a provider family into the engine.
#[async_trait]
pub trait AttachmentStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn handles(&self, family: ProviderFamily) -> bool;
    async fn attach(&self, ctx: &StrategyContext) -> FederationResult<AttachmentResult>;
}

/// One attachment request.
#[derive(Clone)]
pub struct AttachRequest {
    pub datasource: DataSource,
    /// Scope for durable catalogs created by the warehouse strategy.
    pub conversation_id: Option<String>,
    pub workspace_dir: Option<PathBuf>,
    /// Overrides the name derived from the datasource.
    pub database_name: Option<String>,
}

impl AttachRequest {
    pub fn new(datasource: DataSource) -> Self {
        Self {
            datasource,
            conversation_id: None,
            workspace_dir: None,
            database_name: None,
        }
    }

    fn database_name(&self) -> String {
        self.database_name
            .clone()
            .unwrap_or_else(|| self.datasource.database_name())
    }
}

/// Flattened single-relation result for callers that want exactly one view.
#[derive(Debug, Clone)]
pub struct CreateViewResult {
    pub view_name: String,
    pub display_name: String,
    pub schema: SimpleSchema,
}

pub struct AttachOrchestrator {
    engine: EngineConnection,
    registry: Arc<DriverRegistry>,
    strategies: Vec<Box<dyn AttachmentStrategy>>,
}

impl AttachOrchestrator {
    /// Orchestrator with the default strategy precedence.
    pub fn new(engine: EngineConnection, registry: Arc<DriverRegistry>) -> Self {
        Self::with_strategies(
            engine,
            registry,
            vec![
                Box::new(SheetStrategy),
                Box::new(WarehouseStrategy),
                Box::new(NativeStrategy),
                Box::new(ForeignStrategy),
            ],
        )
    }

    pub fn with_strategies(
        engine: EngineConnection,
        registry: Arc<DriverRegistry>,
        strategies: Vec<Box<dyn AttachmentStrategy>>,
    ) -> Self {
        Self {
            engine,
            registry,
            strategies,
        }
    }

    pub fn engine(&self) -> &EngineConnection {
        &self.engine
    }

    fn context(&self, engine: EngineConnection, request: &AttachRequest) -> StrategyContext {
        let mut datasource = request.datasource.clone();
        datasource.config = config_with_provider(&request.datasource);
        StrategyContext {
            engine,
            datasource,
            database_name: request.database_name(),
            registry: Arc::clone(&self.registry),
            conversation_id: request.conversation_id.clone(),
            workspace_dir: request.workspace_dir.clone(),
        }
    }

    /// Attaches a datasource into the shared engine.
    ///
    /// Families whose driver owns the attach lifecycle get the driver's
    /// attach first; a driver failure is logged and the strategy chain runs
    /// as fallback. The two steps are explicit so a fallback is always
    /// observable in the logs.
    #[instrument(skip(self, request), fields(
        datasource = %request.datasource.name,
        provider = %request.datasource.provider,
    ))]
    pub async fn attach_datasource(
        &self,
        request: &AttachRequest,
    ) -> FederationResult<AttachmentResult> {
        let family = ProviderFamily::from_id(&request.datasource.provider)?;
        let database_name = request.database_name();

        if family.owns_attach() {
            match self.registry.driver_for(family).await {
                Ok(driver) if driver.supports_attach() => {
                    let attempt = driver
                        .attach(AttachOptions {
                            config: config_with_provider(&request.datasource),
                            database_name: database_name.clone(),
                            engine: self.engine.clone(),
                        })
                        .await;
                    match attempt {
                        Ok(result) => {
                            return Ok(AttachmentResult::Catalog {
                                attached_database_name: database_name,
                                tables: result.tables,
                            });
                        }
                        Err(e) => {
                            tracing::debug!(error = %e, "driver attach failed, trying strategies");
                        }
                    }
                }
                Ok(_) => {}
                // a registry without the driver is an absence, not a failure
                Err(e) => {
                    tracing::debug!(error = %e, "no driver registered, trying strategies");
                }
            }
        }

        self.attach_via_strategies(self.engine.clone(), family, request)
            .await
    }

    /// Attaches into a specific connection instead of the shared engine.
    /// Skips the driver self-attach probe: the caller already knows where
    /// the attachment must land, so the strategy chain runs directly.
    #[instrument(skip(self, engine, request), fields(
        datasource = %request.datasource.name,
        provider = %request.datasource.provider,
    ))]
    pub async fn attach_datasource_to_connection(
        &self,
        engine: &EngineConnection,
        request: &AttachRequest,
    ) -> FederationResult<AttachmentResult> {
        let family = ProviderFamily::from_id(&request.datasource.provider)?;

        // parquet-http has no strategy-independent shape; route it through
        // its driver against the target connection
        if family == ProviderFamily::ParquetHttp {
            let driver = self.registry.driver_for(family).await?;
            let result = driver
                .attach(AttachOptions {
                    config: config_with_provider(&request.datasource),
                    database_name: request.database_name(),
                    engine: engine.clone(),
                })
                .await?;
            return Ok(AttachmentResult::Catalog {
                attached_database_name: request.database_name(),
                tables: result.tables,
            });
        }

        self.attach_via_strategies(engine.clone(), family, request)
            .await
    }

    async fn attach_via_strategies(
        &self,
        engine: EngineConnection,
        family: ProviderFamily,
        request: &AttachRequest,
    ) -> FederationResult<AttachmentResult> {
        let ctx = self.context(engine, request);
        for strategy in &self.strategies {
            if strategy.handles(family) {
                tracing::debug!(strategy = strategy.name(), "attaching");
                return strategy.attach(&ctx).await;
            }
        }
        Err(FederationError::unsupported_provider(
            request.datasource.provider.clone(),
        ))
    }

    /// Attaches and flattens the result into exactly one relation. A catalog
    /// result must carry at least one table with a schema definition.
    pub async fn attach_as_view(
        &self,
        request: &AttachRequest,
    ) -> FederationResult<CreateViewResult> {
        match self.attach_datasource(request).await? {
            AttachmentResult::View {
                view_name,
                display_name,
                schema,
            } => Ok(CreateViewResult {
                view_name,
                display_name,
                schema,
            }),
            AttachmentResult::Catalog { tables, .. } => {
                // the first relation is the datasource's primary one; a
                // missing schema there is an extraction failure, not a cue
                // to silently pick a later relation
                let table = tables.into_iter().next().ok_or_else(|| {
                    FederationError::schema_extraction("attachment produced no relations")
                })?;
                let schema = table.schema_definition.ok_or_else(|| {
                    FederationError::schema_extraction(format!(
                        "no schema definition for relation {}",
                        table.path
                    ))
                })?;
                Ok(CreateViewResult {
                    view_name: table.path,
                    display_name: request.datasource.name.clone(),
                    schema,
                })
            }
        }
    }

    /// Removes an attachment, best effort. Drivers that own their attach run
    /// their own detach; everything else detaches the catalog.
    #[instrument(skip(self, request), fields(
        datasource = %request.datasource.name,
        provider = %request.datasource.provider,
    ))]
    pub async fn detach_datasource(&self, request: &AttachRequest) -> FederationResult<()> {
        let family = ProviderFamily::from_id(&request.datasource.provider)?;
        let database_name = request.database_name();

        if family.owns_attach() {
            let driver = self.registry.driver_for(family).await?;
            return driver
                .detach(DetachOptions {
                    config: config_with_provider(&request.datasource),
                    database_name,
                    engine: self.engine.clone(),
                })
                .await;
        }

        if let ProviderFamily::ObjectStore(_) = family {
            let sql = format!(
                "DROP VIEW IF EXISTS {}.main.{}",
                quote_ident(&database_name),
                quote_ident("data")
            );
            if let Err(e) = self.engine.run(&sql).await {
                tracing::debug!(error = %e, "drop view skipped");
            }
        }
        self.engine.detach_catalog(&database_name).await
    }
}

/// Families with no strategy but a foreign mapping still attach; exposed for
/// callers that want to know ahead of time whether a provider can attach at
/// all.
pub fn can_attach(provider: &str) -> bool {
    match ProviderFamily::from_id(provider) {
        Ok(family) => {
            family.owns_attach()
                || provider_mapping(family).is_some()
                || matches!(
                    family,
                    ProviderFamily::Sheet
                        | ProviderFamily::ClickHouse
                        | ProviderFamily::ObjectStore(_)
                        | ProviderFamily::ParquetHttp
                )
        }
        Err(_) => false,
    }
}
