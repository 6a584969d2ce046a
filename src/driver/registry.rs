// SPDX-License-Identifier: Apache-2.0

//! Driver registry.
//!
//! Closed, compile-time set of driver factories keyed by canonical provider
//! id. Drivers are instantiated lazily with the registry's context and cached
//! for the registry's lifetime.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::context::DriverContext;
use super::DataSourceDriver;
use crate::error::{FederationError, FederationResult};
use crate::provider::ProviderFamily;

/// Builds one driver instance from the shared context.
pub type DriverFactory = Arc<dyn Fn(DriverContext) -> Arc<dyn DataSourceDriver> + Send + Sync>;

pub struct DriverRegistry {
    ctx: DriverContext,
    factories: HashMap<&'static str, DriverFactory>,
    instances: RwLock<HashMap<&'static str, Arc<dyn DataSourceDriver>>>,
}

impl DriverRegistry {
    /// Empty registry; used by tests that register mocks.
    pub fn new(ctx: DriverContext) -> Self {
        Self {
            ctx,
            factories: HashMap::new(),
            instances: RwLock::new(HashMap::new()),
        }
    }

    /// Registry preloaded with every built-in driver.
    pub fn with_defaults(ctx: DriverContext) -> Self {
        let mut registry = Self::new(ctx);
        registry.register("postgresql", Arc::new(|ctx| {
            Arc::new(crate::drivers::postgres::PostgresDriver::new(ctx)) as Arc<dyn DataSourceDriver>
        }));
        registry.register("mysql", Arc::new(|ctx| {
            Arc::new(crate::drivers::mysql::MySqlDriver::new(ctx)) as Arc<dyn DataSourceDriver>
        }));
        registry.register("clickhouse", Arc::new(|ctx| {
            Arc::new(crate::drivers::clickhouse::ClickHouseDriver::new(ctx)) as Arc<dyn DataSourceDriver>
        }));
        registry.register("sqlite", Arc::new(|ctx| {
            Arc::new(crate::drivers::sqlite::SqliteDriver::new(ctx)) as Arc<dyn DataSourceDriver>
        }));
        registry.register("s3", Arc::new(|ctx| {
            Arc::new(crate::drivers::object_store::ObjectStoreDriver::new(ctx)) as Arc<dyn DataSourceDriver>
        }));
        registry.register("gsheet-csv", Arc::new(|ctx| {
            Arc::new(crate::drivers::sheet::SheetDriver::new(ctx)) as Arc<dyn DataSourceDriver>
        }));
        registry.register("parquet-http", Arc::new(|ctx| {
            Arc::new(crate::drivers::parquet_http::ParquetHttpDriver::new(ctx)) as Arc<dyn DataSourceDriver>
        }));
        registry
    }

    pub fn register(&mut self, id: &'static str, factory: DriverFactory) {
        self.factories.insert(id, factory);
    }

    /// The context drivers are instantiated with.
    pub fn context(&self) -> &DriverContext {
        &self.ctx
    }

    /// Resolves the driver for a provider family, instantiating it on first
    /// use.
    pub async fn driver_for(
        &self,
        family: ProviderFamily,
    ) -> FederationResult<Arc<dyn DataSourceDriver>> {
        let id = family.canonical_id();
        if let Some(existing) = self.instances.read().await.get(id) {
            return Ok(Arc::clone(existing));
        }

        let factory = self
            .factories
            .get(id)
            .ok_or_else(|| FederationError::unsupported_provider(id))?;

        let mut instances = self.instances.write().await;
        if let Some(existing) = instances.get(id) {
            return Ok(Arc::clone(existing));
        }
        let driver = factory(self.ctx.clone());
        instances.insert(id, Arc::clone(&driver));
        Ok(driver)
    }

    /// Resolves by raw provider string.
    pub async fn driver_for_provider(
        &self,
        provider: &str,
    ) -> FederationResult<Arc<dyn DataSourceDriver>> {
        self.driver_for(ProviderFamily::from_id(provider)?).await
    }

    /// Closes every instantiated driver.
    pub async fn close_all(&self) -> FederationResult<()> {
        let drivers: Vec<Arc<dyn DataSourceDriver>> = {
            let mut instances = self.instances.write().await;
            instances.drain().map(|(_, d)| d).collect()
        };
        for driver in drivers {
            driver.close().await?;
        }
        Ok(())
    }
}
