// SPDX-License-Identifier: Apache-2.0

//! Driver contract.
//!
//! Every provider implements [`DataSourceDriver`]: a uniform async surface
//! for connectivity checks, query execution, catalog introspection and,
//! for drivers that own their attach lifecycle, attachment into the shared
//! engine.

mod context;
mod registry;

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

pub use context::{DriverContext, SecretStore};
pub use registry::{DriverFactory, DriverRegistry};

use crate::engine::EngineConnection;
use crate::error::{FederationError, FederationResult};
use crate::types::{DatasourceMetadata, DriverAttachResult, ResultSet};

/// Default bound on connection-establishing operations.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

/// Options for a driver-owned attach.
#[derive(Clone)]
pub struct AttachOptions {
    pub config: JsonValue,
    /// Catalog/schema name to attach under inside the shared engine.
    pub database_name: String,
    pub engine: EngineConnection,
}

/// Options for a driver-owned detach.
#[derive(Clone)]
pub struct DetachOptions {
    pub config: JsonValue,
    pub database_name: String,
    pub engine: EngineConnection,
}

/// Uniform async contract all provider drivers implement.
///
/// `query` and `metadata` take the datasource config directly; drivers cache
/// whatever live state they need (pools, embedded instances) keyed by a
/// canonical form of that config, so repeated calls with an equivalent config
/// reuse one session.
#[async_trait]
pub trait DataSourceDriver: Send + Sync {
    /// Canonical provider id this driver serves.
    fn provider_id(&self) -> &'static str;

    /// Validates the config and verifies the source is reachable. Bounded by
    /// the connect timeout.
    async fn test_connection(&self, config: &JsonValue) -> FederationResult<()>;

    /// Executes a read query against the source and returns normalized rows.
    async fn query(&self, sql: &str, config: &JsonValue) -> FederationResult<ResultSet>;

    /// Introspects the source's relational catalog. A source with zero tables
    /// returns empty metadata, not an error.
    async fn metadata(&self, config: &JsonValue) -> FederationResult<DatasourceMetadata>;

    /// True when this driver owns its attach lifecycle.
    fn supports_attach(&self) -> bool {
        false
    }

    /// Attaches the source into the shared engine. Only meaningful when
    /// `supports_attach` is true.
    async fn attach(&self, options: AttachOptions) -> FederationResult<DriverAttachResult> {
        let _ = options;
        Err(FederationError::unsupported_provider(format!(
            "{} does not support driver-owned attach",
            self.provider_id()
        )))
    }

    /// Removes a previous attach. Best effort: missing relations are not an
    /// error.
    async fn detach(&self, options: DetachOptions) -> FederationResult<()> {
        let _ = options;
        Ok(())
    }

    /// Releases every cached session held by this driver.
    async fn close(&self) -> FederationResult<()>;
}

/// Bounds a connection-establishing future by `timeout_ms` and by the
/// context's cancellation token, whichever fires first.
pub async fn bounded<T, F>(
    ctx: &DriverContext,
    timeout_ms: u64,
    fut: F,
) -> FederationResult<T>
where
    F: std::future::Future<Output = FederationResult<T>>,
{
    tokio::select! {
        _ = ctx.cancellation.cancelled() => Err(FederationError::Cancelled),
        res = tokio::time::timeout(Duration::from_millis(timeout_ms), fut) => match res {
            Ok(inner) => inner,
            Err(_) => Err(FederationError::timeout(timeout_ms)),
        },
    }
}
