// SPDX-License-Identifier: Apache-2.0

//! Capabilities handed to drivers at construction time.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::DEFAULT_CONNECT_TIMEOUT_MS;
use crate::engine::EngineConnection;

/// Read access to secrets referenced from datasource configs.
pub trait SecretStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
}

/// Ambient capabilities shared by every driver instance: secret resolution,
/// cooperative cancellation and, where a driver needs it, the caller's shared
/// engine connection.
#[derive(Clone)]
pub struct DriverContext {
    pub secrets: Option<Arc<dyn SecretStore>>,
    pub cancellation: CancellationToken,
    pub engine: Option<EngineConnection>,
    /// Bound on connection-establishing operations, in milliseconds.
    pub connect_timeout_ms: u64,
}

impl DriverContext {
    pub fn new() -> Self {
        Self {
            secrets: None,
            cancellation: CancellationToken::new(),
            engine: None,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
        }
    }

    pub fn with_engine(mut self, engine: EngineConnection) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn with_secrets(mut self, secrets: Arc<dyn SecretStore>) -> Self {
        self.secrets = Some(secrets);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn with_connect_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.connect_timeout_ms = timeout_ms;
        self
    }

    /// Resolves `${secret:...}` placeholders in a config value against the
    /// secret store. Values without a placeholder pass through unchanged.
    pub fn resolve_secret(&self, value: &str) -> String {
        let Some(rest) = value.strip_prefix("${secret:") else {
            return value.to_string();
        };
        let Some(key) = rest.strip_suffix('}') else {
            return value.to_string();
        };
        match self.secrets.as_ref().and_then(|s| s.get(key)) {
            Some(resolved) => resolved,
            None => value.to_string(),
        }
    }
}

impl Default for DriverContext {
    fn default() -> Self {
        Self::new()
    }
}
