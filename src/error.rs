// SPDX-License-Identifier: Apache-2.0

//! Normalized error types for the federation layer.
//!
//! Driver- and engine-specific failures are mapped to these unified kinds so
//! callers can distinguish retryable conditions (connection failures,
//! timeouts) from terminal ones (bad configuration, unsupported provider).

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unified error type for all federation operations.
#[derive(Debug, Error, Serialize, Deserialize)]
pub enum FederationError {
    /// Provider-specific config validation failed. Never retried; `fields`
    /// names the offending config keys.
    #[error("Invalid configuration: {message}")]
    ConfigValidation { message: String, fields: Vec<String> },

    #[error("Connection failed: {message}")]
    Connection { message: String },

    #[error("connection operation timed out after {timeout_ms} ms")]
    ConnectionTimeout { timeout_ms: u64 },

    #[error("Query execution failed: {message}")]
    QueryExecution { message: String },

    /// Attach succeeded but no usable schema could be derived. Non-fatal for
    /// attach unless the caller explicitly required a schema.
    #[error("Schema extraction failed: {message}")]
    SchemaExtraction { message: String },

    /// A conversation/workspace-scoped strategy was invoked without the
    /// context it needs to create a durable catalog.
    #[error("Missing context: {message}")]
    MissingContext { message: String },

    #[error("No driver or attachment strategy found for provider: {provider}")]
    UnsupportedProvider { provider: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl FederationError {
    pub fn config_validation(msg: impl Into<String>, fields: Vec<String>) -> Self {
        Self::ConfigValidation {
            message: msg.into(),
            fields,
        }
    }

    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::Connection { message: msg.into() }
    }

    pub fn timeout(timeout_ms: u64) -> Self {
        Self::ConnectionTimeout { timeout_ms }
    }

    pub fn query_execution(msg: impl Into<String>) -> Self {
        Self::QueryExecution { message: msg.into() }
    }

    pub fn schema_extraction(msg: impl Into<String>) -> Self {
        Self::SchemaExtraction { message: msg.into() }
    }

    pub fn missing_context(msg: impl Into<String>) -> Self {
        Self::MissingContext { message: msg.into() }
    }

    pub fn unsupported_provider(provider: impl Into<String>) -> Self {
        Self::UnsupportedProvider {
            provider: provider.into(),
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal { message: msg.into() }
    }

    /// True for transient failures the caller may retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::ConnectionTimeout { .. }
        )
    }
}

/// Result type alias for federation operations.
pub type FederationResult<T> = Result<T, FederationError>;
