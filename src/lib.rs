// SPDX-License-Identifier: Apache-2.0

//! Tributary, a datasource federation layer.
//!
//! Lets one analytical query read transparently from many heterogeneous
//! external sources (relational databases, object storage, spreadsheet
//! exports, embedded stores, remote Parquet files) by attaching each of them
//! as relations inside a shared embedded DuckDB engine.
//!
//! The crate exposes three things to the surrounding application:
//! - the [`driver::DataSourceDriver`] contract and one implementation per
//!   provider family (see [`drivers`]),
//! - the [`attach`] module: strategy-based attachment orchestration, and
//! - the [`engine::EngineConnection`] handle the caller shares with us.

pub mod attach;
pub mod cache;
pub mod connection_url;
pub mod driver;
pub mod drivers;
pub mod engine;
pub mod error;
pub mod provider;
pub mod types;
pub mod value;

pub use attach::{AttachOrchestrator, AttachRequest, CreateViewResult};
pub use driver::{DataSourceDriver, DriverContext, DriverRegistry};
pub use engine::EngineConnection;
pub use error::{FederationError, FederationResult};
pub use provider::ProviderFamily;
pub use types::{AttachmentResult, DataSource, DatasourceMetadata, ResultSet, SimpleSchema};
