// SPDX-License-Identifier: Apache-2.0

//! Provider classification.
//!
//! Every datasource carries a free-form provider string. It is parsed exactly
//! once, at the edge, into a [`ProviderFamily`]; all downstream dispatch
//! matches on the enum instead of re-inspecting strings.

use crate::error::{FederationError, FederationResult};

/// Addressing/endpoint flavor of an S3-compatible store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectStoreVariant {
    /// AWS S3 proper: region-derived endpoint, virtual-host addressing.
    Aws,
    /// DigitalOcean Spaces: `{region}.digitaloceanspaces.com`, path style.
    DigitalOcean,
    /// Any other S3-compatible endpoint (MinIO, R2, ...): explicit endpoint
    /// URL, path style.
    Generic,
}

/// Closed set of provider families this layer understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderFamily {
    Postgres,
    MySql,
    ClickHouse,
    /// Embedded relational store (SQLite database file).
    Sqlite,
    ObjectStore(ObjectStoreVariant),
    /// Google Sheets shared as CSV exports.
    Sheet,
    /// Parquet files served over HTTP(S).
    ParquetHttp,
}

impl ProviderFamily {
    /// Parses a provider id string. Unknown ids are an error, not a panic.
    pub fn from_id(provider: &str) -> FederationResult<Self> {
        match provider.trim().to_ascii_lowercase().as_str() {
            "postgresql" | "postgres" => Ok(Self::Postgres),
            "mysql" => Ok(Self::MySql),
            "clickhouse" | "clickhouse-node" | "clickhouse-web" => Ok(Self::ClickHouse),
            "sqlite" | "embedded" => Ok(Self::Sqlite),
            "s3" => Ok(Self::ObjectStore(ObjectStoreVariant::Aws)),
            "s3-compatible" | "minio" => Ok(Self::ObjectStore(ObjectStoreVariant::Generic)),
            "digitalocean-spaces" => Ok(Self::ObjectStore(ObjectStoreVariant::DigitalOcean)),
            "gsheet-csv" => Ok(Self::Sheet),
            "parquet-http" | "parquet-online" => Ok(Self::ParquetHttp),
            other => Err(FederationError::unsupported_provider(other)),
        }
    }

    /// Canonical id used for driver registry lookup.
    pub fn canonical_id(&self) -> &'static str {
        match self {
            Self::Postgres => "postgresql",
            Self::MySql => "mysql",
            Self::ClickHouse => "clickhouse",
            Self::Sqlite => "sqlite",
            Self::ObjectStore(_) => "s3",
            Self::Sheet => "gsheet-csv",
            Self::ParquetHttp => "parquet-http",
        }
    }

    /// True for families whose driver owns the attach lifecycle and is tried
    /// before any attachment strategy.
    pub fn owns_attach(&self) -> bool {
        matches!(self, Self::Sheet | Self::ParquetHttp)
    }
}

/// How a foreign relational database is attached natively inside the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForeignProviderMapping {
    /// DuckDB `ATTACH ... (TYPE <x>)` value; also the extension to load.
    pub duckdb_type: &'static str,
    /// URL scheme the attach DSN must carry.
    pub scheme: &'static str,
}

/// Static registry of foreign-database mappings. Providers absent here cannot
/// be attached through the foreign-database path.
pub fn provider_mapping(family: ProviderFamily) -> Option<ForeignProviderMapping> {
    match family {
        ProviderFamily::Postgres => Some(ForeignProviderMapping {
            duckdb_type: "postgres",
            scheme: "postgresql",
        }),
        ProviderFamily::MySql => Some(ForeignProviderMapping {
            duckdb_type: "mysql",
            scheme: "mysql",
        }),
        ProviderFamily::Sqlite => Some(ForeignProviderMapping {
            duckdb_type: "sqlite",
            scheme: "sqlite",
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_providers_parse() {
        assert_eq!(
            ProviderFamily::from_id("postgresql").unwrap(),
            ProviderFamily::Postgres
        );
        // case and whitespace insensitive
        assert_eq!(
            ProviderFamily::from_id(" Postgres ").unwrap(),
            ProviderFamily::Postgres
        );
    }

    #[test]
    fn clickhouse_aliases_collapse() {
        for id in ["clickhouse", "clickhouse-node", "clickhouse-web"] {
            assert_eq!(
                ProviderFamily::from_id(id).unwrap(),
                ProviderFamily::ClickHouse
            );
        }
    }

    #[test]
    fn unknown_provider_is_an_error() {
        let err = ProviderFamily::from_id("oracle").unwrap_err();
        assert!(matches!(err, FederationError::UnsupportedProvider { .. }));
    }

    #[test]
    fn only_sheet_and_parquet_own_attach() {
        assert!(ProviderFamily::Sheet.owns_attach());
        assert!(ProviderFamily::ParquetHttp.owns_attach());
        assert!(!ProviderFamily::Postgres.owns_attach());
        assert!(!ProviderFamily::ObjectStore(ObjectStoreVariant::Aws).owns_attach());
    }

    #[test]
    fn foreign_mapping_covers_relational_families() {
        assert_eq!(
            provider_mapping(ProviderFamily::Postgres).unwrap().duckdb_type,
            "postgres"
        );
        assert!(provider_mapping(ProviderFamily::ClickHouse).is_none());
        assert!(provider_mapping(ProviderFamily::Sheet).is_none());
    }
}
