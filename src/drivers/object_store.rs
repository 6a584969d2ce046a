// SPDX-License-Identifier: Apache-2.0

//! S3-compatible object storage driver.
//!
//! Files in a bucket (Parquet, CSV or JSON) are exposed as one relation via
//! DuckDB's httpfs extension. Each distinct config gets a private in-memory
//! DuckDB instance holding a scoped S3 secret and a `data` view over the
//! object glob; the cache key covers every field that changes the result.
//!
//! Attachment into the shared engine is done by the native strategy, which
//! reuses [`ObjectStoreDriver::apply_settings`] and
//! [`ObjectStoreDriver::source_expression`] against the shared connection.

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::cache::SessionCache;
use crate::driver::{bounded, DataSourceDriver, DriverContext};
use crate::engine::{quote_literal, EngineConnection};
use crate::error::{FederationError, FederationResult};
use crate::provider::{ObjectStoreVariant, ProviderFamily};
use crate::types::{sanitize_identifier, DatasourceMetadata, ResultSet, TableInfo};

/// Validated view of an object-store config.
#[derive(Debug, Clone)]
pub struct ObjectStoreConfig {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub region: String,
    pub endpoint_url: Option<String>,
    pub bucket: String,
    pub prefix: String,
    pub include: Option<String>,
    pub format: FileFormat,
    pub variant: ObjectStoreVariant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Parquet,
    Csv,
    Json,
}

impl FileFormat {
    fn parse(s: &str) -> FederationResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "parquet" | "" => Ok(Self::Parquet),
            "csv" => Ok(Self::Csv),
            "json" | "ndjson" | "jsonl" => Ok(Self::Json),
            other => Err(FederationError::config_validation(
                format!("unsupported file format: {other}"),
                vec!["format".into()],
            )),
        }
    }

    fn reader(&self) -> &'static str {
        match self {
            Self::Parquet => "read_parquet",
            Self::Csv => "read_csv_auto",
            Self::Json => "read_json_auto",
        }
    }

    fn default_glob(&self) -> &'static str {
        match self {
            Self::Parquet => "**/*.parquet",
            Self::Csv => "**/*.csv",
            Self::Json => "**/*.json",
        }
    }
}

impl ObjectStoreConfig {
    /// Parses a config whose variant is derived from the config itself: an
    /// explicit `provider` key wins, otherwise endpoint presence selects
    /// Generic and absence selects AWS.
    pub fn parse(ctx: &DriverContext, config: &JsonValue) -> FederationResult<Self> {
        Self::parse_inner(ctx, config, None)
    }

    /// Parses a config with the variant already resolved from the datasource
    /// provider id. The attachment path uses this so a DigitalOcean or MinIO
    /// datasource keeps its addressing style even when the raw config carries
    /// no `provider` key.
    pub fn parse_with_variant(
        ctx: &DriverContext,
        config: &JsonValue,
        variant: ObjectStoreVariant,
    ) -> FederationResult<Self> {
        Self::parse_inner(ctx, config, Some(variant))
    }

    fn parse_inner(
        ctx: &DriverContext,
        config: &JsonValue,
        variant: Option<ObjectStoreVariant>,
    ) -> FederationResult<Self> {
        let str_field = |key: &str| {
            config
                .get(key)
                .and_then(|v| v.as_str())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };

        let mut missing = vec![];
        let access_key_id = str_field("access_key_id").unwrap_or_else(|| {
            missing.push("access_key_id".to_string());
            String::new()
        });
        let secret_access_key = str_field("secret_access_key").unwrap_or_else(|| {
            missing.push("secret_access_key".to_string());
            String::new()
        });
        let bucket = str_field("bucket").unwrap_or_else(|| {
            missing.push("bucket".to_string());
            String::new()
        });
        if !missing.is_empty() {
            return Err(FederationError::config_validation(
                format!("missing required fields: {}", missing.join(", ")),
                missing,
            ));
        }

        let variant = match variant {
            Some(v) => v,
            None => match str_field("provider").as_deref() {
                Some(p) => match ProviderFamily::from_id(p)? {
                    ProviderFamily::ObjectStore(v) => v,
                    _ => ObjectStoreVariant::Generic,
                },
                None if str_field("endpoint_url").is_some() => ObjectStoreVariant::Generic,
                None => ObjectStoreVariant::Aws,
            },
        };

        Ok(Self {
            access_key_id,
            secret_access_key: ctx.resolve_secret(&secret_access_key),
            region: str_field("region").unwrap_or_else(|| "us-east-1".to_string()),
            endpoint_url: str_field("endpoint_url"),
            bucket,
            prefix: str_field("prefix").unwrap_or_default(),
            include: str_field("include").or_else(|| str_field("include_pattern")),
            format: FileFormat::parse(&str_field("format").unwrap_or_default())?,
            variant,
        })
    }

    /// Every field that affects what the view reads participates in the key,
    /// credentials and addressing variant included: a rotated secret or a
    /// variant change must not reuse the stale session.
    pub fn cache_key(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}/{}|{}|{:?}|{:?}",
            self.access_key_id,
            self.secret_access_key,
            self.region,
            self.endpoint_url.as_deref().unwrap_or(""),
            self.bucket,
            self.prefix,
            self.include.as_deref().unwrap_or(""),
            self.format,
            self.variant,
        )
    }

    /// Endpoint and URL addressing style for the variant.
    fn endpoint(&self) -> (Option<String>, &'static str) {
        match self.variant {
            ObjectStoreVariant::Aws => (None, "vhost"),
            ObjectStoreVariant::DigitalOcean => (
                Some(
                    self.endpoint_url
                        .clone()
                        .unwrap_or_else(|| format!("{}.digitaloceanspaces.com", self.region)),
                ),
                "path",
            ),
            ObjectStoreVariant::Generic => (self.endpoint_url.clone(), "path"),
        }
    }

    fn glob(&self) -> String {
        let pattern = self
            .include
            .as_deref()
            .unwrap_or_else(|| self.format.default_glob());
        let mut path = format!("s3://{}", self.bucket);
        if !self.prefix.is_empty() {
            path.push('/');
            path.push_str(self.prefix.trim_matches('/'));
        }
        format!("{path}/{}", pattern.trim_start_matches('/'))
    }
}

struct ObjectStoreSession {
    engine: EngineConnection,
}

pub struct ObjectStoreDriver {
    ctx: DriverContext,
    sessions: SessionCache<ObjectStoreSession>,
}

impl ObjectStoreDriver {
    pub fn new(ctx: DriverContext) -> Self {
        Self {
            ctx,
            sessions: SessionCache::new(),
        }
    }

    /// Installs httpfs and writes a scoped S3 secret on `engine`. Safe to
    /// repeat: the secret is replaced in place.
    pub async fn apply_settings(
        engine: &EngineConnection,
        config: &ObjectStoreConfig,
    ) -> FederationResult<()> {
        engine.run("INSTALL httpfs; LOAD httpfs;").await?;

        let secret_name = format!("obj_{}", sanitize_identifier(&config.bucket));
        let (endpoint, url_style) = config.endpoint();
        let mut parts = vec![
            "TYPE S3".to_string(),
            format!("KEY_ID {}", quote_literal(&config.access_key_id)),
            format!("SECRET {}", quote_literal(&config.secret_access_key)),
            format!("REGION {}", quote_literal(&config.region)),
            format!("URL_STYLE {}", quote_literal(url_style)),
            format!("SCOPE {}", quote_literal(&format!("s3://{}", config.bucket))),
        ];
        if let Some(endpoint) = endpoint {
            parts.push(format!("ENDPOINT {}", quote_literal(&endpoint)));
        }
        let sql = format!(
            "CREATE OR REPLACE SECRET {} ({})",
            sanitize_identifier(&secret_name),
            parts.join(", ")
        );
        engine.run(&sql).await
    }

    /// Table function expression reading the configured objects.
    pub fn source_expression(config: &ObjectStoreConfig) -> String {
        format!(
            "{}({})",
            config.format.reader(),
            quote_literal(&config.glob())
        )
    }

    async fn session_for(
        &self,
        config: &ObjectStoreConfig,
    ) -> FederationResult<std::sync::Arc<ObjectStoreSession>> {
        let key = config.cache_key();
        self.sessions
            .get_or_try_insert(&key, || async {
                let engine = EngineConnection::open_in_memory()?;
                Self::apply_settings(&engine, config).await?;
                engine
                    .run(&format!(
                        "CREATE OR REPLACE VIEW data AS SELECT * FROM {}",
                        Self::source_expression(config)
                    ))
                    .await?;
                Ok(ObjectStoreSession { engine })
            })
            .await
    }
}

#[async_trait]
impl DataSourceDriver for ObjectStoreDriver {
    fn provider_id(&self) -> &'static str {
        "s3"
    }

    async fn test_connection(&self, config: &JsonValue) -> FederationResult<()> {
        let parsed = ObjectStoreConfig::parse(&self.ctx, config)?;
        bounded(&self.ctx, self.ctx.connect_timeout_ms, async {
            let session = self.session_for(&parsed).await?;
            session
                .engine
                .query_rows("SELECT * FROM data LIMIT 1")
                .await?;
            Ok(())
        })
        .await
    }

    async fn query(&self, sql: &str, config: &JsonValue) -> FederationResult<ResultSet> {
        let parsed = ObjectStoreConfig::parse(&self.ctx, config)?;
        let session = self.session_for(&parsed).await?;
        session.engine.query_rows(sql).await
    }

    async fn metadata(&self, config: &JsonValue) -> FederationResult<DatasourceMetadata> {
        let parsed = ObjectStoreConfig::parse(&self.ctx, config)?;
        let session = self.session_for(&parsed).await?;
        let columns = session.engine.describe("main", "data").await?;

        let mut metadata = DatasourceMetadata::from_information_schema(
            self.provider_id(),
            columns
                .into_iter()
                .enumerate()
                .map(|(idx, col)| {
                    (
                        "main".to_string(),
                        "data".to_string(),
                        col.column_name,
                        col.column_type,
                        (idx + 1) as u32,
                        true,
                    )
                })
                .collect(),
        );
        if metadata.tables.is_empty() {
            metadata.tables.push(TableInfo {
                schema: "main".to_string(),
                name: "data".to_string(),
                row_count_estimate: None,
                primary_keys: vec![],
            });
        }
        Ok(metadata)
    }

    async fn close(&self) -> FederationResult<()> {
        self.sessions.drain().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(config: JsonValue) -> FederationResult<ObjectStoreConfig> {
        ObjectStoreConfig::parse(&DriverContext::new(), &config)
    }

    #[test]
    fn missing_fields_are_all_reported() {
        let err = parse(json!({"region": "fra1"})).unwrap_err();
        match err {
            FederationError::ConfigValidation { fields, .. } => {
                assert!(fields.contains(&"access_key_id".to_string()));
                assert!(fields.contains(&"secret_access_key".to_string()));
                assert!(fields.contains(&"bucket".to_string()));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn cache_key_covers_result_affecting_fields() {
        let base = json!({
            "access_key_id": "AK", "secret_access_key": "SK",
            "bucket": "lake", "region": "us-east-1", "prefix": "events",
        });
        let a = parse(base.clone()).unwrap().cache_key();

        let mut changed = base.clone();
        changed["prefix"] = json!("other");
        let b = parse(changed).unwrap().cache_key();
        assert_ne!(a, b);

        let mut rotated = base.clone();
        rotated["secret_access_key"] = json!("SK2");
        let d = parse(rotated).unwrap().cache_key();
        assert_ne!(a, d);

        let mut revariant = base.clone();
        revariant["provider"] = json!("digitalocean-spaces");
        let e = parse(revariant).unwrap().cache_key();
        assert_ne!(a, e);

        let mut same = base.clone();
        same["extra_unused"] = json!("x");
        let c = parse(same).unwrap().cache_key();
        assert_eq!(a, c);
    }

    #[test]
    fn resolved_variant_overrides_config_heuristics() {
        let config = json!({
            "access_key_id": "AK", "secret_access_key": "SK",
            "bucket": "lake", "region": "fra1",
        });
        let cfg = ObjectStoreConfig::parse_with_variant(
            &DriverContext::new(),
            &config,
            ObjectStoreVariant::DigitalOcean,
        )
        .unwrap();
        assert_eq!(cfg.variant, ObjectStoreVariant::DigitalOcean);
        let (endpoint, style) = cfg.endpoint();
        assert_eq!(endpoint.as_deref(), Some("fra1.digitaloceanspaces.com"));
        assert_eq!(style, "path");
    }

    #[test]
    fn digitalocean_endpoint_derives_from_region() {
        let cfg = parse(json!({
            "provider": "digitalocean-spaces",
            "access_key_id": "AK", "secret_access_key": "SK",
            "bucket": "lake", "region": "fra1",
        }))
        .unwrap();
        let (endpoint, style) = cfg.endpoint();
        assert_eq!(endpoint.as_deref(), Some("fra1.digitaloceanspaces.com"));
        assert_eq!(style, "path");
    }

    #[test]
    fn aws_uses_vhost_and_no_endpoint() {
        let cfg = parse(json!({
            "access_key_id": "AK", "secret_access_key": "SK",
            "bucket": "lake", "region": "eu-west-1",
        }))
        .unwrap();
        let (endpoint, style) = cfg.endpoint();
        assert!(endpoint.is_none());
        assert_eq!(style, "vhost");
    }

    #[test]
    fn source_expression_matches_format() {
        let cfg = parse(json!({
            "access_key_id": "AK", "secret_access_key": "SK",
            "bucket": "lake", "prefix": "raw/", "format": "json",
        }))
        .unwrap();
        assert_eq!(
            ObjectStoreDriver::source_expression(&cfg),
            "read_json_auto('s3://lake/raw/**/*.json')"
        );

        let cfg = parse(json!({
            "access_key_id": "AK", "secret_access_key": "SK",
            "bucket": "lake", "include": "year=2024/*.parquet",
        }))
        .unwrap();
        assert_eq!(
            ObjectStoreDriver::source_expression(&cfg),
            "read_parquet('s3://lake/year=2024/*.parquet')"
        );
    }
}
