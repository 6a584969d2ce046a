// SPDX-License-Identifier: Apache-2.0

//! End-to-end attachment scenarios against an in-memory engine, with mock
//! drivers standing in for the network-facing providers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};
use uuid::Uuid;

use tributary::attach::{AttachmentStrategy, StrategyContext};
use tributary::driver::{AttachOptions, DataSourceDriver, DetachOptions, DriverContext};
use tributary::engine::quote_ident;
use tributary::error::{FederationError, FederationResult};
use tributary::types::{AttachedTable, DatasourceMetadata, DriverAttachResult, SimpleColumn, SimpleSchema, SimpleTable};
use tributary::{
    AttachOrchestrator, AttachRequest, AttachmentResult, DataSource, DriverRegistry,
    EngineConnection, ResultSet,
};

fn datasource(name: &str, provider: &str, config: JsonValue) -> DataSource {
    DataSource {
        id: Uuid::new_v4(),
        name: name.to_string(),
        provider: provider.to_string(),
        config,
        project_id: None,
    }
}

/// Mock remote-file driver: attach materializes a small table inside a
/// memory catalog, like the real driver's view over a remote file.
struct MockRemoteFileDriver {
    fail_attach: bool,
    attach_calls: AtomicUsize,
}

impl MockRemoteFileDriver {
    fn new(fail_attach: bool) -> Self {
        Self {
            fail_attach,
            attach_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl DataSourceDriver for MockRemoteFileDriver {
    fn provider_id(&self) -> &'static str {
        "parquet-http"
    }

    async fn test_connection(&self, _config: &JsonValue) -> FederationResult<()> {
        Ok(())
    }

    async fn query(&self, _sql: &str, _config: &JsonValue) -> FederationResult<ResultSet> {
        Ok(ResultSet::empty())
    }

    async fn metadata(&self, _config: &JsonValue) -> FederationResult<DatasourceMetadata> {
        Ok(DatasourceMetadata::empty("parquet-http"))
    }

    fn supports_attach(&self) -> bool {
        true
    }

    async fn attach(&self, options: AttachOptions) -> FederationResult<DriverAttachResult> {
        self.attach_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_attach {
            return Err(FederationError::connection_failed("remote file unreachable"));
        }
        let db = &options.database_name;
        options.engine.attach_memory_catalog(db).await?;
        options
            .engine
            .run(&format!(
                "CREATE OR REPLACE VIEW {}.main.data AS \
                 SELECT * FROM (VALUES (1, 'a'), (2, 'b')) t(id, label)",
                quote_ident(db)
            ))
            .await?;
        let columns = options.engine.describe(db, "data").await?;
        Ok(DriverAttachResult {
            tables: vec![AttachedTable {
                schema: db.clone(),
                table: "data".to_string(),
                path: format!("{db}.data"),
                schema_definition: Some(SimpleSchema {
                    database_name: db.clone(),
                    schema_name: "main".to_string(),
                    tables: vec![SimpleTable {
                        table_name: "data".to_string(),
                        columns,
                    }],
                }),
            }],
        })
    }

    async fn detach(&self, options: DetachOptions) -> FederationResult<()> {
        options
            .engine
            .detach_catalog(&options.database_name)
            .await
    }

    async fn close(&self) -> FederationResult<()> {
        Ok(())
    }
}

/// Mock spreadsheet driver: attach creates a schema with one view per tab.
struct MockSheetDriver {
    tabs: Vec<&'static str>,
}

#[async_trait]
impl DataSourceDriver for MockSheetDriver {
    fn provider_id(&self) -> &'static str {
        "gsheet-csv"
    }

    async fn test_connection(&self, _config: &JsonValue) -> FederationResult<()> {
        Ok(())
    }

    async fn query(&self, _sql: &str, _config: &JsonValue) -> FederationResult<ResultSet> {
        Ok(ResultSet::empty())
    }

    async fn metadata(&self, _config: &JsonValue) -> FederationResult<DatasourceMetadata> {
        Ok(DatasourceMetadata::empty("gsheet-csv"))
    }

    fn supports_attach(&self) -> bool {
        true
    }

    async fn attach(&self, options: AttachOptions) -> FederationResult<DriverAttachResult> {
        let db = &options.database_name;
        options
            .engine
            .run(&format!("CREATE SCHEMA IF NOT EXISTS {}", quote_ident(db)))
            .await?;
        let mut tables = Vec::new();
        for tab in &self.tabs {
            options
                .engine
                .run(&format!(
                    "CREATE OR REPLACE VIEW {}.{} AS \
                     SELECT * FROM (VALUES (1), (2), (3)) t(v)",
                    quote_ident(db),
                    quote_ident(tab)
                ))
                .await?;
            tables.push(AttachedTable {
                schema: db.clone(),
                table: tab.to_string(),
                path: format!("{db}.{tab}"),
                schema_definition: Some(SimpleSchema {
                    database_name: db.clone(),
                    schema_name: db.clone(),
                    tables: vec![SimpleTable {
                        table_name: tab.to_string(),
                        columns: vec![SimpleColumn {
                            column_name: "v".to_string(),
                            column_type: "INTEGER".to_string(),
                        }],
                    }],
                }),
            });
        }
        Ok(DriverAttachResult { tables })
    }

    async fn close(&self) -> FederationResult<()> {
        Ok(())
    }
}

fn registry_with(id: &'static str, driver: Arc<dyn DataSourceDriver>) -> Arc<DriverRegistry> {
    let mut registry = DriverRegistry::new(DriverContext::new());
    registry.register(id, Arc::new(move |_| Arc::clone(&driver)));
    Arc::new(registry)
}

fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}

/// Mock warehouse driver: serves a fixed catalog and row set the way the
/// ClickHouse HTTP driver would.
struct MockWarehouseDriver;

#[async_trait]
impl DataSourceDriver for MockWarehouseDriver {
    fn provider_id(&self) -> &'static str {
        "clickhouse"
    }

    async fn test_connection(&self, _config: &JsonValue) -> FederationResult<()> {
        Ok(())
    }

    async fn query(&self, _sql: &str, _config: &JsonValue) -> FederationResult<ResultSet> {
        let columns = vec![
            tributary::types::ColumnMeta::named("id"),
            tributary::types::ColumnMeta::named("label"),
        ];
        let rows = (1..=5i64)
            .map(|i| {
                let mut m = serde_json::Map::new();
                m.insert("id".into(), json!(i));
                m.insert("label".into(), json!(format!("event{i}")));
                m
            })
            .collect();
        Ok(ResultSet {
            columns,
            rows,
            stat: Default::default(),
        })
    }

    async fn metadata(&self, _config: &JsonValue) -> FederationResult<DatasourceMetadata> {
        Ok(DatasourceMetadata::from_information_schema(
            "clickhouse",
            vec![
                ("default".into(), "events".into(), "id".into(), "Int64".into(), 1, false),
                ("default".into(), "events".into(), "label".into(), "String".into(), 2, false),
            ],
        ))
    }

    async fn close(&self) -> FederationResult<()> {
        Ok(())
    }
}

#[tokio::test]
async fn warehouse_attach_materializes_tables_into_a_durable_catalog() {
    init_tracing();
    let engine = EngineConnection::open_in_memory().unwrap();
    let registry = registry_with("clickhouse", Arc::new(MockWarehouseDriver));
    let orchestrator = AttachOrchestrator::new(engine.clone(), registry);

    let workspace = tempfile::tempdir().unwrap();
    let ds = datasource("metrics", "clickhouse", json!({"host": "ch.internal"}));
    let mut request = AttachRequest::new(ds);
    request.conversation_id = Some("conv-1".to_string());
    request.workspace_dir = Some(workspace.path().to_path_buf());

    let result = orchestrator.attach_datasource(&request).await.unwrap();
    let AttachmentResult::Catalog {
        attached_database_name,
        tables,
    } = result
    else {
        panic!("expected catalog result");
    };
    assert_eq!(attached_database_name, "metrics");
    assert_eq!(tables.len(), 1);
    assert_eq!(tables[0].path, "metrics.events");

    // the catalog is file-backed under the conversation's workspace
    assert!(workspace.path().join("conv-1").join("metrics.duckdb").exists());

    let rows = engine
        .query_rows("SELECT count(*) AS n, max(id) AS top FROM metrics.events")
        .await
        .unwrap();
    assert_eq!(rows.rows[0]["n"], json!(5));
    assert_eq!(rows.rows[0]["top"], json!(5));
}

#[tokio::test]
async fn driver_owned_attach_lands_in_shared_engine() {
    let engine = EngineConnection::open_in_memory().unwrap();
    let registry = registry_with("parquet-http", Arc::new(MockRemoteFileDriver::new(false)));
    let orchestrator = AttachOrchestrator::new(engine.clone(), registry);

    let ds = datasource("ds1", "parquet-http", json!({"url": "https://files/x.parquet"}));
    let result = orchestrator
        .attach_datasource(&AttachRequest::new(ds))
        .await
        .unwrap();

    let AttachmentResult::Catalog {
        attached_database_name,
        tables,
    } = result
    else {
        panic!("expected catalog result");
    };
    assert_eq!(attached_database_name, "ds1");
    assert_eq!(tables.len(), 1);
    assert_eq!(tables[0].schema, "ds1");
    assert_eq!(tables[0].table, "data");
    assert_eq!(tables[0].path, "ds1.data");

    // the relation is queryable through the shared engine
    let rows = engine
        .query_rows("SELECT count(*) AS n FROM ds1.data")
        .await
        .unwrap();
    assert_eq!(rows.rows[0]["n"], json!(2));
}

#[tokio::test]
async fn failed_driver_attach_falls_back_to_strategy() {
    struct RescueStrategy;

    #[async_trait]
    impl AttachmentStrategy for RescueStrategy {
        fn name(&self) -> &'static str {
            "rescue"
        }
        fn handles(&self, family: tributary::ProviderFamily) -> bool {
            family == tributary::ProviderFamily::ParquetHttp
        }
        async fn attach(&self, ctx: &StrategyContext) -> FederationResult<AttachmentResult> {
            ctx.engine.attach_memory_catalog(&ctx.database_name).await?;
            Ok(AttachmentResult::Catalog {
                attached_database_name: ctx.database_name.clone(),
                tables: vec![],
            })
        }
    }

    let engine = EngineConnection::open_in_memory().unwrap();
    let driver = Arc::new(MockRemoteFileDriver::new(true));
    let registry = registry_with("parquet-http", driver.clone());
    let orchestrator = AttachOrchestrator::with_strategies(
        engine.clone(),
        registry,
        vec![Box::new(RescueStrategy)],
    );

    let ds = datasource("remote", "parquet-http", json!({"url": "https://files/x.parquet"}));
    let result = orchestrator
        .attach_datasource(&AttachRequest::new(ds))
        .await
        .unwrap();

    assert_eq!(driver.attach_calls.load(Ordering::SeqCst), 1);
    assert!(matches!(result, AttachmentResult::Catalog { .. }));
    assert!(engine.catalog_exists("remote").await.unwrap());
}

#[tokio::test]
async fn sheet_attach_exposes_every_tab() {
    let engine = EngineConnection::open_in_memory().unwrap();
    let registry = registry_with(
        "gsheet-csv",
        Arc::new(MockSheetDriver {
            tabs: vec!["orders", "q2_data"],
        }),
    );
    let orchestrator = AttachOrchestrator::new(engine.clone(), registry);

    let ds = datasource(
        "budget",
        "gsheet-csv",
        json!({"shared_link": "https://docs.google.com/spreadsheets/d/abc/edit"}),
    );
    let request = AttachRequest::new(ds);
    let result = orchestrator.attach_datasource(&request).await.unwrap();

    let AttachmentResult::Catalog { tables, .. } = result else {
        panic!("expected catalog result");
    };
    assert_eq!(tables.len(), 2);
    assert_eq!(tables[0].path, "budget.orders");
    assert_eq!(tables[1].path, "budget.q2_data");

    let rows = engine
        .query_rows("SELECT sum(v) AS total FROM budget.q2_data")
        .await
        .unwrap();
    assert_eq!(rows.rows[0]["total"], json!(6));

    // flattening picks the first relation with a schema
    let view = orchestrator.attach_as_view(&request).await.unwrap();
    assert_eq!(view.view_name, "budget.orders");
    assert_eq!(view.display_name, "budget");
    assert_eq!(view.schema.tables[0].columns[0].column_name, "v");
}

#[tokio::test]
async fn attach_is_idempotent_and_detach_cleans_up() {
    let engine = EngineConnection::open_in_memory().unwrap();
    let registry = registry_with("parquet-http", Arc::new(MockRemoteFileDriver::new(false)));
    let orchestrator = AttachOrchestrator::new(engine.clone(), registry);

    let ds = datasource("ds1", "parquet-http", json!({"url": "https://files/x.parquet"}));
    let request = AttachRequest::new(ds);

    orchestrator.attach_datasource(&request).await.unwrap();
    orchestrator.attach_datasource(&request).await.unwrap();
    assert!(engine.catalog_exists("ds1").await.unwrap());

    orchestrator.detach_datasource(&request).await.unwrap();
    assert!(!engine.catalog_exists("ds1").await.unwrap());
    // detaching again stays quiet
    orchestrator.detach_datasource(&request).await.unwrap();
}

#[tokio::test]
async fn attach_to_specific_connection_leaves_shared_engine_untouched() {
    let shared = EngineConnection::open_in_memory().unwrap();
    let private = EngineConnection::open_in_memory().unwrap();
    let registry = registry_with("parquet-http", Arc::new(MockRemoteFileDriver::new(false)));
    let orchestrator = AttachOrchestrator::new(shared.clone(), registry);

    let ds = datasource("scoped", "parquet-http", json!({"url": "https://files/x.parquet"}));
    let request = AttachRequest::new(ds);

    orchestrator
        .attach_datasource_to_connection(&private, &request)
        .await
        .unwrap();

    assert!(private.catalog_exists("scoped").await.unwrap());
    assert!(!shared.catalog_exists("scoped").await.unwrap());
}

#[tokio::test]
async fn unsupported_provider_is_a_typed_error() {
    let engine = EngineConnection::open_in_memory().unwrap();
    let registry = Arc::new(DriverRegistry::new(DriverContext::new()));
    let orchestrator = AttachOrchestrator::new(engine, registry);

    let ds = datasource("legacy", "mongodb", json!({}));
    let err = orchestrator
        .attach_datasource(&AttachRequest::new(ds))
        .await
        .unwrap_err();
    assert!(matches!(err, FederationError::UnsupportedProvider { .. }));
}

#[tokio::test]
async fn slow_connection_attempt_hits_the_timeout_bound() {
    use tributary::driver::bounded;

    let ctx = DriverContext::new();
    let start = std::time::Instant::now();
    let err = bounded(&ctx, 50, async {
        tokio::time::sleep(std::time::Duration::from_secs(30)).await;
        Ok(())
    })
    .await
    .unwrap_err();

    assert!(start.elapsed() < std::time::Duration::from_secs(5));
    assert_eq!(err.to_string(), "connection operation timed out after 50 ms");
    assert!(err.is_retryable());
}

#[tokio::test]
async fn relational_connect_times_out_against_an_unresponsive_host() {
    use tributary::drivers::postgres::PostgresDriver;

    // a bound socket that accepts the TCP connection but never answers the
    // database handshake, so the connect attempt hangs until the bound fires
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let ctx = DriverContext::new().with_connect_timeout_ms(250);
    let driver = PostgresDriver::new(ctx);
    let config = json!({
        "host": "127.0.0.1",
        "port": port,
        "database": "app",
        "username": "svc",
        "password": "pw",
    });

    let start = std::time::Instant::now();
    let err = driver.test_connection(&config).await.unwrap_err();
    assert!(start.elapsed() < std::time::Duration::from_secs(5));
    assert_eq!(err.to_string(), "connection operation timed out after 250 ms");
    assert!(err.is_retryable());
    drop(listener);
}

#[tokio::test]
async fn missing_driver_for_self_attaching_family_still_uses_strategies() {
    struct CatchAllStrategy;

    #[async_trait]
    impl AttachmentStrategy for CatchAllStrategy {
        fn name(&self) -> &'static str {
            "catch-all"
        }
        fn handles(&self, family: tributary::ProviderFamily) -> bool {
            family == tributary::ProviderFamily::ParquetHttp
        }
        async fn attach(&self, ctx: &StrategyContext) -> FederationResult<AttachmentResult> {
            ctx.engine.attach_memory_catalog(&ctx.database_name).await?;
            Ok(AttachmentResult::Catalog {
                attached_database_name: ctx.database_name.clone(),
                tables: vec![],
            })
        }
    }

    let engine = EngineConnection::open_in_memory().unwrap();
    // no parquet-http driver registered at all
    let registry = Arc::new(DriverRegistry::new(DriverContext::new()));
    let orchestrator = AttachOrchestrator::with_strategies(
        engine.clone(),
        registry,
        vec![Box::new(CatchAllStrategy)],
    );

    let ds = datasource("orphan", "parquet-http", json!({"url": "https://files/x.parquet"}));
    let result = orchestrator
        .attach_datasource(&AttachRequest::new(ds))
        .await
        .unwrap();
    assert!(matches!(result, AttachmentResult::Catalog { .. }));
    assert!(engine.catalog_exists("orphan").await.unwrap());
}

#[tokio::test]
async fn flattening_requires_a_schema_on_the_first_relation() {
    struct SchemalessFirstStrategy;

    #[async_trait]
    impl AttachmentStrategy for SchemalessFirstStrategy {
        fn name(&self) -> &'static str {
            "schemaless-first"
        }
        fn handles(&self, family: tributary::ProviderFamily) -> bool {
            family == tributary::ProviderFamily::ParquetHttp
        }
        async fn attach(&self, ctx: &StrategyContext) -> FederationResult<AttachmentResult> {
            let db = ctx.database_name.clone();
            Ok(AttachmentResult::Catalog {
                attached_database_name: db.clone(),
                tables: vec![
                    AttachedTable {
                        schema: db.clone(),
                        table: "primary_data".to_string(),
                        path: format!("{db}.primary_data"),
                        schema_definition: None,
                    },
                    AttachedTable {
                        schema: db.clone(),
                        table: "aux".to_string(),
                        path: format!("{db}.aux"),
                        schema_definition: Some(SimpleSchema {
                            database_name: db.clone(),
                            schema_name: "main".to_string(),
                            tables: vec![],
                        }),
                    },
                ],
            })
        }
    }

    let engine = EngineConnection::open_in_memory().unwrap();
    let registry = Arc::new(DriverRegistry::new(DriverContext::new()));
    let orchestrator = AttachOrchestrator::with_strategies(
        engine,
        registry,
        vec![Box::new(SchemalessFirstStrategy)],
    );

    // a later relation having a schema does not rescue the flattening
    let ds = datasource("files", "parquet-http", json!({"url": "https://files/x.parquet"}));
    let err = orchestrator
        .attach_as_view(&AttachRequest::new(ds))
        .await
        .unwrap_err();
    assert!(matches!(err, FederationError::SchemaExtraction { .. }));
}

#[tokio::test]
async fn big_integers_survive_the_engine_boundary() {
    let engine = EngineConnection::open_in_memory().unwrap();
    let rows = engine
        .query_rows("SELECT 9007199254740993 AS beyond, 9007199254740991 AS edge")
        .await
        .unwrap();
    assert_eq!(rows.rows[0]["beyond"], json!("9007199254740993"));
    assert_eq!(rows.rows[0]["edge"], json!(9007199254740991i64));
}
