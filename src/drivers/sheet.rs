// SPDX-License-Identifier: Apache-2.0

//! Google Sheets CSV driver.
//!
//! A shared spreadsheet link is read through the public CSV export endpoint.
//! Tabs are discovered by scraping the edit page for sheet id/title pairs;
//! when the page gives nothing away, the link's own gid (default 0) is used
//! as a single tab. This driver owns its attach lifecycle: each valid tab
//! becomes a view inside a schema named after the datasource in the shared
//! engine.

use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value as JsonValue;

use crate::cache::SessionCache;
use crate::driver::{bounded, AttachOptions, DataSourceDriver, DetachOptions, DriverContext};
use crate::engine::{quote_ident, quote_literal, EngineConnection};
use crate::error::{FederationError, FederationResult};
use crate::types::{
    sanitize_identifier, AttachedTable, DatasourceMetadata, DriverAttachResult, ResultSet,
};

fn spreadsheet_id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"/spreadsheets/d/([a-zA-Z0-9_-]+)").unwrap())
}

fn gid_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[#&?]gid=(\d+)").unwrap())
}

fn tab_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#""sheetId":(\d+),"title":"([^"]+)""#).unwrap())
}

/// One discovered spreadsheet tab.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetTab {
    pub gid: u64,
    pub title: String,
}

/// Extracts the spreadsheet id from a shared link.
pub fn spreadsheet_id(link: &str) -> FederationResult<String> {
    spreadsheet_id_re()
        .captures(link)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| {
            FederationError::config_validation(
                "not a Google Sheets link",
                vec!["shared_link".into()],
            )
        })
}

fn link_gid(link: &str) -> u64 {
    gid_re()
        .captures(link)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}

/// CSV export URL for one tab.
pub fn csv_export_url(id: &str, gid: u64) -> String {
    format!("https://docs.google.com/spreadsheets/d/{id}/export?format=csv&gid={gid}")
}

/// Sanitizes tab titles into view names, deduplicating collisions with a
/// numeric suffix.
pub fn view_names(tabs: &[SheetTab]) -> Vec<String> {
    let mut names: Vec<String> = Vec::with_capacity(tabs.len());
    for tab in tabs {
        let mut base = sanitize_identifier(&tab.title);
        if base.is_empty() {
            base = format!("sheet_{}", tab.gid);
        }
        let mut candidate = base.clone();
        let mut n = 2;
        while names.contains(&candidate) {
            candidate = format!("{base}_{n}");
            n += 1;
        }
        names.push(candidate);
    }
    names
}

struct SheetSession {
    tabs: Vec<SheetTab>,
    engine: EngineConnection,
}

pub struct SheetDriver {
    ctx: DriverContext,
    client: reqwest::Client,
    sessions: SessionCache<SheetSession>,
}

impl SheetDriver {
    pub fn new(ctx: DriverContext) -> Self {
        Self {
            ctx,
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            sessions: SessionCache::new(),
        }
    }

    fn shared_link(config: &JsonValue) -> FederationResult<String> {
        for key in ["shared_link", "sharedLink", "url"] {
            if let Some(link) = config.get(key).and_then(|v| v.as_str()) {
                if !link.trim().is_empty() {
                    return Ok(link.trim().to_string());
                }
            }
        }
        Err(FederationError::config_validation(
            "shared_link is required",
            vec!["shared_link".into()],
        ))
    }

    /// Scrapes the edit page for tabs; falls back to the link's gid.
    async fn discover_tabs(&self, link: &str) -> FederationResult<Vec<SheetTab>> {
        let id = spreadsheet_id(link)?;
        let edit_url = format!("https://docs.google.com/spreadsheets/d/{id}/edit");

        let html = match self.client.get(&edit_url).send().await {
            Ok(resp) if resp.status().is_success() => resp.text().await.unwrap_or_default(),
            _ => String::new(),
        };

        // the edit page can mention a sheet id more than once
        let mut seen = std::collections::HashSet::new();
        let mut tabs: Vec<SheetTab> = tab_re()
            .captures_iter(&html)
            .filter_map(|c| {
                Some(SheetTab {
                    gid: c.get(1)?.as_str().parse().ok()?,
                    title: c.get(2)?.as_str().to_string(),
                })
            })
            .filter(|t| seen.insert(t.gid))
            .collect();

        if tabs.is_empty() {
            tabs.push(SheetTab {
                gid: link_gid(link),
                title: "Sheet1".to_string(),
            });
        }
        Ok(tabs)
    }

    async fn session_for(&self, link: &str) -> FederationResult<std::sync::Arc<SheetSession>> {
        self.sessions
            .get_or_try_insert(link, || async {
                let id = spreadsheet_id(link)?;
                let tabs = self.discover_tabs(link).await?;

                let engine = EngineConnection::open_in_memory()?;
                engine.run("INSTALL httpfs; LOAD httpfs;").await?;
                let names = view_names(&tabs);
                for (tab, name) in tabs.iter().zip(&names) {
                    engine
                        .run(&format!(
                            "CREATE OR REPLACE VIEW {} AS SELECT * FROM read_csv_auto({})",
                            quote_ident(name),
                            quote_literal(&csv_export_url(&id, tab.gid)),
                        ))
                        .await?;
                }
                Ok(SheetSession { tabs, engine })
            })
            .await
    }
}

#[async_trait]
impl DataSourceDriver for SheetDriver {
    fn provider_id(&self) -> &'static str {
        "gsheet-csv"
    }

    async fn test_connection(&self, config: &JsonValue) -> FederationResult<()> {
        let link = Self::shared_link(config)?;
        let id = spreadsheet_id(&link)?;
        bounded(&self.ctx, self.ctx.connect_timeout_ms, async {
            let gid = link_gid(&link);
            let url = csv_export_url(&id, gid);
            let response = self
                .client
                .get(&url)
                .send()
                .await
                .map_err(|e| FederationError::connection_failed(e.to_string()))?;
            if !response.status().is_success() {
                return Err(FederationError::connection_failed(format!(
                    "sheet is not publicly readable (HTTP {})",
                    response.status()
                )));
            }
            Ok(())
        })
        .await
    }

    async fn query(&self, sql: &str, config: &JsonValue) -> FederationResult<ResultSet> {
        let link = Self::shared_link(config)?;
        let session = self.session_for(&link).await?;
        session.engine.query_rows(sql).await
    }

    async fn metadata(&self, config: &JsonValue) -> FederationResult<DatasourceMetadata> {
        let link = Self::shared_link(config)?;
        let session = self.session_for(&link).await?;

        let names = view_names(&session.tabs);
        let mut column_rows = Vec::new();
        for name in &names {
            let columns = match session.engine.describe("main", name).await {
                Ok(cols) => cols,
                Err(e) => {
                    tracing::debug!(tab = %name, error = %e, "tab not readable, skipping");
                    continue;
                }
            };
            for (idx, col) in columns.into_iter().enumerate() {
                column_rows.push((
                    "main".to_string(),
                    name.clone(),
                    col.column_name,
                    col.column_type,
                    (idx + 1) as u32,
                    true,
                ));
            }
        }
        Ok(DatasourceMetadata::from_information_schema(
            self.provider_id(),
            column_rows,
        ))
    }

    fn supports_attach(&self) -> bool {
        true
    }

    /// Creates a schema named after the datasource in the shared engine and
    /// a view per valid tab. Tabs that fail a one-row probe are skipped; zero
    /// valid tabs is an error.
    async fn attach(&self, options: AttachOptions) -> FederationResult<DriverAttachResult> {
        let link = Self::shared_link(&options.config)?;
        let id = spreadsheet_id(&link)?;
        let tabs = self.discover_tabs(&link).await?;
        let engine = &options.engine;
        let db = &options.database_name;

        engine.run("INSTALL httpfs; LOAD httpfs;").await?;
        engine
            .run(&format!("CREATE SCHEMA IF NOT EXISTS {}", quote_ident(db)))
            .await?;

        let names = view_names(&tabs);
        let mut attached = Vec::new();
        for (tab, name) in tabs.iter().zip(&names) {
            let url = csv_export_url(&id, tab.gid);
            let probe = format!(
                "SELECT * FROM read_csv_auto({}) LIMIT 1",
                quote_literal(&url)
            );
            if let Err(e) = engine.query_rows(&probe).await {
                tracing::debug!(tab = %tab.title, error = %e, "tab failed validation, skipping");
                continue;
            }
            engine
                .run(&format!(
                    "CREATE OR REPLACE VIEW {}.{} AS SELECT * FROM read_csv_auto({})",
                    quote_ident(db),
                    quote_ident(name),
                    quote_literal(&url),
                ))
                .await?;

            let columns = engine.describe(db, name).await.ok();
            attached.push(AttachedTable {
                schema: db.clone(),
                table: name.clone(),
                path: format!("{db}.{name}"),
                schema_definition: columns.map(|cols| crate::types::SimpleSchema {
                    database_name: db.clone(),
                    schema_name: db.clone(),
                    tables: vec![crate::types::SimpleTable {
                        table_name: name.clone(),
                        columns: cols,
                    }],
                }),
            });
        }

        if attached.is_empty() {
            return Err(FederationError::connection_failed(
                "no readable tabs in spreadsheet",
            ));
        }
        Ok(DriverAttachResult { tables: attached })
    }

    /// Drops the attached views. Missing views are not an error.
    async fn detach(&self, options: DetachOptions) -> FederationResult<()> {
        let link = Self::shared_link(&options.config)?;
        let tabs = self.discover_tabs(&link).await.unwrap_or_default();
        let engine = &options.engine;
        let db = &options.database_name;

        for name in view_names(&tabs) {
            let sql = format!(
                "DROP VIEW IF EXISTS {}.{}",
                quote_ident(db),
                quote_ident(&name)
            );
            if let Err(e) = engine.run(&sql).await {
                tracing::debug!(view = %name, error = %e, "drop view skipped");
            }
        }
        if let Err(e) = engine
            .run(&format!("DROP SCHEMA IF EXISTS {} CASCADE", quote_ident(db)))
            .await
        {
            tracing::debug!(schema = %db, error = %e, "drop schema skipped");
        }
        Ok(())
    }

    async fn close(&self) -> FederationResult<()> {
        self.sessions.drain().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spreadsheet_id_extracts_from_share_links() {
        let id = spreadsheet_id(
            "https://docs.google.com/spreadsheets/d/1AbC-def_123/edit?usp=sharing#gid=77",
        )
        .unwrap();
        assert_eq!(id, "1AbC-def_123");
        assert!(spreadsheet_id("https://example.com/file.csv").is_err());
    }

    #[test]
    fn gid_defaults_to_zero() {
        assert_eq!(link_gid("https://docs.google.com/spreadsheets/d/x/edit"), 0);
        assert_eq!(
            link_gid("https://docs.google.com/spreadsheets/d/x/edit#gid=42"),
            42
        );
    }

    #[test]
    fn tab_regex_parses_edit_page_fragment() {
        let html = r#"{"sheetId":0,"title":"Orders"},{"sheetId":1577,"title":"Q2 Data"}"#;
        let tabs: Vec<SheetTab> = tab_re()
            .captures_iter(html)
            .map(|c| SheetTab {
                gid: c[1].parse().unwrap(),
                title: c[2].to_string(),
            })
            .collect();
        assert_eq!(
            tabs,
            vec![
                SheetTab { gid: 0, title: "Orders".into() },
                SheetTab { gid: 1577, title: "Q2 Data".into() },
            ]
        );
    }

    #[test]
    fn view_names_are_sanitized_and_deduplicated() {
        let tabs = vec![
            SheetTab { gid: 0, title: "Q2 Data".into() },
            SheetTab { gid: 1, title: "q2 data".into() },
            SheetTab { gid: 2, title: "!!!".into() },
        ];
        let names = view_names(&tabs);
        assert_eq!(names[0], "q2_data");
        assert_eq!(names[1], "q2_data_2");
        assert_eq!(names[2], "___");
    }

    #[test]
    fn export_url_shape() {
        assert_eq!(
            csv_export_url("abc", 5),
            "https://docs.google.com/spreadsheets/d/abc/export?format=csv&gid=5"
        );
    }
}
