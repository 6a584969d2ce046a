// SPDX-License-Identifier: Apache-2.0

//! Universal data types for the federation layer.
//!
//! These provide a normalized representation of datasources, query results
//! and relational catalogs across every provider family.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A named, configured connection to an external system.
///
/// Created and persisted by the surrounding app; the federation layer only
/// reads it. `config` is an opaque, provider-validated key/value map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSource {
    pub id: Uuid,
    pub name: String,
    /// Provider discriminator, e.g. "postgresql", "s3", "gsheet-csv".
    pub provider: String,
    pub config: serde_json::Value,
    pub project_id: Option<Uuid>,
}

impl DataSource {
    /// Catalog/schema name this datasource is attached under when the caller
    /// does not supply one: derived from the datasource name, falling back
    /// to the id.
    pub fn database_name(&self) -> String {
        let base = if self.name.trim().is_empty() {
            format!("ds_{}", self.id.simple())
        } else {
            self.name.clone()
        };
        sanitize_identifier(&base)
    }
}

/// Lowercases and strips a name down to a safe SQL identifier.
pub fn sanitize_identifier(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        format!("ds_{cleaned}")
    } else {
        cleaned
    }
}

/// One column of a query result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnMeta {
    pub name: String,
    pub display_name: String,
    /// Native type code/name from the source driver, if known.
    pub original_type: Option<String>,
}

impl ColumnMeta {
    pub fn named(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            display_name: name.clone(),
            name,
            original_type: None,
        }
    }
}

/// Execution statistics for one query.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryStat {
    pub rows_affected: u64,
    pub rows_read: u64,
    pub rows_written: u64,
    pub query_duration_ms: Option<f64>,
}

/// Result of a driver `query` operation. Rows are JSON objects keyed by
/// column name, already normalized through [`crate::value`] (integers outside
/// the safe range are strings).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultSet {
    pub columns: Vec<ColumnMeta>,
    pub rows: Vec<serde_json::Map<String, serde_json::Value>>,
    pub stat: QueryStat,
}

impl ResultSet {
    pub fn empty() -> Self {
        Self {
            columns: vec![],
            rows: vec![],
            stat: QueryStat::default(),
        }
    }
}

/// One schema entry in a flattened datasource catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaInfo {
    pub name: String,
}

/// One table entry in a flattened datasource catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableInfo {
    pub schema: String,
    pub name: String,
    pub row_count_estimate: Option<u64>,
    pub primary_keys: Vec<String>,
}

/// One column entry in a flattened datasource catalog. `ordinal_position`
/// is 1-based and matches the source's native column order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub schema: String,
    pub table: String,
    pub name: String,
    pub data_type: String,
    pub ordinal_position: u32,
    pub is_nullable: bool,
}

/// A foreign-key relationship between two tables of the same datasource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipInfo {
    pub constraint_name: String,
    pub source_schema: String,
    pub source_table: String,
    pub source_column: String,
    pub target_schema: String,
    pub target_table: String,
    pub target_column: String,
}

/// Flattened relational catalog used for schema browsing.
///
/// A datasource with zero tables produces empty vectors, not an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasourceMetadata {
    pub driver: String,
    pub schemas: Vec<SchemaInfo>,
    pub tables: Vec<TableInfo>,
    pub columns: Vec<ColumnInfo>,
    pub relationships: Vec<RelationshipInfo>,
}

impl DatasourceMetadata {
    pub fn empty(driver: impl Into<String>) -> Self {
        Self {
            driver: driver.into(),
            schemas: vec![],
            tables: vec![],
            columns: vec![],
            relationships: vec![],
        }
    }

    /// Builds metadata from information_schema-style column rows
    /// `(schema, table, column, data_type, ordinal_position, is_nullable)`.
    /// Shared by the SQL-based drivers.
    pub fn from_information_schema(
        driver: impl Into<String>,
        rows: Vec<(String, String, String, String, u32, bool)>,
    ) -> Self {
        let mut schemas: Vec<String> = vec![];
        let mut tables: Vec<(String, String)> = vec![];
        let mut columns = Vec::with_capacity(rows.len());

        for (schema, table, column, data_type, ordinal_position, is_nullable) in rows {
            if !schemas.contains(&schema) {
                schemas.push(schema.clone());
            }
            let table_key = (schema.clone(), table.clone());
            if !tables.contains(&table_key) {
                tables.push(table_key);
            }
            columns.push(ColumnInfo {
                schema,
                table,
                name: column,
                data_type,
                ordinal_position,
                is_nullable,
            });
        }

        Self {
            driver: driver.into(),
            schemas: schemas.into_iter().map(|name| SchemaInfo { name }).collect(),
            tables: tables
                .into_iter()
                .map(|(schema, name)| TableInfo {
                    schema,
                    name,
                    row_count_estimate: None,
                    primary_keys: vec![],
                })
                .collect(),
            columns,
            relationships: vec![],
        }
    }
}

/// Minimal relational shape handed back to callers after attach: enough to
/// populate a schema browser and to know what to SELECT.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimpleColumn {
    pub column_name: String,
    pub column_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimpleTable {
    pub table_name: String,
    pub columns: Vec<SimpleColumn>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimpleSchema {
    pub database_name: String,
    pub schema_name: String,
    pub tables: Vec<SimpleTable>,
}

/// One relation created inside the shared engine by an attach.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachedTable {
    /// Catalog or schema the relation lives in.
    pub schema: String,
    pub table: String,
    /// Query path for federated SQL, e.g. `ds1.data`.
    pub path: String,
    pub schema_definition: Option<SimpleSchema>,
}

/// Result of an attachment. The enum guarantees exactly one of the two
/// shapes is populated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AttachmentResult {
    /// A single relation whose schema is already known.
    View {
        view_name: String,
        display_name: String,
        schema: SimpleSchema,
    },
    /// A catalog attach producing one or more relations.
    Catalog {
        attached_database_name: String,
        tables: Vec<AttachedTable>,
    },
}

/// Result of a driver-owned attach: the relations it created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverAttachResult {
    pub tables: Vec<AttachedTable>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_name_is_sanitized() {
        let ds = DataSource {
            id: Uuid::new_v4(),
            name: "My Sales (2024)".to_string(),
            provider: "postgresql".to_string(),
            config: serde_json::json!({}),
            project_id: None,
        };
        assert_eq!(ds.database_name(), "my_sales__2024_");
    }

    #[test]
    fn database_name_with_leading_digit_gets_prefix() {
        assert_eq!(sanitize_identifier("2024_sales"), "ds_2024_sales");
    }

    #[test]
    fn information_schema_rows_group_into_tables() {
        let meta = DatasourceMetadata::from_information_schema(
            "postgresql",
            vec![
                ("public".into(), "users".into(), "id".into(), "integer".into(), 1, false),
                ("public".into(), "users".into(), "email".into(), "text".into(), 2, true),
                ("public".into(), "orders".into(), "id".into(), "integer".into(), 1, false),
            ],
        );
        assert_eq!(meta.schemas.len(), 1);
        assert_eq!(meta.tables.len(), 2);
        assert_eq!(meta.columns.len(), 3);
        assert_eq!(meta.columns[1].ordinal_position, 2);
    }

    #[test]
    fn zero_table_source_yields_empty_metadata() {
        let meta = DatasourceMetadata::from_information_schema("mysql", vec![]);
        assert!(meta.schemas.is_empty());
        assert!(meta.tables.is_empty());
        assert!(meta.columns.is_empty());
    }
}
