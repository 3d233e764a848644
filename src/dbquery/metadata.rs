//! Schema introspection into catalog records, and the prompt view of them.

use std::sync::Arc;

use tracing::{info, warn};

use super::adapter::{DatabaseAdapter, DbPool, RelationKind};
use super::catalog::Catalog;
use super::connection::ConnectionManager;
use super::error::{AdapterError, QueryToolError};
use super::model::{ColumnMetadata, TableMetadata};

/// Walks every schema the adapter reports, tables before views.
pub async fn collect_metadata(
    adapter: &dyn DatabaseAdapter,
    pool: &DbPool,
    url: &str,
) -> Result<Vec<TableMetadata>, AdapterError> {
    let mut tables = Vec::new();

    for schema in adapter.extract_schemas(pool, url).await? {
        let relations = adapter.list_relations(pool, &schema.name).await?;
        let (base, views): (Vec<_>, Vec<_>) = relations
            .into_iter()
            .partition(|relation| relation.kind == RelationKind::Table);

        for relation in base.into_iter().chain(views) {
            let columns = adapter
                .list_columns(pool, &schema.name, &relation.name)
                .await?
                .into_iter()
                .enumerate()
                .map(|(index, column)| ColumnMetadata {
                    column_name: column.name,
                    data_type: adapter.normalize_data_type(&column.data_type),
                    is_nullable: column.is_nullable,
                    is_primary_key: column.is_primary_key,
                    default_value: adapter.normalize_default_value(column.default_value.as_deref()),
                    position: index as i64 + 1,
                })
                .collect();

            tables.push(TableMetadata {
                schema_name: schema.name.clone(),
                table_name: relation.name,
                table_type: relation.kind,
                columns,
            });
        }
    }

    Ok(tables)
}

/// `(tables, views)` in a metadata list.
pub fn count_relations(tables: &[TableMetadata]) -> (i64, i64) {
    tables.iter().fold((0, 0), |(t, v), table| match table.table_type {
        RelationKind::Table => (t + 1, v),
        RelationKind::View => (t, v + 1),
    })
}

/// Renders cached metadata as the schema section of an NL prompt.
pub fn build_schema_context(tables: &[TableMetadata]) -> String {
    if tables.is_empty() {
        return "No tables found in the database.".to_string();
    }

    tables
        .iter()
        .map(|table| {
            let columns = table
                .columns
                .iter()
                .map(describe_column)
                .collect::<Vec<_>>()
                .join(",\n");
            format!(
                "Table: {}.{} ({})\nColumns:\n{}",
                table.schema_name,
                table.table_name,
                table.table_type.as_str(),
                columns
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn describe_column(column: &ColumnMetadata) -> String {
    let mut constraints = Vec::new();
    if column.is_primary_key {
        constraints.push("PRIMARY KEY".to_string());
    }
    if !column.is_nullable {
        constraints.push("NOT NULL".to_string());
    }
    if let Some(default) = column.default_value.as_deref().filter(|d| !d.is_empty()) {
        constraints.push(format!("DEFAULT {default}"));
    }

    if constraints.is_empty() {
        format!("  {} {}", column.column_name, column.data_type)
    } else {
        format!(
            "  {} {} {}",
            column.column_name,
            column.data_type,
            constraints.join(", ")
        )
    }
}

pub struct MetadataService {
    catalog: Catalog,
    connections: Arc<ConnectionManager>,
}

impl MetadataService {
    pub fn new(catalog: Catalog, connections: Arc<ConnectionManager>) -> Self {
        Self {
            catalog,
            connections,
        }
    }

    /// Re-reads the remote schema and replaces the cached copy.
    pub async fn extract_metadata(&self, name: &str, url: &str) -> Result<(i64, i64), QueryToolError> {
        let failed = |reason: String| {
            warn!(name, %reason, "metadata extraction failed");
            QueryToolError::MetadataExtraction {
                name: name.to_string(),
                reason,
            }
        };

        let adapter = self.connections.adapter_for(url)?;
        let pool = self
            .connections
            .get_pool(name, url)
            .await
            .map_err(|err| failed(err.to_string()))?;
        let tables = collect_metadata(adapter.as_ref(), &pool, url)
            .await
            .map_err(|err| failed(err.to_string()))?;

        self.catalog.replace_metadata(name, &tables).await?;

        let (table_count, view_count) = count_relations(&tables);
        info!(name, table_count, view_count, "extracted metadata");
        Ok((table_count, view_count))
    }
}
