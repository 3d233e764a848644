//! Local store of connections and their cached metadata.

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};

use super::adapter::RelationKind;
use super::error::QueryToolError;
use super::model::{ColumnMetadata, StoredConnection, TableMetadata};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS database_connections (
        name TEXT PRIMARY KEY,
        connection_url TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS table_metadata (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        db_name TEXT NOT NULL REFERENCES database_connections(name) ON DELETE CASCADE,
        schema_name TEXT NOT NULL,
        table_name TEXT NOT NULL,
        table_type TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS column_metadata (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        table_metadata_id INTEGER NOT NULL REFERENCES table_metadata(id) ON DELETE CASCADE,
        column_name TEXT NOT NULL,
        data_type TEXT NOT NULL,
        is_nullable INTEGER NOT NULL DEFAULT 1,
        is_primary_key INTEGER NOT NULL DEFAULT 0,
        default_value TEXT,
        position INTEGER NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_table_metadata_db ON table_metadata(db_name)",
    "CREATE INDEX IF NOT EXISTS idx_column_metadata_table ON column_metadata(table_metadata_id)",
];

#[derive(Clone)]
pub struct Catalog {
    pool: SqlitePool,
}

impl Catalog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Opens the catalog file, creating it and its directory when missing.
    pub async fn open(path: &Path) -> Result<Self, QueryToolError> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|err| QueryToolError::Catalog(err.to_string()))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let catalog = Self::new(pool);
        catalog.init().await?;
        info!(path = %path.display(), "catalog ready");
        Ok(catalog)
    }

    pub async fn init(&self) -> Result<(), QueryToolError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub async fn create_connection(
        &self,
        name: &str,
        url: &str,
    ) -> Result<StoredConnection, QueryToolError> {
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO database_connections (name, connection_url, created_at, updated_at) VALUES (?, ?, ?, ?)",
        )
        .bind(name)
        .bind(url)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|err| match &err {
            sqlx::Error::Database(db_error) if db_error.is_unique_violation() => {
                QueryToolError::ConnectionAlreadyExists(name.to_string())
            }
            _ => QueryToolError::from(err),
        })?;

        Ok(StoredConnection {
            name: name.to_string(),
            connection_url: url.to_string(),
            created_at: now,
            updated_at: now,
        })
    }

    pub async fn get_connection(&self, name: &str) -> Result<Option<StoredConnection>, QueryToolError> {
        let row = sqlx::query(
            "SELECT name, connection_url, created_at, updated_at FROM database_connections WHERE name = ?",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_connection).transpose()
    }

    /// Like [`Catalog::get_connection`], but a missing name is an error.
    pub async fn require_connection(&self, name: &str) -> Result<StoredConnection, QueryToolError> {
        self.get_connection(name)
            .await?
            .ok_or_else(|| QueryToolError::ConnectionNotFound(name.to_string()))
    }

    pub async fn list_connections(&self) -> Result<Vec<StoredConnection>, QueryToolError> {
        let rows = sqlx::query(
            "SELECT name, connection_url, created_at, updated_at FROM database_connections ORDER BY created_at, name",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_connection).collect()
    }

    /// Deletes the connection; its metadata goes with it.
    pub async fn delete_connection(&self, name: &str) -> Result<bool, QueryToolError> {
        let result = sqlx::query("DELETE FROM database_connections WHERE name = ?")
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn touch_connection(&self, name: &str) -> Result<(), QueryToolError> {
        sqlx::query("UPDATE database_connections SET updated_at = ? WHERE name = ?")
            .bind(Utc::now())
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Swaps the cached metadata of `db_name` for `tables` in one transaction.
    pub async fn replace_metadata(
        &self,
        db_name: &str,
        tables: &[TableMetadata],
    ) -> Result<(), QueryToolError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM table_metadata WHERE db_name = ?")
            .bind(db_name)
            .execute(&mut *tx)
            .await?;

        for table in tables {
            let table_id = sqlx::query(
                "INSERT INTO table_metadata (db_name, schema_name, table_name, table_type) VALUES (?, ?, ?, ?)",
            )
            .bind(db_name)
            .bind(&table.schema_name)
            .bind(&table.table_name)
            .bind(table.table_type.as_str())
            .execute(&mut *tx)
            .await?
            .last_insert_rowid();

            for column in &table.columns {
                sqlx::query(
                    r#"
                    INSERT INTO column_metadata
                        (table_metadata_id, column_name, data_type, is_nullable, is_primary_key, default_value, position)
                    VALUES (?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(table_id)
                .bind(&column.column_name)
                .bind(&column.data_type)
                .bind(column.is_nullable)
                .bind(column.is_primary_key)
                .bind(&column.default_value)
                .bind(column.position)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        debug!(db_name, tables = tables.len(), "replaced cached metadata");
        Ok(())
    }

    /// Cached relations in extraction order, columns ordered by position.
    pub async fn list_tables(&self, db_name: &str) -> Result<Vec<TableMetadata>, QueryToolError> {
        let table_rows = sqlx::query(
            "SELECT id, schema_name, table_name, table_type FROM table_metadata WHERE db_name = ? ORDER BY id",
        )
        .bind(db_name)
        .fetch_all(&self.pool)
        .await?;

        let column_rows = sqlx::query(
            r#"
            SELECT c.table_metadata_id, c.column_name, c.data_type, c.is_nullable,
                   c.is_primary_key, c.default_value, c.position
            FROM column_metadata c
            JOIN table_metadata t ON t.id = c.table_metadata_id
            WHERE t.db_name = ?
            ORDER BY c.table_metadata_id, c.position
            "#,
        )
        .bind(db_name)
        .fetch_all(&self.pool)
        .await?;

        let mut columns: HashMap<i64, Vec<ColumnMetadata>> = HashMap::new();
        for row in &column_rows {
            columns
                .entry(row.try_get("table_metadata_id")?)
                .or_default()
                .push(row_to_column(row)?);
        }

        table_rows
            .iter()
            .map(|row| -> Result<TableMetadata, QueryToolError> {
                let id: i64 = row.try_get("id")?;
                Ok(TableMetadata {
                    schema_name: row.try_get("schema_name")?,
                    table_name: row.try_get("table_name")?,
                    table_type: RelationKind::parse(&row.try_get::<String, _>("table_type")?),
                    columns: columns.remove(&id).unwrap_or_default(),
                })
            })
            .collect()
    }

    /// Number of cached `(tables, views)` for `db_name`.
    pub async fn count_relations(&self, db_name: &str) -> Result<(i64, i64), QueryToolError> {
        let (tables, views): (i64, i64) = sqlx::query_as(
            r#"
            SELECT COALESCE(SUM(table_type = 'table'), 0), COALESCE(SUM(table_type = 'view'), 0)
            FROM table_metadata
            WHERE db_name = ?
            "#,
        )
        .bind(db_name)
        .fetch_one(&self.pool)
        .await?;
        Ok((tables, views))
    }
}

fn row_to_connection(row: &SqliteRow) -> Result<StoredConnection, QueryToolError> {
    Ok(StoredConnection {
        name: row.try_get("name")?,
        connection_url: row.try_get("connection_url")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
    })
}

fn row_to_column(row: &SqliteRow) -> Result<ColumnMetadata, QueryToolError> {
    Ok(ColumnMetadata {
        column_name: row.try_get("column_name")?,
        data_type: row.try_get("data_type")?,
        is_nullable: row.try_get("is_nullable")?,
        is_primary_key: row.try_get("is_primary_key")?,
        default_value: row.try_get("default_value")?,
        position: row.try_get("position")?,
    })
}
