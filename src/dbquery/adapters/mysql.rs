use async_trait::async_trait;
use futures::TryStreamExt;
use serde_json::{Map, Value};
use sqlparser::dialect::{Dialect, MySqlDialect};
use sqlx::mysql::{MySqlPoolOptions, MySqlRow};
use sqlx::{Column, Executor, Row, Statement, TypeInfo, ValueRef};
use tracing::debug;

use crate::dbquery::adapter::{
    ColumnSpec, DatabaseAdapter, DbPool, PoolConfig, RawColumn, RelationInfo, RelationKind,
    RowSet, SchemaInfo, describe_columns,
};
use crate::dbquery::error::AdapterError;
use crate::dbquery::registry::extract_database_name;
use crate::dbquery::values::bytes_to_json;

const LEGACY_DRIVER_PREFIX: &str = "mysql+pymysql://";

const SYSTEM_SCHEMAS: &[&str] = &["information_schema", "mysql", "performance_schema", "sys"];

const TYPE_MAPPINGS: &[(&str, &str)] = &[
    ("VARCHAR", "VARCHAR"),
    ("CHAR", "CHAR"),
    ("TEXT", "TEXT"),
    ("TINYTEXT", "TEXT"),
    ("MEDIUMTEXT", "TEXT"),
    ("LONGTEXT", "TEXT"),
    ("BLOB", "BLOB"),
    ("TINYBLOB", "BLOB"),
    ("MEDIUMBLOB", "BLOB"),
    ("LONGBLOB", "BLOB"),
    ("DATETIME", "DATETIME"),
    ("TIMESTAMP", "TIMESTAMP"),
    ("DATE", "DATE"),
    ("TIME", "TIME"),
    ("YEAR", "YEAR"),
    ("DECIMAL", "DECIMAL"),
    ("NUMERIC", "DECIMAL"),
    ("FLOAT", "FLOAT"),
    ("DOUBLE", "DOUBLE"),
    ("INT", "INT"),
    ("INTEGER", "INT"),
    ("TINYINT", "TINYINT"),
    ("SMALLINT", "SMALLINT"),
    ("MEDIUMINT", "MEDIUMINT"),
    ("BIGINT", "BIGINT"),
    ("BIT", "BIT"),
    ("BOOLEAN", "BOOLEAN"),
    ("BOOL", "BOOLEAN"),
    ("ENUM", "ENUM"),
    ("SET", "SET"),
    ("JSON", "JSON"),
    ("BINARY", "BINARY"),
    ("VARBINARY", "VARBINARY"),
];

const NL_RULES: &str = "
MySQL-specific rules:
- Use backticks (`) for identifier quoting if needed
- Use LIMIT n syntax (same as PostgreSQL)
- String literals use single quotes
- Boolean values: TRUE/FALSE or 1/0
- Date/time functions: NOW(), CURDATE(), DATE_FORMAT()
- Use IFNULL() instead of COALESCE for single argument";

#[derive(Debug, Default)]
pub struct MySqlAdapter;

#[async_trait]
impl DatabaseAdapter for MySqlAdapter {
    fn db_type(&self) -> &'static str {
        "mysql"
    }

    fn connection_prefixes(&self) -> &'static [&'static str] {
        &["mysql://", LEGACY_DRIVER_PREFIX]
    }

    fn dialect(&self) -> Box<dyn Dialect + Send + Sync> {
        Box::new(MySqlDialect {})
    }

    fn normalize_url(&self, url: &str) -> String {
        match url.get(..LEGACY_DRIVER_PREFIX.len()) {
            Some(prefix) if prefix.eq_ignore_ascii_case(LEGACY_DRIVER_PREFIX) => {
                format!("mysql://{}", &url[LEGACY_DRIVER_PREFIX.len()..])
            }
            _ => url.to_string(),
        }
    }

    fn normalize_data_type(&self, raw: &str) -> String {
        let base = raw.split('(').next().unwrap_or_default().trim().to_ascii_uppercase();
        TYPE_MAPPINGS
            .iter()
            .find(|(from, _)| *from == base)
            .map(|(_, to)| to.to_string())
            .unwrap_or_else(|| raw.to_string())
    }

    fn nl_rules(&self) -> &'static str {
        NL_RULES
    }

    async fn connect(&self, url: &str, config: &PoolConfig) -> Result<DbPool, AdapterError> {
        let pool = config
            .apply(MySqlPoolOptions::new())
            .connect(&self.normalize_url(url))
            .await
            .map_err(|err| AdapterError::Connect(err.to_string()))?;
        Ok(DbPool::MySql(pool))
    }

    /// The database named in the URL, or every non-system schema.
    async fn extract_schemas(
        &self,
        pool: &DbPool,
        url: &str,
    ) -> Result<Vec<SchemaInfo>, AdapterError> {
        if let Some(database) = extract_database_name(url) {
            return Ok(vec![SchemaInfo::default_schema(database)]);
        }

        let names: Vec<String> = sqlx::query_scalar(
            "SELECT CAST(SCHEMA_NAME AS CHAR) FROM information_schema.SCHEMATA ORDER BY SCHEMA_NAME",
        )
        .fetch_all(pool.as_mysql()?)
        .await
        .map_err(AdapterError::introspection)?;

        Ok(names
            .into_iter()
            .filter(|name| !SYSTEM_SCHEMAS.contains(&name.to_ascii_lowercase().as_str()))
            .map(|name| SchemaInfo {
                name,
                is_default: false,
            })
            .collect())
    }

    async fn list_relations(
        &self,
        pool: &DbPool,
        schema: &str,
    ) -> Result<Vec<RelationInfo>, AdapterError> {
        let rows = sqlx::query(
            r#"
            SELECT CAST(TABLE_NAME AS CHAR) AS name, CAST(TABLE_TYPE AS CHAR) AS kind
            FROM information_schema.TABLES
            WHERE TABLE_SCHEMA = ?
            ORDER BY TABLE_TYPE, TABLE_NAME
            "#,
        )
        .bind(schema)
        .fetch_all(pool.as_mysql()?)
        .await
        .map_err(AdapterError::introspection)?;

        rows.iter()
            .map(|row| {
                Ok(RelationInfo {
                    name: row.try_get("name")?,
                    kind: RelationKind::parse(&row.try_get::<String, _>("kind")?),
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(AdapterError::introspection)
    }

    async fn list_columns(
        &self,
        pool: &DbPool,
        schema: &str,
        relation: &str,
    ) -> Result<Vec<RawColumn>, AdapterError> {
        let rows = sqlx::query(
            r#"
            SELECT CAST(COLUMN_NAME AS CHAR) AS column_name,
                   CAST(DATA_TYPE AS CHAR) AS data_type,
                   CAST(IS_NULLABLE AS CHAR) AS is_nullable,
                   CAST(COLUMN_DEFAULT AS CHAR) AS column_default,
                   CAST(COLUMN_KEY AS CHAR) AS column_key,
                   CAST(ORDINAL_POSITION AS SIGNED) AS position
            FROM information_schema.COLUMNS
            WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ?
            ORDER BY ORDINAL_POSITION
            "#,
        )
        .bind(schema)
        .bind(relation)
        .fetch_all(pool.as_mysql()?)
        .await
        .map_err(AdapterError::introspection)?;

        rows.iter()
            .map(|row| {
                Ok(RawColumn {
                    name: row.try_get("column_name")?,
                    data_type: row.try_get("data_type")?,
                    is_nullable: row.try_get::<String, _>("is_nullable")? == "YES",
                    is_primary_key: row.try_get::<Option<String>, _>("column_key")?.as_deref()
                        == Some("PRI"),
                    default_value: row.try_get("column_default")?,
                    position: row.try_get("position")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(AdapterError::introspection)
    }

    async fn fetch_rows(
        &self,
        pool: &DbPool,
        sql: &str,
        max_rows: usize,
    ) -> Result<RowSet, AdapterError> {
        let pool = pool.as_mysql()?;
        let mut set = RowSet::default();

        {
            let mut stream = sqlx::raw_sql(sql).fetch(pool);
            while let Some(row) = stream.try_next().await.map_err(AdapterError::execution)? {
                if set.columns.is_empty() {
                    set.columns = describe_columns(&row);
                }
                let values = read_row(&row, &set.columns).map_err(AdapterError::execution)?;
                if set.push_capped(values, max_rows) {
                    break;
                }
            }
        }

        if set.columns.is_empty() {
            if let Ok(statement) = pool.prepare(sql).await {
                set.columns = statement
                    .columns()
                    .iter()
                    .map(|column| ColumnSpec {
                        name: column.name().to_string(),
                        type_name: column.type_info().name().to_string(),
                    })
                    .collect();
            }
        }

        debug!(rows = set.rows.len(), truncated = set.truncated, "mysql query finished");
        Ok(set)
    }
}

/// The text protocol delivers every value as bytes; decoding goes by column type.
fn read_row(row: &MySqlRow, columns: &[ColumnSpec]) -> Result<Map<String, Value>, sqlx::Error> {
    let mut values = Map::with_capacity(columns.len());
    for (index, column) in columns.iter().enumerate() {
        let value = if row.try_get_raw(index)?.is_null() {
            Value::Null
        } else {
            let bytes = row.try_get_unchecked::<Vec<u8>, _>(index)?;
            bytes_to_json(&column.type_name, &bytes)
        };
        values.insert(column.name.clone(), value);
    }
    Ok(values)
}
