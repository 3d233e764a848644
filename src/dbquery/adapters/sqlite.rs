use std::str::FromStr;

use async_trait::async_trait;
use futures::TryStreamExt;
use serde_json::{Map, Number, Value};
use sqlparser::dialect::{Dialect, SQLiteDialect};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Executor, Row, Statement, TypeInfo, ValueRef};
use tracing::debug;

use crate::dbquery::adapter::{
    ColumnSpec, DatabaseAdapter, DbPool, PoolConfig, RawColumn, RelationInfo, RelationKind,
    RowSet, SchemaInfo, describe_columns,
};
use crate::dbquery::error::AdapterError;
use crate::dbquery::values::{binary_to_json, text_to_json};

const NL_RULES: &str = "
SQLite-specific rules:
- No identifier quoting needed in most cases
- Use LIMIT n syntax
- String literals use single quotes
- No native boolean type (use 0/1)
- Date/time functions: datetime(), date(), strftime()";

#[derive(Debug, Default)]
pub struct SqliteAdapter;

#[async_trait]
impl DatabaseAdapter for SqliteAdapter {
    fn db_type(&self) -> &'static str {
        "sqlite"
    }

    fn connection_prefixes(&self) -> &'static [&'static str] {
        &["sqlite://"]
    }

    fn dialect(&self) -> Box<dyn Dialect + Send + Sync> {
        Box::new(SQLiteDialect {})
    }

    fn supports_schemas(&self) -> bool {
        false
    }

    fn pool_config(&self) -> PoolConfig {
        PoolConfig::default().max_connections(5)
    }

    /// Maps a declared type onto its SQLite affinity.
    fn normalize_data_type(&self, raw: &str) -> String {
        let upper = raw.to_ascii_uppercase();
        let has = |needles: &[&str]| needles.iter().any(|needle| upper.contains(needle));

        if has(&["INT"]) {
            "INTEGER".to_string()
        } else if has(&["CHAR", "TEXT", "CLOB"]) {
            "TEXT".to_string()
        } else if upper.contains("BLOB") || upper.trim().is_empty() {
            "BLOB".to_string()
        } else if has(&["REAL", "FLOA", "DOUB"]) {
            "REAL".to_string()
        } else if has(&["DECIMAL", "NUMERIC", "BOOLEAN", "DATE", "TIME"]) {
            "NUMERIC".to_string()
        } else {
            raw.to_string()
        }
    }

    fn nl_rules(&self) -> &'static str {
        NL_RULES
    }

    /// Opens the file read-only; a missing file is a connection failure.
    async fn connect(&self, url: &str, config: &PoolConfig) -> Result<DbPool, AdapterError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|err| AdapterError::Connect(err.to_string()))?
            .read_only(true)
            .create_if_missing(false);

        let pool = config
            .apply(SqlitePoolOptions::new())
            .connect_with(options)
            .await
            .map_err(|err| AdapterError::Connect(err.to_string()))?;
        Ok(DbPool::Sqlite(pool))
    }

    async fn extract_schemas(
        &self,
        _pool: &DbPool,
        _url: &str,
    ) -> Result<Vec<SchemaInfo>, AdapterError> {
        Ok(vec![SchemaInfo::default_schema("main")])
    }

    async fn list_relations(
        &self,
        pool: &DbPool,
        _schema: &str,
    ) -> Result<Vec<RelationInfo>, AdapterError> {
        let rows = sqlx::query(
            r#"
            SELECT name, type
            FROM sqlite_master
            WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite\_%' ESCAPE '\'
            ORDER BY type, name
            "#,
        )
        .fetch_all(pool.as_sqlite()?)
        .await
        .map_err(AdapterError::introspection)?;

        rows.iter()
            .map(|row| {
                Ok(RelationInfo {
                    name: row.try_get("name")?,
                    kind: RelationKind::parse(&row.try_get::<String, _>("type")?),
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(AdapterError::introspection)
    }

    async fn list_columns(
        &self,
        pool: &DbPool,
        _schema: &str,
        relation: &str,
    ) -> Result<Vec<RawColumn>, AdapterError> {
        let rows = sqlx::query(
            r#"SELECT cid, name, type, "notnull", dflt_value, pk FROM pragma_table_info(?) ORDER BY cid"#,
        )
        .bind(relation)
        .fetch_all(pool.as_sqlite()?)
        .await
        .map_err(AdapterError::introspection)?;

        rows.iter()
            .map(|row| {
                Ok(RawColumn {
                    name: row.try_get_unchecked("name")?,
                    data_type: row.try_get_unchecked("type")?,
                    is_nullable: row.try_get_unchecked::<i64, _>("notnull")? == 0,
                    is_primary_key: row.try_get_unchecked::<i64, _>("pk")? > 0,
                    default_value: row.try_get_unchecked("dflt_value")?,
                    position: row.try_get_unchecked::<i64, _>("cid")? + 1,
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
        let pool = pool.as_sqlite()?;
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

        debug!(rows = set.rows.len(), truncated = set.truncated, "sqlite query finished");
        Ok(set)
    }
}

/// Values are read by their storage class, not the declared column type.
fn read_row(row: &SqliteRow, columns: &[ColumnSpec]) -> Result<Map<String, Value>, sqlx::Error> {
    let mut values = Map::with_capacity(columns.len());
    for (index, column) in columns.iter().enumerate() {
        let raw = row.try_get_raw(index)?;
        let value = if raw.is_null() {
            Value::Null
        } else {
            let storage = raw.type_info().name().to_string();
            match storage.as_str() {
                "INTEGER" => Value::from(row.try_get_unchecked::<i64, _>(index)?),
                "REAL" => Number::from_f64(row.try_get_unchecked::<f64, _>(index)?)
                    .map(Value::Number)
                    .unwrap_or(Value::Null),
                "BLOB" => binary_to_json(&row.try_get_unchecked::<Vec<u8>, _>(index)?),
                _ => text_to_json(
                    &column.type_name,
                    &row.try_get_unchecked::<String, _>(index)?,
                ),
            }
        };
        values.insert(column.name.clone(), value);
    }
    Ok(values)
}
