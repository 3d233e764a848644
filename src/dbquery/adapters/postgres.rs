use async_trait::async_trait;
use futures::TryStreamExt;
use serde_json::{Map, Value};
use sqlparser::dialect::{Dialect, PostgreSqlDialect};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{Column, Executor, Row, Statement, TypeInfo, ValueRef};
use tracing::debug;

use crate::dbquery::adapter::{
    ColumnSpec, DatabaseAdapter, DbPool, PoolConfig, RawColumn, RelationInfo, RelationKind,
    RowSet, SchemaInfo, describe_columns,
};
use crate::dbquery::error::AdapterError;
use crate::dbquery::values::text_to_json;

const TYPE_MAPPINGS: &[(&str, &str)] = &[
    ("CHARACTER VARYING", "VARCHAR"),
    ("CHARACTER", "CHAR"),
    ("DOUBLE PRECISION", "DOUBLE"),
    ("TIMESTAMP WITHOUT TIME ZONE", "TIMESTAMP"),
    ("TIMESTAMP WITH TIME ZONE", "TIMESTAMPTZ"),
    ("TIME WITHOUT TIME ZONE", "TIME"),
    ("TIME WITH TIME ZONE", "TIMETZ"),
    ("BIGSERIAL", "BIGINT"),
    ("SERIAL", "INTEGER"),
    ("SMALLSERIAL", "SMALLINT"),
];

const NL_RULES: &str = "
PostgreSQL-specific rules:
- Use double quotes (\") for identifier quoting if needed
- Use LIMIT n syntax
- String literals use single quotes
- Boolean values: true/false
- Date/time functions: NOW(), CURRENT_DATE, TO_CHAR()
- Use COALESCE() for null handling";

#[derive(Debug, Default)]
pub struct PostgresAdapter;

#[async_trait]
impl DatabaseAdapter for PostgresAdapter {
    fn db_type(&self) -> &'static str {
        "postgresql"
    }

    fn connection_prefixes(&self) -> &'static [&'static str] {
        &["postgresql://", "postgres://"]
    }

    fn dialect(&self) -> Box<dyn Dialect + Send + Sync> {
        Box::new(PostgreSqlDialect {})
    }

    fn normalize_url(&self, url: &str) -> String {
        match url.get(..11) {
            Some(prefix) if prefix.eq_ignore_ascii_case("postgres://") => {
                format!("postgresql://{}", &url[11..])
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
            .apply(PgPoolOptions::new())
            .connect(&self.normalize_url(url))
            .await
            .map_err(|err| AdapterError::Connect(err.to_string()))?;
        Ok(DbPool::Postgres(pool))
    }

    async fn extract_schemas(
        &self,
        _pool: &DbPool,
        _url: &str,
    ) -> Result<Vec<SchemaInfo>, AdapterError> {
        Ok(vec![SchemaInfo::default_schema("public")])
    }

    async fn list_relations(
        &self,
        pool: &DbPool,
        schema: &str,
    ) -> Result<Vec<RelationInfo>, AdapterError> {
        let rows = sqlx::query(
            r#"
            SELECT table_name::text AS name,
                   CASE WHEN table_type = 'VIEW' THEN 'view' ELSE 'table' END AS kind
            FROM information_schema.tables
            WHERE table_schema = $1 AND table_type IN ('BASE TABLE', 'VIEW')
            ORDER BY table_type, table_name
            "#,
        )
        .bind(schema)
        .fetch_all(pool.as_postgres()?)
        .await
        .map_err(AdapterError::introspection)?;

        rows.iter()
            .map(|row| {
                Ok(RelationInfo {
                    name: row.try_get("name")?,
                    kind: RelationKind::parse(row.try_get::<&str, _>("kind")?),
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
            SELECT c.column_name::text AS column_name,
                   CASE WHEN c.data_type = 'USER-DEFINED' THEN c.udt_name::text
                        ELSE UPPER(c.data_type::text) END AS data_type,
                   (c.is_nullable = 'YES') AS is_nullable,
                   c.column_default::text AS column_default,
                   CAST(c.ordinal_position AS INTEGER) AS position,
                   EXISTS (
                       SELECT 1
                       FROM information_schema.table_constraints tc
                       JOIN information_schema.key_column_usage kcu
                         ON tc.constraint_name = kcu.constraint_name
                        AND tc.table_schema = kcu.table_schema
                        AND tc.table_name = kcu.table_name
                       WHERE tc.constraint_type = 'PRIMARY KEY'
                         AND tc.table_schema = c.table_schema
                         AND tc.table_name = c.table_name
                         AND kcu.column_name = c.column_name
                   ) AS is_primary_key
            FROM information_schema.columns c
            WHERE c.table_schema = $1 AND c.table_name = $2
            ORDER BY c.ordinal_position
            "#,
        )
        .bind(schema)
        .bind(relation)
        .fetch_all(pool.as_postgres()?)
        .await
        .map_err(AdapterError::introspection)?;

        rows.iter()
            .map(|row| {
                Ok(RawColumn {
                    name: row.try_get("column_name")?,
                    data_type: row.try_get("data_type")?,
                    is_nullable: row.try_get("is_nullable")?,
                    is_primary_key: row.try_get("is_primary_key")?,
                    default_value: row.try_get("column_default")?,
                    position: i64::from(row.try_get::<i32, _>("position")?),
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
        let pool = pool.as_postgres()?;
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

        debug!(rows = set.rows.len(), truncated = set.truncated, "postgres query finished");
        Ok(set)
    }
}

fn read_row(row: &PgRow, columns: &[ColumnSpec]) -> Result<Map<String, Value>, sqlx::Error> {
    let mut values = Map::with_capacity(columns.len());
    for (index, column) in columns.iter().enumerate() {
        let value = if row.try_get_raw(index)?.is_null() {
            Value::Null
        } else {
            let text = row.try_get_unchecked::<String, _>(index)?;
            text_to_json(&column.type_name, &text)
        };
        values.insert(column.name.clone(), value);
    }
    Ok(values)
}
