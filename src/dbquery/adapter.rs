//! Per-database strategy for URL handling, introspection and execution.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlparser::dialect::Dialect;
use sqlx::mysql::MySqlPool;
use sqlx::pool::PoolOptions;
use sqlx::postgres::PgPool;
use sqlx::sqlite::SqlitePool;
use sqlx::{Column, Database, Row, TypeInfo};

use super::error::AdapterError;

/// Pool sizing and health settings handed to `sqlx`.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub test_before_acquire: bool,
    pub max_lifetime: Option<Duration>,
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 15,
            min_connections: 0,
            test_before_acquire: true,
            max_lifetime: None,
            acquire_timeout: Duration::from_secs(10),
        }
    }
}

impl PoolConfig {
    /// One connection, used for throw-away connectivity checks.
    pub fn single() -> Self {
        Self::default().max_connections(1)
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max.max(1);
        self
    }

    pub fn min_connections(mut self, min: u32) -> Self {
        self.min_connections = min;
        self
    }

    pub fn max_lifetime(mut self, lifetime: Duration) -> Self {
        self.max_lifetime = Some(lifetime);
        self
    }

    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn apply<DB: Database>(&self, options: PoolOptions<DB>) -> PoolOptions<DB> {
        options
            .max_connections(self.max_connections)
            .min_connections(self.min_connections.min(self.max_connections))
            .test_before_acquire(self.test_before_acquire)
            .max_lifetime(self.max_lifetime)
            .acquire_timeout(self.acquire_timeout)
    }
}

/// A live pool for one of the supported drivers.
#[derive(Debug, Clone)]
pub enum DbPool {
    Postgres(PgPool),
    MySql(MySqlPool),
    Sqlite(SqlitePool),
}

impl DbPool {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Postgres(_) => "postgresql",
            Self::MySql(_) => "mysql",
            Self::Sqlite(_) => "sqlite",
        }
    }

    pub async fn ping(&self) -> Result<(), sqlx::Error> {
        match self {
            Self::Postgres(pool) => sqlx::query("SELECT 1").execute(pool).await.map(|_| ()),
            Self::MySql(pool) => sqlx::query("SELECT 1").execute(pool).await.map(|_| ()),
            Self::Sqlite(pool) => sqlx::query("SELECT 1").execute(pool).await.map(|_| ()),
        }
    }

    pub async fn close(&self) {
        match self {
            Self::Postgres(pool) => pool.close().await,
            Self::MySql(pool) => pool.close().await,
            Self::Sqlite(pool) => pool.close().await,
        }
    }

    pub fn as_postgres(&self) -> Result<&PgPool, AdapterError> {
        match self {
            Self::Postgres(pool) => Ok(pool),
            other => Err(other.mismatch("postgresql")),
        }
    }

    pub fn as_mysql(&self) -> Result<&MySqlPool, AdapterError> {
        match self {
            Self::MySql(pool) => Ok(pool),
            other => Err(other.mismatch("mysql")),
        }
    }

    pub fn as_sqlite(&self) -> Result<&SqlitePool, AdapterError> {
        match self {
            Self::Sqlite(pool) => Ok(pool),
            other => Err(other.mismatch("sqlite")),
        }
    }

    fn mismatch(&self, expected: &'static str) -> AdapterError {
        AdapterError::PoolMismatch {
            expected,
            actual: self.kind(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaInfo {
    pub name: String,
    pub is_default: bool,
}

impl SchemaInfo {
    pub fn default_schema(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_default: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationKind {
    Table,
    View,
}

impl RelationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Table => "table",
            Self::View => "view",
        }
    }

    pub fn parse(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("view") {
            Self::View
        } else {
            Self::Table
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationInfo {
    pub name: String,
    pub kind: RelationKind,
}

/// Column as reported by the database, before normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawColumn {
    pub name: String,
    pub data_type: String,
    pub is_nullable: bool,
    pub is_primary_key: bool,
    pub default_value: Option<String>,
    pub position: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: String,
    pub type_name: String,
}

/// Rows of one query, capped at the requested maximum.
#[derive(Debug, Clone, Default)]
pub struct RowSet {
    pub columns: Vec<ColumnSpec>,
    pub rows: Vec<Map<String, Value>>,
    pub truncated: bool,
}

impl RowSet {
    /// Appends a row and reports whether the cap has been reached.
    pub fn push_capped(&mut self, row: Map<String, Value>, max_rows: usize) -> bool {
        self.rows.push(row);
        if self.rows.len() >= max_rows {
            self.truncated = true;
        }
        self.truncated
    }
}

#[async_trait]
pub trait DatabaseAdapter: std::fmt::Debug + Send + Sync {
    /// Stable identifier: `postgresql`, `mysql` or `sqlite`.
    fn db_type(&self) -> &'static str;

    fn connection_prefixes(&self) -> &'static [&'static str];

    fn dialect(&self) -> Box<dyn Dialect + Send + Sync>;

    fn supports_schemas(&self) -> bool {
        true
    }

    fn supports_limit_clause(&self) -> bool {
        true
    }

    fn pool_config(&self) -> PoolConfig {
        PoolConfig::default()
    }

    fn normalize_url(&self, url: &str) -> String {
        url.to_string()
    }

    fn matches_url(&self, url: &str) -> bool {
        let lower = url.to_ascii_lowercase();
        self.connection_prefixes()
            .iter()
            .any(|prefix| lower.starts_with(&prefix.to_ascii_lowercase()))
    }

    fn normalize_data_type(&self, raw: &str) -> String;

    fn normalize_default_value(&self, raw: Option<&str>) -> Option<String> {
        raw.map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    }

    /// Dialect-specific rules appended to the NL-to-SQL system prompt.
    fn nl_rules(&self) -> &'static str;

    async fn connect(&self, url: &str, config: &PoolConfig) -> Result<DbPool, AdapterError>;

    async fn extract_schemas(&self, pool: &DbPool, url: &str)
    -> Result<Vec<SchemaInfo>, AdapterError>;

    async fn list_relations(
        &self,
        pool: &DbPool,
        schema: &str,
    ) -> Result<Vec<RelationInfo>, AdapterError>;

    async fn list_columns(
        &self,
        pool: &DbPool,
        schema: &str,
        relation: &str,
    ) -> Result<Vec<RawColumn>, AdapterError>;

    async fn fetch_rows(
        &self,
        pool: &DbPool,
        sql: &str,
        max_rows: usize,
    ) -> Result<RowSet, AdapterError>;
}

/// Column names and type names of a result row.
pub fn describe_columns<R: Row>(row: &R) -> Vec<ColumnSpec> {
    row.columns()
        .iter()
        .map(|column| ColumnSpec {
            name: column.name().to_string(),
            type_name: column.type_info().name().to_string(),
        })
        .collect()
}
