//! Guarded execution of user SQL against a stored connection.

use std::sync::Arc;

use tracing::{debug, warn};

use super::connection::ConnectionManager;
use super::error::QueryToolError;
use super::model::{QueryColumn, QueryOutcome};
use super::sql::transform_sql;

pub const DEFAULT_MAX_ROWS: usize = 1000;

pub struct QueryService {
    connections: Arc<ConnectionManager>,
    max_rows: usize,
}

impl QueryService {
    pub fn new(connections: Arc<ConnectionManager>, max_rows: usize) -> Self {
        Self {
            connections,
            max_rows: max_rows.max(1),
        }
    }

    pub fn max_rows(&self) -> usize {
        self.max_rows
    }

    /// Validates `sql` in the connection's dialect, caps it and runs it.
    pub async fn execute(&self, name: &str, url: &str, sql: &str) -> Result<QueryOutcome, QueryToolError> {
        let adapter = self.connections.adapter_for(url)?;

        let statement = transform_sql(
            sql,
            adapter.dialect().as_ref(),
            self.max_rows,
            adapter.supports_limit_clause(),
        )
        .map_err(|err| {
            warn!(name, error = %err, "rejected SQL statement");
            QueryToolError::from_guard(err, sql)
        })?;

        let pool = self
            .connections
            .get_pool(name, url)
            .await
            .map_err(|err| QueryToolError::QueryExecution {
                message: err.to_string(),
                sql: Some(statement.clone()),
            })?;

        let set = adapter
            .fetch_rows(&pool, &statement, self.max_rows)
            .await
            .map_err(|err| QueryToolError::QueryExecution {
                message: err.to_string(),
                sql: Some(statement.clone()),
            })?;

        debug!(name, rows = set.rows.len(), truncated = set.truncated, "query executed");

        Ok(QueryOutcome {
            columns: set
                .columns
                .into_iter()
                .map(|column| QueryColumn {
                    name: column.name,
                    type_name: column.type_name,
                })
                .collect(),
            row_count: set.rows.len(),
            rows: set.rows,
            truncated: set.truncated,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dbquery::registry::AdapterRegistry;
    use serde_json::json;
    use tempfile::TempDir;

    async fn fixture(max_rows: usize) -> (TempDir, String, QueryService) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("q.db").display());
        let options = url
            .parse::<sqlx::sqlite::SqliteConnectOptions>()
            .unwrap()
            .create_if_missing(true);
        let pool = sqlx::SqlitePool::connect_with(options).await.unwrap();
        sqlx::raw_sql(
            "CREATE TABLE n (v INTEGER, label TEXT);
             INSERT INTO n VALUES (1, 'one'), (2, 'two'), (3, 'three');",
        )
        .execute(&pool)
        .await
        .unwrap();
        pool.close().await;

        let manager = Arc::new(ConnectionManager::new(Arc::new(AdapterRegistry::with_builtin())));
        (dir, url, QueryService::new(manager, max_rows))
    }

    fn assert_send<T: Send>(_: &T) {}

    #[tokio::test]
    async fn execution_future_can_move_between_threads() {
        let (_dir, url, service) = fixture(10).await;
        let future = service.execute("n", &url, "SELECT v FROM n");
        assert_send(&future);
        assert_eq!(future.await.unwrap().row_count, 3);
    }

    #[tokio::test]
    async fn rows_are_capped_and_flagged() {
        let (_dir, url, service) = fixture(2).await;
        let outcome = service.execute("n", &url, "SELECT v FROM n ORDER BY v;").await.unwrap();
        assert_eq!(outcome.row_count, 2);
        assert!(outcome.truncated);
        assert_eq!(outcome.rows[1]["v"], json!(2));

        let outcome = service
            .execute("n", &url, "SELECT label FROM n WHERE v = 3")
            .await
            .unwrap();
        assert_eq!(outcome.row_count, 1);
        assert!(!outcome.truncated);
        assert_eq!(outcome.columns[0].name, "label");
    }

    #[tokio::test]
    async fn writes_never_reach_the_database() {
        let (_dir, url, service) = fixture(10).await;
        let err = service.execute("n", &url, "DELETE FROM n").await.unwrap_err();
        assert!(matches!(err, QueryToolError::NonSelectStatement(keyword) if keyword == "DELETE"));

        let outcome = service.execute("n", &url, "SELECT COUNT(*) AS c FROM n").await.unwrap();
        assert_eq!(outcome.rows[0]["c"], json!(3));
    }

    #[tokio::test]
    async fn failing_statement_is_an_execution_error() {
        let (_dir, url, service) = fixture(10).await;
        let err = service
            .execute("n", &url, "SELECT * FROM missing_table")
            .await
            .unwrap_err();
        match err {
            QueryToolError::QueryExecution { message, sql } => {
                assert!(message.contains("missing_table"));
                assert_eq!(sql.as_deref(), Some("SELECT * FROM missing_table LIMIT 10"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
