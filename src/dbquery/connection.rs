//! Pool cache keyed by connection name and normalized URL.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::adapter::{DatabaseAdapter, DbPool, PoolConfig};
use super::error::{AdapterError, QueryToolError};
use super::registry::{AdapterRegistry, mask_connection_url};

pub struct ConnectionManager {
    registry: Arc<AdapterRegistry>,
    pools: RwLock<HashMap<String, DbPool>>,
}

impl ConnectionManager {
    pub fn new(registry: Arc<AdapterRegistry>) -> Self {
        Self {
            registry,
            pools: RwLock::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &AdapterRegistry {
        &self.registry
    }

    pub fn adapter_for(&self, url: &str) -> Result<Arc<dyn DatabaseAdapter>, AdapterError> {
        self.registry.get_adapter(url)
    }

    /// Returns the cached pool for `name`, opening one on first use.
    ///
    /// The cache lock is not held while connecting. When two callers race,
    /// the first pool cached wins and the other is closed.
    pub async fn get_pool(&self, name: &str, url: &str) -> Result<DbPool, QueryToolError> {
        let adapter = self.adapter_for(url)?;
        let key = cache_key(name, &adapter.normalize_url(url));

        if let Some(pool) = self.pools.read().await.get(&key) {
            return Ok(pool.clone());
        }

        let pool = adapter
            .connect(url, &adapter.pool_config())
            .await
            .map_err(|err| QueryToolError::ConnectionFailed {
                name: name.to_string(),
                reason: err.to_string(),
            })?;

        let (cached, duplicate) = match self.pools.write().await.entry(key) {
            Entry::Occupied(existing) => (existing.get().clone(), Some(pool)),
            Entry::Vacant(slot) => (slot.insert(pool).clone(), None),
        };

        match duplicate {
            Some(duplicate) => duplicate.close().await,
            None => info!(name, url = %mask_connection_url(url), "opened connection pool"),
        }
        Ok(cached)
    }

    /// Closes and forgets the pool for `name`, if one is cached.
    pub async fn remove_pool(&self, name: &str, url: &str) {
        let Ok(adapter) = self.adapter_for(url) else {
            return;
        };
        let key = cache_key(name, &adapter.normalize_url(url));
        let removed = self.pools.write().await.remove(&key);
        if let Some(pool) = removed {
            pool.close().await;
            debug!(name, "closed connection pool");
        }
    }

    /// Opens a one-connection pool, runs `SELECT 1` and closes it again.
    pub async fn test_connection(&self, name: &str, url: &str) -> Result<(), QueryToolError> {
        let adapter = self.adapter_for(url)?;
        let failed = |reason: String| QueryToolError::ConnectionFailed {
            name: name.to_string(),
            reason,
        };

        let pool = adapter
            .connect(url, &PoolConfig::single())
            .await
            .map_err(|err| failed(err.to_string()))?;
        let outcome = pool.ping().await;
        pool.close().await;

        outcome.map_err(|err| {
            warn!(name, error = %err, "connection test failed");
            failed(err.to_string())
        })
    }

    pub async fn close_all(&self) {
        let pools: Vec<DbPool> = self.pools.write().await.drain().map(|(_, pool)| pool).collect();
        for pool in pools {
            pool.close().await;
        }
    }

    pub async fn cached_pools(&self) -> usize {
        self.pools.read().await.len()
    }
}

fn cache_key(name: &str, normalized_url: &str) -> String {
    format!("{name}:{normalized_url}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;
    use sqlparser::dialect::Dialect;
    use tokio::sync::Notify;

    use crate::dbquery::adapter::{RawColumn, RelationInfo, RowSet, SchemaInfo};
    use crate::dbquery::adapters::SqliteAdapter;

    /// SQLite behind a `gated://` scheme whose connect waits for a permit.
    #[derive(Debug)]
    struct GatedAdapter {
        gate: Arc<Notify>,
    }

    impl GatedAdapter {
        fn sqlite_url(url: &str) -> String {
            url.replacen("gated://", "sqlite://", 1)
        }
    }

    #[async_trait]
    impl DatabaseAdapter for GatedAdapter {
        fn db_type(&self) -> &'static str {
            "gated"
        }

        fn connection_prefixes(&self) -> &'static [&'static str] {
            &["gated://"]
        }

        fn dialect(&self) -> Box<dyn Dialect + Send + Sync> {
            SqliteAdapter.dialect()
        }

        fn normalize_data_type(&self, raw: &str) -> String {
            SqliteAdapter.normalize_data_type(raw)
        }

        fn nl_rules(&self) -> &'static str {
            ""
        }

        async fn connect(&self, url: &str, config: &PoolConfig) -> Result<DbPool, AdapterError> {
            self.gate.notified().await;
            SqliteAdapter.connect(&Self::sqlite_url(url), config).await
        }

        async fn extract_schemas(
            &self,
            pool: &DbPool,
            url: &str,
        ) -> Result<Vec<SchemaInfo>, AdapterError> {
            SqliteAdapter.extract_schemas(pool, url).await
        }

        async fn list_relations(
            &self,
            pool: &DbPool,
            schema: &str,
        ) -> Result<Vec<RelationInfo>, AdapterError> {
            SqliteAdapter.list_relations(pool, schema).await
        }

        async fn list_columns(
            &self,
            pool: &DbPool,
            schema: &str,
            relation: &str,
        ) -> Result<Vec<RawColumn>, AdapterError> {
            SqliteAdapter.list_columns(pool, schema, relation).await
        }

        async fn fetch_rows(
            &self,
            pool: &DbPool,
            sql: &str,
            max_rows: usize,
        ) -> Result<RowSet, AdapterError> {
            SqliteAdapter.fetch_rows(pool, sql, max_rows).await
        }
    }

    fn manager() -> ConnectionManager {
        ConnectionManager::new(Arc::new(AdapterRegistry::with_builtin()))
    }

    async fn sqlite_file(dir: &tempfile::TempDir) -> String {
        let path = dir.path().join("data.db");
        let url = format!("sqlite://{}", path.display());
        let options = url
            .parse::<sqlx::sqlite::SqliteConnectOptions>()
            .unwrap()
            .create_if_missing(true);
        let pool = sqlx::SqlitePool::connect_with(options).await.unwrap();
        sqlx::query("CREATE TABLE t (id INTEGER)").execute(&pool).await.unwrap();
        pool.close().await;
        url
    }

    #[tokio::test]
    async fn pools_are_cached_per_name() {
        let dir = tempfile::tempdir().unwrap();
        let url = sqlite_file(&dir).await;
        let manager = manager();

        manager.get_pool("a", &url).await.unwrap();
        manager.get_pool("a", &url).await.unwrap();
        manager.get_pool("b", &url).await.unwrap();
        assert_eq!(manager.cached_pools().await, 2);

        manager.remove_pool("a", &url).await;
        assert_eq!(manager.cached_pools().await, 1);

        manager.close_all().await;
        assert_eq!(manager.cached_pools().await, 0);
    }

    #[tokio::test]
    async fn connection_test_reports_failures() {
        let dir = tempfile::tempdir().unwrap();
        let url = sqlite_file(&dir).await;
        let manager = manager();

        manager.test_connection("ok", &url).await.unwrap();
        assert_eq!(manager.cached_pools().await, 0);

        let missing = format!("sqlite://{}", dir.path().join("nope.db").display());
        let err = manager.test_connection("bad", &missing).await.unwrap_err();
        assert!(matches!(err, QueryToolError::ConnectionFailed { ref name, .. } if name == "bad"));

        let err = manager.test_connection("x", "oracle://h/db").await.unwrap_err();
        assert!(matches!(
            err,
            QueryToolError::Adapter(AdapterError::Unsupported { .. })
        ));
    }

    #[tokio::test]
    async fn slow_connect_does_not_block_cached_pools() {
        let dir = tempfile::tempdir().unwrap();
        let url = sqlite_file(&dir).await;
        let gate = Arc::new(Notify::new());

        let mut registry = AdapterRegistry::with_builtin();
        registry
            .register(Arc::new(GatedAdapter {
                gate: Arc::clone(&gate),
            }))
            .unwrap();
        let manager = Arc::new(ConnectionManager::new(Arc::new(registry)));
        manager.get_pool("fast", &url).await.unwrap();

        let slow_url = url.replacen("sqlite://", "gated://", 1);
        let pending = tokio::spawn({
            let manager = Arc::clone(&manager);
            async move { manager.get_pool("slow", &slow_url).await.map(|_| ()) }
        });
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }

        let cached = tokio::time::timeout(Duration::from_secs(1), manager.get_pool("fast", &url)).await;
        assert!(cached.is_ok(), "cached lookup waited on another connect");
        assert_eq!(manager.cached_pools().await, 1);

        gate.notify_one();
        pending.await.unwrap().unwrap();
        assert_eq!(manager.cached_pools().await, 2);
        manager.close_all().await;
    }
}
