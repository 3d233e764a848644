use std::sync::Arc;

use tracing::{info, warn};

use super::catalog::Catalog;
use super::connection::ConnectionManager;
use super::error::QueryToolError;
use super::metadata::{MetadataService, build_schema_context};
use super::model::{
    ConnectionDetail, ConnectionList, ConnectionSummary, GeneratedSql, QueryOutcome,
    StoredConnection,
};
use super::nl::{NlRequest, SqlGenerator, check_generated};
use super::query::QueryService;
use super::registry::mask_connection_url;

/// Connection lifecycle, querying and NL generation over one catalog.
#[derive(Clone)]
pub struct DbQueryService {
    catalog: Catalog,
    connections: Arc<ConnectionManager>,
    metadata: Arc<MetadataService>,
    query: Arc<QueryService>,
    generator: Arc<dyn SqlGenerator>,
}

impl DbQueryService {
    pub fn new(
        catalog: Catalog,
        connections: Arc<ConnectionManager>,
        generator: Arc<dyn SqlGenerator>,
        max_rows: usize,
    ) -> Self {
        Self {
            metadata: Arc::new(MetadataService::new(catalog.clone(), Arc::clone(&connections))),
            query: Arc::new(QueryService::new(Arc::clone(&connections), max_rows)),
            catalog,
            connections,
            generator,
        }
    }

    pub fn connections(&self) -> &ConnectionManager {
        &self.connections
    }

    pub async fn list_connections(&self) -> Result<ConnectionList, QueryToolError> {
        let mut data = Vec::new();
        for stored in self.catalog.list_connections().await? {
            data.push(self.summarize(stored).await?);
        }
        Ok(ConnectionList { data })
    }

    /// Tests, stores and introspects a new connection.
    ///
    /// A connection whose metadata cannot be read is not kept.
    pub async fn add_connection(&self, name: &str, url: &str) -> Result<ConnectionSummary, QueryToolError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(QueryToolError::Validation("Connection URL is required".to_string()));
        }

        let registry = self.connections.registry();
        if !registry.is_supported(url) {
            return Err(QueryToolError::InvalidConnectionUrl {
                supported: registry.list_all_prefixes(),
            });
        }

        if self.catalog.get_connection(name).await?.is_some() {
            return Err(QueryToolError::ConnectionAlreadyExists(name.to_string()));
        }

        self.connections.test_connection(name, url).await?;
        self.catalog.create_connection(name, url).await?;

        if let Err(error) = self.metadata.extract_metadata(name, url).await {
            warn!(name, "rolling back connection after failed extraction");
            self.connections.remove_pool(name, url).await;
            self.catalog.delete_connection(name).await?;
            return Err(error);
        }

        self.catalog.touch_connection(name).await?;
        info!(name, url = %mask_connection_url(url), "connection added");

        let stored = self.catalog.require_connection(name).await?;
        self.summarize(stored).await
    }

    pub async fn get_connection(&self, name: &str) -> Result<ConnectionDetail, QueryToolError> {
        let stored = self.catalog.require_connection(name).await?;
        self.detail(stored).await
    }

    /// Reconnects and re-reads the schema. On failure the cached metadata
    /// is left as it was.
    pub async fn refresh_connection(&self, name: &str) -> Result<ConnectionDetail, QueryToolError> {
        let stored = self.catalog.require_connection(name).await?;
        self.connections
            .remove_pool(name, &stored.connection_url)
            .await;
        self.metadata
            .extract_metadata(name, &stored.connection_url)
            .await?;
        self.catalog.touch_connection(name).await?;

        let stored = self.catalog.require_connection(name).await?;
        self.detail(stored).await
    }

    /// Forgets the connection locally; the remote database is untouched.
    pub async fn delete_connection(&self, name: &str) -> Result<(), QueryToolError> {
        let stored = self.catalog.require_connection(name).await?;
        self.connections
            .remove_pool(name, &stored.connection_url)
            .await;
        self.catalog.delete_connection(name).await?;
        info!(name, "connection deleted");
        Ok(())
    }

    pub async fn execute_query(&self, name: &str, sql: &str) -> Result<QueryOutcome, QueryToolError> {
        let stored = self.catalog.require_connection(name).await?;
        self.query
            .execute(name, &stored.connection_url, sql)
            .await
    }

    /// Asks the generator for SQL answering `question` over the cached schema.
    pub async fn natural_query(&self, name: &str, question: &str) -> Result<GeneratedSql, QueryToolError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(QueryToolError::Validation("Question must not be empty".to_string()));
        }

        let stored = self.catalog.require_connection(name).await?;
        let adapter = self.connections.adapter_for(&stored.connection_url)?;
        let tables = self.catalog.list_tables(name).await?;

        let request = NlRequest {
            question: question.to_string(),
            schema_context: build_schema_context(&tables),
            db_type: adapter.db_type().to_string(),
            dialect_rules: adapter.nl_rules().to_string(),
        };

        let generated = self.generator.generate(&request).await.map_err(|error| {
            warn!(name, %error, "SQL generation failed");
            QueryToolError::from(error)
        })?;
        check_generated(&generated, adapter.dialect().as_ref())?;
        Ok(generated)
    }

    async fn summarize(&self, stored: StoredConnection) -> Result<ConnectionSummary, QueryToolError> {
        let (table_count, view_count) = self.catalog.count_relations(&stored.name).await?;
        Ok(ConnectionSummary {
            connection_url: mask_connection_url(&stored.connection_url),
            name: stored.name,
            created_at: stored.created_at,
            updated_at: stored.updated_at,
            table_count,
            view_count,
        })
    }

    async fn detail(&self, stored: StoredConnection) -> Result<ConnectionDetail, QueryToolError> {
        let tables = self.catalog.list_tables(&stored.name).await?;
        Ok(ConnectionDetail {
            summary: self.summarize(stored).await?,
            tables,
        })
    }
}
