use serde_json::json;
use thiserror::Error;

use super::sql::SqlGuardError;
use crate::web::WebError;

/// Failures raised by the adapter layer: registry lookups and driver calls.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("Unsupported database connection URL: {url}. Supported prefixes: {}", .supported.join(", "))]
    Unsupported { url: String, supported: Vec<String> },

    #[error("Adapter not found for database type: {0}")]
    NotFound(String),

    #[error("Failed to register adapter '{adapter}': {reason}")]
    Registration { adapter: String, reason: String },

    #[error("{0}")]
    Connect(String),

    #[error("failed to read schema metadata: {0}")]
    Introspection(String),

    #[error("{0}")]
    Execution(String),

    #[error("pool belongs to {actual}, adapter expects {expected}")]
    PoolMismatch {
        expected: &'static str,
        actual: &'static str,
    },
}

impl AdapterError {
    pub fn introspection(err: sqlx::Error) -> Self {
        Self::Introspection(err.to_string())
    }

    pub fn execution(err: sqlx::Error) -> Self {
        Self::Execution(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum QueryToolError {
    #[error("Database connection '{0}' not found")]
    ConnectionNotFound(String),

    #[error("Database connection '{0}' already exists")]
    ConnectionAlreadyExists(String),

    #[error("Invalid connection URL. Supported prefixes: {}", .supported.join(", "))]
    InvalidConnectionUrl { supported: Vec<String> },

    #[error("Failed to connect to database '{name}': {reason}")]
    ConnectionFailed { name: String, reason: String },

    #[error("{message}")]
    SqlValidation { message: String, sql: Option<String> },

    #[error("Only SELECT statements are allowed. Got: {0}")]
    NonSelectStatement(String),

    #[error("Failed to execute query: {message}")]
    QueryExecution { message: String, sql: Option<String> },

    #[error("Failed to extract metadata for '{name}': {reason}")]
    MetadataExtraction { name: String, reason: String },

    #[error("{0}")]
    NlGeneration(String),

    #[error("{0}")]
    Validation(String),

    #[error("catalog error: {0}")]
    Catalog(String),

    #[error(transparent)]
    Adapter(#[from] AdapterError),
}

impl QueryToolError {
    pub fn from_guard(error: SqlGuardError, sql: &str) -> Self {
        match error {
            SqlGuardError::NonSelect(keyword) => Self::NonSelectStatement(keyword),
            other => Self::SqlValidation {
                message: other.to_string(),
                sql: (!sql.trim().is_empty()).then(|| sql.to_string()),
            },
        }
    }
}

impl From<sqlx::Error> for QueryToolError {
    fn from(err: sqlx::Error) -> Self {
        Self::Catalog(err.to_string())
    }
}

impl From<QueryToolError> for WebError {
    fn from(error: QueryToolError) -> Self {
        let message = error.to_string();
        match error {
            QueryToolError::ConnectionNotFound(name) => {
                WebError::not_found("CONNECTION_NOT_FOUND", message).with_details(json!({ "name": name }))
            }
            QueryToolError::ConnectionAlreadyExists(name) => {
                WebError::conflict("CONNECTION_ALREADY_EXISTS", message)
                    .with_details(json!({ "name": name }))
            }
            QueryToolError::InvalidConnectionUrl { supported } => {
                WebError::bad_request("INVALID_CONNECTION_URL", message)
                    .with_details(json!({ "supportedPrefixes": supported }))
            }
            QueryToolError::ConnectionFailed { name, reason } => {
                WebError::bad_request("CONNECTION_FAILED", message)
                    .with_details(json!({ "name": name, "reason": reason }))
            }
            QueryToolError::SqlValidation { sql, .. } => {
                let error = WebError::bad_request("SQL_VALIDATION_ERROR", message);
                match sql {
                    Some(sql) => error.with_details(json!({ "sql": sql })),
                    None => error,
                }
            }
            QueryToolError::NonSelectStatement(keyword) => {
                WebError::bad_request("NON_SELECT_STATEMENT", message)
                    .with_details(json!({ "statementType": keyword }))
            }
            QueryToolError::QueryExecution { sql, .. } => {
                let error = WebError::internal("QUERY_EXECUTION_ERROR", message);
                match sql {
                    Some(sql) => error.with_details(json!({ "sql": sql })),
                    None => error,
                }
            }
            QueryToolError::MetadataExtraction { name, .. } => {
                WebError::internal("METADATA_EXTRACTION_ERROR", message)
                    .with_details(json!({ "name": name }))
            }
            QueryToolError::NlGeneration(_) => {
                WebError::bad_gateway("NL_QUERY_GENERATION_ERROR", message)
            }
            QueryToolError::Validation(_) => WebError::unprocessable("VALIDATION_ERROR", message),
            QueryToolError::Catalog(_) => WebError::internal("INTERNAL_ERROR", message),
            QueryToolError::Adapter(AdapterError::Unsupported { supported, .. }) => {
                WebError::bad_request("INVALID_CONNECTION_URL", message)
                    .with_details(json!({ "supportedPrefixes": supported }))
            }
            QueryToolError::Adapter(_) => WebError::internal("ADAPTER_ERROR", message),
        }
    }
}
