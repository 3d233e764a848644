//! DB Query Tool backend.
//!
//! Named connections to PostgreSQL, MySQL or SQLite are kept in a local
//! catalog together with their introspected schema. Users run read-only SQL
//! against them or ask for SQL in natural language.

pub mod adapter;
pub mod adapters;
pub mod catalog;
pub mod connection;
pub mod error;
pub mod http;
pub mod metadata;
pub mod model;
pub mod nl;
pub mod query;
pub mod registry;
pub mod service;
pub mod sql;
pub mod values;

pub use adapter::{DatabaseAdapter, DbPool, PoolConfig};
pub use catalog::Catalog;
pub use connection::ConnectionManager;
pub use error::{AdapterError, QueryToolError};
pub use http::build_router;
pub use nl::{NlRequest, OpenAiCompatibleGenerator, SqlGenerator};
pub use registry::AdapterRegistry;
pub use service::DbQueryService;
pub use sql::{transform_sql, validate_sql};
