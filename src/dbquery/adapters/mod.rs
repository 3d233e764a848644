//! Built-in database adapters.

mod mysql;
mod postgres;
mod sqlite;

use std::sync::Arc;

pub use mysql::MySqlAdapter;
pub use postgres::PostgresAdapter;
pub use sqlite::SqliteAdapter;

use super::adapter::DatabaseAdapter;

/// Adapters in registration order.
pub fn builtin_adapters() -> Vec<Arc<dyn DatabaseAdapter>> {
    vec![
        Arc::new(PostgresAdapter),
        Arc::new(MySqlAdapter),
        Arc::new(SqliteAdapter),
    ]
}
