use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::web::parse_origin_list;

const DEEPSEEK_KEY_PLACEHOLDER: &str = "your-deepseek-api-key-here";

#[derive(Debug, Clone)]
pub struct TicketsConfig {
    pub bind_addr: SocketAddr,
    pub database_url: String,
    pub max_connections: u32,
    pub cors_origins: Vec<String>,
    pub debug: bool,
}

impl TicketsConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let env = Env(&lookup);

        let bind_addr = env
            .string("OPSDESK_TICKETS_BIND", "127.0.0.1:8000")
            .parse::<SocketAddr>()
            .context("OPSDESK_TICKETS_BIND must be a valid host:port")?;

        let max_connections = env
            .string("DB_MAX_CONNECTIONS", "10")
            .parse::<u32>()
            .context("DB_MAX_CONNECTIONS must be a positive integer")?;

        Ok(Self {
            bind_addr,
            database_url: env.string("DATABASE_URL", "sqlite://tickets.db"),
            max_connections: max_connections.max(1),
            cors_origins: parse_origin_list(&env.string("CORS_ORIGINS", "http://localhost:5173")),
            debug: env.flag("DEBUG"),
        })
    }
}

#[derive(Debug, Clone)]
pub struct QueryToolConfig {
    pub bind_addr: SocketAddr,
    pub catalog_path: PathBuf,
    pub cors_origins: Vec<String>,
    pub deepseek_api_key: Option<String>,
    pub deepseek_base_url: String,
    pub deepseek_model: String,
    pub max_rows: usize,
}

impl QueryToolConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let env = Env(&lookup);

        let bind_addr = env
            .string("OPSDESK_DBQUERY_BIND", "127.0.0.1:8001")
            .parse::<SocketAddr>()
            .context("OPSDESK_DBQUERY_BIND must be a valid host:port")?;

        let max_rows = env
            .string("QUERY_MAX_ROWS", "1000")
            .parse::<usize>()
            .context("QUERY_MAX_ROWS must be a positive integer")?;

        let catalog_path = expand_home(
            &env.string("DATABASE_SQLITE_PATH", "~/.db_query/db_query.db"),
            lookup("HOME").as_deref(),
        );

        let deepseek_api_key = lookup("DEEPSEEK_API_KEY")
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty() && key != DEEPSEEK_KEY_PLACEHOLDER);

        Ok(Self {
            bind_addr,
            catalog_path,
            cors_origins: parse_origin_list(&env.string(
                "CORS_ORIGINS",
                "http://localhost:5173,http://127.0.0.1:5173",
            )),
            deepseek_api_key,
            deepseek_base_url: env.string("DEEPSEEK_BASE_URL", "https://api.deepseek.com"),
            deepseek_model: env.string("DEEPSEEK_MODEL", "deepseek-chat"),
            max_rows: max_rows.max(1),
        })
    }

    /// Creates the directory holding the catalog database.
    pub fn ensure_catalog_dir(&self) -> Result<()> {
        if let Some(parent) = self.catalog_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create catalog directory {}", parent.display())
                })?;
            }
        }
        Ok(())
    }
}

struct Env<'a, F: Fn(&str) -> Option<String>>(&'a F);

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    fn string(&self, key: &str, default: &str) -> String {
        (self.0)(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| default.to_string())
    }

    fn flag(&self, key: &str) -> bool {
        matches!(
            self.string(key, "false").to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    }
}

fn expand_home(raw: &str, home: Option<&str>) -> PathBuf {
    match (raw.strip_prefix("~/"), home) {
        (Some(rest), Some(home)) => Path::new(home).join(rest),
        _ if raw == "~" => home.map(PathBuf::from).unwrap_or_else(|| PathBuf::from(raw)),
        _ => PathBuf::from(raw),
    }
}
