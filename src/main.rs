use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use opsdesk::dbquery::{
    self, AdapterRegistry, Catalog, ConnectionManager, DbQueryService, OpenAiCompatibleGenerator,
};
use opsdesk::tickets::{self, SqliteTicketRepository, TicketService, TicketsState};
use opsdesk::{QueryToolConfig, TicketsConfig, shutdown_signal};

#[derive(Parser)]
#[command(name = "opsdesk")]
#[command(about = "Ticket Manager and DB Query Tool backends", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the Ticket Manager API
    Tickets {
        #[arg(long)]
        bind: Option<SocketAddr>,
        #[arg(long)]
        database_url: Option<String>,
    },
    /// Serve the DB Query Tool API
    DbQuery {
        #[arg(long)]
        bind: Option<SocketAddr>,
        #[arg(long)]
        catalog_path: Option<std::path::PathBuf>,
    },
    /// Validate a statement and print the SQL that would run
    CheckSql {
        #[arg(long, value_enum, default_value_t = DialectArg::Postgres)]
        dialect: DialectArg,
        #[arg(long, default_value_t = dbquery::query::DEFAULT_MAX_ROWS)]
        max_rows: usize,
        sql: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum DialectArg {
    Postgres,
    Mysql,
    Sqlite,
}

impl DialectArg {
    fn db_type(self) -> &'static str {
        match self {
            Self::Postgres => "postgresql",
            Self::Mysql => "mysql",
            Self::Sqlite => "sqlite",
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Command::Tickets { bind, database_url } => {
            init_tracing();
            let mut config = TicketsConfig::from_env()?;
            if let Some(bind) = bind {
                config.bind_addr = bind;
            }
            if let Some(url) = database_url {
                config.database_url = url;
            }
            serve_tickets(config).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::DbQuery { bind, catalog_path } => {
            init_tracing();
            let mut config = QueryToolConfig::from_env()?;
            if let Some(bind) = bind {
                config.bind_addr = bind;
            }
            if let Some(path) = catalog_path {
                config.catalog_path = path;
            }
            serve_db_query(config).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::CheckSql {
            dialect,
            max_rows,
            sql,
        } => Ok(check_sql(dialect, max_rows, &sql)),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("opsdesk=debug,tower_http=info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn serve_tickets(config: TicketsConfig) -> Result<()> {
    let repository = SqliteTicketRepository::connect(&config.database_url, config.max_connections)
        .await
        .with_context(|| format!("failed to open ticket store {}", config.database_url))?;
    let service = TicketService::new(Arc::new(repository));
    let app = tickets::build_router(TicketsState::new(service, config.debug), &config.cors_origins);

    serve(app, config.bind_addr, "ticket API").await
}

async fn serve_db_query(config: QueryToolConfig) -> Result<()> {
    config.ensure_catalog_dir()?;
    let catalog = Catalog::open(&config.catalog_path)
        .await
        .with_context(|| format!("failed to open catalog {}", config.catalog_path.display()))?;

    let connections = Arc::new(ConnectionManager::new(Arc::new(AdapterRegistry::with_builtin())));
    let generator = OpenAiCompatibleGenerator::new(
        config.deepseek_api_key.clone(),
        config.deepseek_base_url.clone(),
        config.deepseek_model.clone(),
    )
    .context("failed to build the SQL generation client")?;
    if config.deepseek_api_key.is_none() {
        info!("DEEPSEEK_API_KEY is not set; natural-language queries are disabled");
    }

    let service = DbQueryService::new(
        catalog,
        Arc::clone(&connections),
        Arc::new(generator),
        config.max_rows,
    );
    let app = dbquery::build_router(service, &config.cors_origins);

    serve(app, config.bind_addr, "db query API").await?;
    connections.close_all().await;
    Ok(())
}

async fn serve(app: Router, bind_addr: SocketAddr, name: &'static str) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    info!(%bind_addr, "{name} started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("{name} stopped");
    Ok(())
}

fn check_sql(dialect: DialectArg, max_rows: usize, sql: &str) -> ExitCode {
    let Some(parser_dialect) = dbquery::sql::dialect_for(dialect.db_type()) else {
        eprintln!("unknown dialect");
        return ExitCode::FAILURE;
    };
    match dbquery::transform_sql(sql, parser_dialect.as_ref(), max_rows.max(1), true) {
        Ok(statement) => {
            println!("{statement}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    }
}
