//! Agenda API Server
//!
//! Usage:
//!   agenda-api [--config agenda.toml] [--host 0.0.0.0] [--port 8080]

use agenda_api::{create_router, state::AppState};
use agenda_core::{AgendaStore, AppConfig, MemoryStore, PgStore};
use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "agenda-api")]
#[command(about = "REST API server for calendars and events")]
#[command(version)]
struct Cli {
    /// TOML configuration file; environment variables override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Host to bind to
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,
}

fn load_config(cli: &Cli) -> anyhow::Result<AppConfig> {
    let mut config = match &cli.config {
        Some(path) => AppConfig::from_file(path)?.with_env_override()?,
        None => AppConfig::from_env()?,
    };

    if let Some(host) = &cli.host {
        config.server.host = host.clone();
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    config.validate()?;
    Ok(config)
}

fn init_tracing(config: &AppConfig) {
    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "agenda_api={level},agenda_core={level},tower_http=debug,audit=info",
            level = config.logging.level
        )
        .into()
    });

    if config.logging.json_format {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn open_store(config: &AppConfig) -> anyhow::Result<Arc<dyn AgendaStore>> {
    match &config.database.url {
        Some(url) => {
            let store = PgStore::connect(url, config.database.pool_size)
                .await
                .context("Failed to connect to PostgreSQL")?;
            store.migrate().await.context("Failed to apply schema")?;
            tracing::info!(pool_size = config.database.pool_size, "Using PostgreSQL store");
            Ok(Arc::new(store))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory store; data is lost on exit");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    init_tracing(&config);

    if config.uses_development_secrets() {
        tracing::warn!("Using built-in development token secrets; set ACCESS_TOKEN_SECRET and REFRESH_TOKEN_SECRET");
    }

    let store = open_store(&config).await?;
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let prefix = config.server.api_prefix.clone();

    let state = Arc::new(AppState::new(config, store));
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!("Agenda API Server starting on http://{}", addr);
    tracing::info!("API routes under {}", if prefix.is_empty() { "/" } else { prefix.as_str() });

    axum::serve(listener, app).await?;

    Ok(())
}
