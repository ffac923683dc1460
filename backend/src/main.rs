//! Stock Ledger - Backend Server

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use stock_ledger::{
    config::{Config, LoggingConfig},
    create_app,
    store::{LedgerStore, MemoryStore, PgLedgerStore},
    AppState,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.filter));
    let registry = tracing_subscriber::registry().with(filter);

    if logging.json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::load().context("failed to load configuration")?;
    init_tracing(&config.logging);

    tracing::info!(environment = %config.environment, "Starting Stock Ledger server");

    let store: Arc<dyn LedgerStore> = if config.uses_database() {
        tracing::info!("Connecting to database...");
        let store = PgLedgerStore::connect(&config.database)
            .await
            .context("failed to connect to database")?;
        tracing::info!("Database connection established");

        if config.database.run_migrations {
            tracing::info!("Running database migrations...");
            store.migrate().await.context("failed to run migrations")?;
            tracing::info!("Migrations completed");
        }
        Arc::new(store)
    } else {
        tracing::warn!("No database url configured, using in-memory store");
        Arc::new(MemoryStore::new())
    };

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("invalid server address")?;

    let state = AppState::new(store, config);
    let app = create_app(state);

    tracing::info!(%addr, "Listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
