mod config;

use std::sync::Arc;

use tracing::info;

use parley_api::{AppStateInner, build_router};
use parley_core::Engine;
use parley_db::Database;
use parley_gateway::Dispatcher;

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    // Init database
    let db = Arc::new(Database::open(&config.db_path)?);

    // Shared state
    let engine = Engine::new(db);
    let dispatcher = Dispatcher::new(config.relay_mode);
    let state = AppStateInner::new(engine, dispatcher, config.jwt_secret.clone(), config.page_size);

    let app = build_router(state);

    let addr = config.addr()?;
    info!(
        "Parley server listening on {} (relay mode: {})",
        addr, config.relay_mode
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
