//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{DbAdapter, LocalIdentityStore, MemoryBackend, PgChangeFeed},
    config::{Backend, Config},
    error::ApiError,
    web::{build_router, state::AppState},
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Pick the Backend ---
    let app_state = match &config.backend {
        Backend::Postgres { database_url } => {
            info!("Connecting to database...");
            let db_pool = PgPoolOptions::new()
                .max_connections(5)
                .connect(database_url)
                .await?;
            info!("Running database migrations...");
            DbAdapter::new(db_pool.clone()).run_migrations().await?;
            info!("Database migrations complete.");
            let feed = PgChangeFeed::start(&db_pool).await?;
            AppState::postgres(db_pool, feed, config.clone())
        }
        Backend::Local { store_path } => {
            info!("Running in local mode with store at {}", store_path.display());
            let identity = Arc::new(LocalIdentityStore::new(store_path.clone())?);
            let backend = Arc::new(MemoryBackend::new());
            AppState::local(identity, backend, config.clone())
        }
    };

    // --- 3. Create the Web Router ---
    let app = build_router(Arc::new(app_state))?;

    // --- 4. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
