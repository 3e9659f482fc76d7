//! Ferry Server binary.

use ferry_server::config::Config;
use ferry_server::db::{self, MemoryRepository, PgRecordRepository, RecordRepository};
use ferry_server::{app, AppState};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ferry_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing::info!("Starting Ferry Server on {}:{}", config.host, config.port);

    let repo: Arc<dyn RecordRepository> = if config.uses_memory() {
        tracing::warn!("Using the in-memory repository; data is lost on exit");
        Arc::new(MemoryRepository::new())
    } else {
        let pool = db::create_pool(&config.database_url).await?;

        tracing::info!("Running database migrations...");
        db::run_migrations(&pool).await?;
        Arc::new(PgRecordRepository::new(pool))
    };

    let app = app(AppState::new(repo));

    // Start server
    let addr = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
