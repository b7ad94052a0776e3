use anyhow::{Context, Result};
use movie_rater_api::auth::AuthService;
use movie_rater_api::movie_store::MovieStore;
use movie_rater_api::object_store::ObjectStore;
use movie_rater_api::rating_engine::RatingEngine;
use movie_rater_api::upload_auth::UploadAuthorizer;
use movie_rater_api::{start_api_server, AppState, Config};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        "Starting Movie Rater API"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    // Connect to PostgreSQL
    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .acquire_timeout(config.db_connect_timeout())
        .idle_timeout(Some(config.db_idle_timeout()))
        .connect(&config.database.url)
        .await
        .context("Failed to connect to PostgreSQL")?;

    info!(
        max_connections = config.database.max_connections,
        "Connected to PostgreSQL"
    );

    // Run migrations if enabled
    if config.database.run_migrations {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("Failed to run database migrations")?;
        info!("Database migrations applied");
    }

    // Initialize components
    let object_store = Arc::new(
        ObjectStore::new(&config.s3)
            .await
            .context("Failed to initialize object store")?,
    );

    let state = AppState {
        pool: pool.clone(),
        auth: Arc::new(AuthService::new(pool.clone())),
        movies: Arc::new(MovieStore::new(pool.clone())),
        ratings: Arc::new(RatingEngine::new(pool)),
        uploads: Arc::new(UploadAuthorizer::new(
            object_store,
            config.uploads.clone(),
            config.s3.presign_timeout(),
        )),
    };

    // Spawn API server task
    let http_config = config.http.clone();
    let api_handle = tokio::spawn(async move {
        if let Err(e) = start_api_server(state, &http_config).await {
            error!(error = %e, "API server error");
        }
    });

    info!("Movie Rater API started successfully");

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutting down Movie Rater API");

    api_handle.abort();

    info!("Movie Rater API stopped");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();

    builder
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
