use std::sync::Arc;

use dotenvy::dotenv;
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use boxoffice_server::config::Config;
use boxoffice_server::gateway::SandboxGateway;
use boxoffice_server::lock::RedisLockStore;
use boxoffice_server::repository::PgStore;
use boxoffice_server::routes::create_routes;
use boxoffice_server::state::{AppState, Dependencies};
use boxoffice_server::utils::error::BoxError;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env();

    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await?;
    tracing::info!("Successfully connected to database");

    sqlx::migrate!().run(&pool).await?;
    tracing::info!("Migrations run successfully");

    let lock_store = RedisLockStore::connect(&config.redis_url).await?;
    tracing::info!("Connected to lock store");

    if config.gateway_server_key.is_empty() {
        tracing::warn!("GATEWAY_SERVER_KEY is empty, notification signatures use an empty key");
    }

    let store = Arc::new(PgStore::new(pool));
    let deps = Dependencies {
        catalog: store.clone(),
        orders: store.clone(),
        payments: store,
        lock_store: Arc::new(lock_store),
        gateway: Arc::new(SandboxGateway::new(config.gateway_server_key.clone())),
    };

    let state = AppState::build(deps, &config);
    let scheduler = state.expiration_scheduler(&config).spawn();
    let jobs = Arc::clone(&state.jobs);

    let app = create_routes(state, &config);
    let listener = TcpListener::bind(&config.server_addr).await?;
    tracing::info!("Server running at http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("HTTP server stopped, draining background work");
    scheduler.stop().await;
    jobs.shutdown().await;
    tracing::info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
