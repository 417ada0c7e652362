use std::net::SocketAddr;
use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use hookline::config::Config;
use hookline::db::{MemoryStore, PgStore, Store};
use hookline::delivery::HttpTransport;
use hookline::worker::{self, DeliveryWorker};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    let config = Config::from_env().map_err(|e| format!("Failed to load configuration: {e}"))?;

    // Init tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    tracing::info!("Starting Hookline");

    let store: Arc<dyn Store> = match &config.database_url {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(url)
                .await?;

            sqlx::migrate!("./migrations").run(&pool).await?;
            tracing::info!("Migrations applied");

            Arc::new(PgStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using the in-memory store; nothing survives a restart");
            Arc::new(MemoryStore::new())
        }
    };

    let addr = SocketAddr::new(config.host, config.port);
    let worker_config = config.worker.clone();
    let bootstrap_tenant = config.bootstrap_tenant;
    let (app, state) = hookline::build_app(store.clone(), config);

    if let Some(tenant_id) = bootstrap_tenant {
        match state.verifier.bootstrap(tenant_id).await {
            Ok(Some(issued)) => {
                tracing::info!(%tenant_id, credential_id = %issued.credential.id, "Bootstrap key issued");
                // shown once, never logged
                println!("Bootstrap API key for tenant {tenant_id}: {}", issued.secret);
            }
            Ok(None) => tracing::debug!(%tenant_id, "Tenant already has credentials"),
            Err(e) => tracing::error!(%tenant_id, "Failed to issue bootstrap key: {e}"),
        }
    }

    let transport = HttpTransport::new(worker_config.attempt_timeout)?;
    let worker_count = worker_config.worker_count;
    let worker = Arc::new(DeliveryWorker::new(
        store,
        Arc::new(transport),
        worker_config,
        state.signal.clone(),
    ));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let pool_handle = worker::run_pool(worker, shutdown_rx, worker_count)?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Listening on {addr}");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    let _ = shutdown_tx.send(true);
    let joined = tokio::task::spawn_blocking(move || pool_handle.join()).await?;
    if joined.is_err() {
        tracing::error!("Delivery worker pool panicked");
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}
