//! API server entry point.

use std::time::Duration;

use axum::Router;
use engine::{SaleConfig, Sweeper};
use metrics_exporter_prometheus::PrometheusHandle;
use sqlx::postgres::PgPoolOptions;
use store::{MemoryStore, PostgresStore, SaleStore};
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

/// Wires the engine, spawns the expiry sweeper, and builds the router.
fn build_app<S: SaleStore + Clone + 'static>(
    store: S,
    sale_config: SaleConfig,
    metrics_handle: PrometheusHandle,
    shutdown: tokio::sync::watch::Receiver<bool>,
) -> Router {
    let sweeper = Sweeper::new(store.clone(), &sale_config);
    tokio::spawn(async move { sweeper.run(shutdown).await });

    let state = api::create_state(store, sale_config);
    api::create_app(state, metrics_handle)
}

#[tokio::main]
async fn main() {
    // 1. Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 2. Install Prometheus metrics recorder
    let prometheus_builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    let metrics_handle = prometheus_builder
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Load configuration
    let config = api::config::Config::from_env();
    let sale_config = SaleConfig::from_env();

    // 4. Pick the store backend and build the application
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let app = match &config.database_url {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(20)
                .acquire_timeout(Duration::from_secs(5))
                .connect(url)
                .await
                .expect("failed to connect to PostgreSQL");
            let store = PostgresStore::new(pool).with_lock_wait(sale_config.lock_wait);
            store.run_migrations().await.expect("migrations failed");
            tracing::info!("using PostgreSQL store");
            build_app(store, sale_config, metrics_handle, shutdown_rx)
        }
        None => {
            tracing::info!("using in-memory store");
            let store = MemoryStore::new().with_lock_wait(sale_config.lock_wait);
            build_app(store, sale_config, metrics_handle, shutdown_rx)
        }
    };

    // 5. Start server
    let addr = config.addr();
    tracing::info!(%addr, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    // Stop the sweeper before exiting.
    let _ = shutdown_tx.send(true);
    tracing::info!("server shut down gracefully");
}
