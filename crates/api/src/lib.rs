//! HTTP surface for the flash-sale order placement engine.
//!
//! Provides REST endpoints for order placement, payment reconciliation,
//! cancellation, and stock visibility, with structured logging (tracing)
//! and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post, put};
use engine::{InMemoryRefundScheduler, SaleConfig, SaleEngine};
use metrics_exporter_prometheus::PrometheusHandle;
use store::SaleStore;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use routes::orders::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: SaleStore + Clone + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check::<S>))
        .route("/orders", post(routes::orders::place::<S>))
        .route("/orders/{id}", get(routes::orders::get::<S>))
        .route("/orders/{id}/cancel", post(routes::orders::cancel::<S>))
        .route("/payments/outcome", post(routes::payments::outcome::<S>))
        .route("/stock/{product_id}", get(routes::stock::get::<S>))
        .route("/stock/{product_id}", put(routes::stock::put::<S>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates the shared application state around a sale store.
pub fn create_state<S: SaleStore + Clone + 'static>(
    store: S,
    config: SaleConfig,
) -> Arc<AppState<S>> {
    let engine = SaleEngine::new(store, InMemoryRefundScheduler::new(), config);
    Arc::new(AppState { engine })
}
