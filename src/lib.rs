pub mod audit;
pub mod auth;
pub mod config;
pub mod db;
pub mod delivery;
pub mod error;
pub mod models;
pub mod publisher;
pub mod routes;
pub mod state;
pub mod tenant;
pub mod worker;

use std::sync::Arc;

use axum::Router;
use axum::http::{HeaderName, HeaderValue};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::db::Store;
use crate::delivery::DeliverySignal;
use crate::state::{AppState, SharedState};

/// Build the HTTP application. The returned state carries the delivery
/// signal the worker pool should listen on.
pub fn build_app(store: Arc<dyn Store>, config: Config) -> (Router, SharedState) {
    let max_body_size = config.max_body_size;
    let state: SharedState = Arc::new(AppState::new(store, config, DeliverySignal::new()));

    let app = Router::new()
        .merge(routes::api_routes())
        .route("/health", axum::routing::get(health))
        .layer(RequestBodyLimitLayer::new(max_body_size))
        .layer(TraceLayer::new_for_http())
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static("x-content-type-options"),
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static("x-frame-options"),
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static("referrer-policy"),
            HeaderValue::from_static("strict-origin-when-cross-origin"),
        ))
        .with_state(state.clone());

    (app, state)
}

async fn health() -> &'static str {
    "ok"
}
