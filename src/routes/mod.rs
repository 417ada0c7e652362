pub mod audit;
pub mod credentials;
pub mod deliveries;
pub mod events;
pub mod subscriptions;

use axum::Router;
use axum::routing::{get, post, put};
use serde::Deserialize;

use crate::state::SharedState;

const DEFAULT_PAGE_SIZE: i64 = 50;
const MAX_PAGE_SIZE: i64 = 200;

pub fn api_routes() -> Router<SharedState> {
    Router::new()
        // Subscriptions
        .route(
            "/api/v1/subscriptions",
            get(subscriptions::list).post(subscriptions::create),
        )
        .route(
            "/api/v1/subscriptions/{id}",
            get(subscriptions::get).delete(subscriptions::delete),
        )
        .route(
            "/api/v1/subscriptions/{id}/active",
            put(subscriptions::set_active),
        )
        // Events
        .route("/api/v1/events", post(events::publish))
        // Deliveries
        .route("/api/v1/deliveries", get(deliveries::list))
        .route("/api/v1/deliveries/{id}", get(deliveries::get))
        // Credentials
        .route(
            "/api/v1/credentials",
            get(credentials::list).post(credentials::issue),
        )
        .route(
            "/api/v1/credentials/{id}",
            axum::routing::delete(credentials::revoke),
        )
        // Audit
        .route("/api/v1/audit", get(audit::list))
}

#[derive(Debug, Default, Deserialize)]
pub struct Page {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl Page {
    /// Clamp to `1..=200` (default 50) and a non-negative offset.
    pub fn bounds(&self) -> (i64, i64) {
        let limit = self
            .limit
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE);
        let offset = self.offset.unwrap_or(0).max(0);
        (limit, offset)
    }
}
