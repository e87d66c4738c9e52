//! Herald server library logic.

pub mod api;
pub mod config;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, put},
    Extension, Json, Router,
};
use herald_channels::SqliteChannelLookup;
use herald_db::{DbPool, Deadline};
use herald_origins::OriginRegistry;
use herald_rules::RuleEngine;
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;

/// Application state shared across all request handlers.
pub struct AppState {
    /// Rule engine, resolving channels through the same database.
    pub rules: RuleEngine<SqliteChannelLookup>,
    /// Origin registry with per-service replace serialization.
    pub origins: OriginRegistry,
    /// Deadline budget for each request.
    pub request_timeout: Duration,
}

impl AppState {
    pub fn new(pool: DbPool, rule_limit: usize, request_timeout: Duration) -> Self {
        Self {
            rules: RuleEngine::new(
                pool.clone(),
                SqliteChannelLookup::new(pool.clone()),
                rule_limit,
            ),
            origins: OriginRegistry::new(pool),
            request_timeout,
        }
    }

    /// A fresh deadline for the current request.
    pub fn deadline(&self) -> Deadline {
        Deadline::after(self.request_timeout)
    }
}

/// Maximum request body size (1 MiB).
const MAX_REQUEST_BODY_BYTES: usize = 1024 * 1024;

/// Health check handler.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/api/rules",
            get(api::list_rules_handler).post(api::create_rule_handler),
        )
        .route(
            "/api/rules/{ruleId}",
            get(api::get_rule_handler)
                .put(api::update_rule_handler)
                .delete(api::delete_rule_handler),
        )
        .route("/api/origins", get(api::list_origins_handler))
        .route(
            "/api/services/{serviceId}/origins",
            put(api::upsert_origins_handler),
        )
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(Extension(Arc::new(state)))
}
