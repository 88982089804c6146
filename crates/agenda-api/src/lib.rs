//! Agenda API - REST server for calendars and events
//!
//! Identities register and sign in with email and password, receive a
//! short-lived access token and a revocable refresh token, and manage their
//! own calendars and the events inside them.

pub mod audit;
pub mod auth;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

use agenda_core::AppConfig;
use axum::{routing::get, Router};
use state::AppState;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Build the application router
///
/// `/health` is served at the root; everything else is nested under the
/// configured API prefix.
pub fn create_router(state: Arc<AppState>) -> Router {
    let api = routes::api_routes(state.clone());
    let prefix = state.config.server.api_prefix.trim_end_matches('/').to_string();

    let router = Router::new().route("/health", get(handlers::health::health_check));
    let router = if prefix.is_empty() {
        router.merge(api)
    } else {
        router.nest(&prefix, api)
    };

    router.layer(TraceLayer::new_for_http()).with_state(state)
}

/// Router over a fresh in-memory store with cheap password hashing
pub fn create_router_for_testing() -> Router {
    let mut config = AppConfig::default();
    config.auth.hash_memory_kib = 1024;
    config.auth.hash_iterations = 1;
    config.auth.hash_parallelism = 1;

    create_router(Arc::new(AppState::in_memory(config)))
}
