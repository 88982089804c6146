//! API route definitions

use crate::auth::middleware::auth_middleware;
use crate::handlers::{auth, calendar, event};
use crate::state::AppState;
use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;

/// Routes mounted under the API prefix
pub fn api_routes(state: Arc<AppState>) -> Router<Arc<AppState>> {
    // Public routes (no authentication required)
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register_handler))
        .route("/auth/login", post(auth::login_handler))
        .route("/auth/refresh-token", post(auth::refresh_handler))
        .route("/auth/logout", post(auth::logout_handler));

    // Protected routes (access token required)
    let protected_routes = Router::new()
        .route("/auth/me", get(auth::me_handler))
        .route("/auth/users", get(auth::list_users_handler))
        .route("/auth/users/search", get(auth::search_user_handler))
        // Calendars
        .route(
            "/calendar",
            post(calendar::create_calendar).get(calendar::list_calendars),
        )
        .route(
            "/calendar/:calendar_id",
            put(calendar::update_calendar).delete(calendar::delete_calendar),
        )
        // Events
        .route("/event/events/day/:date", get(event::events_for_day))
        .route(
            "/event/events/:event_id",
            get(event::get_event).patch(event::update_event),
        )
        .route(
            "/event/:calendar_id/events",
            post(event::create_event).get(event::list_calendar_events),
        )
        .route(
            "/event/:calendar_id/events/:event_id",
            axum::routing::delete(event::delete_event),
        )
        .layer(middleware::from_fn_with_state(state, auth_middleware));

    Router::new().merge(public_routes).merge(protected_routes)
}
