//! Admin API.
//!
//! Read-mostly JSON endpoints for operators and `mesh-cli`. Every route sits
//! behind the admin bearer key.

pub mod auth;
pub mod handlers;

use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::http::server::AppState;

pub fn setup_admin_router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/services", get(get_services))
        .route("/admin/services/{service}/instances", post(register_instance))
        .route(
            "/admin/services/{service}/instances/{instance_id}",
            delete(deregister_instance),
        )
        .route(
            "/admin/services/{service}/instances/{instance_id}/health",
            get(get_instance_health),
        )
        .route("/admin/breakers", get(get_breakers))
        .route("/admin/routes", get(get_routes).put(put_route))
        .route("/admin/routes/{name}", delete(delete_route))
        .route("/admin/events/{event_type}", get(get_events))
        .layer(middleware::from_fn_with_state(state, admin_auth_middleware))
}
