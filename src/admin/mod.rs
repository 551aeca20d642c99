pub mod auth;
pub mod handlers;

use axum::{middleware, routing::get, Router};

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::http::server::AppState;

/// Admin routes, all behind bearer-key authentication.
pub fn routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/jobs", get(get_jobs))
        .route("/admin/queue", get(get_queue))
        .route("/admin/gateway", get(get_gateway))
        .layer(middleware::from_fn_with_state(state, admin_auth_middleware))
}
