//! Health probe surface.
//!
//! # Endpoints
//! ```text
//! GET /health/live   → 200 while the process runs
//! GET /health/ready  → 503 once shutdown began, else database + cache checks
//! GET /health        → full report with queue and realtime counts
//! ```
//!
//! # Design Decisions
//! - Readiness reads the shared shutdown flag, never a copy
//! - Each dependency check is bounded so a hung backend cannot hang a probe
//! - No database configured means no database check

pub mod probes;

use axum::{routing::get, Router};

use crate::http::server::AppState;

/// Liveness, readiness and full health routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(probes::full))
        .route("/health/live", get(probes::live))
        .route("/health/ready", get(probes::ready))
}
