//! Liveness, readiness and full health handlers.

use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::future::Future;
use std::time::{Duration, Instant};

use crate::cache::SharedCache;
use crate::database::DatabasePool;
use crate::http::server::AppState;
use crate::queue::QueueStats;

/// Upper bound for a single dependency check.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Up,
    Down,
}

/// Result of one dependency check.
#[derive(Debug, Clone, Serialize)]
pub struct ComponentCheck {
    pub status: CheckStatus,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ComponentCheck {
    pub fn is_up(&self) -> bool {
        self.status == CheckStatus::Up
    }
}

#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub status: &'static str,
    pub timestamp: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub checks: BTreeMap<&'static str, ComponentCheck>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub timestamp: String,
    pub uptime_secs: u64,
    pub shutting_down: bool,
    pub checks: BTreeMap<&'static str, ComponentCheck>,
    pub queue: QueueStats,
    pub websocket_clients: usize,
}

fn timestamp() -> String {
    Utc::now().to_rfc3339()
}

async fn timed<F, E>(check: F) -> ComponentCheck
where
    F: Future<Output = Result<(), E>>,
    E: std::fmt::Display,
{
    let started = Instant::now();
    let result = tokio::time::timeout(PROBE_TIMEOUT, check).await;
    let latency_ms = started.elapsed().as_millis() as u64;
    match result {
        Ok(Ok(())) => ComponentCheck {
            status: CheckStatus::Up,
            latency_ms,
            error: None,
        },
        Ok(Err(e)) => ComponentCheck {
            status: CheckStatus::Down,
            latency_ms,
            error: Some(e.to_string()),
        },
        Err(_) => ComponentCheck {
            status: CheckStatus::Down,
            latency_ms,
            error: Some(format!("timed out after {}ms", PROBE_TIMEOUT.as_millis())),
        },
    }
}

/// Check every configured dependency. The database is skipped when absent.
pub async fn dependency_checks(
    cache: &dyn SharedCache,
    database: Option<&dyn DatabasePool>,
) -> BTreeMap<&'static str, ComponentCheck> {
    let mut checks = BTreeMap::new();
    if let Some(db) = database {
        checks.insert("database", timed(db.ping()).await);
    }
    checks.insert("cache", timed(cache.ping()).await);
    checks
}

/// `GET /health/live`
pub async fn live() -> Json<Value> {
    Json(json!({ "status": "ok", "timestamp": timestamp() }))
}

/// `GET /health/ready`
///
/// Fails as soon as shutdown begins so load balancers stop routing here
/// while in-flight work drains.
pub async fn ready(State(state): State<AppState>) -> (StatusCode, Json<ReadinessResponse>) {
    if state.shutdown.is_shutting_down() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadinessResponse {
                status: "shutting_down",
                timestamp: timestamp(),
                checks: BTreeMap::new(),
            }),
        );
    }

    let checks = dependency_checks(&*state.cache, state.database.as_deref()).await;
    let healthy = checks.values().all(ComponentCheck::is_up);
    if !healthy {
        tracing::warn!(checks = ?checks, "Readiness check failed");
    }

    let (code, status) = if healthy {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "error")
    };
    (
        code,
        Json(ReadinessResponse {
            status,
            timestamp: timestamp(),
            checks,
        }),
    )
}

/// `GET /health`
pub async fn full(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let shutting_down = state.shutdown.is_shutting_down();
    let checks = dependency_checks(&*state.cache, state.database.as_deref()).await;
    let healthy = checks.values().all(ComponentCheck::is_up);

    let (code, status) = match (shutting_down, healthy) {
        (true, _) => (StatusCode::SERVICE_UNAVAILABLE, "shutting_down"),
        (false, true) => (StatusCode::OK, "ok"),
        (false, false) => (StatusCode::SERVICE_UNAVAILABLE, "error"),
    };

    (
        code,
        Json(HealthResponse {
            status,
            version: env!("CARGO_PKG_VERSION"),
            timestamp: timestamp(),
            uptime_secs: state.started_at.elapsed().as_secs(),
            shutting_down,
            checks,
            queue: state.queue.stats(),
            websocket_clients: state.gateway.connected_count(),
        }),
    )
}
