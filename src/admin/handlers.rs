use axum::{extract::State, Json};
use serde::Serialize;

use crate::http::server::AppState;
use crate::queue::QueueStats;
use crate::scheduler::ScheduledJobInfo;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub instance_id: String,
    pub shutting_down: bool,
    pub uptime_secs: u64,
}

/// Realtime gateway snapshot.
#[derive(Serialize)]
pub struct GatewayStatus {
    pub connected_clients: usize,
    pub rooms: usize,
    pub closing: bool,
}

/// GET /admin/status: version, instance and shutdown state.
pub async fn get_status(State(state): State<AppState>) -> Json<SystemStatus> {
    let shutting_down = state.shutdown.is_shutting_down();
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: if shutting_down { "shutting_down" } else { "operational" },
        instance_id: state.instance_id.clone(),
        shutting_down,
        uptime_secs: state.started_at.elapsed().as_secs(),
    })
}

/// GET /admin/jobs: every registered scheduled job.
pub async fn get_jobs(State(state): State<AppState>) -> Json<Vec<ScheduledJobInfo>> {
    Json(state.scheduler.jobs())
}

/// GET /admin/queue: counters for the default task queue.
pub async fn get_queue(State(state): State<AppState>) -> Json<QueueStats> {
    Json(state.queue.stats())
}

/// GET /admin/gateway: realtime connection counts.
pub async fn get_gateway(State(state): State<AppState>) -> Json<GatewayStatus> {
    Json(GatewayStatus {
        connected_clients: state.gateway.connected_count(),
        rooms: state.gateway.room_count(),
        closing: state.gateway.is_closing(),
    })
}
