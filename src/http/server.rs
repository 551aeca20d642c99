//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router with health, realtime and admin routes
//! - Wire up middleware (request ID, tracing, metrics, timeout)
//! - Serve until the shutdown sequence has finished

use axum::{middleware, routing::get, Router};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::admin;
use crate::cache::SharedCache;
use crate::config::ServiceConfig;
use crate::database::DatabasePool;
use crate::health;
use crate::http::request::{make_span, propagate_request_id_layer, set_request_id_layer, track_metrics};
use crate::http::websocket::ws_handler;
use crate::lifecycle::ShutdownState;
use crate::queue::TaskQueue;
use crate::realtime::ChatGateway;
use crate::scheduler::SchedulerRegistry;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServiceConfig>,
    pub shutdown: ShutdownState,
    pub cache: Arc<dyn SharedCache>,
    pub database: Option<Arc<dyn DatabasePool>>,
    pub queue: Arc<TaskQueue>,
    pub gateway: Arc<ChatGateway>,
    pub scheduler: Arc<SchedulerRegistry>,
    pub instance_id: String,
    pub started_at: Instant,
}

/// HTTP front of the service.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    /// Build the router over `state`.
    pub fn new(state: AppState) -> Self {
        Self {
            router: Self::build_router(state),
        }
    }

    /// The fully layered router, for serving or in-process tests.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    #[allow(deprecated)]
    fn build_router(state: AppState) -> Router {
        let request_timeout = Duration::from_secs(state.config.timeouts.request_secs);

        let mut router = Router::new()
            .merge(health::routes())
            .route("/ws", get(ws_handler));

        if state.config.admin.enabled {
            router = router.merge(admin::routes(state.clone()));
        } else {
            tracing::debug!("Admin API disabled");
        }

        router.with_state(state).layer(
            ServiceBuilder::new()
                .layer(set_request_id_layer())
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(propagate_request_id_layer())
                .layer(middleware::from_fn(track_metrics))
                .layer(TimeoutLayer::new(request_timeout)),
        )
    }

    /// Serve on `listener` until `stop` fires.
    ///
    /// The coordinator fires `stop` after the teardown sequence, so requests
    /// already in flight keep being served while it runs.
    pub async fn run(self, listener: TcpListener, mut stop: broadcast::Receiver<()>) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = stop.recv().await;
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}
