//! Shared utilities for integration tests.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use backend_service::cache::SharedCache;
use backend_service::config::ServiceConfig;
use backend_service::lifecycle::{self, ShutdownCoordinator, ShutdownState};
use backend_service::queue::TaskQueue;
use backend_service::realtime::ChatGateway;
use backend_service::scheduler::SchedulerRegistry;

pub const ADMIN_KEY: &str = "test-admin-key";

/// In-memory cache, ephemeral port, admin enabled, no metrics exporter.
pub fn test_config() -> ServiceConfig {
    let mut config = ServiceConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.observability.metrics_enabled = false;
    config.admin.enabled = true;
    config.admin.api_key = ADMIN_KEY.into();
    config.scheduler.instance_id = "test-instance".into();
    config
}

/// Handles into a running service.
#[allow(dead_code)]
pub struct TestApp {
    pub addr: SocketAddr,
    pub coordinator: Arc<ShutdownCoordinator>,
    pub state: ShutdownState,
    pub cache: Arc<dyn SharedCache>,
    pub queue: Arc<TaskQueue>,
    pub gateway: Arc<ChatGateway>,
    pub scheduler: Arc<SchedulerRegistry>,
    pub server: JoinHandle<std::io::Result<()>>,
}

#[allow(dead_code)]
impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }
}

/// Build the service and serve it in the background.
pub async fn spawn_app(config: ServiceConfig) -> TestApp {
    let app = lifecycle::build(config).await.expect("startup failed");
    let addr = app.local_addr().unwrap();
    let coordinator = app.coordinator.clone();
    let state = app.state.clone();
    let cache = app.cache.clone();
    let queue = app.queue.clone();
    let gateway = app.gateway.clone();
    let scheduler = app.scheduler.clone();

    let server = tokio::spawn(app.serve());
    // Give the accept loop a moment to start.
    tokio::time::sleep(Duration::from_millis(20)).await;

    TestApp {
        addr,
        coordinator,
        state,
        cache,
        queue,
        gateway,
        scheduler,
        server,
    }
}

/// Client without connection pooling or proxies.
pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}
