//! Startup orchestration.
//!
//! # Responsibilities
//! - Initialize subsystems in dependency order
//! - Register and start the maintenance jobs
//! - Wire every collaborator into the shutdown coordinator
//! - Bind the HTTP listener last (traffic only when ready)
//!
//! Logging and metrics are installed by the binary before [`build`] runs.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::net::TcpListener;
use uuid::Uuid;

use super::shutdown::ShutdownCoordinator;
use super::state::ShutdownState;
use crate::cache::{self, CacheError, SharedCache};
use crate::config::ServiceConfig;
use crate::database::{DatabaseError, DatabasePool, PostgresPool};
use crate::http::{AppState, HttpServer};
use crate::lock::DistributedLock;
use crate::queue::TaskQueue;
use crate::realtime::ChatGateway;
use crate::scheduler::{register_maintenance_jobs, MaintenanceContext, SchedulerError, SchedulerRegistry};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("cache unavailable: {0}")]
    Cache(#[from] CacheError),

    #[error("database unavailable: {0}")]
    Database(#[from] DatabaseError),

    #[error("scheduler failed to start: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },
}

/// Every running subsystem plus the bound listener.
pub struct Application {
    pub config: Arc<ServiceConfig>,
    pub state: ShutdownState,
    pub cache: Arc<dyn SharedCache>,
    pub database: Option<Arc<dyn DatabasePool>>,
    pub queue: Arc<TaskQueue>,
    pub gateway: Arc<ChatGateway>,
    pub scheduler: Arc<SchedulerRegistry>,
    pub lock: Arc<DistributedLock>,
    pub coordinator: Arc<ShutdownCoordinator>,
    listener: TcpListener,
    started_at: Instant,
}

/// Bring the service up. Any failure aborts startup.
pub async fn build(config: ServiceConfig) -> Result<Application, StartupError> {
    let config = Arc::new(config);
    let started_at = Instant::now();
    let state = ShutdownState::new();

    let cache = cache::connect(&config.cache).await?;

    let database: Option<Arc<dyn DatabasePool>> = match PostgresPool::from_config(&config.database)? {
        Some(pool) => {
            pool.ping().await?;
            tracing::info!("Connected to database");
            Some(Arc::new(pool))
        }
        None => None,
    };

    let queue = Arc::new(TaskQueue::new("default", &config.queue));
    let gateway = Arc::new(ChatGateway::new());

    let instance_id = if config.scheduler.instance_id.is_empty() {
        Uuid::new_v4().to_string()
    } else {
        config.scheduler.instance_id.clone()
    };
    let lock = Arc::new(DistributedLock::new(cache.clone(), instance_id));

    let scheduler = Arc::new(SchedulerRegistry::new().await?);
    if config.scheduler.enabled {
        let ctx = MaintenanceContext {
            lock: lock.clone(),
            cache: cache.clone(),
            database: database.clone(),
            queue: Some(queue.clone()),
            gateway: Some(gateway.clone()),
        };
        register_maintenance_jobs(&scheduler, ctx, &config.scheduler).await?;
    }
    scheduler.start().await?;

    let mut coordinator = ShutdownCoordinator::builder(config.shutdown.clone())
        .state(state.clone())
        .gateway(gateway.clone())
        .scheduler(scheduler.clone())
        .queue(queue.clone())
        .cache(cache.clone());
    if let Some(db) = &database {
        coordinator = coordinator.database(db.clone());
    }
    let coordinator = Arc::new(coordinator.build());

    let address = config.listener.bind_address.clone();
    let listener = TcpListener::bind(&address)
        .await
        .map_err(|source| StartupError::Bind { address, source })?;

    tracing::info!(
        instance_id = %lock.instance_id(),
        cache = cache.backend(),
        database = database.is_some(),
        shutdown_timeout_ms = config.shutdown.timeout_ms,
        "Startup complete"
    );

    Ok(Application {
        config,
        state,
        cache,
        database,
        queue,
        gateway,
        scheduler,
        lock,
        coordinator,
        listener,
        started_at,
    })
}

impl Application {
    /// Address the listener actually bound, useful with port 0.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Shared state handed to every HTTP handler.
    pub fn app_state(&self) -> AppState {
        AppState {
            config: self.config.clone(),
            shutdown: self.state.clone(),
            cache: self.cache.clone(),
            database: self.database.clone(),
            queue: self.queue.clone(),
            gateway: self.gateway.clone(),
            scheduler: self.scheduler.clone(),
            instance_id: self.lock.instance_id().to_string(),
            started_at: self.started_at,
        }
    }

    /// Serve HTTP until the shutdown sequence finishes.
    pub async fn serve(self) -> std::io::Result<()> {
        let stop = self.state.subscribe();
        let server = HttpServer::new(self.app_state());
        server.run(self.listener, stop).await
    }
}
