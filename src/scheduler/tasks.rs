//! Built-in maintenance jobs.
//!
//! Each job runs on every instance's schedule but only one instance at a
//! time executes the body, guarded by the distributed lock.

use serde::Serialize;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use super::registry::{job, SchedulerError, SchedulerRegistry};
use crate::cache::{CacheError, SharedCache};
use crate::config::SchedulerConfig;
use crate::database::{DatabaseError, DatabasePool};
use crate::lock::{run_with_lock, DistributedLock, JobError};
use crate::queue::{QueueStats, TaskQueue};
use crate::realtime::ChatGateway;

pub const HEALTH_CHECK_JOB: &str = "system-health-check";
pub const SYSTEM_STATS_JOB: &str = "log-system-stats";

/// Lock lifetime for both maintenance jobs.
pub const MAINTENANCE_LOCK_TTL: Duration = Duration::from_secs(60);

const HEALTH_CHECK_KEY: &str = "health-check";

#[derive(Debug, Error)]
pub enum MaintenanceError {
    #[error("database check failed: {0}")]
    Database(#[from] DatabaseError),

    #[error("cache check failed: {0}")]
    Cache(#[from] CacheError),

    #[error("cache did not return the health-check value it just stored")]
    CacheMismatch,
}

/// Collaborators the maintenance jobs read from.
#[derive(Clone)]
pub struct MaintenanceContext {
    pub lock: Arc<DistributedLock>,
    pub cache: Arc<dyn SharedCache>,
    pub database: Option<Arc<dyn DatabasePool>>,
    pub queue: Option<Arc<TaskQueue>>,
    pub gateway: Option<Arc<ChatGateway>>,
}

/// Snapshot logged by `log-system-stats`.
#[derive(Debug, Clone, Serialize)]
pub struct SystemStats {
    pub instance_id: String,
    pub websocket_clients: usize,
    pub websocket_rooms: usize,
    pub queue: Option<QueueStats>,
    pub cache_backend: &'static str,
    pub database_configured: bool,
}

/// Ping the database and round-trip a value through the cache.
pub async fn check_system_health(ctx: &MaintenanceContext) -> Result<(), MaintenanceError> {
    if let Some(db) = &ctx.database {
        db.ping().await?;
    }

    let stamp = chrono::Utc::now().timestamp_millis().to_string();
    ctx.cache.set(HEALTH_CHECK_KEY, &stamp, MAINTENANCE_LOCK_TTL).await?;
    match ctx.cache.get(HEALTH_CHECK_KEY).await? {
        Some(value) if value == stamp => Ok(()),
        _ => Err(MaintenanceError::CacheMismatch),
    }
}

/// Snapshot process and subsystem counters.
pub fn collect_system_stats(ctx: &MaintenanceContext) -> SystemStats {
    SystemStats {
        instance_id: ctx.lock.instance_id().to_string(),
        websocket_clients: ctx.gateway.as_ref().map_or(0, |g| g.connected_count()),
        websocket_rooms: ctx.gateway.as_ref().map_or(0, |g| g.room_count()),
        queue: ctx.queue.as_ref().map(|q| q.stats()),
        cache_backend: ctx.cache.backend(),
        database_configured: ctx.database.is_some(),
    }
}

/// One locked run of the health check.
pub async fn run_health_check(ctx: &MaintenanceContext) -> Result<(), JobError> {
    tracing::debug!("Running system health check");
    run_with_lock(&ctx.lock, HEALTH_CHECK_JOB, MAINTENANCE_LOCK_TTL, || check_system_health(ctx)).await?;
    tracing::debug!("System health check passed");
    Ok(())
}

/// One locked run of the statistics log.
pub async fn run_system_stats(ctx: &MaintenanceContext) -> Result<SystemStats, JobError> {
    run_with_lock(&ctx.lock, SYSTEM_STATS_JOB, MAINTENANCE_LOCK_TTL, || async {
        let stats = collect_system_stats(ctx);
        tracing::info!(
            instance_id = %stats.instance_id,
            websocket_clients = stats.websocket_clients,
            websocket_rooms = stats.websocket_rooms,
            queue_waiting = stats.queue.as_ref().map_or(0, |q| q.waiting),
            queue_active = stats.queue.as_ref().map_or(0, |q| q.active),
            queue_completed = stats.queue.as_ref().map_or(0, |q| q.completed),
            queue_failed = stats.queue.as_ref().map_or(0, |q| q.failed),
            cache_backend = stats.cache_backend,
            database_configured = stats.database_configured,
            "System statistics"
        );
        Ok::<_, Infallible>(stats)
    })
    .await
}

/// Register the maintenance jobs on the shared registry.
pub async fn register_maintenance_jobs(
    registry: &SchedulerRegistry,
    ctx: MaintenanceContext,
    config: &SchedulerConfig,
) -> Result<(), SchedulerError> {
    let health_ctx = ctx.clone();
    registry
        .add_cron(
            HEALTH_CHECK_JOB,
            &config.health_check_cron,
            job(move || {
                let ctx = health_ctx.clone();
                async move {
                    // Failures are already logged and counted by the runner.
                    let _ = run_health_check(&ctx).await;
                }
            }),
        )
        .await?;

    registry
        .add_cron(
            SYSTEM_STATS_JOB,
            &config.stats_cron,
            job(move || {
                let ctx = ctx.clone();
                async move {
                    let _ = run_system_stats(&ctx).await;
                }
            }),
        )
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::config::QueueConfig;
    use crate::lock::lock_key;
    use async_trait::async_trait;

    struct DownDatabase;

    #[async_trait]
    impl DatabasePool for DownDatabase {
        async fn ping(&self) -> Result<(), DatabaseError> {
            Err(DatabaseError::Pool("connection refused".into()))
        }
        async fn close(&self) -> Result<(), DatabaseError> {
            Ok(())
        }
        fn is_closed(&self) -> bool {
            false
        }
    }

    fn context(cache: MemoryCache) -> MaintenanceContext {
        let cache: Arc<dyn SharedCache> = Arc::new(cache);
        MaintenanceContext {
            lock: Arc::new(DistributedLock::new(cache.clone(), "node-a")),
            cache,
            database: None,
            queue: None,
            gateway: None,
        }
    }

    #[tokio::test]
    async fn test_health_check_round_trips_cache() {
        let cache = MemoryCache::new();
        let ctx = context(cache.clone());

        run_health_check(&ctx).await.unwrap();
        assert!(cache.get(HEALTH_CHECK_KEY).await.unwrap().is_some());
        assert!(cache.get(&lock_key(HEALTH_CHECK_JOB)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_health_check_reports_database_failure() {
        let mut ctx = context(MemoryCache::new());
        ctx.database = Some(Arc::new(DownDatabase));

        let err = run_health_check(&ctx).await.unwrap_err();
        assert!(matches!(err, JobError::Failed { ref job, .. } if job == HEALTH_CHECK_JOB));
    }

    #[tokio::test]
    async fn test_health_check_skipped_while_locked_elsewhere() {
        let cache = MemoryCache::new();
        let ctx = context(cache.clone());
        cache
            .set(&lock_key(HEALTH_CHECK_JOB), "node-b:1", MAINTENANCE_LOCK_TTL)
            .await
            .unwrap();

        let err = run_health_check(&ctx).await.unwrap_err();
        assert!(err.is_skipped());
        assert!(cache.get(HEALTH_CHECK_KEY).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stats_include_collaborators() {
        let mut ctx = context(MemoryCache::new());
        let gateway = Arc::new(ChatGateway::new());
        let (_id, _rx) = gateway.register().unwrap();
        ctx.gateway = Some(gateway);
        ctx.queue = Some(Arc::new(TaskQueue::new("default", &QueueConfig::default())));

        let stats = run_system_stats(&ctx).await.unwrap();
        assert_eq!(stats.instance_id, "node-a");
        assert_eq!(stats.websocket_clients, 1);
        assert_eq!(stats.queue.unwrap().name, "default");
        assert_eq!(stats.cache_backend, "memory");
    }

    #[tokio::test]
    async fn test_register_adds_both_cron_jobs() {
        let registry = SchedulerRegistry::new().await.unwrap();
        let ctx = context(MemoryCache::new());

        register_maintenance_jobs(&registry, ctx, &SchedulerConfig::default())
            .await
            .unwrap();

        let names: Vec<String> = registry.jobs().into_iter().map(|j| j.name).collect();
        assert_eq!(names, vec![SYSTEM_STATS_JOB.to_string(), HEALTH_CHECK_JOB.to_string()]);
    }
}
