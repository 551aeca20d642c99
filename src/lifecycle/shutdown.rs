//! Ordered graceful shutdown under a global deadline.

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{self, Instant};

use super::state::ShutdownState;
use crate::cache::SharedCache;
use crate::config::ShutdownConfig;
use crate::database::DatabasePool;
use crate::lock::BoxError;
use crate::observability::metrics;
use crate::queue::TaskQueue;
use crate::realtime::ChatGateway;
use crate::scheduler::SchedulerRegistry;

/// Extra time the realtime step gets on top of the gateway's own close
/// budget, so the gateway's forced cleanup runs before the step is cut off.
const REALTIME_CLEANUP_MARGIN: Duration = Duration::from_millis(250);

/// How the process should end after a termination signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Every step ran before the deadline.
    Completed,
    /// The deadline elapsed while a step was still running.
    TimedOut,
    /// The sequence could not be driven to the end.
    Aborted,
}

impl ShutdownOutcome {
    /// Process exit code: 0 for a completed sequence, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        match self {
            ShutdownOutcome::Completed => 0,
            ShutdownOutcome::TimedOut | ShutdownOutcome::Aborted => 1,
        }
    }
}

/// Teardown steps in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TeardownPhase {
    MarkShuttingDown,
    CloseRealtime,
    StopScheduler,
    DrainQueues,
    CloseCache,
    CloseDatabase,
}

impl TeardownPhase {
    /// Steps that run an action, after the flag flip.
    pub const ACTIONS: [TeardownPhase; 5] = [
        TeardownPhase::CloseRealtime,
        TeardownPhase::StopScheduler,
        TeardownPhase::DrainQueues,
        TeardownPhase::CloseCache,
        TeardownPhase::CloseDatabase,
    ];

    /// Stable step name used in logs, metrics and reports.
    pub fn name(&self) -> &'static str {
        match self {
            TeardownPhase::MarkShuttingDown => "mark_shutting_down",
            TeardownPhase::CloseRealtime => "close_websockets",
            TeardownPhase::StopScheduler => "stop_scheduled_tasks",
            TeardownPhase::DrainQueues => "drain_queues",
            TeardownPhase::CloseCache => "close_cache",
            TeardownPhase::CloseDatabase => "close_database",
        }
    }

    fn skip_message(&self) -> &'static str {
        match self {
            TeardownPhase::MarkShuttingDown => "",
            TeardownPhase::CloseRealtime => "No active WebSocket connections to close",
            TeardownPhase::StopScheduler => "No scheduler available, skipping task cleanup",
            TeardownPhase::DrainQueues => "No queues registered, skipping drain",
            TeardownPhase::CloseCache => "No cache available, skipping cache cleanup",
            TeardownPhase::CloseDatabase => "No database configured, skipping disconnect",
        }
    }
}

/// Result of a single teardown step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Completed,
    Skipped,
    Failed,
    TimedOut,
}

impl StepOutcome {
    /// Label used for the `outcome` metric dimension.
    pub fn as_str(&self) -> &'static str {
        match self {
            StepOutcome::Completed => "completed",
            StepOutcome::Skipped => "skipped",
            StepOutcome::Failed => "failed",
            StepOutcome::TimedOut => "timed_out",
        }
    }
}

/// One finished step, as exposed by [`ShutdownCoordinator::reports`].
#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub phase: TeardownPhase,
    pub outcome: StepOutcome,
    pub elapsed_ms: u64,
}

/// An async teardown action. Called at most once.
pub type TeardownAction = Arc<dyn Fn() -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

/// Wrap an async closure as a [`TeardownAction`].
pub fn action<F, Fut>(f: F) -> TeardownAction
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    Arc::new(move || Box::pin(f()))
}

/// Runs the teardown sequence once, on the first termination signal.
///
/// The run-once guard is private to the coordinator. Flipping the shared
/// [`ShutdownState`] elsewhere (for example to fail readiness early) does not
/// stop a later signal from running the sequence.
pub struct ShutdownCoordinator {
    state: ShutdownState,
    started: AtomicBool,
    config: ShutdownConfig,
    actions: HashMap<TeardownPhase, TeardownAction>,
    reports: Mutex<Vec<StepReport>>,
}

impl ShutdownCoordinator {
    /// Start assembling a coordinator with the given budgets.
    pub fn builder(config: ShutdownConfig) -> ShutdownCoordinatorBuilder {
        ShutdownCoordinatorBuilder {
            config,
            state: None,
            actions: HashMap::new(),
            queues: Vec::new(),
        }
    }

    /// The shared flag readiness probes read.
    pub fn state(&self) -> &ShutdownState {
        &self.state
    }

    /// True once shutdown has begun, by signal or otherwise.
    pub fn is_shutting_down(&self) -> bool {
        self.state.is_shutting_down()
    }

    /// Steps finished so far, in the order they ran.
    pub fn reports(&self) -> Vec<StepReport> {
        self.reports
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Handle a termination signal.
    ///
    /// The first call runs the sequence and returns its outcome. Every later
    /// call is logged and returns `None` without touching the sequence.
    pub async fn on_termination_signal(&self, signal: &str) -> Option<ShutdownOutcome> {
        if self.started.swap(true, Ordering::AcqRel) {
            tracing::warn!(signal = %signal, "Shutdown already in progress, ignoring {} signal", signal);
            return None;
        }

        let started = Instant::now();
        let timeout = self.config.timeout();
        tracing::info!(
            signal = %signal,
            timeout_ms = timeout.as_millis() as u64,
            "Received {}, starting graceful shutdown",
            signal
        );

        let outcome = match time::timeout(timeout, self.run_sequence()).await {
            Ok(()) => {
                tracing::info!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Graceful shutdown completed successfully"
                );
                ShutdownOutcome::Completed
            }
            Err(_) => {
                tracing::error!(
                    timeout_ms = timeout.as_millis() as u64,
                    "Graceful shutdown timed out after {}ms, forcing exit",
                    timeout.as_millis()
                );
                ShutdownOutcome::TimedOut
            }
        };

        self.state.notify_stopped();
        Some(outcome)
    }

    async fn run_sequence(&self) {
        if !self.state.begin() {
            tracing::debug!("Shutdown flag was already set before the signal");
        }
        self.record(TeardownPhase::MarkShuttingDown, StepOutcome::Completed, Duration::ZERO);
        tracing::info!("Health readiness checks will now fail");

        for phase in TeardownPhase::ACTIONS {
            self.run_step(phase).await;
        }
    }

    fn budget(&self, phase: TeardownPhase) -> Option<Duration> {
        match phase {
            TeardownPhase::CloseRealtime => {
                Some(self.config.websocket_close_timeout() + REALTIME_CLEANUP_MARGIN)
            }
            TeardownPhase::DrainQueues => Some(self.config.queue_drain_timeout()),
            _ => None,
        }
    }

    async fn run_step(&self, phase: TeardownPhase) {
        let started = Instant::now();

        let outcome = match self.actions.get(&phase) {
            None => {
                tracing::info!(step = phase.name(), "{}", phase.skip_message());
                StepOutcome::Skipped
            }
            Some(step) => {
                tracing::debug!(step = phase.name(), "Running shutdown step");
                let run = AssertUnwindSafe(step()).catch_unwind();
                let result = match self.budget(phase) {
                    Some(budget) => time::timeout(budget, run).await.ok(),
                    None => Some(run.await),
                };
                match result {
                    Some(Ok(Ok(()))) => StepOutcome::Completed,
                    Some(Ok(Err(e))) => {
                        tracing::warn!(step = phase.name(), error = %e, "Shutdown step failed, continuing");
                        StepOutcome::Failed
                    }
                    Some(Err(_)) => {
                        tracing::error!(step = phase.name(), "Shutdown step panicked, continuing");
                        StepOutcome::Failed
                    }
                    None => {
                        tracing::warn!(
                            step = phase.name(),
                            budget_ms = self.budget(phase).map_or(0, |b| b.as_millis() as u64),
                            "Shutdown step exceeded its time budget, continuing"
                        );
                        StepOutcome::TimedOut
                    }
                }
            }
        };

        self.record(phase, outcome, started.elapsed());
    }

    fn record(&self, phase: TeardownPhase, outcome: StepOutcome, elapsed: Duration) {
        metrics::record_shutdown_step(phase.name(), outcome.as_str(), elapsed);
        self.reports
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(StepReport {
                phase,
                outcome,
                elapsed_ms: elapsed.as_millis() as u64,
            });
    }
}

/// Collects the collaborators the coordinator tears down.
///
/// Every collaborator is optional; a missing one turns its step into a
/// logged no-op.
pub struct ShutdownCoordinatorBuilder {
    config: ShutdownConfig,
    state: Option<ShutdownState>,
    actions: HashMap<TeardownPhase, TeardownAction>,
    queues: Vec<Arc<TaskQueue>>,
}

impl ShutdownCoordinatorBuilder {
    /// Share an existing state so readiness probes see the flag flip.
    pub fn state(mut self, state: ShutdownState) -> Self {
        self.state = Some(state);
        self
    }

    /// Close realtime connections in step 2, waiting up to the websocket
    /// close budget for clients to leave.
    pub fn gateway(mut self, gateway: Arc<ChatGateway>) -> Self {
        let timeout = self.config.websocket_close_timeout();
        self.actions.insert(
            TeardownPhase::CloseRealtime,
            action(move || {
                let gateway = gateway.clone();
                async move {
                    gateway.graceful_shutdown(timeout).await;
                    Ok(())
                }
            }),
        );
        self
    }

    /// Stop every scheduled job in step 3.
    pub fn scheduler(mut self, registry: Arc<SchedulerRegistry>) -> Self {
        self.actions.insert(
            TeardownPhase::StopScheduler,
            action(move || {
                let registry = registry.clone();
                async move {
                    tracing::info!("Stopping scheduled tasks...");
                    registry.stop_all().await?;
                    Ok::<(), BoxError>(())
                }
            }),
        );
        self
    }

    /// Add a queue to drain. May be called more than once.
    pub fn queue(mut self, queue: Arc<TaskQueue>) -> Self {
        self.queues.push(queue);
        self
    }

    /// Disconnect the shared cache in step 5.
    pub fn cache(mut self, cache: Arc<dyn SharedCache>) -> Self {
        self.actions.insert(
            TeardownPhase::CloseCache,
            action(move || {
                let cache = cache.clone();
                async move {
                    tracing::info!(backend = cache.backend(), "Closing cache connection...");
                    cache.disconnect().await?;
                    tracing::info!("Cache connection closed");
                    Ok::<(), BoxError>(())
                }
            }),
        );
        self
    }

    /// Close the database pool in step 6.
    pub fn database(mut self, database: Arc<dyn DatabasePool>) -> Self {
        self.actions.insert(
            TeardownPhase::CloseDatabase,
            action(move || {
                let database = database.clone();
                async move {
                    database.close().await?;
                    Ok::<(), BoxError>(())
                }
            }),
        );
        self
    }

    /// Replace the action of one step.
    pub fn action(mut self, phase: TeardownPhase, step: TeardownAction) -> Self {
        if phase != TeardownPhase::MarkShuttingDown {
            self.actions.insert(phase, step);
        }
        self
    }

    /// Finish the coordinator. Registered queues become the step 4 action
    /// unless one was set explicitly.
    pub fn build(mut self) -> ShutdownCoordinator {
        if !self.queues.is_empty() && !self.actions.contains_key(&TeardownPhase::DrainQueues) {
            let queues = std::mem::take(&mut self.queues);
            self.actions.insert(
                TeardownPhase::DrainQueues,
                action(move || {
                    let queues = queues.clone();
                    async move {
                        for queue in &queues {
                            tracing::info!(
                                queue = queue.name(),
                                active = queue.active_count(),
                                "Draining queue"
                            );
                            queue.close().await;
                            tracing::info!(queue = queue.name(), "Queue drained");
                        }
                        Ok(())
                    }
                }),
            );
        }

        ShutdownCoordinator {
            state: self.state.unwrap_or_default(),
            started: AtomicBool::new(false),
            config: self.config,
            actions: self.actions,
            reports: Mutex::new(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheError, MemoryCache};
    use crate::config::QueueConfig;

    fn config(timeout_ms: u64) -> ShutdownConfig {
        ShutdownConfig {
            timeout_ms,
            queue_drain_timeout_ms: timeout_ms.min(20_000),
            websocket_close_timeout_ms: timeout_ms.min(5_000),
        }
    }

    fn recording(log: Arc<Mutex<Vec<&'static str>>>, name: &'static str) -> TeardownAction {
        action(move || {
            let log = log.clone();
            async move {
                log.lock().unwrap().push(name);
                Ok(())
            }
        })
    }

    fn phases(coordinator: &ShutdownCoordinator) -> Vec<(TeardownPhase, StepOutcome)> {
        coordinator.reports().into_iter().map(|r| (r.phase, r.outcome)).collect()
    }

    #[tokio::test]
    async fn test_repeated_signals_are_coalesced() {
        let coordinator = ShutdownCoordinator::builder(config(30_000)).build();
        assert!(!coordinator.is_shutting_down());

        assert_eq!(
            coordinator.on_termination_signal("SIGTERM").await,
            Some(ShutdownOutcome::Completed)
        );
        assert_eq!(coordinator.on_termination_signal("SIGINT").await, None);
        assert_eq!(coordinator.on_termination_signal("SIGTERM").await, None);
        assert!(coordinator.is_shutting_down());
        assert_eq!(coordinator.reports().len(), 6);
    }

    #[tokio::test]
    async fn test_concurrent_signals_run_sequence_once() {
        let coordinator = Arc::new(ShutdownCoordinator::builder(config(30_000)).build());
        let a = tokio::spawn({
            let c = coordinator.clone();
            async move { c.on_termination_signal("SIGTERM").await }
        });
        let b = tokio::spawn({
            let c = coordinator.clone();
            async move { c.on_termination_signal("SIGINT").await }
        });

        let results = [a.await.unwrap(), b.await.unwrap()];
        assert_eq!(results.iter().filter(|r| r.is_some()).count(), 1);
        assert_eq!(coordinator.reports().len(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_forces_timed_out_outcome() {
        let coordinator = ShutdownCoordinator::builder(config(100))
            .action(
                TeardownPhase::StopScheduler,
                action(|| async {
                    time::sleep(Duration::from_millis(500)).await;
                    Ok(())
                }),
            )
            .build();

        let started = Instant::now();
        let outcome = coordinator.on_termination_signal("SIGTERM").await.unwrap();
        let elapsed = started.elapsed();

        assert_eq!(outcome, ShutdownOutcome::TimedOut);
        assert_eq!(outcome.exit_code(), 1);
        assert!(elapsed >= Duration::from_millis(100));
        assert!(elapsed < Duration::from_millis(500));
        // The stuck step never reported; nothing after it ran.
        assert_eq!(
            phases(&coordinator),
            vec![
                (TeardownPhase::MarkShuttingDown, StepOutcome::Completed),
                (TeardownPhase::CloseRealtime, StepOutcome::Skipped),
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_step_does_not_halt_later_steps() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let coordinator = ShutdownCoordinator::builder(config(30_000))
            .action(TeardownPhase::CloseRealtime, recording(log.clone(), "realtime"))
            .action(
                TeardownPhase::StopScheduler,
                action(|| async { Err::<(), BoxError>("registry unavailable".into()) }),
            )
            .action(TeardownPhase::DrainQueues, recording(log.clone(), "queues"))
            .action(TeardownPhase::CloseCache, recording(log.clone(), "cache"))
            .action(TeardownPhase::CloseDatabase, recording(log.clone(), "database"))
            .build();

        let outcome = coordinator.on_termination_signal("SIGTERM").await.unwrap();
        assert_eq!(outcome, ShutdownOutcome::Completed);
        assert_eq!(outcome.exit_code(), 0);
        assert_eq!(*log.lock().unwrap(), vec!["realtime", "queues", "cache", "database"]);
        assert_eq!(
            phases(&coordinator)[2],
            (TeardownPhase::StopScheduler, StepOutcome::Failed)
        );
    }

    #[tokio::test]
    async fn test_panicking_step_is_contained() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let coordinator = ShutdownCoordinator::builder(config(30_000))
            .action(
                TeardownPhase::CloseCache,
                action(|| async {
                    let handle: Option<&str> = None;
                    handle.expect("driver bug");
                    Ok(())
                }),
            )
            .action(TeardownPhase::CloseDatabase, recording(log.clone(), "database"))
            .build();

        let outcome = coordinator.on_termination_signal("SIGTERM").await.unwrap();
        assert_eq!(outcome, ShutdownOutcome::Completed);
        assert_eq!(*log.lock().unwrap(), vec!["database"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_gateway_is_immediate() {
        let coordinator = ShutdownCoordinator::builder(config(30_000)).build();

        let started = Instant::now();
        coordinator.on_termination_signal("SIGTERM").await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(5));

        let realtime = &coordinator.reports()[1];
        assert_eq!(realtime.phase, TeardownPhase::CloseRealtime);
        assert_eq!(realtime.outcome, StepOutcome::Skipped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_step_budget_is_soft() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut cfg = config(30_000);
        cfg.queue_drain_timeout_ms = 50;
        let coordinator = ShutdownCoordinator::builder(cfg)
            .action(
                TeardownPhase::DrainQueues,
                action(|| async {
                    time::sleep(Duration::from_secs(10)).await;
                    Ok(())
                }),
            )
            .action(TeardownPhase::CloseCache, recording(log.clone(), "cache"))
            .build();

        let started = Instant::now();
        let outcome = coordinator.on_termination_signal("SIGTERM").await.unwrap();
        assert_eq!(outcome, ShutdownOutcome::Completed);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(phases(&coordinator)[3], (TeardownPhase::DrainQueues, StepOutcome::TimedOut));
        assert_eq!(*log.lock().unwrap(), vec!["cache"]);
    }

    #[tokio::test]
    async fn test_flag_set_elsewhere_does_not_block_sequence() {
        let state = ShutdownState::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let coordinator = ShutdownCoordinator::builder(config(30_000))
            .state(state.clone())
            .action(TeardownPhase::CloseCache, recording(log.clone(), "cache"))
            .build();

        assert!(state.begin());
        assert!(coordinator.is_shutting_down());

        assert_eq!(
            coordinator.on_termination_signal("SIGTERM").await,
            Some(ShutdownOutcome::Completed)
        );
        assert_eq!(coordinator.reports().len(), 6);
        assert_eq!(*log.lock().unwrap(), vec!["cache"]);
        assert_eq!(coordinator.on_termination_signal("SIGTERM").await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lingering_client_is_dropped_before_step_is_cut_off() {
        let gateway = Arc::new(ChatGateway::new());
        let (_id, _rx) = gateway.register().unwrap();
        let mut cfg = config(30_000);
        cfg.websocket_close_timeout_ms = 50;

        let coordinator = ShutdownCoordinator::builder(cfg).gateway(gateway.clone()).build();
        let outcome = coordinator.on_termination_signal("SIGTERM").await.unwrap();

        assert_eq!(outcome, ShutdownOutcome::Completed);
        assert_eq!(phases(&coordinator)[1], (TeardownPhase::CloseRealtime, StepOutcome::Completed));
        assert_eq!(gateway.connected_count(), 0);
    }

    #[tokio::test]
    async fn test_tears_down_real_collaborators() {
        let cache = MemoryCache::new();
        let gateway = Arc::new(ChatGateway::new());
        let registry = Arc::new(SchedulerRegistry::new().await.unwrap());
        let queue = Arc::new(TaskQueue::new("default", &QueueConfig::default()));
        let state = ShutdownState::new();
        let mut stopped = state.subscribe();

        let coordinator = ShutdownCoordinator::builder(config(30_000))
            .state(state.clone())
            .gateway(gateway.clone())
            .scheduler(registry.clone())
            .queue(queue.clone())
            .cache(Arc::new(cache.clone()))
            .build();

        let outcome = coordinator.on_termination_signal("SIGTERM").await.unwrap();
        assert_eq!(outcome, ShutdownOutcome::Completed);
        assert!(state.is_shutting_down());
        assert!(gateway.is_closing());
        assert!(registry.is_stopped());
        assert!(queue.is_closed());
        assert!(matches!(cache.get("any").await, Err(CacheError::Closed)));
        stopped.recv().await.unwrap();

        let outcomes: Vec<StepOutcome> = coordinator.reports().iter().map(|r| r.outcome).collect();
        assert_eq!(
            outcomes,
            vec![
                StepOutcome::Completed,
                StepOutcome::Completed,
                StepOutcome::Completed,
                StepOutcome::Completed,
                StepOutcome::Completed,
                StepOutcome::Skipped,
            ]
        );
    }
}
