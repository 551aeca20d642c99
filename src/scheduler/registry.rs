//! Named registry of cron jobs, intervals and timeouts.

use dashmap::DashMap;
use futures_util::future::BoxFuture;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};
use uuid::Uuid;

/// A job body the registry can invoke repeatedly.
pub type ScheduledJob = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Wrap an async closure as a [`ScheduledJob`].
pub fn job<F, Fut>(f: F) -> ScheduledJob
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move || Box::pin(f()))
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("a scheduled job named {0} already exists")]
    Duplicate(String),

    #[error("scheduler has been stopped")]
    Stopped,

    #[error("cron scheduler error: {0}")]
    Cron(#[from] JobSchedulerError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Cron,
    Interval,
    Timeout,
}

/// Description of a registered job for the admin surface.
#[derive(Debug, Clone, Serialize)]
pub struct ScheduledJobInfo {
    pub name: String,
    pub kind: JobKind,
    pub schedule: String,
}

struct CronEntry {
    id: Uuid,
    expression: String,
}

struct TaskEntry {
    kind: JobKind,
    schedule: String,
    stop: watch::Sender<bool>,
}

/// Owns every periodic job in the process so shutdown can stop them all.
pub struct SchedulerRegistry {
    cron: JobScheduler,
    cron_jobs: DashMap<String, CronEntry>,
    tasks: Arc<DashMap<String, TaskEntry>>,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl SchedulerRegistry {
    /// Create an empty registry backed by a fresh cron scheduler.
    pub async fn new() -> Result<Self, SchedulerError> {
        Ok(Self {
            cron: JobScheduler::new().await?,
            cron_jobs: DashMap::new(),
            tasks: Arc::new(DashMap::new()),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        })
    }

    /// Start firing cron jobs. Intervals and timeouts run as soon as added.
    pub async fn start(&self) -> Result<(), SchedulerError> {
        self.ensure_running()?;
        if self.started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.cron.start().await?;
        tracing::info!(cron_jobs = self.cron_jobs.len(), "Scheduler started");
        Ok(())
    }

    fn ensure_running(&self) -> Result<(), SchedulerError> {
        if self.stopped.load(Ordering::Acquire) {
            Err(SchedulerError::Stopped)
        } else {
            Ok(())
        }
    }

    fn ensure_unique(&self, name: &str) -> Result<(), SchedulerError> {
        if self.cron_jobs.contains_key(name) || self.tasks.contains_key(name) {
            Err(SchedulerError::Duplicate(name.to_string()))
        } else {
            Ok(())
        }
    }

    /// Register a cron job. `expression` has a leading seconds field and is
    /// evaluated in UTC.
    pub async fn add_cron(&self, name: &str, expression: &str, body: ScheduledJob) -> Result<(), SchedulerError> {
        self.ensure_running()?;
        self.ensure_unique(name)?;

        let job_name = name.to_string();
        let cron_job = Job::new_async(expression, move |_id, _scheduler| {
            let body = body.clone();
            let job_name = job_name.clone();
            Box::pin(async move {
                tracing::debug!(job = %job_name, "Cron job firing");
                body().await;
            })
        })?;

        let id = self.cron.add(cron_job).await?;
        self.cron_jobs.insert(
            name.to_string(),
            CronEntry {
                id,
                expression: expression.to_string(),
            },
        );
        tracing::info!(job = %name, schedule = %expression, "Cron job registered");
        Ok(())
    }

    /// Run `body` every `period`, first after one period. Ticks never overlap.
    pub fn add_interval(&self, name: &str, period: Duration, body: ScheduledJob) -> Result<(), SchedulerError> {
        self.ensure_running()?;
        self.ensure_unique(name)?;

        let (stop, mut stopped) = watch::channel(false);
        let job_name = name.to_string();
        tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => body().await,
                    _ = stopped.changed() => break,
                }
                if *stopped.borrow() {
                    break;
                }
            }
            tracing::debug!(job = %job_name, "Interval loop exited");
        });

        self.tasks.insert(
            name.to_string(),
            TaskEntry {
                kind: JobKind::Interval,
                schedule: format!("every {}ms", period.as_millis()),
                stop,
            },
        );
        tracing::info!(job = %name, period_ms = period.as_millis() as u64, "Interval registered");
        Ok(())
    }

    /// Run `body` once after `delay`.
    pub fn add_timeout(&self, name: &str, delay: Duration, body: ScheduledJob) -> Result<(), SchedulerError> {
        self.ensure_running()?;
        self.ensure_unique(name)?;

        let (stop, mut stopped) = watch::channel(false);
        self.tasks.insert(
            name.to_string(),
            TaskEntry {
                kind: JobKind::Timeout,
                schedule: format!("after {}ms", delay.as_millis()),
                stop,
            },
        );

        let tasks = self.tasks.clone();
        let job_name = name.to_string();
        tokio::spawn(async move {
            tokio::select! {
                _ = time::sleep(delay) => {
                    body().await;
                    tasks.remove(&job_name);
                }
                _ = stopped.changed() => {}
            }
        });
        tracing::info!(job = %name, delay_ms = delay.as_millis() as u64, "Timeout registered");
        Ok(())
    }

    /// Every registered job, sorted by name.
    pub fn jobs(&self) -> Vec<ScheduledJobInfo> {
        let mut jobs: Vec<ScheduledJobInfo> = self
            .cron_jobs
            .iter()
            .map(|r| ScheduledJobInfo {
                name: r.key().clone(),
                kind: JobKind::Cron,
                schedule: r.value().expression.clone(),
            })
            .chain(self.tasks.iter().map(|r| ScheduledJobInfo {
                name: r.key().clone(),
                kind: r.value().kind,
                schedule: r.value().schedule.clone(),
            }))
            .collect();
        jobs.sort_by(|a, b| a.name.cmp(&b.name));
        jobs
    }

    /// True once `stop_all` has run.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Stop every cron job, interval and timeout so no new work starts.
    ///
    /// A job body already running is allowed to finish. Calling this twice is
    /// a no-op. Per-job failures are logged and do not stop the sweep.
    pub async fn stop_all(&self) -> Result<(), SchedulerError> {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let cron_names: Vec<String> = self.cron_jobs.iter().map(|r| r.key().clone()).collect();
        for name in cron_names {
            if let Some((_, entry)) = self.cron_jobs.remove(&name) {
                match self.cron.remove(&entry.id).await {
                    Ok(()) => tracing::info!(job = %name, "Stopped cron job"),
                    Err(e) => tracing::warn!(job = %name, error = %e, "Failed to stop cron job"),
                }
            }
        }

        let task_names: Vec<String> = self.tasks.iter().map(|r| r.key().clone()).collect();
        for name in task_names {
            if let Some((_, entry)) = self.tasks.remove(&name) {
                let _ = entry.stop.send(true);
                match entry.kind {
                    JobKind::Interval => tracing::info!(job = %name, "Cleared interval"),
                    _ => tracing::info!(job = %name, "Cleared timeout"),
                }
            }
        }

        if self.started.load(Ordering::Acquire) {
            let mut cron = self.cron.clone();
            cron.shutdown().await?;
        }
        tracing::info!("All scheduled tasks stopped");
        Ok(())
    }
}
