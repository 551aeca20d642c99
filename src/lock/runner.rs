//! Single-flight execution of periodic jobs.

use std::future::Future;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::lock::distributed::{DistributedLock, LockError};
use crate::observability::metrics;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Why a locked job did not produce a value.
#[derive(Debug, Error)]
pub enum JobError {
    /// Another holder owns the lock; the body was not invoked.
    #[error("job {job} skipped: lock already held")]
    Skipped { job: String },

    /// The lock store could not be reached; the body was not invoked.
    #[error(transparent)]
    Lock(#[from] LockError),

    /// The body ran and failed.
    #[error("job {job} failed: {source}")]
    Failed {
        job: String,
        #[source]
        source: BoxError,
    },
}

impl JobError {
    /// True when another instance held the lock.
    pub fn is_skipped(&self) -> bool {
        matches!(self, JobError::Skipped { .. })
    }

    fn outcome(&self) -> &'static str {
        match self {
            JobError::Skipped { .. } => "skipped",
            JobError::Lock(_) => "lock_error",
            JobError::Failed { .. } => "failed",
        }
    }
}

/// Run `body` only if this instance takes the lock for `job`.
///
/// The lock is released before returning on every path, including a failing
/// body. A skipped run is dropped, not deferred: the next tick retries.
/// `ttl` must exceed the expected runtime of `body`.
pub async fn run_with_lock<T, E, F, Fut>(
    lock: &DistributedLock,
    job: &str,
    ttl: Duration,
    body: F,
) -> Result<T, JobError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Into<BoxError>,
{
    let start = Instant::now();
    let result = run_inner(lock, job, ttl, body).await;

    let outcome = match &result {
        Ok(_) => "completed",
        Err(e) => e.outcome(),
    };
    metrics::record_job_run(job, outcome, start.elapsed());
    result
}

async fn run_inner<T, E, F, Fut>(
    lock: &DistributedLock,
    job: &str,
    ttl: Duration,
    body: F,
) -> Result<T, JobError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Into<BoxError>,
{
    let guard = match lock.try_acquire(job, ttl).await {
        Ok(Some(guard)) => guard,
        Ok(None) => {
            tracing::debug!(job = %job, "Skipping job: lock already held by another instance");
            return Err(JobError::Skipped {
                job: job.to_string(),
            });
        }
        Err(e) => {
            tracing::error!(job = %job, error = %e, "Failed to acquire job lock");
            return Err(e.into());
        }
    };

    let result = body().await.map_err(Into::into);

    if let Err(e) = guard.release().await {
        tracing::warn!(job = %job, error = %e, "Failed to release job lock");
    }

    result.map_err(|source| {
        tracing::error!(job = %job, error = %source, "Job failed");
        JobError::Failed {
            job: job.to_string(),
            source,
        }
    })
}
