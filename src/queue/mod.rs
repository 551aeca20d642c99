//! Background task queue.
//!
//! # Data Flow
//! ```text
//! submit(name, future) ─→ bounded mpsc ─→ worker 1..N ─→ future.await
//!                                                     └→ completed / failed counters
//! close() ─→ drop sender ─→ workers drain what is buffered ─→ exit ─→ close returns
//! ```
//!
//! # Design Decisions
//! - Failures are counted and logged, never retried
//! - A panicking task counts as failed and does not take its worker down
//! - `close` is the only way to stop workers; the shutdown coordinator owns it

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::Serialize;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::QueueConfig;
use crate::lock::BoxError;
use crate::observability::metrics;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("queue {0} is closed")]
    Closed(String),

    #[error("queue {0} is full")]
    Full(String),
}

/// Point-in-time queue counters.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct QueueStats {
    pub name: String,
    pub waiting: usize,
    pub active: usize,
    pub completed: u64,
    pub failed: u64,
    pub closed: bool,
}

struct QueuedTask {
    id: Uuid,
    name: String,
    task: BoxFuture<'static, Result<(), BoxError>>,
}

#[derive(Default)]
struct Counters {
    waiting: AtomicUsize,
    active: AtomicUsize,
    completed: AtomicU64,
    failed: AtomicU64,
}

/// An in-process worker pool fed by a bounded channel.
pub struct TaskQueue {
    name: String,
    sender: Mutex<Option<mpsc::Sender<QueuedTask>>>,
    workers: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
    counters: Arc<Counters>,
}

impl TaskQueue {
    /// Create the queue and spawn its workers.
    pub fn new(name: impl Into<String>, config: &QueueConfig) -> Self {
        let name = name.into();
        let (tx, rx) = mpsc::channel::<QueuedTask>(config.capacity.max(1));
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let counters = Arc::new(Counters::default());

        let workers = (0..config.workers.max(1))
            .map(|worker| {
                let rx = rx.clone();
                let counters = counters.clone();
                let queue = name.clone();
                tokio::spawn(async move { worker_loop(queue, worker, rx, counters).await })
            })
            .collect();

        tracing::info!(queue = %name, workers = config.workers, capacity = config.capacity, "Task queue started");

        Self {
            name,
            sender: Mutex::new(Some(tx)),
            workers: tokio::sync::Mutex::new(workers),
            counters,
        }
    }

    /// Queue name used in logs and metrics.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Enqueue a task. Fails once the queue is closed or its buffer is full.
    pub fn submit<F>(&self, name: impl Into<String>, task: F) -> Result<Uuid, QueueError>
    where
        F: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
            .ok_or_else(|| QueueError::Closed(self.name.clone()))?;

        let id = Uuid::new_v4();
        let name = name.into();
        // Count before sending so a fast worker never drives `waiting` below zero.
        self.counters.waiting.fetch_add(1, Ordering::SeqCst);
        let queued = QueuedTask {
            id,
            name: name.clone(),
            task: Box::pin(task),
        };

        if let Err(e) = sender.try_send(queued) {
            self.counters.waiting.fetch_sub(1, Ordering::SeqCst);
            return Err(match e {
                mpsc::error::TrySendError::Full(_) => QueueError::Full(self.name.clone()),
                mpsc::error::TrySendError::Closed(_) => QueueError::Closed(self.name.clone()),
            });
        }

        tracing::debug!(queue = %self.name, job_id = %id, job = %name, "Job added to queue");
        Ok(id)
    }

    /// Number of tasks currently executing.
    pub fn active_count(&self) -> usize {
        self.counters.active.load(Ordering::SeqCst)
    }

    /// True once `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_none()
    }

    /// Point-in-time counters.
    pub fn stats(&self) -> QueueStats {
        QueueStats {
            name: self.name.clone(),
            waiting: self.counters.waiting.load(Ordering::SeqCst),
            active: self.counters.active.load(Ordering::SeqCst),
            completed: self.counters.completed.load(Ordering::SeqCst),
            failed: self.counters.failed.load(Ordering::SeqCst),
            closed: self.is_closed(),
        }
    }

    /// Stop accepting tasks and wait for the workers to finish everything
    /// already queued. Idempotent.
    pub async fn close(&self) {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if sender.is_some() {
            tracing::info!(
                queue = %self.name,
                active = self.active_count(),
                waiting = self.counters.waiting.load(Ordering::SeqCst),
                "Closing task queue"
            );
        }
        drop(sender);

        let mut workers = self.workers.lock().await;
        for handle in workers.drain(..) {
            if let Err(e) = handle.await {
                tracing::warn!(queue = %self.name, error = %e, "Queue worker ended abnormally");
            }
        }
    }
}

async fn worker_loop(
    queue: String,
    worker: usize,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<QueuedTask>>>,
    counters: Arc<Counters>,
) {
    loop {
        let next = rx.lock().await.recv().await;
        let Some(queued) = next else {
            break;
        };

        counters.waiting.fetch_sub(1, Ordering::SeqCst);
        counters.active.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(queue = %queue, worker, job_id = %queued.id, job = %queued.name, "Processing job");

        let outcome = AssertUnwindSafe(queued.task).catch_unwind().await;
        counters.active.fetch_sub(1, Ordering::SeqCst);

        match outcome {
            Ok(Ok(())) => {
                counters.completed.fetch_add(1, Ordering::SeqCst);
                metrics::record_queue_job(&queue, true);
            }
            Ok(Err(e)) => {
                counters.failed.fetch_add(1, Ordering::SeqCst);
                metrics::record_queue_job(&queue, false);
                tracing::error!(queue = %queue, job_id = %queued.id, job = %queued.name, error = %e, "Job failed");
            }
            Err(_) => {
                counters.failed.fetch_add(1, Ordering::SeqCst);
                metrics::record_queue_job(&queue, false);
                tracing::error!(queue = %queue, job_id = %queued.id, job = %queued.name, "Job panicked");
            }
        }
    }
    tracing::debug!(queue = %queue, worker, "Queue worker exited");
}
