//! Cross-instance mutual exclusion for periodic jobs.
//!
//! # Data Flow
//! ```text
//! scheduler tick
//!     → runner.rs run_with_lock(job, ttl, body)
//!         → distributed.rs try_acquire  (SET lock:<job> <token> NX PX ttl)
//!             held elsewhere → Skipped, body not invoked
//!             acquired       → body().await
//!         → LockGuard::release         (delete only if token still matches)
//!     → outcome logged + counted
//! ```
//!
//! # Design Decisions
//! - Explicit higher-order wrapper instead of annotations on job methods
//! - TTL is the crash safety net; callers pick it larger than the job runtime
//! - No queueing or backoff for skipped runs

pub mod distributed;
pub mod runner;

pub use distributed::{lock_key, DistributedLock, LockError, LockGuard};
pub use runner::{run_with_lock, BoxError, JobError};
