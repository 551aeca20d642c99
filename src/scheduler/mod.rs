//! Periodic job scheduling.
//!
//! # Data Flow
//! ```text
//! startup
//!     → registry.rs SchedulerRegistry::new
//!     → tasks.rs register_maintenance_jobs (cron, UTC)
//!     → registry.start()
//!
//! tick → job body → lock::run_with_lock → single instance runs it
//!
//! shutdown step 3 → registry.stop_all() (cron jobs, intervals, timeouts)
//! ```

pub mod registry;
pub mod tasks;

pub use registry::{job, JobKind, ScheduledJob, ScheduledJobInfo, SchedulerError, SchedulerRegistry};
pub use tasks::{register_maintenance_jobs, MaintenanceContext};
