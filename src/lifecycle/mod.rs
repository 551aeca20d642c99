//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     cache → database → queue → gateway → scheduler → coordinator → listener
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → coordinator.on_termination_signal (repeats ignored)
//!
//! Shutdown (shutdown.rs), under the global deadline:
//!     1. flag flip (state.rs; readiness fails from here on)
//!     2. close realtime connections   (websocket_close_timeout)
//!     3. stop scheduled jobs
//!     4. drain queues                 (queue_drain_timeout)
//!     5. disconnect cache
//!     6. close database pool
//!     → notify subscribers → exit code 0, or 1 if the deadline fired first
//! ```
//!
//! # Design Decisions
//! - A failing step is logged and the sequence moves on
//! - Step budgets are soft; only the global deadline aborts
//! - The flag is never reset; shutdown is one-way

pub mod shutdown;
pub mod signals;
pub mod startup;
pub mod state;

pub use shutdown::{ShutdownCoordinator, ShutdownOutcome, StepOutcome, TeardownPhase};
pub use startup::{build, Application, StartupError};
pub use state::{Shutdown, ShutdownState};
