//! Backend service kernel: distributed-lock job scheduling and ordered
//! graceful shutdown.

pub mod admin;
pub mod cache;
pub mod config;
pub mod database;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod lock;
pub mod observability;
pub mod queue;
pub mod realtime;
pub mod scheduler;

pub use config::schema::ServiceConfig;
pub use http::HttpServer;
pub use lifecycle::{ShutdownCoordinator, ShutdownOutcome, ShutdownState};
