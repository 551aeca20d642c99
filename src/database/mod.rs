//! Relational database pool handle.
//!
//! The service only needs two things from the database at the lifecycle
//! level: a liveness query for readiness and a single close at teardown.
//! Query code lives with the repositories that own it.

pub mod postgres;

use async_trait::async_trait;
use thiserror::Error;

pub use postgres::PostgresPool;

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("failed to create database pool: {0}")]
    Create(String),

    #[error("database pool error: {0}")]
    Pool(String),

    #[error("database query failed: {0}")]
    Query(#[from] tokio_postgres::Error),

    #[error("database pool is closed")]
    Closed,
}

/// Lifecycle operations on a connection pool.
#[async_trait]
pub trait DatabasePool: Send + Sync {
    /// Run a trivial query on a pooled connection.
    async fn ping(&self) -> Result<(), DatabaseError>;

    /// Close the pool. Idempotent.
    async fn close(&self) -> Result<(), DatabaseError>;

    fn is_closed(&self) -> bool;
}
