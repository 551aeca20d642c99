//! PostgreSQL pool backed by deadpool-postgres.

use async_trait::async_trait;
use deadpool_postgres::{Config as PoolConfig, ManagerConfig, Pool, PoolConfig as SizeConfig, RecyclingMethod, Runtime};
use tokio_postgres::NoTls;

use super::{DatabaseError, DatabasePool};
use crate::config::DatabaseConfig;

pub struct PostgresPool {
    pool: Pool,
}

impl PostgresPool {
    /// Build the pool from configuration. Returns `None` without a URL.
    ///
    /// Connections are created lazily; call [`DatabasePool::ping`] to verify
    /// the server is reachable.
    pub fn from_config(config: &DatabaseConfig) -> Result<Option<Self>, DatabaseError> {
        let Some(url) = &config.url else {
            tracing::info!("No database configured");
            return Ok(None);
        };

        let mut cfg = PoolConfig::new();
        cfg.url = Some(url.clone());
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        cfg.pool = Some(SizeConfig::new(config.pool_size));

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| DatabaseError::Create(e.to_string()))?;

        tracing::info!(pool_size = config.pool_size, "Database pool created");
        Ok(Some(Self { pool }))
    }
}

#[async_trait]
impl DatabasePool for PostgresPool {
    async fn ping(&self) -> Result<(), DatabaseError> {
        if self.pool.is_closed() {
            return Err(DatabaseError::Closed);
        }
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| DatabaseError::Pool(e.to_string()))?;
        client.simple_query("SELECT 1").await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), DatabaseError> {
        if !self.pool.is_closed() {
            self.pool.close();
            tracing::info!("Disconnected from database");
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }
}
