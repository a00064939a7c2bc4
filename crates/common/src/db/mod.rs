//! Database layer for NutriForge
//!
//! Provides:
//! - SeaORM entity models
//! - Storage traits and their Postgres / in-memory implementations
//! - Connection pool management and migrations

mod memory;
pub mod models;
mod repository;
mod store;
#[cfg(test)]
pub(crate) mod testing;

pub use memory::MemoryStore;
pub use repository::Repository;
pub use store::{FoodStore, PipelineStore};

use crate::config::DatabaseConfig;
use crate::errors::{AppError, Result};
use backoff::ExponentialBackoff;
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Database connection pool wrapper
#[derive(Clone)]
pub struct DbPool {
    pub primary: DatabaseConnection,
}

impl DbPool {
    /// Connect, retrying with exponential backoff until the connect timeout
    /// has elapsed a few times over
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        info!("Connecting to database...");

        let mut opts = ConnectOptions::new(&config.url);
        opts.max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .sqlx_logging(false);

        let policy = ExponentialBackoff {
            max_elapsed_time: Some(Duration::from_secs(config.connect_timeout_secs * 3)),
            ..Default::default()
        };

        let primary = backoff::future::retry(policy, || {
            let opts = opts.clone();
            async move {
                Database::connect(opts).await.map_err(|e| {
                    warn!(error = %e, "Database connect attempt failed");
                    backoff::Error::transient(e)
                })
            }
        })
        .await
        .map_err(|e| AppError::DatabaseConnection {
            message: format!("Failed to connect: {}", e),
        })?;

        info!("Database connection established");

        Ok(Self { primary })
    }

    pub fn conn(&self) -> &DatabaseConnection {
        &self.primary
    }

    /// Apply the bundled migrations
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(self.primary.get_postgres_connection_pool())
            .await?;
        Ok(())
    }

    /// Ping the database to check connectivity
    pub async fn ping(&self) -> Result<()> {
        self.primary
            .execute_unprepared("SELECT 1")
            .await
            .map_err(|e| AppError::DatabaseConnection {
                message: format!("Ping failed: {}", e),
            })?;
        Ok(())
    }
}

/// URL scheme that selects the in-process store
pub const MEMORY_URL: &str = "memory://";

/// Open the store named by `config.url`.
///
/// `memory://` gives a fresh in-process store (local runs and demos);
/// anything else is treated as a Postgres URL.
pub async fn open_store(config: &DatabaseConfig) -> Result<Arc<dyn PipelineStore>> {
    if config.url.starts_with(MEMORY_URL) {
        warn!("Using in-memory store, nothing will be persisted");
        return Ok(Arc::new(MemoryStore::new()));
    }

    let pool = DbPool::new(config).await?;
    if config.run_migrations {
        pool.run_migrations().await?;
    }
    Ok(Arc::new(Repository::new(pool)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::queue::EnrichmentQueue;

    #[tokio::test]
    async fn test_open_memory_store() {
        let mut config = AppConfig::default().database;
        config.url = MEMORY_URL.to_string();

        let store = open_store(&config).await.unwrap();
        store.ping().await.unwrap();
        assert_eq!(store.stats().await.unwrap().active(), 0);
    }
}
