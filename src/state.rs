use std::sync::Arc;

use crate::config::AppConfig;
use crate::db::{create_pool, run_migrations};
use crate::repository::memory::MemoryStore;
use crate::repository::postgres::PgStore;
use crate::repository::TableStore;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn TableStore>,
}

impl AppState {
    pub async fn build(config: AppConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let store: Arc<dyn TableStore> = match create_pool(&config)? {
            Some(pool) => {
                if config.db_run_migrations {
                    run_migrations(&pool).await?;
                }
                Arc::new(PgStore::new(pool))
            }
            None if config.memory_store_allowed() => {
                tracing::warn!(
                    "DATABASE_URL is not set; using the in-memory store (data is lost on restart)"
                );
                Arc::new(MemoryStore::new())
            }
            None => {
                return Err("DATABASE_URL is required when ENVIRONMENT=production.".into());
            }
        };

        Ok(Self {
            config: Arc::new(config),
            store,
        })
    }

    #[cfg(test)]
    pub fn in_memory(config: AppConfig) -> Self {
        Self {
            config: Arc::new(config),
            store: Arc::new(MemoryStore::new()),
        }
    }
}
