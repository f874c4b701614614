use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::PgPool;

use crate::error::{AppError, AppResult};
use crate::repository::{table_service, TableStore};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TableStore for PgStore {
    async fn list_rows(
        &self,
        table: &str,
        filters: Option<&Map<String, Value>>,
        limit: i64,
        offset: i64,
        order_by: &str,
        ascending: bool,
    ) -> AppResult<Vec<Value>> {
        table_service::list_rows(&self.pool, table, filters, limit, offset, order_by, ascending)
            .await
    }

    async fn get_row(&self, table: &str, row_id: &str) -> AppResult<Value> {
        table_service::get_row(&self.pool, table, row_id).await
    }

    async fn create_row(&self, table: &str, payload: &Map<String, Value>) -> AppResult<Value> {
        table_service::create_row(&self.pool, table, payload).await
    }

    async fn update_row(
        &self,
        table: &str,
        row_id: &str,
        payload: &Map<String, Value>,
    ) -> AppResult<Value> {
        table_service::update_row(&self.pool, table, row_id, payload).await
    }

    async fn upsert_row(
        &self,
        table: &str,
        payload: &Map<String, Value>,
        conflict_columns: &[&str],
    ) -> AppResult<Value> {
        table_service::upsert_row(&self.pool, table, payload, conflict_columns).await
    }

    async fn delete_row(&self, table: &str, row_id: &str) -> AppResult<Value> {
        table_service::delete_row(&self.pool, table, row_id).await
    }

    async fn ping(&self) -> AppResult<()> {
        // Short timeout so health checks answer even if the first connection hangs.
        match tokio::time::timeout(
            Duration::from_secs(3),
            sqlx::query("SELECT 1").fetch_one(&self.pool),
        )
        .await
        {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(error)) => {
                tracing::error!(error = %error, "Health check DB query failed");
                Err(AppError::Dependency("Database is unavailable.".to_string()))
            }
            Err(_) => {
                tracing::error!("Health check DB query timed out (3s)");
                Err(AppError::Dependency("Database timed out.".to_string()))
            }
        }
    }
}
