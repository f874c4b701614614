//! Test store that hands control back to the runtime before every call, so
//! sessions joined on one task interleave between their reads and writes.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::{AppError, AppResult};
use crate::repository::memory::MemoryStore;
use crate::repository::TableStore;

#[derive(Default)]
pub struct YieldingStore {
    inner: MemoryStore,
    create_conflicts: AtomicUsize,
}

impl YieldingStore {
    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    /// Number of `create_row` calls that lost a unique-key race.
    pub fn create_conflicts(&self) -> usize {
        self.create_conflicts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TableStore for YieldingStore {
    async fn list_rows(
        &self,
        table: &str,
        filters: Option<&Map<String, Value>>,
        limit: i64,
        offset: i64,
        order_by: &str,
        ascending: bool,
    ) -> AppResult<Vec<Value>> {
        tokio::task::yield_now().await;
        self.inner
            .list_rows(table, filters, limit, offset, order_by, ascending)
            .await
    }

    async fn get_row(&self, table: &str, row_id: &str) -> AppResult<Value> {
        tokio::task::yield_now().await;
        self.inner.get_row(table, row_id).await
    }

    async fn create_row(&self, table: &str, payload: &Map<String, Value>) -> AppResult<Value> {
        tokio::task::yield_now().await;
        let result = self.inner.create_row(table, payload).await;
        if matches!(result, Err(AppError::Conflict(_))) {
            self.create_conflicts.fetch_add(1, Ordering::SeqCst);
        }
        result
    }

    async fn update_row(
        &self,
        table: &str,
        row_id: &str,
        payload: &Map<String, Value>,
    ) -> AppResult<Value> {
        tokio::task::yield_now().await;
        self.inner.update_row(table, row_id, payload).await
    }

    async fn upsert_row(
        &self,
        table: &str,
        payload: &Map<String, Value>,
        conflict_columns: &[&str],
    ) -> AppResult<Value> {
        tokio::task::yield_now().await;
        self.inner.upsert_row(table, payload, conflict_columns).await
    }

    async fn delete_row(&self, table: &str, row_id: &str) -> AppResult<Value> {
        tokio::task::yield_now().await;
        self.inner.delete_row(table, row_id).await
    }

    async fn ping(&self) -> AppResult<()> {
        self.inner.ping().await
    }
}
