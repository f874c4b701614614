//! Persistence seam for the ledger core.
//!
//! Services only see [`TableStore`]: equality-filtered reads with ordering,
//! id-based writes, an atomic upsert keyed on a unique column set, and deletes
//! that honor the `leases -> rent_ledger` cascade.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::AppResult;

pub mod memory;
pub mod postgres;
pub mod table_service;
#[cfg(test)]
pub mod yielding;

pub const LEASES_TABLE: &str = "leases";
pub const RENT_LEDGER_TABLE: &str = "rent_ledger";

/// Unique key that makes a ledger entry addressable by lease and month.
pub const LEDGER_ENTRY_KEY: &[&str] = &["lease_id", "ledger_month"];

#[async_trait]
pub trait TableStore: Send + Sync {
    async fn list_rows(
        &self,
        table: &str,
        filters: Option<&Map<String, Value>>,
        limit: i64,
        offset: i64,
        order_by: &str,
        ascending: bool,
    ) -> AppResult<Vec<Value>>;

    async fn get_row(&self, table: &str, row_id: &str) -> AppResult<Value>;

    /// Fails with `AppError::Conflict` when a unique constraint is violated.
    async fn create_row(&self, table: &str, payload: &Map<String, Value>) -> AppResult<Value>;

    async fn update_row(
        &self,
        table: &str,
        row_id: &str,
        payload: &Map<String, Value>,
    ) -> AppResult<Value>;

    async fn upsert_row(
        &self,
        table: &str,
        payload: &Map<String, Value>,
        conflict_columns: &[&str],
    ) -> AppResult<Value>;

    async fn delete_row(&self, table: &str, row_id: &str) -> AppResult<Value>;

    async fn ping(&self) -> AppResult<()>;
}

pub fn json_map(entries: &[(&str, Value)]) -> Map<String, Value> {
    let mut map = Map::new();
    for (key, value) in entries {
        map.insert((*key).to_string(), value.clone());
    }
    map
}
