use std::cmp::Ordering;
use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::{json, Map, Value};
use tokio::sync::Mutex;

use crate::error::{AppError, AppResult};
use crate::repository::{TableStore, LEASES_TABLE, LEDGER_ENTRY_KEY, RENT_LEDGER_TABLE};

const UNIQUE_CONSTRAINTS: &[(&str, &[&str])] = &[(RENT_LEDGER_TABLE, LEDGER_ENTRY_KEY)];

/// (parent table, child table, child foreign key column)
const CASCADES: &[(&str, &str, &str)] = &[(LEASES_TABLE, RENT_LEDGER_TABLE, "lease_id")];

const UPSERT_PRESERVED_COLUMNS: &[&str] = &["id", "created_at"];

/// Stored columns recomputed on every write, mirroring the generated columns
/// in the Postgres schema: (table, column, minuend, subtrahend).
const DERIVED_DIFFERENCES: &[(&str, &str, &str, &str)] =
    &[(LEASES_TABLE, "tenant_pays", "monthly_rent", "subsidy_amount")];

type Row = Map<String, Value>;

/// Process-local store with the same uniqueness, cascade, and upsert
/// guarantees as the Postgres schema. Every operation holds one lock, so each
/// call is atomic with respect to the others.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<HashMap<String, Vec<Row>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TableStore for MemoryStore {
    async fn list_rows(
        &self,
        table: &str,
        filters: Option<&Map<String, Value>>,
        limit: i64,
        offset: i64,
        order_by: &str,
        ascending: bool,
    ) -> AppResult<Vec<Value>> {
        let table_name = validate_table(table)?;
        let order_name = if order_by.trim().is_empty() {
            "created_at"
        } else {
            order_by.trim()
        };

        let tables = self.tables.lock().await;
        let mut rows = tables
            .get(table_name)
            .map(|rows| {
                rows.iter()
                    .filter(|row| filters.map_or(true, |filters| row_matches(row, filters)))
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        drop(tables);

        rows.sort_by(|left, right| {
            let ordering = compare_values(left.get(order_name), right.get(order_name));
            if ascending {
                ordering
            } else {
                ordering.reverse()
            }
        });

        let offset = usize::try_from(offset.max(0)).unwrap_or(0);
        let limit = usize::try_from(limit.clamp(1, 1000)).unwrap_or(1000);
        Ok(rows
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(Value::Object)
            .collect())
    }

    async fn get_row(&self, table: &str, row_id: &str) -> AppResult<Value> {
        let table_name = validate_table(table)?;
        let tables = self.tables.lock().await;
        tables
            .get(table_name)
            .and_then(|rows| rows.iter().find(|row| row_id_matches(row, row_id)))
            .cloned()
            .map(Value::Object)
            .ok_or_else(|| AppError::NotFound(format!("{table_name} record not found.")))
    }

    async fn create_row(&self, table: &str, payload: &Map<String, Value>) -> AppResult<Value> {
        let table_name = validate_table(table)?;
        if payload.is_empty() {
            return Err(AppError::BadRequest(format!(
                "Could not create {table_name} record."
            )));
        }
        let mut tables = self.tables.lock().await;
        insert_locked(&mut tables, table_name, payload)
    }

    async fn update_row(
        &self,
        table: &str,
        row_id: &str,
        payload: &Map<String, Value>,
    ) -> AppResult<Value> {
        let table_name = validate_table(table)?;
        if payload.is_empty() {
            return Err(AppError::BadRequest("No fields to update.".to_string()));
        }

        let mut tables = self.tables.lock().await;
        let rows = tables.entry(table_name.to_string()).or_default();
        let Some(position) = rows.iter().position(|row| row_id_matches(row, row_id)) else {
            return Err(AppError::NotFound(format!(
                "{table_name} record not found."
            )));
        };

        let mut merged = rows[position].clone();
        for (key, value) in payload {
            merged.insert(key.clone(), value.clone());
        }
        apply_derived(table_name, &mut merged)?;
        ensure_unique(table_name, rows, &merged, Some(position))?;
        rows[position] = merged.clone();
        Ok(Value::Object(merged))
    }

    async fn upsert_row(
        &self,
        table: &str,
        payload: &Map<String, Value>,
        conflict_columns: &[&str],
    ) -> AppResult<Value> {
        let table_name = validate_table(table)?;
        if conflict_columns.is_empty() {
            return Err(AppError::Internal(
                "Upsert requires at least one conflict column.".to_string(),
            ));
        }
        if let Some(missing) = conflict_columns
            .iter()
            .find(|column| !payload.contains_key(**column))
        {
            return Err(AppError::BadRequest(format!(
                "Upsert payload is missing conflict column '{missing}'."
            )));
        }

        let mut tables = self.tables.lock().await;
        let existing = tables.get(table_name).and_then(|rows| {
            rows.iter().position(|row| {
                conflict_columns
                    .iter()
                    .all(|column| values_equal(row.get(*column), payload.get(*column)))
            })
        });

        let Some(position) = existing else {
            return insert_locked(&mut tables, table_name, payload);
        };

        let rows = tables.entry(table_name.to_string()).or_default();
        let mut merged = rows[position].clone();
        for (key, value) in payload {
            if conflict_columns.contains(&key.as_str())
                || UPSERT_PRESERVED_COLUMNS.contains(&key.as_str())
            {
                continue;
            }
            merged.insert(key.clone(), value.clone());
        }
        apply_derived(table_name, &mut merged)?;
        rows[position] = merged.clone();
        Ok(Value::Object(merged))
    }

    async fn delete_row(&self, table: &str, row_id: &str) -> AppResult<Value> {
        let table_name = validate_table(table)?;
        let mut tables = self.tables.lock().await;
        let rows = tables.entry(table_name.to_string()).or_default();
        let Some(position) = rows.iter().position(|row| row_id_matches(row, row_id)) else {
            return Err(AppError::NotFound(format!(
                "{table_name} record not found."
            )));
        };
        let removed = rows.remove(position);

        for (parent, child, foreign_key) in CASCADES {
            if *parent != table_name {
                continue;
            }
            if let Some(children) = tables.get_mut(*child) {
                let before = children.len();
                children.retain(|row| {
                    row.get(*foreign_key).and_then(Value::as_str) != Some(row_id)
                });
                tracing::debug!(
                    table = *child,
                    parent_id = row_id,
                    removed = before - children.len(),
                    "Cascaded delete"
                );
            }
        }

        Ok(Value::Object(removed))
    }

    async fn ping(&self) -> AppResult<()> {
        Ok(())
    }
}

fn insert_locked(
    tables: &mut HashMap<String, Vec<Row>>,
    table_name: &str,
    payload: &Map<String, Value>,
) -> AppResult<Value> {
    let now = Value::String(Utc::now().to_rfc3339());
    let mut row = payload.clone();
    row.entry("id")
        .or_insert_with(|| Value::String(uuid::Uuid::new_v4().to_string()));
    row.entry("created_at").or_insert_with(|| now.clone());
    row.entry("updated_at").or_insert(now);
    apply_derived(table_name, &mut row)?;

    for (parent, child, foreign_key) in CASCADES {
        if *child != table_name {
            continue;
        }
        let Some(parent_id) = row.get(*foreign_key).and_then(Value::as_str) else {
            return Err(AppError::BadRequest(format!(
                "{foreign_key} is required."
            )));
        };
        let parent_exists = tables
            .get(*parent)
            .is_some_and(|rows| rows.iter().any(|candidate| row_id_matches(candidate, parent_id)));
        if !parent_exists {
            return Err(AppError::NotFound("Referenced record not found.".to_string()));
        }
    }

    let rows = tables.entry(table_name.to_string()).or_default();
    if let Some(id) = row.get("id").and_then(Value::as_str) {
        if rows.iter().any(|existing| row_id_matches(existing, id)) {
            return Err(AppError::Conflict(
                "Duplicate value violates a unique constraint.".to_string(),
            ));
        }
    }
    ensure_unique(table_name, rows, &row, None)?;

    rows.push(row.clone());
    Ok(Value::Object(row))
}

// A negative difference is the in-memory twin of `leases_subsidy_within_rent`.
fn apply_derived(table_name: &str, row: &mut Row) -> AppResult<()> {
    for (table, column, minuend, subtrahend) in DERIVED_DIFFERENCES {
        if *table != table_name {
            continue;
        }
        let (Some(left), Some(right)) = (decimal_at(row, minuend), decimal_at(row, subtrahend))
        else {
            row.remove(*column);
            continue;
        };
        let difference = left - right;
        if difference < Decimal::ZERO {
            return Err(AppError::Conflict(
                "Record changed concurrently and now violates a check constraint.".to_string(),
            ));
        }
        row.insert((*column).to_string(), json!(difference));
    }
    Ok(())
}

fn decimal_at(row: &Row, column: &str) -> Option<Decimal> {
    row.get(column)
        .filter(|value| !value.is_null())
        .and_then(|value| serde_json::from_value(value.clone()).ok())
}

fn ensure_unique(
    table_name: &str,
    rows: &[Row],
    candidate: &Row,
    skip: Option<usize>,
) -> AppResult<()> {
    for (table, columns) in UNIQUE_CONSTRAINTS {
        if *table != table_name {
            continue;
        }
        let clash = rows.iter().enumerate().any(|(index, row)| {
            Some(index) != skip
                && columns
                    .iter()
                    .all(|column| values_equal(row.get(*column), candidate.get(*column)))
        });
        if clash {
            return Err(AppError::Conflict(
                "Duplicate value violates a unique constraint.".to_string(),
            ));
        }
    }
    Ok(())
}

fn validate_table(table: &str) -> AppResult<&str> {
    let normalized = table.trim();
    if normalized == LEASES_TABLE || normalized == RENT_LEDGER_TABLE {
        return Ok(normalized);
    }
    Err(AppError::Forbidden(format!(
        "Table '{normalized}' is not allowed."
    )))
}

fn row_id_matches(row: &Row, row_id: &str) -> bool {
    row.get("id").and_then(Value::as_str) == Some(row_id)
}

fn row_matches(row: &Row, filters: &Map<String, Value>) -> bool {
    filters.iter().all(|(key, expected)| match expected {
        Value::Null => row.get(key).map_or(true, Value::is_null),
        Value::Array(items) => {
            items.is_empty() || items.iter().any(|item| values_equal(row.get(key), Some(item)))
        }
        _ => values_equal(row.get(key), Some(expected)),
    })
}

fn values_equal(left: Option<&Value>, right: Option<&Value>) -> bool {
    match (left, right) {
        (None | Some(Value::Null), None | Some(Value::Null)) => true,
        (Some(left), Some(right)) => render_scalar(left) == render_scalar(right),
        _ => false,
    }
}

fn render_scalar(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.trim().to_string(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => number.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

// Nulls sort last, like Postgres ASC.
fn compare_values(left: Option<&Value>, right: Option<&Value>) -> Ordering {
    match (left, right) {
        (None | Some(Value::Null), None | Some(Value::Null)) => Ordering::Equal,
        (None | Some(Value::Null), _) => Ordering::Greater,
        (_, None | Some(Value::Null)) => Ordering::Less,
        (Some(Value::Number(left)), Some(Value::Number(right))) => left
            .as_f64()
            .partial_cmp(&right.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(left), Some(right)) => render_scalar(left).cmp(&render_scalar(right)),
    }
}
