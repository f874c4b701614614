use chrono::{DateTime, FixedOffset, NaiveDate};
use serde_json::{Map, Value};
use sqlx::{postgres::PgRow, PgPool, Postgres, QueryBuilder, Row};

use crate::error::AppError;
use crate::repository::{LEASES_TABLE, RENT_LEDGER_TABLE};

const ALLOWED_TABLES: &[&str] = &[LEASES_TABLE, RENT_LEDGER_TABLE];

/// Columns a conflict-triggered update must never overwrite.
const UPSERT_PRESERVED_COLUMNS: &[&str] = &["id", "created_at"];

pub async fn list_rows(
    pool: &PgPool,
    table: &str,
    filters: Option<&Map<String, Value>>,
    limit: i64,
    offset: i64,
    order_by: &str,
    ascending: bool,
) -> Result<Vec<Value>, AppError> {
    let table_name = validate_table(table)?;
    let order_name = if order_by.trim().is_empty() {
        "created_at"
    } else {
        validate_identifier(order_by)?
    };

    let mut query = QueryBuilder::<Postgres>::new("SELECT row_to_json(t) AS row FROM ");
    query.push(table_name).push(" t WHERE 1=1");

    if let Some(filter_map) = filters {
        for (key, value) in filter_map {
            push_filter_clause(&mut query, key, value)?;
        }
    }

    query.push(" ORDER BY t.").push(order_name);
    if ascending {
        query.push(" ASC");
    } else {
        query.push(" DESC");
    }
    query
        .push(" LIMIT ")
        .push_bind(limit.clamp(1, 1000))
        .push(" OFFSET ")
        .push_bind(offset.max(0));

    let rows = query.build().fetch_all(pool).await.map_err(map_db_error)?;
    Ok(read_rows(rows))
}

pub async fn get_row(pool: &PgPool, table: &str, row_id: &str) -> Result<Value, AppError> {
    let table_name = validate_table(table)?;

    let mut query = QueryBuilder::<Postgres>::new("SELECT row_to_json(t) AS row FROM ");
    query.push(table_name).push(" t WHERE ");
    push_scalar_filter(&mut query, "id", &row_id_filter(table_name, row_id)?);
    query.push(" LIMIT 1");

    let row = query
        .build()
        .fetch_optional(pool)
        .await
        .map_err(map_db_error)?;

    row.and_then(|value| value.try_get::<Option<Value>, _>("row").ok().flatten())
        .ok_or_else(|| AppError::NotFound(format!("{table_name} record not found.")))
}

pub async fn create_row(
    pool: &PgPool,
    table: &str,
    payload: &Map<String, Value>,
) -> Result<Value, AppError> {
    let table_name = validate_table(table)?;
    if payload.is_empty() {
        return Err(AppError::BadRequest(format!(
            "Could not create {table_name} record."
        )));
    }

    let keys = sorted_keys(payload)?;
    let mut query = QueryBuilder::<Postgres>::new("INSERT INTO ");
    push_insert_select(&mut query, table_name, &keys, payload);
    query
        .push(" RETURNING row_to_json(")
        .push(table_name)
        .push(".*) AS row");

    let row = query
        .build()
        .fetch_optional(pool)
        .await
        .map_err(map_db_error)?;

    row.and_then(|value| value.try_get::<Option<Value>, _>("row").ok().flatten())
        .ok_or_else(|| AppError::Internal(format!("Could not create {table_name} record.")))
}

pub async fn update_row(
    pool: &PgPool,
    table: &str,
    row_id: &str,
    payload: &Map<String, Value>,
) -> Result<Value, AppError> {
    let table_name = validate_table(table)?;
    if payload.is_empty() {
        return Err(AppError::BadRequest("No fields to update.".to_string()));
    }

    let keys = sorted_keys(payload)?;
    let mut query = QueryBuilder::<Postgres>::new("UPDATE ");
    query.push(table_name).push(" t SET ");
    {
        let mut separated = query.separated(", ");
        for key in &keys {
            separated.push(*key);
            separated.push_unseparated(" = r.");
            separated.push_unseparated(*key);
        }
    }
    query
        .push(" FROM jsonb_populate_record(NULL::")
        .push(table_name)
        .push(", ");
    query.push_bind(Value::Object(payload.clone()));
    query.push(") r WHERE ");
    push_scalar_filter(&mut query, "id", &row_id_filter(table_name, row_id)?);
    query.push(" RETURNING row_to_json(t) AS row");

    let row = query
        .build()
        .fetch_optional(pool)
        .await
        .map_err(map_db_error)?;

    row.and_then(|value| value.try_get::<Option<Value>, _>("row").ok().flatten())
        .ok_or_else(|| AppError::NotFound(format!("{table_name} record not found.")))
}

/// Insert, or update the row that already owns `conflict_columns`, in one
/// statement. Needs a unique constraint over exactly those columns.
pub async fn upsert_row(
    pool: &PgPool,
    table: &str,
    payload: &Map<String, Value>,
    conflict_columns: &[&str],
) -> Result<Value, AppError> {
    let table_name = validate_table(table)?;
    let mut query = build_upsert_query(table_name, payload, conflict_columns)?;

    let row = query
        .build()
        .fetch_optional(pool)
        .await
        .map_err(map_db_error)?;

    row.and_then(|value| value.try_get::<Option<Value>, _>("row").ok().flatten())
        .ok_or_else(|| AppError::Internal(format!("Could not upsert {table_name} record.")))
}

pub async fn delete_row(pool: &PgPool, table: &str, row_id: &str) -> Result<Value, AppError> {
    let existing = get_row(pool, table, row_id).await?;
    let table_name = validate_table(table)?;

    let mut query = QueryBuilder::<Postgres>::new("DELETE FROM ");
    query.push(table_name).push(" t WHERE ");
    push_scalar_filter(&mut query, "id", &row_id_filter(table_name, row_id)?);
    query.build().execute(pool).await.map_err(map_db_error)?;

    Ok(existing)
}

fn build_upsert_query<'a>(
    table_name: &'a str,
    payload: &'a Map<String, Value>,
    conflict_columns: &[&str],
) -> Result<QueryBuilder<'a, Postgres>, AppError> {
    if payload.is_empty() {
        return Err(AppError::BadRequest(format!(
            "Could not upsert {table_name} record."
        )));
    }
    if conflict_columns.is_empty() {
        return Err(AppError::Internal(
            "Upsert requires at least one conflict column.".to_string(),
        ));
    }

    let keys = sorted_keys(payload)?;
    let mut conflict = Vec::with_capacity(conflict_columns.len());
    for column in conflict_columns {
        let column = validate_identifier(column)?;
        if !keys.contains(&column) {
            return Err(AppError::BadRequest(format!(
                "Upsert payload is missing conflict column '{column}'."
            )));
        }
        conflict.push(column);
    }

    let mut query = QueryBuilder::<Postgres>::new("INSERT INTO ");
    push_insert_select(&mut query, table_name, &keys, payload);
    query.push(" ON CONFLICT (");
    {
        let mut separated = query.separated(", ");
        for column in &conflict {
            separated.push(*column);
        }
    }
    query.push(") DO UPDATE SET ");
    let updatable = keys
        .iter()
        .copied()
        .filter(|key| !conflict.contains(key) && !UPSERT_PRESERVED_COLUMNS.contains(key))
        .collect::<Vec<_>>();
    if updatable.is_empty() {
        // Still needs a SET clause for RETURNING to yield the existing row.
        query
            .push(conflict[0])
            .push(" = EXCLUDED.")
            .push(conflict[0]);
    } else {
        let mut separated = query.separated(", ");
        for key in updatable {
            separated.push(key);
            separated.push_unseparated(" = EXCLUDED.");
            separated.push_unseparated(key);
        }
    }
    query
        .push(" RETURNING row_to_json(")
        .push(table_name)
        .push(".*) AS row");

    Ok(query)
}

// Uses jsonb_populate_record so Postgres resolves column types (uuid, date,
// numeric, boolean) from the table definition.
fn push_insert_select<'a>(
    query: &mut QueryBuilder<'a, Postgres>,
    table_name: &'a str,
    keys: &[&'a str],
    payload: &Map<String, Value>,
) {
    query.push(table_name).push(" (");
    {
        let mut separated = query.separated(", ");
        for key in keys {
            separated.push(*key);
        }
    }
    query.push(") SELECT ");
    {
        let mut separated = query.separated(", ");
        for key in keys {
            separated.push("r.");
            separated.push_unseparated(*key);
        }
    }
    query
        .push(" FROM jsonb_populate_record(NULL::")
        .push(table_name)
        .push(", ");
    query.push_bind(Value::Object(payload.clone()));
    query.push(") r");
}

fn sorted_keys(payload: &Map<String, Value>) -> Result<Vec<&str>, AppError> {
    let mut keys = Vec::with_capacity(payload.len());
    for key in payload.keys() {
        keys.push(validate_identifier(key)?);
    }
    keys.sort_unstable();
    Ok(keys)
}

fn read_rows(rows: Vec<PgRow>) -> Vec<Value> {
    rows.into_iter()
        .filter_map(|row| row.try_get::<Option<Value>, _>("row").ok().flatten())
        .collect()
}

fn validate_table(table: &str) -> Result<&str, AppError> {
    let normalized = validate_identifier(table)?;
    if ALLOWED_TABLES.contains(&normalized) {
        return Ok(normalized);
    }
    Err(AppError::Forbidden(format!(
        "Table '{normalized}' is not allowed."
    )))
}

fn validate_identifier(identifier: &str) -> Result<&str, AppError> {
    let trimmed = identifier.trim();
    if trimmed.is_empty() {
        return Err(AppError::BadRequest(
            "Identifier cannot be empty.".to_string(),
        ));
    }
    if !trimmed.chars().all(|character| {
        character.is_ascii_lowercase() || character.is_ascii_digit() || character == '_'
    }) || trimmed
        .chars()
        .next()
        .is_some_and(|first| first.is_ascii_digit())
    {
        return Err(AppError::BadRequest(format!(
            "Invalid identifier '{trimmed}'."
        )));
    }
    Ok(trimmed)
}

fn render_scalar(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => number.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

#[derive(Debug, Clone)]
enum ScalarFilter {
    Text(String),
    Uuid(uuid::Uuid),
    Bool(bool),
    I64(i64),
    F64(f64),
    Date(NaiveDate),
    Timestamp(DateTime<FixedOffset>),
}

#[derive(Debug, Clone)]
enum ArrayFilter {
    Text(Vec<String>),
    Uuid(Vec<uuid::Uuid>),
}

impl ArrayFilter {
    fn is_empty(&self) -> bool {
        match self {
            Self::Text(values) => values.is_empty(),
            Self::Uuid(values) => values.is_empty(),
        }
    }
}

fn push_filter_clause(
    query: &mut QueryBuilder<Postgres>,
    filter_key: &str,
    value: &Value,
) -> Result<(), AppError> {
    let column = validate_identifier(filter_key)?;

    match value {
        Value::Null => {
            query.push(" AND t.").push(column).push(" IS NULL");
            Ok(())
        }
        Value::Array(items) => {
            let filter = infer_array_filter(column, items);
            if filter.is_empty() {
                return Ok(());
            }
            query.push(" AND ");
            push_array_filter(query, column, &filter);
            Ok(())
        }
        _ => {
            query.push(" AND ");
            let filter = infer_scalar_filter(column, value);
            push_scalar_filter(query, column, &filter);
            Ok(())
        }
    }
}

fn push_scalar_filter(query: &mut QueryBuilder<Postgres>, column: &str, value: &ScalarFilter) {
    query.push("t.").push(column);
    match value {
        ScalarFilter::Text(text) => {
            query.push("::text = ").push_bind(text.clone());
        }
        ScalarFilter::Uuid(id) => {
            query.push(" = ").push_bind(*id);
        }
        ScalarFilter::Bool(flag) => {
            query.push(" = ").push_bind(*flag);
        }
        ScalarFilter::I64(number) => {
            query.push(" = ").push_bind(*number);
        }
        ScalarFilter::F64(number) => {
            query.push(" = ").push_bind(*number);
        }
        ScalarFilter::Date(value) => {
            query.push(" = ").push_bind(*value);
        }
        ScalarFilter::Timestamp(value) => {
            query.push(" = ").push_bind(value.to_owned());
        }
    }
}

fn push_array_filter(query: &mut QueryBuilder<Postgres>, column: &str, value: &ArrayFilter) {
    query.push("t.").push(column);
    match value {
        ArrayFilter::Text(values) => {
            query
                .push("::text = ANY(")
                .push_bind(values.clone())
                .push(")");
        }
        ArrayFilter::Uuid(values) => {
            query.push(" = ANY(").push_bind(values.clone()).push(")");
        }
    }
}

fn infer_scalar_filter(filter_key: &str, value: &Value) -> ScalarFilter {
    match value {
        Value::Bool(flag) => ScalarFilter::Bool(*flag),
        Value::Number(number) => {
            if let Some(as_i64) = number.as_i64() {
                return ScalarFilter::I64(as_i64);
            }
            if let Some(as_f64) = number.as_f64() {
                return ScalarFilter::F64(as_f64);
            }
            ScalarFilter::Text(number.to_string())
        }
        Value::String(text) => {
            let trimmed = text.trim();
            if is_uuid_identifier(filter_key) {
                if let Ok(parsed) = uuid::Uuid::parse_str(trimmed) {
                    return ScalarFilter::Uuid(parsed);
                }
            }
            if is_timestamp_identifier(filter_key) {
                if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
                    return ScalarFilter::Timestamp(parsed);
                }
            }
            if is_date_identifier(filter_key) {
                if let Ok(parsed) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
                    return ScalarFilter::Date(parsed);
                }
            }
            ScalarFilter::Text(text.clone())
        }
        _ => ScalarFilter::Text(render_scalar(value)),
    }
}

fn infer_array_filter(filter_key: &str, values: &[Value]) -> ArrayFilter {
    if values.is_empty() {
        return ArrayFilter::Text(Vec::new());
    }

    if is_uuid_identifier(filter_key) {
        let parsed = values
            .iter()
            .map(|value| {
                value
                    .as_str()
                    .and_then(|text| uuid::Uuid::parse_str(text.trim()).ok())
            })
            .collect::<Option<Vec<_>>>();
        if let Some(parsed) = parsed {
            return ArrayFilter::Uuid(parsed);
        }
    }

    ArrayFilter::Text(values.iter().map(render_scalar).collect::<Vec<_>>())
}

fn is_uuid_identifier(identifier: &str) -> bool {
    let normalized = identifier.trim();
    normalized == "id" || normalized == "lease_id"
}

fn is_date_identifier(identifier: &str) -> bool {
    let normalized = identifier.trim();
    normalized.ends_with("_date") || normalized == "ledger_month"
}

// Ids are uuids; anything else cannot match a row.
fn row_id_filter(table_name: &str, row_id: &str) -> Result<ScalarFilter, AppError> {
    match infer_scalar_filter("id", &Value::String(row_id.to_string())) {
        filter @ ScalarFilter::Uuid(_) => Ok(filter),
        _ => Err(AppError::NotFound(format!("{table_name} record not found."))),
    }
}

fn is_timestamp_identifier(identifier: &str) -> bool {
    identifier.trim().ends_with("_at")
}

fn map_db_error(error: sqlx::Error) -> AppError {
    let code = match &error {
        sqlx::Error::Database(db_error) => db_error.code().map(|code| code.into_owned()),
        _ => None,
    };
    let message = error.to_string();
    tracing::error!(db_error = %message, code = ?code, "Database query failed");

    match code.as_deref() {
        Some("23505") => {
            AppError::Conflict("Duplicate value violates a unique constraint.".to_string())
        }
        Some("23503") => AppError::NotFound("Referenced record not found.".to_string()),
        // Inputs are validated before every write, so a failed CHECK means
        // another session changed the row in between.
        Some("23514") => AppError::Conflict(
            "Record changed concurrently and now violates a check constraint.".to_string(),
        ),
        _ => AppError::Dependency("Database operation failed.".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Map, Value};

    use super::{build_upsert_query, infer_scalar_filter, validate_table, ScalarFilter};
    use crate::error::AppError;

    fn ledger_payload() -> Map<String, Value> {
        let mut payload = Map::new();
        payload.insert(
            "lease_id".to_string(),
            Value::String("550e8400-e29b-41d4-a716-446655440000".to_string()),
        );
        payload.insert(
            "ledger_month".to_string(),
            Value::String("2025-01-01".to_string()),
        );
        payload.insert("amount_collected_from_tenant".to_string(), json!("900"));
        payload.insert("tenant_paid".to_string(), Value::Bool(true));
        payload.insert("id".to_string(), Value::String("ignored".to_string()));
        payload
    }

    #[test]
    fn upsert_sql_targets_the_conflict_key() {
        let payload = ledger_payload();
        let query = build_upsert_query("rent_ledger", &payload, &["lease_id", "ledger_month"])
            .expect("query builds");
        let sql = query.sql();

        assert!(
            sql.contains("jsonb_populate_record(NULL::rent_ledger"),
            "Expected jsonb_populate_record in SQL but got: {sql}"
        );
        assert!(
            sql.contains("ON CONFLICT (lease_id, ledger_month) DO UPDATE SET"),
            "Expected conflict clause in SQL but got: {sql}"
        );
        assert!(
            sql.contains(
                "amount_collected_from_tenant = EXCLUDED.amount_collected_from_tenant, tenant_paid = EXCLUDED.tenant_paid"
            ),
            "Expected col = EXCLUDED.col pattern in SQL but got: {sql}"
        );
        assert!(
            !sql.contains("id = EXCLUDED.id") && !sql.contains("lease_id = EXCLUDED"),
            "Key columns must not be rewritten: {sql}"
        );
    }

    #[test]
    fn upsert_requires_conflict_columns_in_payload() {
        let mut payload = ledger_payload();
        payload.remove("ledger_month");
        let result = build_upsert_query("rent_ledger", &payload, &["lease_id", "ledger_month"]);
        assert!(matches!(result, Err(AppError::BadRequest(_))));
    }

    #[test]
    fn rejects_unknown_tables() {
        assert!(validate_table("leases").is_ok());
        assert!(matches!(
            validate_table("organizations"),
            Err(AppError::Forbidden(_))
        ));
        assert!(matches!(
            validate_table("leases; drop"),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn infers_typed_filters_from_column_names() {
        assert!(matches!(
            infer_scalar_filter(
                "lease_id",
                &Value::String("550e8400-e29b-41d4-a716-446655440000".to_string())
            ),
            ScalarFilter::Uuid(_)
        ));
        assert!(matches!(
            infer_scalar_filter("ledger_month", &Value::String("2025-02-01".to_string())),
            ScalarFilter::Date(_)
        ));
        assert!(matches!(
            infer_scalar_filter("status", &Value::String("active".to_string())),
            ScalarFilter::Text(_)
        ));
    }
}
