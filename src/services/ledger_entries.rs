use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::error::{AppError, AppResult};
use crate::models::{date_value, first_of_month, from_row, Lease, RentLedgerEntry};
use crate::repository::{json_map, TableStore, RENT_LEDGER_TABLE};
use crate::services::lease_mutator::load_lease;

const LEDGER_HISTORY_LIMIT: i64 = 1000;

/// Return the entry for `(lease_id, month)`, materializing it from the lease's
/// current rent and tenant share the first time the month is touched.
pub async fn get_or_create_entry(
    store: &dyn TableStore,
    lease_id: &str,
    month: NaiveDate,
) -> AppResult<RentLedgerEntry> {
    let lease = load_lease(store, lease_id).await?;
    get_or_create_for_lease(store, &lease, month).await
}

pub(crate) async fn get_or_create_for_lease(
    store: &dyn TableStore,
    lease: &Lease,
    month: NaiveDate,
) -> AppResult<RentLedgerEntry> {
    let ledger_month = first_of_month(month);
    if let Some(existing) = find_entry(store, &lease.id, ledger_month).await? {
        return Ok(existing);
    }

    if lease.status.is_terminal() {
        return Err(AppError::Conflict(format!(
            "Lease is {}; no new ledger months can be opened.",
            lease.status.as_str()
        )));
    }

    let payload = json_map(&[
        ("lease_id", Value::String(lease.id.clone())),
        ("ledger_month", date_value(ledger_month)),
        ("rent_due_from_tenant", json!(lease.tenant_pays)),
        ("rent_due_to_landlord", json!(lease.monthly_rent)),
        ("amount_collected_from_tenant", json!(Decimal::ZERO)),
        ("amount_paid_to_landlord", json!(Decimal::ZERO)),
        ("tenant_paid", Value::Bool(false)),
        ("landlord_paid", Value::Bool(false)),
    ]);

    match store.create_row(RENT_LEDGER_TABLE, &payload).await {
        Ok(row) => {
            let entry: RentLedgerEntry = from_row(row, RENT_LEDGER_TABLE)?;
            info!(
                lease_id = %lease.id,
                ledger_month = %ledger_month,
                entry_id = %entry.id,
                rent_due_from_tenant = %entry.rent_due_from_tenant,
                rent_due_to_landlord = %entry.rent_due_to_landlord,
                "Ledger entry created"
            );
            Ok(entry)
        }
        // Another session created the month between our read and insert.
        Err(AppError::Conflict(_)) => {
            warn!(
                lease_id = %lease.id,
                ledger_month = %ledger_month,
                "Ledger entry created concurrently; using the stored entry"
            );
            find_entry(store, &lease.id, ledger_month)
                .await?
                .ok_or_else(|| {
                    AppError::Internal(
                        "Ledger entry conflicted but could not be re-read.".to_string(),
                    )
                })
        }
        Err(error) => Err(error),
    }
}

pub async fn find_entry(
    store: &dyn TableStore,
    lease_id: &str,
    month: NaiveDate,
) -> AppResult<Option<RentLedgerEntry>> {
    let filters = json_map(&[
        ("lease_id", Value::String(lease_id.to_string())),
        ("ledger_month", date_value(first_of_month(month))),
    ]);
    let rows = store
        .list_rows(RENT_LEDGER_TABLE, Some(&filters), 1, 0, "ledger_month", true)
        .await?;
    rows.into_iter()
        .next()
        .map(|row| from_row(row, RENT_LEDGER_TABLE))
        .transpose()
}

/// Ledger history for a lease, newest month first.
pub async fn list_entries(
    store: &dyn TableStore,
    lease_id: &str,
) -> AppResult<Vec<RentLedgerEntry>> {
    load_lease(store, lease_id).await?;
    let filters = json_map(&[("lease_id", Value::String(lease_id.to_string()))]);
    let rows = store
        .list_rows(
            RENT_LEDGER_TABLE,
            Some(&filters),
            LEDGER_HISTORY_LIMIT,
            0,
            "ledger_month",
            false,
        )
        .await?;
    rows.into_iter()
        .map(|row| from_row(row, RENT_LEDGER_TABLE))
        .collect()
}
