use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::info;

use crate::error::{AppError, AppResult};
use crate::models::{
    date_value, from_row, CollectionMethod, LandlordPaymentMethod, RentLedgerEntry,
};
use crate::repository::{TableStore, LEDGER_ENTRY_KEY, RENT_LEDGER_TABLE};
use crate::services::lease_mutator::{ensure_money, load_lease};
use crate::services::ledger_entries::{get_or_create_for_lease, list_entries};

/// The full intended payment state for one ledger month.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PaymentInput {
    pub amount_collected_from_tenant: Decimal,
    pub collection_method: Option<CollectionMethod>,
    pub amount_paid_to_landlord: Decimal,
    pub landlord_payment_method: Option<LandlordPaymentMethod>,
    pub notes: Option<String>,
}

impl RentLedgerEntry {
    /// Paid flags follow the snapshotted due amounts, never the lease's live rent.
    pub fn refresh_paid_flags(&mut self) {
        self.tenant_paid = self.amount_collected_from_tenant >= self.rent_due_from_tenant;
        self.landlord_paid = self.amount_paid_to_landlord >= self.rent_due_to_landlord;
    }
}

pub async fn record_payment(
    store: &dyn TableStore,
    lease_id: &str,
    month: NaiveDate,
    input: PaymentInput,
) -> AppResult<RentLedgerEntry> {
    record_payment_at(store, lease_id, month, input, Utc::now().date_naive()).await
}

/// Same as [`record_payment`] with an explicit date stamped on non-zero payments.
pub async fn record_payment_at(
    store: &dyn TableStore,
    lease_id: &str,
    month: NaiveDate,
    input: PaymentInput,
    today: NaiveDate,
) -> AppResult<RentLedgerEntry> {
    ensure_money(
        "amount_collected_from_tenant",
        input.amount_collected_from_tenant,
    )?;
    ensure_money("amount_paid_to_landlord", input.amount_paid_to_landlord)?;

    let lease = load_lease(store, lease_id).await?;
    if lease.status.is_terminal() {
        return Err(AppError::Conflict(format!(
            "Lease is {}; payments can no longer be recorded.",
            lease.status.as_str()
        )));
    }

    let mut entry = get_or_create_for_lease(store, &lease, month).await?;
    entry.amount_collected_from_tenant = input.amount_collected_from_tenant;
    entry.collection_date =
        (input.amount_collected_from_tenant > Decimal::ZERO).then_some(today);
    entry.collection_method = input.collection_method;
    entry.amount_paid_to_landlord = input.amount_paid_to_landlord;
    entry.landlord_payment_date =
        (input.amount_paid_to_landlord > Decimal::ZERO).then_some(today);
    entry.landlord_payment_method = input.landlord_payment_method;
    entry.notes = input.notes;
    entry.refresh_paid_flags();

    let row = store
        .upsert_row(RENT_LEDGER_TABLE, &payment_payload(&entry), LEDGER_ENTRY_KEY)
        .await?;
    let saved: RentLedgerEntry = from_row(row, RENT_LEDGER_TABLE)?;
    info!(
        lease_id,
        ledger_month = %saved.ledger_month,
        entry_id = %saved.id,
        amount_collected_from_tenant = %saved.amount_collected_from_tenant,
        amount_paid_to_landlord = %saved.amount_paid_to_landlord,
        tenant_paid = saved.tenant_paid,
        landlord_paid = saved.landlord_paid,
        "Payment recorded"
    );
    Ok(saved)
}

// Every payment column is written, so cleared dates and methods become NULL.
fn payment_payload(entry: &RentLedgerEntry) -> Map<String, Value> {
    let optional = |value: Option<Value>| value.unwrap_or(Value::Null);
    let mut payload = Map::new();
    payload.insert("lease_id".to_string(), Value::String(entry.lease_id.clone()));
    payload.insert("ledger_month".to_string(), date_value(entry.ledger_month));
    payload.insert(
        "rent_due_from_tenant".to_string(),
        json!(entry.rent_due_from_tenant),
    );
    payload.insert(
        "rent_due_to_landlord".to_string(),
        json!(entry.rent_due_to_landlord),
    );
    payload.insert(
        "amount_collected_from_tenant".to_string(),
        json!(entry.amount_collected_from_tenant),
    );
    payload.insert(
        "collection_date".to_string(),
        optional(entry.collection_date.map(date_value)),
    );
    payload.insert(
        "collection_method".to_string(),
        optional(entry.collection_method.map(|method| json!(method))),
    );
    payload.insert(
        "amount_paid_to_landlord".to_string(),
        json!(entry.amount_paid_to_landlord),
    );
    payload.insert(
        "landlord_payment_date".to_string(),
        optional(entry.landlord_payment_date.map(date_value)),
    );
    payload.insert(
        "landlord_payment_method".to_string(),
        optional(entry.landlord_payment_method.map(|method| json!(method))),
    );
    payload.insert("tenant_paid".to_string(), Value::Bool(entry.tenant_paid));
    payload.insert("landlord_paid".to_string(), Value::Bool(entry.landlord_paid));
    payload.insert(
        "notes".to_string(),
        optional(entry.notes.clone().map(Value::String)),
    );
    payload.insert(
        "updated_at".to_string(),
        Value::String(Utc::now().to_rfc3339()),
    );
    payload
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LedgerSummary {
    pub lease_id: String,
    pub months: usize,
    pub months_tenant_paid: usize,
    pub months_landlord_paid: usize,
    pub total_due_from_tenant: Decimal,
    pub total_collected_from_tenant: Decimal,
    pub tenant_balance: Decimal,
    pub total_due_to_landlord: Decimal,
    pub total_paid_to_landlord: Decimal,
    pub landlord_balance: Decimal,
}

pub fn summarize_entries(lease_id: &str, entries: &[RentLedgerEntry]) -> LedgerSummary {
    let mut summary = LedgerSummary {
        lease_id: lease_id.to_string(),
        months: entries.len(),
        ..LedgerSummary::default()
    };
    for entry in entries {
        summary.total_due_from_tenant += entry.rent_due_from_tenant;
        summary.total_collected_from_tenant += entry.amount_collected_from_tenant;
        summary.total_due_to_landlord += entry.rent_due_to_landlord;
        summary.total_paid_to_landlord += entry.amount_paid_to_landlord;
        if entry.tenant_paid {
            summary.months_tenant_paid += 1;
        }
        if entry.landlord_paid {
            summary.months_landlord_paid += 1;
        }
    }
    // Overpayment in one month is not credited against another.
    summary.tenant_balance = entries
        .iter()
        .map(|entry| {
            (entry.rent_due_from_tenant - entry.amount_collected_from_tenant).max(Decimal::ZERO)
        })
        .sum();
    summary.landlord_balance = entries
        .iter()
        .map(|entry| {
            (entry.rent_due_to_landlord - entry.amount_paid_to_landlord).max(Decimal::ZERO)
        })
        .sum();
    summary
}

pub async fn summarize_ledger(store: &dyn TableStore, lease_id: &str) -> AppResult<LedgerSummary> {
    let entries = list_entries(store, lease_id).await?;
    Ok(summarize_entries(lease_id, &entries))
}
