use axum::{
    extract::{Path, State},
    Json,
};
use serde_json::{json, Value};

use crate::{
    error::{AppError, AppResult},
    models::{parse_ledger_month, RentLedgerEntry},
    routes::leases::ensure_ledger_writes_enabled,
    schemas::{validate_input, LeasePath, LedgerMonthPath, RecordPaymentInput},
    services::{
        lease_mutator::load_lease,
        ledger_entries::{find_entry, get_or_create_entry, list_entries},
        payment_recorder::{record_payment, summarize_ledger, LedgerSummary, PaymentInput},
    },
    state::AppState,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/leases/{lease_id}/ledger",
            axum::routing::get(list_ledger),
        )
        .route(
            "/leases/{lease_id}/ledger/summary",
            axum::routing::get(get_ledger_summary),
        )
        .route(
            "/leases/{lease_id}/ledger/{month}",
            axum::routing::get(get_ledger_month),
        )
        .route(
            "/leases/{lease_id}/ledger/{month}/payment",
            axum::routing::put(put_payment),
        )
}

async fn list_ledger(
    State(state): State<AppState>,
    Path(path): Path<LeasePath>,
) -> AppResult<Json<Value>> {
    let entries = list_entries(state.store.as_ref(), &path.lease_id).await?;
    Ok(Json(json!({ "data": entries })))
}

async fn get_ledger_summary(
    State(state): State<AppState>,
    Path(path): Path<LeasePath>,
) -> AppResult<Json<LedgerSummary>> {
    let summary = summarize_ledger(state.store.as_ref(), &path.lease_id).await?;
    Ok(Json(summary))
}

/// Opens the month on first access; a read for a frozen lease's unseen month is a conflict.
/// With ledger writes disabled only months that already exist are served.
async fn get_ledger_month(
    State(state): State<AppState>,
    Path(path): Path<LedgerMonthPath>,
) -> AppResult<Json<RentLedgerEntry>> {
    let month = parse_ledger_month(&path.month)?;
    let store = state.store.as_ref();
    if state.config.ledger_writes_enabled {
        let entry = get_or_create_entry(store, &path.lease_id, month).await?;
        return Ok(Json(entry));
    }

    load_lease(store, &path.lease_id).await?;
    let entry = find_entry(store, &path.lease_id, month).await?.ok_or_else(|| {
        AppError::Forbidden(
            "Ledger write endpoints are disabled; this month has not been opened yet."
                .to_string(),
        )
    })?;
    Ok(Json(entry))
}

async fn put_payment(
    State(state): State<AppState>,
    Path(path): Path<LedgerMonthPath>,
    Json(payload): Json<RecordPaymentInput>,
) -> AppResult<Json<RentLedgerEntry>> {
    ensure_ledger_writes_enabled(&state)?;
    validate_input(&payload)?;

    let month = parse_ledger_month(&path.month)?;
    let input = PaymentInput::try_from(payload)?;
    let entry = record_payment(state.store.as_ref(), &path.lease_id, month, input).await?;
    Ok(Json(entry))
}
