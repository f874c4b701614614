use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::{json, Value};

use crate::{
    error::{AppError, AppResult},
    models::Lease,
    schemas::{
        clamp_limit_in_range, validate_input, CreateLeaseInput, LeasePath, LeasesQuery,
        UpdateLeaseInput,
    },
    services::lease_mutator::{self, LeaseFilters, LeaseUpdate, NewLease},
    state::AppState,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/leases",
            axum::routing::get(list_leases).post(create_lease),
        )
        .route(
            "/leases/{lease_id}",
            axum::routing::get(get_lease)
                .patch(update_lease)
                .delete(delete_lease),
        )
}

async fn list_leases(
    State(state): State<AppState>,
    Query(query): Query<LeasesQuery>,
) -> AppResult<Json<Value>> {
    let filters = LeaseFilters::try_from(&query)?;
    let leases = lease_mutator::list_leases(
        state.store.as_ref(),
        &filters,
        clamp_limit_in_range(query.limit, 1, 1000),
    )
    .await?;

    let data = leases.iter().map(lease_response).collect::<Vec<_>>();
    Ok(Json(json!({ "data": data })))
}

async fn create_lease(
    State(state): State<AppState>,
    Json(payload): Json<CreateLeaseInput>,
) -> AppResult<impl IntoResponse> {
    ensure_ledger_writes_enabled(&state)?;
    validate_input(&payload)?;

    let input = NewLease::try_from(payload)?;
    let lease = lease_mutator::create_lease(state.store.as_ref(), input).await?;
    Ok((StatusCode::CREATED, Json(lease_response(&lease))))
}

async fn get_lease(
    State(state): State<AppState>,
    Path(path): Path<LeasePath>,
) -> AppResult<Json<Value>> {
    let lease = lease_mutator::load_lease(state.store.as_ref(), &path.lease_id).await?;
    Ok(Json(lease_response(&lease)))
}

async fn update_lease(
    State(state): State<AppState>,
    Path(path): Path<LeasePath>,
    Json(payload): Json<UpdateLeaseInput>,
) -> AppResult<Json<Value>> {
    ensure_ledger_writes_enabled(&state)?;
    validate_input(&payload)?;

    let update = LeaseUpdate::try_from(payload)?;
    let lease = lease_mutator::update_lease(state.store.as_ref(), &path.lease_id, update).await?;
    Ok(Json(lease_response(&lease)))
}

async fn delete_lease(
    State(state): State<AppState>,
    Path(path): Path<LeasePath>,
) -> AppResult<Json<Value>> {
    ensure_ledger_writes_enabled(&state)?;

    let lease = lease_mutator::delete_lease(state.store.as_ref(), &path.lease_id).await?;
    Ok(Json(lease_response(&lease)))
}

/// Lease record plus bridge program progress, `null` for other lease types.
fn lease_response(lease: &Lease) -> Value {
    let mut item = serde_json::to_value(lease).unwrap_or_else(|_| json!({}));
    if let Some(obj) = item.as_object_mut() {
        let program = lease.bridge_program();
        obj.insert(
            "program_progress_percent".to_string(),
            program.map_or(Value::Null, |program| json!(program.percent_complete)),
        );
        obj.insert(
            "bridge_program".to_string(),
            program.map_or(Value::Null, |program| json!(program)),
        );
    }
    item
}

pub(crate) fn ensure_ledger_writes_enabled(state: &AppState) -> AppResult<()> {
    if state.config.ledger_writes_enabled {
        return Ok(());
    }
    Err(AppError::Forbidden(
        "Ledger write endpoints are disabled.".to_string(),
    ))
}
