use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde_json::{json, Value};

use crate::state::AppState;

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    // Store failures are already logged by the adapter.
    let store_ok = state.store.ping().await.is_ok();

    let status = if store_ok { "ok" } else { "degraded" };
    Json(json!({
        "status": status,
        "now": Utc::now().to_rfc3339(),
        "store": store_ok
    }))
}
