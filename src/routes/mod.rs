use axum::{routing::get, Router};

use crate::state::AppState;

pub mod health;
pub mod leases;
pub mod ledger;

pub fn v1_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health))
        .merge(leases::router())
        .merge(ledger::router())
}
