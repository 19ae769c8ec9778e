//! Health, market-unlock status, and quota introspection endpoints.
//!
//! Grounded on the teacher's `health_check` handler in `src/main.rs`.

use crate::error::AppError;
use crate::market_unlock::{allowed_markets, get_clv_computed_count};
use crate::state::AppState;
use axum::extract::State;
use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub environment: &'static str,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok", environment: if cfg!(debug_assertions) { "debug" } else { "release" } })
}

pub async fn market_status(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let clv_computed_count = get_clv_computed_count(&state.store)?;
    let allowed = allowed_markets(&state.store, &state.settings)?;
    Ok(Json(json!({
        "clv_computed_count": clv_computed_count,
        "markets_unlock_clv_min": state.settings.markets_unlock_clv_min,
        "markets_unlock_mode": state.settings.markets_unlock_mode,
        "allowed_markets": allowed.iter().map(|m| m.as_str()).collect::<Vec<_>>(),
    })))
}

pub async fn quota(State(state): State<AppState>) -> Json<Value> {
    let snapshot = state.quota.get();
    Json(json!({
        "headers": snapshot.headers,
        "fetched_at": snapshot.fetched_at,
    }))
}
