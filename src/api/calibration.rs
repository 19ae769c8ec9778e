//! Propose, apply, and list bounded self-tuning calibration runs.

use crate::calibration::{apply_calibration, list_calibration_runs, propose_calibration, CalibrationRunRecord};
use crate::error::AppError;
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct ProposeQuery {
    pub target_n: Option<i64>,
}

pub async fn propose(State(state): State<AppState>, Query(q): Query<ProposeQuery>) -> Result<Json<CalibrationRunRecord>, AppError> {
    let target_n = q.target_n.unwrap_or(500).max(1);
    Ok(Json(propose_calibration(&state.store, &state.settings, target_n)?))
}

pub async fn apply(State(state): State<AppState>, Path(run_id): Path<i64>) -> Result<Json<CalibrationRunRecord>, AppError> {
    Ok(Json(apply_calibration(&state.store, run_id)?))
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    #[serde(default)]
    pub limit: i64,
}

pub async fn runs(State(state): State<AppState>, Query(q): Query<LimitQuery>) -> Result<Json<Vec<CalibrationRunRecord>>, AppError> {
    let limit = if q.limit > 0 { q.limit } else { 100 };
    Ok(Json(list_calibration_runs(&state.store, limit)?))
}
