//! Manual pipeline trigger and run history.

use crate::error::AppError;
use crate::pipeline::{latest_run_statuses, list_pipeline_runs, run_and_log, PipelineRunRecord, RunStats};
use crate::state::AppState;
use axum::extract::{Query, State};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Deserialize)]
pub struct RunQuery {
    pub run_type: Option<String>,
    #[serde(default)]
    pub force: bool,
}

pub async fn run(State(state): State<AppState>, Query(q): Query<RunQuery>) -> Result<Json<RunStats>, AppError> {
    let run_type = q.run_type.unwrap_or_else(|| "cycle".to_string());

    let permit = state
        .pipeline_lock
        .clone()
        .acquire_owned()
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!(e)))?;
    let result = run_and_log(&state.store, &state.settings, &state.provider, &state.quota, &run_type, q.force).await;
    drop(permit);
    Ok(Json(result?))
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    #[serde(default)]
    pub limit: i64,
}

pub async fn runs(State(state): State<AppState>, Query(q): Query<LimitQuery>) -> Result<Json<Vec<PipelineRunRecord>>, AppError> {
    let limit = if q.limit > 0 { q.limit } else { 100 };
    Ok(Json(list_pipeline_runs(&state.store, limit)?))
}

#[derive(Debug, Serialize)]
pub struct RunTypeStatus {
    pub run_type: String,
    pub status: String,
    pub last_run_at: chrono::DateTime<Utc>,
}

pub async fn health(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let statuses = latest_run_statuses(&state.store)?;
    let statuses: Vec<RunTypeStatus> = statuses
        .into_iter()
        .map(|(run_type, status, last_run_at)| RunTypeStatus { run_type, status, last_run_at })
        .collect();
    Ok(Json(json!({ "run_types": statuses })))
}
