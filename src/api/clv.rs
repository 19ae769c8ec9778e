//! CLV computation and retrieval, plus the sport-level prior rollup and
//! the days-windowed health metric.

use crate::clv::{compute_clv_for_date, list_latest_clv, ClvResult};
use crate::error::AppError;
use crate::metrics::{clv_health, ClvHealthReport};
use crate::priors::{list_latest_priors, ClvPrior};
use crate::state::AppState;
use axum::extract::{Query, State};
use axum::Json;
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct ComputeQuery {
    pub date_utc: Option<NaiveDate>,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Serialize)]
pub struct ComputeSummary {
    pub date_utc: NaiveDate,
    pub evaluated: usize,
    pub computed: usize,
    pub skipped: usize,
}

pub async fn compute(State(state): State<AppState>, Query(q): Query<ComputeQuery>) -> Result<Json<ComputeSummary>, AppError> {
    let date = q.date_utc.unwrap_or_else(|| Utc::now().date_naive());

    let permit = state.pipeline_lock.clone().acquire_owned().await.map_err(|e| AppError::Internal(anyhow::anyhow!(e)))?;
    let results = compute_clv_for_date(&state.store, &state.settings, date, q.force);
    drop(permit);
    let results = results?;

    let computed = results.iter().filter(|r| r.market_clv.is_some()).count();
    let skipped = results.len() - computed;

    if computed > 0 {
        crate::priors::recompute_clv_sport_stats(&state.store, &state.settings)?;
    }

    Ok(Json(ComputeSummary { date_utc: date, evaluated: results.len(), computed, skipped }))
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    #[serde(default)]
    pub limit: i64,
}

pub async fn latest(State(state): State<AppState>, Query(q): Query<LimitQuery>) -> Result<Json<Vec<ClvResult>>, AppError> {
    let limit = if q.limit > 0 { q.limit } else { 100 };
    Ok(Json(list_latest_clv(&state.store, limit)?))
}

pub async fn sport_stats(State(state): State<AppState>, Query(q): Query<LimitQuery>) -> Result<Json<Vec<ClvPrior>>, AppError> {
    let limit = if q.limit > 0 { q.limit } else { 100 };
    Ok(Json(list_latest_priors(&state.store, limit)?))
}

#[derive(Debug, Deserialize)]
pub struct DaysQuery {
    #[serde(default)]
    pub days: i64,
}

pub async fn health_metrics(State(state): State<AppState>, Query(q): Query<DaysQuery>) -> Result<Json<ClvHealthReport>, AppError> {
    let days = if q.days > 0 { q.days } else { 30 };
    Ok(Json(clv_health(&state.store, days)?))
}
