//! Pick generation and retrieval endpoints.

use crate::domain::MarketKey;
use crate::error::AppError;
use crate::market_unlock::enforce_market_allowed;
use crate::picks::{list_latest_picks, list_recommended_picks, run_picks, PickListFilters, PicksSummary};
use crate::state::AppState;
use axum::extract::{Query, State};
use axum::Json;
use chrono::NaiveDate;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct GenerateQuery {
    pub sport_key: String,
    pub market_key: String,
}

pub async fn generate(State(state): State<AppState>, Query(q): Query<GenerateQuery>) -> Result<Json<PicksSummary>, AppError> {
    let market = MarketKey::parse(&q.market_key).ok_or_else(|| AppError::invalid(format!("unknown market_key: {}", q.market_key)))?;
    // Always calls the gate: in "gate" mode a lock errors out below; in
    // "warn" mode it returns a reason that rides along on the response
    // instead of blocking the run.
    let warning = enforce_market_allowed(&state.store, &state.settings, market)?;

    let permit = state.pipeline_lock.clone().acquire_owned().await.map_err(|e| AppError::Internal(anyhow::anyhow!(e)))?;
    let summary = run_picks(&state.store, &state.settings, &[q.sport_key], &[market]);
    drop(permit);
    let mut summary = summary?;
    summary.warning = warning;
    Ok(Json(summary))
}

#[derive(Debug, Deserialize)]
pub struct LatestQuery {
    pub sport_key: Option<String>,
    pub market_key: Option<String>,
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub limit: i64,
}

pub async fn latest(
    State(state): State<AppState>,
    Query(q): Query<LatestQuery>,
) -> Result<Json<Vec<crate::picks::PickListItem>>, AppError> {
    let filters = PickListFilters { sport_key: q.sport_key, market_key: q.market_key, date: q.date, limit: q.limit };
    Ok(Json(list_latest_picks(&state.store, &state.settings, &filters)?))
}

#[derive(Debug, Deserialize)]
pub struct RecommendedQuery {
    pub sport_key: Option<String>,
    pub market_key: Option<String>,
    #[serde(default)]
    pub limit: i64,
}

pub async fn recommended(
    State(state): State<AppState>,
    Query(q): Query<RecommendedQuery>,
) -> Result<Json<Vec<crate::picks::RecommendedPick>>, AppError> {
    Ok(Json(list_recommended_picks(
        &state.store,
        &state.settings,
        q.sport_key.as_deref(),
        q.market_key.as_deref(),
        q.limit,
    )?))
}
