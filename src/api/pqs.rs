//! Pick Quality Score retrieval and the manual recompute-priors trigger.

use crate::error::AppError;
use crate::pqs::{list_scored_picks, ScoredPick, ScoredPickFilters};
use crate::priors::recompute_clv_sport_stats;
use crate::state::AppState;
use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct LatestQuery {
    pub sport_key: Option<String>,
    pub decision: Option<String>,
    pub min_pqs: Option<f64>,
    pub version: Option<String>,
    #[serde(default)]
    pub limit: i64,
}

pub async fn latest(State(state): State<AppState>, Query(q): Query<LatestQuery>) -> Result<Json<Vec<ScoredPick>>, AppError> {
    let filters = ScoredPickFilters {
        sport_key: q.sport_key,
        decision: q.decision,
        min_pqs: q.min_pqs,
        version: q.version,
        limit: q.limit,
    };
    Ok(Json(list_scored_picks(&state.store, &state.settings, &filters)?))
}

#[derive(Debug, Serialize)]
pub struct ScoreResponse {
    pub groups_recomputed: i64,
}

pub async fn score(State(state): State<AppState>) -> Result<Json<ScoreResponse>, AppError> {
    let groups_recomputed = recompute_clv_sport_stats(&state.store, &state.settings)?;
    Ok(Json(ScoreResponse { groups_recomputed }))
}
