//! `GET /consensus/latest` — vig-free consensus probabilities per market.

use crate::consensus::{build_market_views, compute_consensus_for_view, ConsensusResult};
use crate::domain::MarketKey;
use crate::error::AppError;
use crate::state::AppState;
use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct ConsensusQuery {
    pub sport_key: String,
    pub market_key: String,
}

pub async fn latest(State(state): State<AppState>, Query(q): Query<ConsensusQuery>) -> Result<Json<Vec<ConsensusResult>>, AppError> {
    let market = MarketKey::parse(&q.market_key).ok_or_else(|| AppError::invalid(format!("unknown market_key: {}", q.market_key)))?;
    let views = build_market_views(&state.store, &q.sport_key, market)?;
    let results: Vec<ConsensusResult> = views.iter().map(|view| compute_consensus_for_view(view, &state.settings)).collect();
    Ok(Json(results))
}
