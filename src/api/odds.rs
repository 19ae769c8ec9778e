//! Raw odds ingestion trigger and nested latest-quote browsing.

use crate::consensus::build_market_views;
use crate::domain::MarketKey;
use crate::error::AppError;
use crate::ingest::ingest_odds_for_sport;
use crate::state::AppState;
use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Deserialize)]
pub struct SportQuery {
    pub sport_key: String,
}

pub async fn ingest(State(state): State<AppState>, Query(q): Query<SportQuery>) -> Result<Json<Value>, AppError> {
    let summary = ingest_odds_for_sport(&state.store, &state.settings, &state.provider, &state.quota, &q.sport_key).await?;
    Ok(Json(json!({
        "sport_key": q.sport_key,
        "events_processed": summary.events_processed,
        "groups_changed": summary.groups_changed,
        "groups_skipped": summary.groups_skipped,
        "snapshot_rows_inserted": summary.snapshot_rows_inserted,
        "errors_count": summary.errors_count,
    })))
}

#[derive(Debug, Deserialize)]
pub struct LatestQuery {
    pub sport_key: String,
    pub market_key: String,
}

#[derive(Debug, Serialize)]
pub struct SideQuote {
    pub side: String,
    pub decimal: f64,
    pub fair_prob: f64,
    pub captured_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Serialize)]
pub struct BookmakerGroup {
    pub bookmaker: String,
    pub point: Option<f64>,
    pub sides: Vec<SideQuote>,
}

#[derive(Debug, Serialize)]
pub struct EventOdds {
    pub event_id: String,
    pub sport_key: String,
    pub home_team: String,
    pub away_team: String,
    pub commence_time: chrono::DateTime<chrono::Utc>,
    pub market_key: String,
    pub point: Option<f64>,
    pub groups: Vec<BookmakerGroup>,
}

pub async fn latest(State(state): State<AppState>, Query(q): Query<LatestQuery>) -> Result<Json<Vec<EventOdds>>, AppError> {
    let market = MarketKey::parse(&q.market_key).ok_or_else(|| AppError::invalid(format!("unknown market_key: {}", q.market_key)))?;
    let views = build_market_views(&state.store, &q.sport_key, market)?;

    let events = views
        .into_iter()
        .map(|view| {
            let mut by_book: std::collections::BTreeMap<String, Vec<SideQuote>> = std::collections::BTreeMap::new();
            for row in &view.rows {
                by_book.entry(row.bookmaker.clone()).or_default().push(SideQuote {
                    side: row.side.as_str().to_string(),
                    decimal: row.decimal,
                    fair_prob: row.fair_prob,
                    captured_at: row.captured_at,
                });
            }
            let groups = by_book
                .into_iter()
                .map(|(bookmaker, mut sides)| {
                    sides.sort_by(|a, b| a.side.cmp(&b.side));
                    BookmakerGroup { bookmaker, point: view.point, sides }
                })
                .collect();

            EventOdds {
                event_id: view.event_id,
                sport_key: view.sport_key,
                home_team: view.home_team,
                away_team: view.away_team,
                commence_time: view.commence_time,
                market_key: view.market_key.as_str().to_string(),
                point: view.point,
                groups,
            }
        })
        .collect();

    Ok(Json(events))
}
