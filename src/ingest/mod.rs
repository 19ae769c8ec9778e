//! Odds-provider fetch, side normalization, content-addressed delta
//! detection, and snapshot persistence.
//!
//! Grounded on `original_source/.../integrations/odds_api.py` (fetch shape)
//! and `original_source/.../services/ingest.py` (normalization, hashing,
//! upsert flow).

pub mod quota;

use crate::config::Settings;
use crate::db::Store;
use crate::domain::{MarketKey, Side};
use crate::error::AppError;
use chrono::{DateTime, Utc};
use quota::QuotaState;
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Debug, Deserialize)]
pub struct ProviderOutcome {
    pub name: String,
    pub price: f64,
    pub point: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct ProviderMarket {
    pub key: String,
    pub outcomes: Vec<ProviderOutcome>,
}

#[derive(Debug, Deserialize)]
pub struct ProviderBookmaker {
    pub key: String,
    pub markets: Vec<ProviderMarket>,
}

#[derive(Debug, Deserialize)]
pub struct ProviderEvent {
    pub id: String,
    #[serde(default)]
    pub sport_key: String,
    pub commence_time: String,
    pub home_team: String,
    pub away_team: String,
    #[serde(default)]
    pub bookmakers: Vec<ProviderBookmaker>,
}

pub struct ProviderClient {
    http: reqwest::Client,
    base_url: String,
}

impl ProviderClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .build()
            .map_err(|e| AppError::Internal(anyhow::Error::new(e)))?;
        Ok(Self { http, base_url: base_url.into() })
    }

    pub async fn fetch_odds(
        &self,
        sport_key: &str,
        markets: &[String],
        regions: &str,
        api_key: &str,
    ) -> Result<(Vec<ProviderEvent>, HeaderMap), AppError> {
        let url = format!("{}/sports/{}/odds", self.base_url, sport_key);
        let resp = self
            .http
            .get(&url)
            .query(&[
                ("apiKey", api_key),
                ("regions", regions),
                ("markets", &markets.join(",")),
                ("oddsFormat", "american"),
            ])
            .send()
            .await
            .map_err(|e| AppError::UpstreamFailure(format!("odds provider request failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(AppError::UpstreamFailure(format!(
                "odds provider returned {}",
                resp.status()
            )));
        }
        let headers = resp.headers().clone();
        let events: Vec<ProviderEvent> = resp
            .json()
            .await
            .map_err(|e| AppError::UpstreamFailure(format!("invalid odds provider response: {e}")))?;
        Ok((events, headers))
    }
}

/// Case-insensitive team-name / totals / soccer-draw outcome mapping.
/// Grounded on `services/ingest.py::normalize_side`.
pub fn normalize_side(
    outcome_name: &str,
    home_team: &str,
    away_team: &str,
    market: MarketKey,
    sport_key: &str,
) -> Result<Side, AppError> {
    let lower = outcome_name.trim().to_lowercase();
    match market {
        MarketKey::Totals => match lower.as_str() {
            "over" => Ok(Side::Over),
            "under" => Ok(Side::Under),
            _ => Err(AppError::invalid(format!("unmapped totals outcome: {outcome_name}"))),
        },
        MarketKey::H2h | MarketKey::Spreads => {
            if lower == home_team.trim().to_lowercase() {
                Ok(Side::Home)
            } else if lower == away_team.trim().to_lowercase() {
                Ok(Side::Away)
            } else if lower == "draw" && sport_key.starts_with("soccer_") && market == MarketKey::H2h {
                Ok(Side::Draw)
            } else {
                Err(AppError::invalid(format!(
                    "unmapped {market} outcome: {outcome_name} (home={home_team}, away={away_team})"
                )))
            }
        }
    }
}

/// Parse a provider timestamp ("...Z" or naive) into a UTC DateTime,
/// assuming UTC when no offset is present.
pub fn parse_commence_time_to_utc(raw: &str) -> Result<DateTime<Utc>, AppError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    let normalized = if raw.ends_with('Z') {
        raw.to_string()
    } else {
        format!("{raw}Z")
    };
    DateTime::parse_from_rfc3339(&normalized)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| AppError::invalid(format!("bad commence_time '{raw}': {e}")))
}

#[derive(Debug, Clone)]
struct SideQuote {
    side: Side,
    american: f64,
    decimal: f64,
}

/// Canonical JSON (sorted keys, compact separators) + SHA-256, excluding
/// derived fields (`implied_prob`, `fair_prob`, `captured_at`). Grounded on
/// `services/ingest.py::build_normalized_group_representation`.
fn group_hash(
    event_id: &str,
    market_key: MarketKey,
    bookmaker: &str,
    point: Option<f64>,
    sides: &[SideQuote],
) -> String {
    let mut sorted = sides.to_vec();
    sorted.sort_by(|a, b| a.side.as_str().cmp(b.side.as_str()));
    let sides_json: Vec<_> = sorted
        .iter()
        .map(|s| {
            json!({
                "side": s.side.as_str(),
                "american": s.american,
                "decimal": s.decimal,
            })
        })
        .collect();
    let canonical = json!({
        "event_id": event_id,
        "market_key": market_key.as_str(),
        "bookmaker": bookmaker,
        "point": point,
        "sides": sides_json,
    });
    let serialized = serde_json::to_string(&canonical).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(serialized.as_bytes());
    hex_encode(&hasher.finalize())
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[derive(Debug, Default, Serialize)]
pub struct IngestSummary {
    pub sport_key: String,
    pub events_processed: i64,
    pub groups_changed: i64,
    pub groups_skipped: i64,
    pub snapshot_rows_inserted: i64,
    pub errors_count: i64,
}

/// Fetch, normalize, hash-dedup, and persist odds for one sport. Grounded
/// on `services/ingest.py::ingest_odds_for_sport`.
pub async fn ingest_odds_for_sport(
    store: &Store,
    settings: &Settings,
    client: &ProviderClient,
    quota: &QuotaState,
    sport_key: &str,
) -> Result<IngestSummary, AppError> {
    if !settings.odds_sports_whitelist.is_empty()
        && !settings.odds_sports_whitelist.iter().any(|s| s == sport_key)
    {
        return Err(AppError::invalid(format!("sport_key not in whitelist: {sport_key}")));
    }
    let api_key = settings
        .odds_api_key
        .as_deref()
        .ok_or_else(|| AppError::UnauthorizedConfiguration("ODDS_API_KEY not configured".into()))?;

    let (events, headers) = client
        .fetch_odds(sport_key, &settings.odds_markets, &settings.odds_regions, api_key)
        .await?;

    let captured_at = Utc::now();
    quota.record(&headers, captured_at);

    let mut summary = IngestSummary {
        sport_key: sport_key.to_string(),
        ..Default::default()
    };

    // All events for this sport commit as a single transaction, per
    // `services/ingest.py`'s one `session.commit()` at the end of the loop.
    store
        .with_tx(|tx| {
            for event in &events {
                match ingest_one_event(tx, settings, event, captured_at, &mut summary) {
                    Ok(()) => {}
                    Err(e) => {
                        summary.errors_count += 1;
                        tracing::warn!(event_id = %event.id, error = %e, "ingest event failed");
                        if settings.delta_hash_strict {
                            return Err(rusqlite::Error::ToSqlConversionFailure(Box::new(e)));
                        }
                    }
                }
            }
            Ok(())
        })
        .map_err(|e: rusqlite::Error| match e {
            rusqlite::Error::ToSqlConversionFailure(boxed) => match boxed.downcast::<AppError>() {
                Ok(app_err) => *app_err,
                Err(other) => AppError::Internal(anyhow::anyhow!(other.to_string())),
            },
            other => AppError::from(other),
        })?;

    tracing::info!(
        sport_key,
        events = summary.events_processed,
        groups_changed = summary.groups_changed,
        groups_skipped = summary.groups_skipped,
        rows_inserted = summary.snapshot_rows_inserted,
        errors = summary.errors_count,
        "ingest complete"
    );
    Ok(summary)
}

fn ingest_one_event(
    tx: &rusqlite::Transaction,
    settings: &Settings,
    event: &ProviderEvent,
    captured_at: DateTime<Utc>,
    summary: &mut IngestSummary,
) -> Result<(), AppError> {
    let commence_time = parse_commence_time_to_utc(&event.commence_time)?;
    summary.events_processed += 1;

    let game_id = upsert_game(
        tx,
        &event.id,
        if event.sport_key.is_empty() { &summary.sport_key } else { &event.sport_key },
        commence_time,
        &event.home_team,
        &event.away_team,
    )?;

    let mut bookmakers: Vec<&ProviderBookmaker> = event.bookmakers.iter().collect();
    bookmakers.sort_by(|a, b| a.key.cmp(&b.key));

    for bm in bookmakers {
        if !settings.bookmaker_whitelist.is_empty()
            && !settings.bookmaker_whitelist.iter().any(|b| b == &bm.key)
        {
            continue;
        }
        let mut grouped: BTreeMap<(MarketKey, Option<i64>), Vec<SideQuote>> = BTreeMap::new();
        for market in &bm.markets {
            let Some(market_key) = MarketKey::parse(&market.key) else { continue };
            if !settings.odds_markets.iter().any(|m| m == &market.key) {
                continue;
            }
            for outcome in &market.outcomes {
                let side = normalize_side(&outcome.name, &event.home_team, &event.away_team, market_key, &event.sport_key)?;
                let point_key = outcome.point.map(|p| (p * 1000.0).round() as i64);
                grouped.entry((market_key, point_key)).or_default().push(SideQuote {
                    side,
                    american: outcome.price,
                    decimal: 0.0,
                });
            }
        }

        for ((market_key, point_key), mut sides) in grouped {
            for s in sides.iter_mut() {
                s.decimal = crate::math::american_to_decimal(s.american)?;
            }
            let point = point_key.map(|p| p as f64 / 1000.0);
            let hash = group_hash(&event.id, market_key, &bm.key, point, &sides);

            let existing_hash: Option<String> = tx
                .query_row(
                    "SELECT last_hash FROM odds_groups WHERE game_id=?1 AND market_key=?2 AND bookmaker=?3 AND point IS ?4",
                    rusqlite::params![game_id, market_key.as_str(), bm.key, point],
                    |row| row.get(0),
                )
                .ok();

            if existing_hash.as_deref() == Some(hash.as_str()) {
                summary.groups_skipped += 1;
                continue;
            }

            let implied_probs: Vec<f64> = sides
                .iter()
                .map(|s| crate::math::american_to_implied_prob(s.american))
                .collect::<Result<_, _>>()?;
            let fair_probs = crate::math::remove_vig(&implied_probs)?;
            let sum: f64 = fair_probs.iter().sum();
            if (sum - 1.0).abs() > 1e-6 {
                return Err(AppError::invalid("fair_probs did not sum to 1 after vig removal"));
            }

            for (side_quote, fair_prob) in sides.iter().zip(fair_probs.iter()) {
                let implied = crate::math::american_to_implied_prob(side_quote.american)?;
                tx.execute(
                    "INSERT OR IGNORE INTO odds_snapshots
                        (game_id, captured_at, market_key, bookmaker, point, side, american, decimal_odds, implied_prob, fair_prob, group_hash)
                     VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11)",
                    rusqlite::params![
                        game_id,
                        captured_at.to_rfc3339(),
                        market_key.as_str(),
                        bm.key,
                        point,
                        side_quote.side.as_str(),
                        side_quote.american,
                        side_quote.decimal,
                        implied,
                        fair_prob,
                        hash,
                    ],
                )?;
                summary.snapshot_rows_inserted += 1;
            }

            tx.execute(
                "INSERT INTO odds_groups (game_id, market_key, bookmaker, point, last_hash, last_captured_at)
                 VALUES (?1,?2,?3,?4,?5,?6)
                 ON CONFLICT(game_id, market_key, bookmaker, point)
                 DO UPDATE SET last_hash=excluded.last_hash, last_captured_at=excluded.last_captured_at",
                rusqlite::params![game_id, market_key.as_str(), bm.key, point, hash, captured_at.to_rfc3339()],
            )?;
            summary.groups_changed += 1;
        }
    }
    Ok(())
}

fn upsert_game(
    tx: &rusqlite::Transaction,
    event_id: &str,
    sport_key: &str,
    commence_time: DateTime<Utc>,
    home_team: &str,
    away_team: &str,
) -> rusqlite::Result<i64> {
    let now = Utc::now().to_rfc3339();
    tx.execute(
        "INSERT INTO games (sport_key, event_id, commence_time, home_team, away_team, created_at, updated_at)
         VALUES (?1,?2,?3,?4,?5,?6,?6)
         ON CONFLICT(event_id) DO UPDATE SET
            commence_time=excluded.commence_time,
            home_team=excluded.home_team,
            away_team=excluded.away_team,
            updated_at=excluded.updated_at",
        rusqlite::params![sport_key, event_id, commence_time.to_rfc3339(), home_team, away_team, now],
    )?;
    tx.query_row("SELECT id FROM games WHERE event_id = ?1", [event_id], |row| row.get(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_side_maps_teams_and_totals() {
        assert_eq!(
            normalize_side("Boston Celtics", "Boston Celtics", "Miami Heat", MarketKey::H2h, "basketball_nba").unwrap(),
            Side::Home
        );
        assert_eq!(
            normalize_side("Miami Heat", "Boston Celtics", "Miami Heat", MarketKey::H2h, "basketball_nba").unwrap(),
            Side::Away
        );
        assert_eq!(
            normalize_side("Over", "A", "B", MarketKey::Totals, "basketball_nba").unwrap(),
            Side::Over
        );
        assert_eq!(
            normalize_side("Draw", "A", "B", MarketKey::H2h, "soccer_epl").unwrap(),
            Side::Draw
        );
        assert!(normalize_side("Nobody", "A", "B", MarketKey::H2h, "basketball_nba").is_err());
    }

    #[test]
    fn parse_commence_time_handles_z_suffix() {
        let dt = parse_commence_time_to_utc("2026-01-01T18:00:00Z").unwrap();
        assert_eq!(dt.to_rfc3339(), "2026-01-01T18:00:00+00:00");
    }

    #[test]
    fn group_hash_ignores_side_order_and_derived_fields() {
        let a = vec![
            SideQuote { side: Side::Home, american: -110.0, decimal: 1.909 },
            SideQuote { side: Side::Away, american: -110.0, decimal: 1.909 },
        ];
        let b = vec![
            SideQuote { side: Side::Away, american: -110.0, decimal: 1.909 },
            SideQuote { side: Side::Home, american: -110.0, decimal: 1.909 },
        ];
        assert_eq!(
            group_hash("evt1", MarketKey::H2h, "pinnacle", None, &a),
            group_hash("evt1", MarketKey::H2h, "pinnacle", None, &b)
        );
    }

    #[test]
    fn group_hash_changes_with_price() {
        let a = vec![SideQuote { side: Side::Home, american: -110.0, decimal: 1.909 }];
        let b = vec![SideQuote { side: Side::Home, american: -120.0, decimal: 1.833 }];
        assert_ne!(
            group_hash("evt1", MarketKey::H2h, "pinnacle", None, &a),
            group_hash("evt1", MarketKey::H2h, "pinnacle", None, &b)
        );
    }
}
