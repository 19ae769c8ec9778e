//! Consensus builder: latest-complete-group selection per bookmaker,
//! weighted vig-free consensus probability, best price per side.
//!
//! Grounded on `original_source/.../services/consensus.py`. Pure functions
//! over rows already pulled from the store, matching `spec.md §4.3`'s intent
//! that this stays a deterministic computation independent of I/O.

use crate::config::Settings;
use crate::db::Store;
use crate::domain::{required_sides, MarketKey, Side};
use crate::error::AppError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub struct BookRow {
    pub bookmaker: String,
    pub side: Side,
    pub decimal: f64,
    pub fair_prob: f64,
    pub captured_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct MarketView {
    pub game_id: i64,
    pub event_id: String,
    pub sport_key: String,
    pub home_team: String,
    pub away_team: String,
    pub commence_time: DateTime<Utc>,
    pub market_key: MarketKey,
    pub point: Option<f64>,
    /// Bookmakers sorted ascending, each with a fully-quoted latest row set.
    pub complete_books: Vec<String>,
    pub rows: Vec<BookRow>,
    pub captured_at_min: DateTime<Utc>,
    pub captured_at_max: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConsensusResult {
    pub event_id: String,
    pub market_key: String,
    pub point: Option<f64>,
    pub consensus_probs: Option<BTreeMap<String, f64>>,
    pub best_decimal: BTreeMap<String, f64>,
    pub best_book: BTreeMap<String, String>,
    pub included_books: Vec<String>,
    pub sharp_books_included: Vec<String>,
    pub reason: Option<String>,
    pub captured_at_min: DateTime<Utc>,
    pub captured_at_max: DateTime<Utc>,
}

/// Build every (game, point) market view for a (sport, market) pair by
/// selecting, per bookmaker, the latest `captured_at` at which every
/// required side is present.
pub fn build_market_views(
    store: &Store,
    sport_key: &str,
    market: MarketKey,
) -> Result<Vec<MarketView>, AppError> {
    let required = required_sides(sport_key, market);

    let games: Vec<(i64, String, String, String, String, String)> = store.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT DISTINCT g.id, g.event_id, g.home_team, g.away_team, g.commence_time, g.sport_key
             FROM odds_snapshots os JOIN games g ON g.id = os.game_id
             WHERE g.sport_key = ?1 AND os.market_key = ?2
             ORDER BY g.id",
        )?;
        let rows = stmt
            .query_map(rusqlite::params![sport_key, market.as_str()], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })?;

    let mut views = Vec::new();
    for (game_id, event_id, home_team, away_team, commence_time_raw, game_sport_key) in games {
        let commence_time: DateTime<Utc> = commence_time_raw
            .parse()
            .map_err(|e| AppError::invalid(format!("bad commence_time in db: {e}")))?;

        let points: Vec<Option<f64>> = store.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT point FROM odds_snapshots WHERE game_id=?1 AND market_key=?2",
            )?;
            let rows = stmt
                .query_map(rusqlite::params![game_id, market.as_str()], |row| row.get(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;

        for point in points {
            let raw_rows: Vec<(String, String, f64, f64, String)> = store.with_conn(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT bookmaker, side, decimal_odds, fair_prob, captured_at
                     FROM odds_snapshots
                     WHERE game_id=?1 AND market_key=?2 AND point IS ?3
                     ORDER BY bookmaker ASC, captured_at ASC",
                )?;
                let rows = stmt
                    .query_map(rusqlite::params![game_id, market.as_str(), point], |row| {
                        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })?;

            let mut by_book: BTreeMap<String, BTreeMap<DateTime<Utc>, BTreeMap<Side, (f64, f64)>>> =
                BTreeMap::new();
            for (bookmaker, side_raw, decimal, fair_prob, captured_at_raw) in raw_rows {
                let Some(side) = Side::parse(&side_raw) else { continue };
                let captured_at: DateTime<Utc> = match captured_at_raw.parse() {
                    Ok(v) => v,
                    Err(_) => continue,
                };
                by_book
                    .entry(bookmaker)
                    .or_default()
                    .entry(captured_at)
                    .or_default()
                    .insert(side, (decimal, fair_prob));
            }

            let mut complete_books = Vec::new();
            let mut rows = Vec::new();
            let mut captured_at_min: Option<DateTime<Utc>> = None;
            let mut captured_at_max: Option<DateTime<Utc>> = None;

            for (bookmaker, by_ts) in by_book {
                let best_ts = by_ts
                    .iter()
                    .filter(|(_, sides)| required.iter().all(|s| sides.contains_key(s)))
                    .map(|(ts, _)| *ts)
                    .max();
                let Some(ts) = best_ts else { continue };
                let sides = &by_ts[&ts];
                complete_books.push(bookmaker.clone());
                for &side in required {
                    let (decimal, fair_prob) = sides[&side];
                    rows.push(BookRow { bookmaker: bookmaker.clone(), side, decimal, fair_prob, captured_at: ts });
                }
                captured_at_min = Some(captured_at_min.map_or(ts, |m| m.min(ts)));
                captured_at_max = Some(captured_at_max.map_or(ts, |m| m.max(ts)));
            }

            if complete_books.is_empty() {
                continue;
            }
            complete_books.sort();

            views.push(MarketView {
                game_id,
                event_id: event_id.clone(),
                sport_key: game_sport_key.clone(),
                home_team: home_team.clone(),
                away_team: away_team.clone(),
                commence_time,
                market_key: market,
                point,
                complete_books,
                rows,
                captured_at_min: captured_at_min.unwrap(),
                captured_at_max: captured_at_max.unwrap(),
            });
        }
    }

    Ok(views)
}

/// Weight, devig, and select best price per side for one market view.
/// Grounded on `services/consensus.py::compute_consensus_for_view`.
pub fn compute_consensus_for_view(view: &MarketView, settings: &Settings) -> ConsensusResult {
    let required = required_sides(&view.sport_key, view.market_key);
    let included_books = view.complete_books.clone();

    if (included_books.len() as i64) < settings.consensus_min_books {
        return ConsensusResult {
            event_id: view.event_id.clone(),
            market_key: view.market_key.as_str().to_string(),
            point: view.point,
            consensus_probs: None,
            best_decimal: BTreeMap::new(),
            best_book: BTreeMap::new(),
            included_books,
            sharp_books_included: Vec::new(),
            reason: Some("insufficient_books".to_string()),
            captured_at_min: view.captured_at_min,
            captured_at_max: view.captured_at_max,
        };
    }

    let mut books_matrix = Vec::with_capacity(included_books.len());
    let mut weights = Vec::with_capacity(included_books.len());
    let mut sharp_books_included = Vec::new();

    for book in &included_books {
        let mut per_side = Vec::with_capacity(required.len());
        for &side in required {
            let fair = view
                .rows
                .iter()
                .find(|r| &r.bookmaker == book && r.side == side)
                .map(|r| r.fair_prob)
                .unwrap_or(0.0);
            per_side.push(fair);
        }
        books_matrix.push(per_side);
        let is_sharp = settings.is_sharp_book(book);
        if is_sharp {
            sharp_books_included.push(book.clone());
        }
        weights.push(if is_sharp { settings.sharp_weight } else { settings.standard_weight });
    }

    let consensus_probs = match crate::math::consensus_fair_prob(&books_matrix, &weights) {
        Ok(probs) => {
            let mut map = BTreeMap::new();
            for (side, p) in required.iter().zip(probs.iter()) {
                map.insert(side.as_str().to_string(), *p);
            }
            Some(map)
        }
        Err(_) => None,
    };

    let mut best_decimal: BTreeMap<String, f64> = BTreeMap::new();
    let mut best_book: BTreeMap<String, String> = BTreeMap::new();
    for book in &included_books {
        for &side in required {
            if let Some(row) = view.rows.iter().find(|r| &r.bookmaker == book && r.side == side) {
                let key = side.as_str().to_string();
                let better = match best_decimal.get(&key) {
                    None => true,
                    Some(&existing) => row.decimal > existing,
                };
                if better {
                    best_decimal.insert(key.clone(), row.decimal);
                    best_book.insert(key, book.clone());
                }
            }
        }
    }

    ConsensusResult {
        event_id: view.event_id.clone(),
        market_key: view.market_key.as_str().to_string(),
        point: view.point,
        consensus_probs,
        best_decimal,
        best_book,
        included_books,
        sharp_books_included,
        reason: None,
        captured_at_min: view.captured_at_min,
        captured_at_max: view.captured_at_max,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(bookmaker: &str, side: Side, decimal: f64, fair_prob: f64, ts: DateTime<Utc>) -> BookRow {
        BookRow { bookmaker: bookmaker.to_string(), side, decimal, fair_prob, captured_at: ts }
    }

    #[test]
    fn best_price_tie_break_is_lexicographic_first() {
        let now = Utc::now();
        let view = MarketView {
            game_id: 1,
            event_id: "evt1".into(),
            sport_key: "basketball_nba".into(),
            home_team: "A".into(),
            away_team: "B".into(),
            commence_time: now,
            market_key: MarketKey::H2h,
            point: None,
            complete_books: vec!["draftkings".into(), "fanduel".into()],
            rows: vec![
                row("draftkings", Side::Home, 2.10, 0.5, now),
                row("draftkings", Side::Away, 1.80, 0.5, now),
                row("fanduel", Side::Home, 2.10, 0.5, now),
                row("fanduel", Side::Away, 1.80, 0.5, now),
            ],
            captured_at_min: now,
            captured_at_max: now,
        };
        let settings = Settings::from_env();
        let result = compute_consensus_for_view(&view, &settings);
        // equal decimal odds -> first book encountered in ascending order wins (strict >)
        assert_eq!(result.best_book.get("home").unwrap(), "draftkings");
    }

    #[test]
    fn insufficient_books_sets_reason() {
        let now = Utc::now();
        let view = MarketView {
            game_id: 1,
            event_id: "evt1".into(),
            sport_key: "basketball_nba".into(),
            home_team: "A".into(),
            away_team: "B".into(),
            commence_time: now,
            market_key: MarketKey::H2h,
            point: None,
            complete_books: vec!["draftkings".into()],
            rows: vec![row("draftkings", Side::Home, 2.10, 0.5, now), row("draftkings", Side::Away, 1.80, 0.5, now)],
            captured_at_min: now,
            captured_at_max: now,
        };
        let settings = Settings::from_env();
        let result = compute_consensus_for_view(&view, &settings);
        assert_eq!(result.reason.as_deref(), Some("insufficient_books"));
        assert!(result.consensus_probs.is_none());
    }
}
