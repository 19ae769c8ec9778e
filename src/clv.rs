//! Closing Line Value: compare each pick's price/probability against the
//! market's closing snapshot.
//!
//! Grounded on `original_source/.../services/clv.py`.

use crate::config::Settings;
use crate::db::Store;
use crate::domain::{required_sides, MarketKey, Side};
use crate::error::AppError;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::Connection;
use serde::Serialize;
use std::collections::BTreeMap;

/// Box an `AppError` into a `rusqlite::Error` so it can cross a
/// `Store::with_tx` closure boundary, which only propagates
/// `rusqlite::Result`. Paired with `unbox_app_error`. Grounded on the same
/// trick used in `ingest/mod.rs`.
fn box_app_error(e: AppError) -> rusqlite::Error {
    rusqlite::Error::ToSqlConversionFailure(Box::new(e))
}

fn unbox_app_error(e: rusqlite::Error) -> AppError {
    match e {
        rusqlite::Error::ToSqlConversionFailure(boxed) => match boxed.downcast::<AppError>() {
            Ok(app_err) => *app_err,
            Err(other) => AppError::Internal(anyhow::anyhow!(other.to_string())),
        },
        other => AppError::from(other),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ClvResult {
    pub pick_id: i64,
    pub closing_consensus_prob: Option<f64>,
    pub closing_book_decimal: Option<f64>,
    pub closing_book_implied_prob: Option<f64>,
    pub market_clv: Option<f64>,
    pub book_clv: Option<f64>,
    pub skipped_reason: Option<String>,
}

struct OpenPick {
    pick_id: i64,
    game_id: i64,
    market_key: MarketKey,
    point: Option<f64>,
    side: Side,
    best_book: String,
    best_decimal: f64,
    consensus_prob: f64,
    commence_time: DateTime<Utc>,
}

fn closing_consensus(
    conn: &Connection,
    settings: &Settings,
    pick: &OpenPick,
    sport_key: &str,
) -> Result<(Option<f64>, i64, Vec<String>), AppError> {
    let required = required_sides(sport_key, pick.market_key);

    let raw_rows: Vec<(String, String, f64, f64, String)> = {
        let mut stmt = conn.prepare(
            "SELECT bookmaker, side, decimal_odds, fair_prob, captured_at
             FROM odds_snapshots
             WHERE game_id=?1 AND market_key=?2 AND point IS ?3 AND captured_at < ?4
             ORDER BY bookmaker ASC, captured_at ASC",
        )?;
        let rows = stmt
            .query_map(
                rusqlite::params![pick.game_id, pick.market_key.as_str(), pick.point, pick.commence_time.to_rfc3339()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
            )?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    };

    let mut by_book: BTreeMap<String, BTreeMap<DateTime<Utc>, BTreeMap<Side, (f64, f64)>>> = BTreeMap::new();
    for (bookmaker, side_raw, decimal, fair_prob, captured_at_raw) in raw_rows {
        let Some(side) = Side::parse(&side_raw) else { continue };
        let Ok(captured_at) = captured_at_raw.parse::<DateTime<Utc>>() else { continue };
        by_book.entry(bookmaker).or_default().entry(captured_at).or_default().insert(side, (decimal, fair_prob));
    }

    let mut books_matrix = Vec::new();
    let mut weights = Vec::new();
    let mut included_books = Vec::new();

    for (bookmaker, by_ts) in &by_book {
        let best_ts = by_ts
            .iter()
            .filter(|(_, sides)| required.iter().all(|s| sides.contains_key(s)))
            .map(|(ts, _)| *ts)
            .max();
        let Some(ts) = best_ts else { continue };
        let sides = &by_ts[&ts];
        let per_side: Vec<f64> = required.iter().map(|s| sides[s].1).collect();
        books_matrix.push(per_side);
        let is_sharp = settings.is_sharp_book(bookmaker);
        weights.push(if is_sharp { settings.sharp_weight } else { settings.standard_weight });
        included_books.push(bookmaker.clone());
    }

    if (included_books.len() as i64) < settings.consensus_min_books {
        return Ok((None, included_books.len() as i64, included_books));
    }

    let side_idx = required.iter().position(|&s| s == pick.side);
    match (side_idx, crate::math::consensus_fair_prob(&books_matrix, &weights)) {
        (Some(idx), Ok(probs)) => Ok((Some(probs[idx]), included_books.len() as i64, included_books)),
        _ => Ok((None, included_books.len() as i64, included_books)),
    }
}

fn closing_book_quote(conn: &Connection, pick: &OpenPick) -> Result<Option<(f64, f64)>, AppError> {
    let row = conn
        .query_row(
            "SELECT decimal_odds, implied_prob FROM odds_snapshots
             WHERE game_id=?1 AND market_key=?2 AND point IS ?3 AND side=?4
               AND bookmaker=?5 AND captured_at < ?6
             ORDER BY captured_at DESC LIMIT 1",
            rusqlite::params![
                pick.game_id,
                pick.market_key.as_str(),
                pick.point,
                pick.side.as_str(),
                pick.best_book,
                pick.commence_time.to_rfc3339(),
            ],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .ok();
    Ok(row)
}

/// CLV for one pick, evaluated against an already-open connection/transaction.
/// Shared by the single-pick and batch entry points so every multi-pick run
/// commits once instead of once per pick.
fn eval_pick_clv(conn: &Connection, settings: &Settings, pick_id: i64) -> Result<ClvResult, AppError> {
    let row = conn.query_row(
        "SELECT p.id, p.game_id, p.market_key, p.point, p.side, p.best_book, p.best_decimal,
                p.consensus_prob, g.commence_time, g.sport_key
         FROM picks p JOIN games g ON g.id = p.game_id WHERE p.id=?1",
        [pick_id],
        |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<f64>>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, f64>(6)?,
                row.get::<_, f64>(7)?,
                row.get::<_, String>(8)?,
                row.get::<_, String>(9)?,
            ))
        },
    )?;

    let (pid, game_id, market_key_raw, point, side_raw, best_book, best_decimal, consensus_prob, commence_time_raw, sport_key) =
        row;
    let market_key = MarketKey::parse(&market_key_raw).ok_or_else(|| AppError::invalid("bad market_key in db"))?;
    let side = Side::parse(&side_raw).ok_or_else(|| AppError::invalid("bad side in db"))?;
    let commence_time: DateTime<Utc> = commence_time_raw
        .parse()
        .map_err(|e| AppError::invalid(format!("bad commence_time: {e}")))?;

    if Utc::now() < commence_time {
        return Ok(ClvResult {
            pick_id: pid,
            closing_consensus_prob: None,
            closing_book_decimal: None,
            closing_book_implied_prob: None,
            market_clv: None,
            book_clv: None,
            skipped_reason: Some("not_started".to_string()),
        });
    }

    let pick = OpenPick { pick_id: pid, game_id, market_key, point, side, best_book, best_decimal, consensus_prob, commence_time };

    let (closing_consensus_prob, _n, _books) = closing_consensus(conn, settings, &pick, &sport_key)?;
    let closing_book = closing_book_quote(conn, &pick)?;
    let (closing_book_decimal, closing_book_implied_prob) = match closing_book {
        Some((d, p)) => (Some(d), Some(p)),
        None => (None, None),
    };

    let market_clv = closing_consensus_prob.and_then(|close| crate::math::clv_delta(close, pick.consensus_prob).ok());
    let book_clv = closing_book_implied_prob
        .and_then(|close| crate::math::clv_delta(close, 1.0 / pick.best_decimal).ok());

    let skipped_reason = if closing_consensus_prob.is_none() { Some("insufficient_closing_books".to_string()) } else { None };

    if let Some(mc) = market_clv {
        conn.execute(
            "UPDATE picks SET closing_consensus_prob=?1, closing_book_decimal=?2,
                closing_book_implied_prob=?3, market_clv=?4, book_clv=?5, clv_computed_at=?6
             WHERE id=?7",
            rusqlite::params![
                closing_consensus_prob,
                closing_book_decimal,
                closing_book_implied_prob,
                mc,
                book_clv,
                Utc::now().to_rfc3339(),
                pid,
            ],
        )?;
    }

    Ok(ClvResult {
        pick_id: pid,
        closing_consensus_prob,
        closing_book_decimal,
        closing_book_implied_prob,
        market_clv,
        book_clv,
        skipped_reason,
    })
}

/// CLV for one pick, if the game has started (closing snapshots exist
/// before `commence_time`) and there's enough closing coverage.
pub fn compute_pick_clv(store: &Store, settings: &Settings, pick_id: i64) -> Result<ClvResult, AppError> {
    store
        .with_tx(|tx| eval_pick_clv(tx, settings, pick_id).map_err(box_app_error))
        .map_err(unbox_app_error)
}

/// Evaluate CLV for a batch of picks in one transaction, committing once for
/// the whole run rather than once per pick.
fn run_clv_batch(store: &Store, settings: &Settings, pick_ids: Vec<i64>) -> Result<Vec<ClvResult>, AppError> {
    store
        .with_tx(|tx| {
            let mut results = Vec::with_capacity(pick_ids.len());
            for pick_id in pick_ids {
                results.push(eval_pick_clv(tx, settings, pick_id).map_err(box_app_error)?);
            }
            Ok(results)
        })
        .map_err(unbox_app_error)
}

/// Compute CLV for every pick of a (commence) calendar date whose game has
/// started and which has no CLV yet, unless `force` re-evaluates all of
/// them. Used by the explicitly-dated manual `/clv/compute?date_utc=` tool.
pub fn compute_clv_for_date(store: &Store, settings: &Settings, date: NaiveDate, force: bool) -> Result<Vec<ClvResult>, AppError> {
    let day_start = date.and_hms_opt(0, 0, 0).unwrap().and_utc();
    let day_end = day_start + chrono::Duration::days(1);

    let pick_ids: Vec<i64> = store.with_conn(|conn| {
        let sql = if force {
            "SELECT p.id FROM picks p JOIN games g ON g.id=p.game_id
             WHERE g.commence_time >= ?1 AND g.commence_time < ?2 ORDER BY p.id"
        } else {
            "SELECT p.id FROM picks p JOIN games g ON g.id=p.game_id
             WHERE g.commence_time >= ?1 AND g.commence_time < ?2 AND p.clv_computed_at IS NULL ORDER BY p.id"
        };
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(rusqlite::params![day_start.to_rfc3339(), day_end.to_rfc3339()], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })?;

    run_clv_batch(store, settings, pick_ids)
}

/// Compute CLV for every pick whose game has commenced and which still has
/// no CLV, with no date bound — the pipeline/scheduler's catch-up query, so
/// a pick from a prior UTC day is never missed by a later tick. `force`
/// re-evaluates every commenced pick regardless of whether CLV is already
/// present.
pub fn compute_clv_all_commenced(store: &Store, settings: &Settings, force: bool) -> Result<Vec<ClvResult>, AppError> {
    let now = Utc::now().to_rfc3339();

    let pick_ids: Vec<i64> = store.with_conn(|conn| {
        let sql = if force {
            "SELECT p.id FROM picks p JOIN games g ON g.id=p.game_id
             WHERE g.commence_time <= ?1 ORDER BY p.id"
        } else {
            "SELECT p.id FROM picks p JOIN games g ON g.id=p.game_id
             WHERE g.commence_time <= ?1 AND p.clv_computed_at IS NULL ORDER BY p.id"
        };
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map([&now], |row| row.get(0))?.collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })?;

    run_clv_batch(store, settings, pick_ids)
}

/// The most recently CLV-computed picks, newest first.
pub fn list_latest_clv(store: &Store, limit: i64) -> Result<Vec<ClvResult>, AppError> {
    let rows: Vec<(i64, Option<f64>, Option<f64>, Option<f64>, Option<f64>, Option<f64>)> = store.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT id, closing_consensus_prob, closing_book_decimal, closing_book_implied_prob, market_clv, book_clv
             FROM picks WHERE clv_computed_at IS NOT NULL ORDER BY clv_computed_at DESC, id DESC LIMIT ?1",
        )?;
        let out = stmt
            .query_map([limit], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?, row.get(5)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(out)
    })?;

    Ok(rows
        .into_iter()
        .map(|(pick_id, closing_consensus_prob, closing_book_decimal, closing_book_implied_prob, market_clv, book_clv)| ClvResult {
            pick_id,
            closing_consensus_prob,
            closing_book_decimal,
            closing_book_implied_prob,
            market_clv,
            book_clv,
            skipped_reason: None,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unstarted_game_is_skipped() {
        let store = Store::open_in_memory().unwrap();
        let settings = Settings::from_env();
        store
            .with_tx(|tx| {
                let future = (Utc::now() + chrono::Duration::days(1)).to_rfc3339();
                tx.execute(
                    "INSERT INTO games (sport_key, event_id, commence_time, home_team, away_team, created_at, updated_at)
                     VALUES ('basketball_nba','e1',?1,'A','B',?1,?1)",
                    [&future],
                )?;
                tx.execute(
                    "INSERT INTO picks (game_id, market_key, point, side, best_book, captured_at_max, captured_at_min,
                        consensus_prob, best_decimal, ev, kelly_fraction, stake, consensus_books, sharp_books, source, created_at)
                     VALUES (1,'h2h',NULL,'home','bookA',?1,?1,0.55,2.0,0.1,0.01,10.0,6,1,'test',?1)",
                    [&future],
                )?;
                Ok(())
            })
            .unwrap();

        let result = compute_pick_clv(&store, &settings, 1).unwrap();
        assert_eq!(result.skipped_reason.as_deref(), Some("not_started"));
        assert!(result.market_clv.is_none());
    }
}
