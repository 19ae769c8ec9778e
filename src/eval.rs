//! Dataset export and evaluation reports over scored, CLV-computed picks.
//!
//! Grounded on `original_source/.../eval/service.py`.

use crate::config::Settings;
use crate::db::Store;
use crate::error::AppError;
use crate::pqs;
use crate::stats::{mean, median};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;

#[derive(Debug, Clone, Serialize)]
pub struct DatasetRow {
    pub pick_id: i64,
    pub event_id: String,
    pub sport_key: String,
    pub market_key: String,
    pub point: Option<f64>,
    pub side: String,
    pub best_book: String,
    pub consensus_prob: f64,
    pub best_decimal: f64,
    pub ev: f64,
    pub kelly_fraction: f64,
    pub stake: f64,
    pub pqs: Option<f64>,
    pub decision: Option<String>,
    pub drop_reason: Option<String>,
    pub market_clv: Option<f64>,
    pub book_clv: Option<f64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default, Clone)]
pub struct DatasetFilters {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub sport_key: Option<String>,
    pub market_key: Option<String>,
    pub decision: Option<String>,
    pub min_n: Option<i64>,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DatasetResult {
    pub insufficient_n: bool,
    pub n: i64,
    pub rows: Vec<DatasetRow>,
    pub limit: i64,
    pub offset: i64,
}

/// Joins `picks` + the current-`pqs_version` `pick_scores` row + `games`,
/// ordered `(created_at asc, id asc)`. Grounded on `eval/service.py::dataset_query`.
pub fn query_dataset(store: &Store, settings: &Settings, filters: &DatasetFilters) -> Result<DatasetResult, AppError> {
    let rows: Vec<DatasetRow> = store.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT p.id, g.event_id, g.sport_key, p.market_key, p.point, p.side, p.best_book,
                    p.consensus_prob, p.best_decimal, p.ev, p.kelly_fraction, p.stake,
                    ps.pqs, ps.decision, ps.drop_reason, p.market_clv, p.book_clv, p.created_at
             FROM picks p
             JOIN games g ON g.id = p.game_id
             LEFT JOIN pick_scores ps ON ps.pick_id = p.id AND ps.version = ?1
             ORDER BY p.created_at ASC, p.id ASC",
        )?;
        let out = stmt
            .query_map([&settings.pqs_version], |row| {
                let created_at_raw: String = row.get(17)?;
                Ok(DatasetRow {
                    pick_id: row.get(0)?,
                    event_id: row.get(1)?,
                    sport_key: row.get(2)?,
                    market_key: row.get(3)?,
                    point: row.get(4)?,
                    side: row.get(5)?,
                    best_book: row.get(6)?,
                    consensus_prob: row.get(7)?,
                    best_decimal: row.get(8)?,
                    ev: row.get(9)?,
                    kelly_fraction: row.get(10)?,
                    stake: row.get(11)?,
                    pqs: row.get(12)?,
                    decision: row.get(13)?,
                    drop_reason: row.get(14)?,
                    market_clv: row.get(15)?,
                    book_clv: row.get(16)?,
                    created_at: created_at_raw.parse().unwrap_or_else(|_| Utc::now()),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(out)
    })?;

    let filtered: Vec<DatasetRow> = rows
        .into_iter()
        .filter(|r| filters.start.map_or(true, |s| r.created_at >= s))
        .filter(|r| filters.end.map_or(true, |e| r.created_at < e))
        .filter(|r| filters.sport_key.as_deref().map_or(true, |sk| r.sport_key == sk))
        .filter(|r| filters.market_key.as_deref().map_or(true, |mk| r.market_key == mk))
        .filter(|r| filters.decision.as_deref().map_or(true, |d| r.decision.as_deref() == Some(d)))
        .collect();

    let n = filtered.len() as i64;
    let insufficient_n = filters.min_n.map_or(false, |min_n| n < min_n);

    let page: Vec<DatasetRow> = filtered
        .into_iter()
        .skip(filters.offset.max(0) as usize)
        .take(filters.limit.max(0) as usize)
        .collect();

    Ok(DatasetResult { insufficient_n, n, rows: page, limit: filters.limit, offset: filters.offset })
}

/// 15-column CSV layout for `/eval/dataset.csv`.
pub fn dataset_to_csv(rows: &[DatasetRow]) -> String {
    let mut out = String::new();
    out.push_str(
        "pick_id,event_id,sport_key,market_key,point,side,best_book,consensus_prob,best_decimal,ev,kelly_fraction,stake,pqs,decision,market_clv\n",
    );
    for r in rows {
        let _ = writeln!(
            out,
            "{},{},{},{},{},{},{},{},{},{},{},{},{},{},{}",
            r.pick_id,
            r.event_id,
            r.sport_key,
            r.market_key,
            r.point.map(|p| p.to_string()).unwrap_or_default(),
            r.side,
            r.best_book,
            r.consensus_prob,
            r.best_decimal,
            r.ev,
            r.kelly_fraction,
            r.stake,
            r.pqs.map(|p| p.to_string()).unwrap_or_default(),
            r.decision.clone().unwrap_or_default(),
            r.market_clv.map(|p| p.to_string()).unwrap_or_default(),
        );
    }
    out
}

fn clv_scored_rows(store: &Store, settings: &Settings, limit: Option<i64>) -> Result<Vec<(i64, f64, f64)>, AppError> {
    // (pick_id, pqs, market_clv_bps), most-recent-first truncated to `limit`.
    let all: Vec<(i64, f64, f64, String)> = store.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT p.id, ps.pqs, p.market_clv, p.created_at
             FROM picks p JOIN pick_scores ps ON ps.pick_id = p.id AND ps.version = ?1
             WHERE p.market_clv IS NOT NULL
             ORDER BY p.created_at DESC, p.id DESC",
        )?;
        let out = stmt
            .query_map([&settings.pqs_version], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(out)
    })?;

    let capped: Vec<_> = match limit {
        Some(n) => all.into_iter().take(n.max(0) as usize).collect(),
        None => all,
    };
    Ok(capped.into_iter().map(|(id, pqs, clv, _)| (id, pqs, clv * 10000.0)).collect())
}

#[derive(Debug, Clone, Serialize)]
pub struct BinStat {
    pub bin: i64,
    pub n: i64,
    pub mean_clv_bps: f64,
    pub median_clv_bps: f64,
    pub pct_positive: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PqsClvReport {
    pub n: i64,
    pub spearman: Option<f64>,
    pub bins: Vec<BinStat>,
    pub bin_mean_slope: Option<f64>,
}

fn ordinal_ranks(values: &[(i64, f64)]) -> Vec<f64> {
    // values: (pick_id, value); ties broken by pick_id ascending.
    let mut indices: Vec<usize> = (0..values.len()).collect();
    indices.sort_by(|&a, &b| {
        values[a].1.partial_cmp(&values[b].1).unwrap().then(values[a].0.cmp(&values[b].0))
    });
    let mut ranks = vec![0.0; values.len()];
    for (rank, &idx) in indices.iter().enumerate() {
        ranks[idx] = (rank + 1) as f64;
    }
    ranks
}

fn spearman(pairs: &[(i64, f64, f64)]) -> Option<f64> {
    let n = pairs.len();
    if n < 2 {
        return None;
    }
    let xs: Vec<(i64, f64)> = pairs.iter().map(|(id, x, _)| (*id, *x)).collect();
    let ys: Vec<(i64, f64)> = pairs.iter().map(|(id, _, y)| (*id, *y)).collect();
    let rx = ordinal_ranks(&xs);
    let ry = ordinal_ranks(&ys);
    let d2: f64 = rx.iter().zip(ry.iter()).map(|(a, b)| (a - b).powi(2)).sum();
    let n_f = n as f64;
    Some(1.0 - (6.0 * d2) / (n_f * (n_f * n_f - 1.0)))
}

fn linreg_slope(ys: &[f64]) -> Option<f64> {
    let n = ys.len();
    if n < 2 {
        return None;
    }
    let xs: Vec<f64> = (0..n).map(|i| i as f64).collect();
    let mean_x = xs.iter().sum::<f64>() / n as f64;
    let mean_y = ys.iter().sum::<f64>() / n as f64;
    let mut num = 0.0;
    let mut den = 0.0;
    for i in 0..n {
        num += (xs[i] - mean_x) * (ys[i] - mean_y);
        den += (xs[i] - mean_x).powi(2);
    }
    if den.abs() < 1e-12 {
        Some(0.0)
    } else {
        Some(num / den)
    }
}

/// Spearman(PQS, market_clv_bps) plus 5 equal-count quantile bins, ordered
/// by ascending PQS, and the linear slope across bin means.
pub fn pqs_clv_report(store: &Store, settings: &Settings, limit: Option<i64>) -> Result<PqsClvReport, AppError> {
    let rows = clv_scored_rows(store, settings, limit)?;
    let n = rows.len() as i64;

    let spearman_value = spearman(&rows);

    let mut sorted = rows.clone();
    sorted.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap().then(a.0.cmp(&b.0)));

    let bin_count = 5usize;
    let mut bins = Vec::new();
    if !sorted.is_empty() {
        let len = sorted.len();
        for bin_idx in 0..bin_count {
            let start = len * bin_idx / bin_count;
            let end = len * (bin_idx + 1) / bin_count;
            let slice = &sorted[start..end];
            let clv_values: Vec<f64> = slice.iter().map(|(_, _, clv)| *clv).collect();
            let pct_positive = if clv_values.is_empty() {
                0.0
            } else {
                clv_values.iter().filter(|v| **v > 0.0).count() as f64 / clv_values.len() as f64
            };
            bins.push(BinStat {
                bin: bin_idx as i64,
                n: clv_values.len() as i64,
                mean_clv_bps: mean(&clv_values),
                median_clv_bps: median(&clv_values),
                pct_positive,
            });
        }
    }

    let bin_means: Vec<f64> = bins.iter().map(|b| b.mean_clv_bps).collect();
    let bin_mean_slope = linreg_slope(&bin_means);

    Ok(PqsClvReport { n, spearman: spearman_value, bins, bin_mean_slope })
}

#[derive(Debug, Clone, Serialize)]
pub struct GatesReport {
    pub drop_reason_counts: BTreeMap<String, i64>,
    pub kept_mean_clv_bps: f64,
    pub dropped_mean_clv_bps: f64,
}

/// Frequency of each `drop_reason`, and mean kept-vs-dropped `market_clv_bps`.
pub fn gates_report(store: &Store, settings: &Settings, limit: Option<i64>) -> Result<GatesReport, AppError> {
    let version = settings.pqs_version.clone();
    let all: Vec<(Option<String>, String, Option<f64>)> = store.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT ps.drop_reason, ps.decision, p.market_clv
             FROM picks p JOIN pick_scores ps ON ps.pick_id = p.id AND ps.version = ?1
             ORDER BY p.created_at DESC, p.id DESC",
        )?;
        let out = stmt
            .query_map([&version], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(out)
    })?;

    let capped: Vec<_> = match limit {
        Some(n) => all.into_iter().take(n.max(0) as usize).collect(),
        None => all,
    };

    let mut drop_reason_counts: BTreeMap<String, i64> = BTreeMap::new();
    let mut kept_clv = Vec::new();
    let mut dropped_clv = Vec::new();
    for (reason, decision, clv) in capped {
        if let Some(reason) = reason {
            *drop_reason_counts.entry(reason).or_insert(0) += 1;
        }
        if let Some(clv_val) = clv {
            match decision.as_str() {
                "KEEP" | "WARN" => kept_clv.push(clv_val * 10000.0),
                "DROP" => dropped_clv.push(clv_val * 10000.0),
                _ => {}
            }
        }
    }

    Ok(GatesReport {
        drop_reason_counts,
        kept_mean_clv_bps: mean(&kept_clv),
        dropped_mean_clv_bps: mean(&dropped_clv),
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct SportReportRow {
    pub sport_key: String,
    pub market_key: String,
    pub n: i64,
    pub keep_rate: f64,
    pub avg_pqs: f64,
    pub mean_clv_bps: f64,
    pub median_clv_bps: f64,
    pub pct_positive_clv: f64,
    pub adaptive_min_pqs: f64,
    pub adaptive_max_picks: i64,
}

/// Per (sport, market): n, keep rate, avg PQS, CLV stats, and the adaptive
/// thresholds currently in effect for that sport.
pub fn sports_report(store: &Store, settings: &Settings, limit: Option<i64>) -> Result<Vec<SportReportRow>, AppError> {
    let version = settings.pqs_version.clone();
    let all: Vec<(String, String, f64, String, Option<f64>)> = store.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT g.sport_key, p.market_key, ps.pqs, ps.decision, p.market_clv
             FROM picks p JOIN games g ON g.id = p.game_id
                          JOIN pick_scores ps ON ps.pick_id = p.id AND ps.version = ?1
             ORDER BY p.created_at DESC, p.id DESC",
        )?;
        let out = stmt
            .query_map([&version], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(out)
    })?;

    let capped: Vec<_> = match limit {
        Some(n) => all.into_iter().take(n.max(0) as usize).collect(),
        None => all,
    };

    let mut grouped: BTreeMap<(String, String), Vec<(f64, String, Option<f64>)>> = BTreeMap::new();
    for (sport_key, market_key, pqs_val, decision, clv) in capped {
        grouped.entry((sport_key, market_key)).or_default().push((pqs_val, decision, clv));
    }

    let mut out = Vec::new();
    for ((sport_key, market_key), rows) in grouped {
        let n = rows.len() as i64;
        let keep_count = rows.iter().filter(|(_, d, _)| d == "KEEP" || d == "WARN").count() as f64;
        let keep_rate = keep_count / n as f64;
        let avg_pqs = mean(&rows.iter().map(|(p, _, _)| *p).collect::<Vec<_>>());
        let clv_values: Vec<f64> = rows.iter().filter_map(|(_, _, c)| c.map(|v| v * 10000.0)).collect();
        let pct_positive = if clv_values.is_empty() {
            0.0
        } else {
            clv_values.iter().filter(|v| **v > 0.0).count() as f64 / clv_values.len() as f64
        };

        let prior = crate::priors::get_latest_prior(store, &sport_key, &market_key, settings.clv_prior_window)?;
        let thresholds = pqs::adaptive_thresholds(settings, prior.as_ref(), &sport_key);

        out.push(SportReportRow {
            sport_key,
            market_key,
            n,
            keep_rate,
            avg_pqs,
            mean_clv_bps: mean(&clv_values),
            median_clv_bps: median(&clv_values),
            pct_positive_clv: pct_positive,
            adaptive_min_pqs: thresholds.min_pqs,
            adaptive_max_picks: thresholds.max_picks,
        });
    }

    Ok(out)
}

#[derive(Debug, Clone, Serialize)]
pub struct VolumeReportRow {
    pub run_id: i64,
    pub run_type: String,
    pub kept_count: i64,
    pub hit_cap: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct VolumeReport {
    pub runs: Vec<VolumeReportRow>,
    pub fraction_hitting_cap: f64,
}

/// Per-run kept counts (parsed from `stats_json`) and the fraction of runs
/// that hit `run_max_picks_total`.
pub fn volume_report(store: &Store, settings: &Settings, limit: Option<i64>) -> Result<VolumeReport, AppError> {
    let rows: Vec<(i64, String, String)> = store.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT id, run_type, stats_json FROM pipeline_runs
             WHERE run_type IN ('picks','cycle') ORDER BY created_at DESC, id DESC",
        )?;
        let out = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(out)
    })?;

    let capped: Vec<_> = match limit {
        Some(n) => rows.into_iter().take(n.max(0) as usize).collect(),
        None => rows,
    };

    let mut volume_rows = Vec::new();
    let mut hits = 0i64;
    let total = capped.len() as i64;
    for (id, run_type, stats_json) in capped {
        let parsed: serde_json::Value = serde_json::from_str(&stats_json).unwrap_or_default();
        let kept_count = parsed.get("picks_kept").and_then(|v| v.as_i64()).unwrap_or(0);
        let hit_cap = kept_count >= settings.run_max_picks_total;
        if hit_cap {
            hits += 1;
        }
        volume_rows.push(VolumeReportRow { run_id: id, run_type, kept_count, hit_cap });
    }

    let fraction_hitting_cap = if total == 0 { 0.0 } else { hits as f64 / total as f64 };
    Ok(VolumeReport { runs: volume_rows, fraction_hitting_cap })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spearman_is_one_for_identical_ranks() {
        let pairs = vec![(1i64, 1.0, 10.0), (2, 2.0, 20.0), (3, 3.0, 30.0)];
        assert!((spearman(&pairs).unwrap() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn spearman_is_negative_one_for_inverse_ranks() {
        let pairs = vec![(1i64, 1.0, 30.0), (2, 2.0, 20.0), (3, 3.0, 10.0)];
        assert!((spearman(&pairs).unwrap() + 1.0).abs() < 1e-9);
    }

    #[test]
    fn csv_has_header_and_one_row_per_pick() {
        let rows = vec![DatasetRow {
            pick_id: 1,
            event_id: "e1".into(),
            sport_key: "basketball_nba".into(),
            market_key: "h2h".into(),
            point: None,
            side: "home".into(),
            best_book: "draftkings".into(),
            consensus_prob: 0.55,
            best_decimal: 2.1,
            ev: 0.1,
            kelly_fraction: 0.02,
            stake: 200.0,
            pqs: Some(0.7),
            decision: Some("KEEP".into()),
            drop_reason: None,
            market_clv: Some(0.02),
            book_clv: None,
            created_at: Utc::now(),
        }];
        let csv = dataset_to_csv(&rows);
        assert_eq!(csv.lines().count(), 2);
    }
}
