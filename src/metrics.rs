//! `GET /metrics/clv` health buckets: a quick days-windowed rollup of CLV
//! quality, independent of the full eval reports.
//!
//! Grounded on `original_source/.../services/metrics.py`.

use crate::db::Store;
use crate::error::AppError;
use crate::stats::mean;
use chrono::Utc;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct ClvHealthBucket {
    pub sport_key: String,
    pub market_key: String,
    pub n: i64,
    pub mean_market_clv_bps: f64,
    pub pct_positive_market_clv: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClvHealthReport {
    pub days: i64,
    pub total_n: i64,
    pub buckets: Vec<ClvHealthBucket>,
}

/// Per (sport, market) CLV health over the trailing `days` window.
pub fn clv_health(store: &Store, days: i64) -> Result<ClvHealthReport, AppError> {
    let cutoff = Utc::now() - chrono::Duration::days(days.max(0));

    let rows: Vec<(String, String, f64)> = store.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT g.sport_key, p.market_key, p.market_clv
             FROM picks p JOIN games g ON g.id = p.game_id
             WHERE p.clv_computed_at IS NOT NULL AND p.market_clv IS NOT NULL AND p.clv_computed_at >= ?1",
        )?;
        let out = stmt
            .query_map([cutoff.to_rfc3339()], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(out)
    })?;

    let mut grouped: std::collections::BTreeMap<(String, String), Vec<f64>> = std::collections::BTreeMap::new();
    for (sport_key, market_key, clv) in &rows {
        grouped.entry((sport_key.clone(), market_key.clone())).or_default().push(*clv * 10000.0);
    }

    let buckets: Vec<ClvHealthBucket> = grouped
        .into_iter()
        .map(|((sport_key, market_key), values)| {
            let n = values.len() as i64;
            let pct_positive = values.iter().filter(|v| **v > 0.0).count() as f64 / n as f64;
            ClvHealthBucket { sport_key, market_key, n, mean_market_clv_bps: mean(&values), pct_positive_market_clv: pct_positive }
        })
        .collect();

    Ok(ClvHealthReport { days, total_n: rows.len() as i64, buckets })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Store;

    #[test]
    fn empty_db_yields_zero_buckets() {
        let store = Store::open_in_memory().unwrap();
        let report = clv_health(&store, 30).unwrap();
        assert_eq!(report.total_n, 0);
        assert!(report.buckets.is_empty());
    }
}
