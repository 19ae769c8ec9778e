//! Run orchestration: resolve sports/markets, run each stage, log a
//! `PipelineRun` row per invocation.
//!
//! Grounded on `original_source/.../services/pipeline.py`.

use crate::config::Settings;
use crate::db::Store;
use crate::domain::MarketKey;
use crate::error::AppError;
use crate::ingest::{ingest_odds_for_sport, IngestSummary, ProviderClient};
use crate::ingest::quota::QuotaState;
use crate::market_unlock::allowed_markets;
use crate::picks::{run_picks, PicksSummary};
use chrono::Utc;
use serde::Serialize;
use serde_json::json;

/// `SPORTS_AUTORUN` if non-empty else `ODDS_SPORTS_WHITELIST`, deduplicated
/// and sorted ascending. Grounded on `services/pipeline.py::resolve_sports`.
pub fn resolve_sports(settings: &Settings) -> Vec<String> {
    let source = if !settings.sports_autorun.is_empty() { &settings.sports_autorun } else { &settings.odds_sports_whitelist };
    let mut sports: Vec<String> = source.clone();
    sports.sort();
    sports.dedup();
    sports
}

/// `MARKETS_AUTORUN` (default `["h2h"]`), deduplicated and sorted
/// ascending, intersected with whatever the unlock gate currently allows.
pub fn resolve_markets(store: &Store, settings: &Settings) -> Result<Vec<MarketKey>, AppError> {
    let mut configured: Vec<MarketKey> = settings.markets_autorun.iter().filter_map(|s| MarketKey::parse(s)).collect();
    configured.sort();
    configured.dedup();

    let allowed = allowed_markets(store, settings)?;
    Ok(configured.into_iter().filter(|m| allowed.contains(m)).collect())
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct RunStats {
    pub sports: Vec<String>,
    pub markets: Vec<String>,
    pub ingest: Option<Vec<(String, IngestSummaryView)>>,
    pub picks: Option<PicksSummary>,
    pub clv_computed: Option<i64>,
    pub used_markets: Vec<String>,
    pub skipped_markets: Vec<String>,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestSummaryView {
    pub events_processed: i64,
    pub groups_changed: i64,
    pub groups_skipped: i64,
    pub snapshot_rows_inserted: i64,
    pub errors_count: i64,
}

impl From<&IngestSummary> for IngestSummaryView {
    fn from(s: &IngestSummary) -> Self {
        IngestSummaryView {
            events_processed: s.events_processed,
            groups_changed: s.groups_changed,
            groups_skipped: s.groups_skipped,
            snapshot_rows_inserted: s.snapshot_rows_inserted,
            errors_count: s.errors_count,
        }
    }
}

/// Ingest every resolved sport; never fails the whole run because one
/// sport failed.
pub async fn run_ingest(store: &Store, settings: &Settings, client: &ProviderClient, quota: &QuotaState) -> RunStats {
    let sports = resolve_sports(settings);
    let mut ingest_results = Vec::new();
    let mut errors = Vec::new();

    for sport_key in &sports {
        match ingest_odds_for_sport(store, settings, client, quota, sport_key).await {
            Ok(summary) => ingest_results.push((sport_key.clone(), IngestSummaryView::from(&summary))),
            Err(e) => {
                tracing::warn!(sport_key, error = %e, "ingest failed for sport");
                errors.push(format!("{sport_key}: {e}"));
            }
        }
    }

    RunStats {
        sports: sports.clone(),
        markets: Vec::new(),
        ingest: Some(ingest_results),
        picks: None,
        clv_computed: None,
        used_markets: Vec::new(),
        skipped_markets: Vec::new(),
        errors,
    }
}

/// Generate picks over sport x (allowed ∩ autorun) markets.
pub fn run_picks_stage(store: &Store, settings: &Settings) -> Result<RunStats, AppError> {
    let sports = resolve_sports(settings);
    let used_markets = resolve_markets(store, settings)?;
    let all_configured: Vec<MarketKey> = settings.markets_autorun.iter().filter_map(|s| MarketKey::parse(s)).collect();
    let skipped_markets: Vec<String> = all_configured
        .iter()
        .filter(|m| !used_markets.contains(m))
        .map(|m| m.as_str().to_string())
        .collect();

    let summary = run_picks(store, settings, &sports, &used_markets)?;

    Ok(RunStats {
        sports,
        markets: used_markets.iter().map(|m| m.as_str().to_string()).collect(),
        ingest: None,
        picks: Some(summary),
        clv_computed: None,
        used_markets: used_markets.iter().map(|m| m.as_str().to_string()).collect(),
        skipped_markets,
        errors: Vec::new(),
    })
}

/// CLV for every pick whose game has commenced (or all, if `force`),
/// still missing CLV. Date-unbounded so a scheduler outage or a run
/// crossing UTC midnight doesn't strand picks from a prior day.
pub fn run_clv_stage(store: &Store, settings: &Settings, force: bool) -> Result<RunStats, AppError> {
    let results = crate::clv::compute_clv_all_commenced(store, settings, force)?;
    Ok(RunStats {
        sports: Vec::new(),
        markets: Vec::new(),
        ingest: None,
        picks: None,
        clv_computed: Some(results.len() as i64),
        used_markets: Vec::new(),
        skipped_markets: Vec::new(),
        errors: Vec::new(),
    })
}

fn log_run(store: &Store, run_type: &str, status: &str, sports: &[String], markets: &[String], stats_json: &str, error: Option<&str>) -> Result<i64, AppError> {
    let now = Utc::now();
    let id = store.with_tx(|tx| {
        tx.execute(
            "INSERT INTO pipeline_runs (run_type, status, sports, markets, stats_json, error, created_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7)",
            rusqlite::params![run_type, status, sports.join(","), markets.join(","), stats_json, error, now.to_rfc3339()],
        )?;
        Ok(tx.last_insert_rowid())
    })?;
    Ok(id)
}

/// Run one named stage (`ingest`, `picks`, `clv`, or `cycle`) and persist
/// a `PipelineRun` row, always, even on partial failure.
pub async fn run_and_log(
    store: &Store,
    settings: &Settings,
    client: &ProviderClient,
    quota: &QuotaState,
    run_type: &str,
    force: bool,
) -> Result<RunStats, AppError> {
    let result: Result<RunStats, AppError> = match run_type {
        "ingest" => Ok(run_ingest(store, settings, client, quota).await),
        "picks" => run_picks_stage(store, settings),
        "clv" => run_clv_stage(store, settings, force),
        "cycle" => {
            let ingest_stats = run_ingest(store, settings, client, quota).await;
            log_run(
                store,
                "ingest",
                if ingest_stats.errors.is_empty() { "ok" } else { "partial_error" },
                &ingest_stats.sports,
                &ingest_stats.markets,
                &serde_json::to_string(&ingest_stats).unwrap_or_default(),
                None,
            )?;

            let picks_stats = run_picks_stage(store, settings)?;
            log_run(
                store,
                "picks",
                "ok",
                &picks_stats.sports,
                &picks_stats.markets,
                &serde_json::to_string(&picks_stats).unwrap_or_default(),
                None,
            )?;

            let clv_stats = run_clv_stage(store, settings, force)?;
            log_run(
                store,
                "clv",
                "ok",
                &[],
                &[],
                &serde_json::to_string(&clv_stats).unwrap_or_default(),
                None,
            )?;

            let mut combined = ingest_stats;
            combined.picks = picks_stats.picks;
            combined.clv_computed = clv_stats.clv_computed;
            combined.markets = picks_stats.markets;
            combined.used_markets = picks_stats.used_markets;
            combined.skipped_markets = picks_stats.skipped_markets;
            Ok(combined)
        }
        other => Err(AppError::invalid(format!("unknown run_type: {other}"))),
    };

    match &result {
        Ok(stats) => {
            let status = if stats.errors.is_empty() { "ok" } else { "partial_error" };
            log_run(
                store,
                run_type,
                status,
                &stats.sports,
                &stats.markets,
                &serde_json::to_string(stats).unwrap_or_default(),
                None,
            )?;
        }
        Err(e) => {
            log_run(store, run_type, "error", &[], &[], &json!({}).to_string(), Some(&e.to_string()))?;
        }
    }

    result
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineRunRecord {
    pub id: i64,
    pub run_type: String,
    pub status: String,
    pub sports: String,
    pub markets: String,
    pub stats: serde_json::Value,
    pub error: Option<String>,
    pub created_at: chrono::DateTime<Utc>,
}

pub fn list_pipeline_runs(store: &Store, limit: i64) -> Result<Vec<PipelineRunRecord>, AppError> {
    let rows: Vec<PipelineRunRecord> = store.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT id, run_type, status, sports, markets, stats_json, error, created_at
             FROM pipeline_runs ORDER BY id ASC LIMIT ?1",
        )?;
        let out = stmt
            .query_map([limit], |row| {
                let stats_json: String = row.get(5)?;
                let created_at_raw: String = row.get(7)?;
                Ok(PipelineRunRecord {
                    id: row.get(0)?,
                    run_type: row.get(1)?,
                    status: row.get(2)?,
                    sports: row.get(3)?,
                    markets: row.get(4)?,
                    stats: serde_json::from_str(&stats_json).unwrap_or_default(),
                    error: row.get(6)?,
                    created_at: created_at_raw.parse().unwrap_or_else(|_| Utc::now()),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(out)
    })?;
    Ok(rows)
}

/// Latest status per `run_type`, used by `GET /pipeline/health`.
pub fn latest_run_statuses(store: &Store) -> Result<Vec<(String, String, chrono::DateTime<Utc>)>, AppError> {
    let rows: Vec<(String, String, String)> = store.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT run_type, status, MAX(created_at) FROM pipeline_runs GROUP BY run_type ORDER BY run_type ASC",
        )?;
        let out = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(out)
    })?;
    Ok(rows
        .into_iter()
        .map(|(run_type, status, ts)| (run_type, status, ts.parse().unwrap_or_else(|_| Utc::now())))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_sports_prefers_autorun_and_dedups() {
        let mut settings = Settings::from_env();
        settings.sports_autorun = vec!["basketball_nba".into(), "americanfootball_nfl".into(), "basketball_nba".into()];
        let sports = resolve_sports(&settings);
        assert_eq!(sports, vec!["americanfootball_nfl".to_string(), "basketball_nba".to_string()]);
    }

    #[test]
    fn resolve_sports_falls_back_to_whitelist() {
        let mut settings = Settings::from_env();
        settings.sports_autorun = Vec::new();
        settings.odds_sports_whitelist = vec!["basketball_nba".into()];
        assert_eq!(resolve_sports(&settings), vec!["basketball_nba".to_string()]);
    }
}
