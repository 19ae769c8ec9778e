//! Bounded self-tuning proposals over the latest evaluation window.
//!
//! Grounded on `original_source/.../eval/calibration.py`.

use crate::config::Settings;
use crate::db::Store;
use crate::error::AppError;
use crate::eval::{gates_report, pqs_clv_report, sports_report};
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};

#[derive(Debug, Clone, Serialize)]
pub struct CalibrationRunRecord {
    pub id: i64,
    pub eval_window_start: chrono::DateTime<Utc>,
    pub eval_window_end: chrono::DateTime<Utc>,
    pub pqs_version: String,
    pub current_config_snapshot: Value,
    pub proposed_config_patch: Value,
    pub rationale: Value,
    pub status: String,
    pub applied_at: Option<chrono::DateTime<Utc>>,
    pub created_at: chrono::DateTime<Utc>,
}

fn current_config_snapshot(settings: &Settings) -> Value {
    json!({
        "pqs_weight_ev": settings.pqs_weight_ev,
        "pqs_weight_clv_prior": settings.pqs_weight_clv_prior,
        "min_books": settings.min_books,
        "sport_default_min_pqs": settings.sport_default_min_pqs,
        "sport_default_max_picks": settings.sport_default_max_picks,
    })
}

/// Build a bounded config patch from the latest `target_n` CLV-scored
/// picks' evaluation reports, and persist it `status=PROPOSED`. Rules
/// follow `spec.md §4.9` exactly; `apply_calibration` is the only other
/// writer of `calibration_runs` and only flips `status`.
pub fn propose_calibration(store: &Store, settings: &Settings, target_n: i64) -> Result<CalibrationRunRecord, AppError> {
    let now = Utc::now();
    let limit = Some(target_n);

    let pqs_clv = pqs_clv_report(store, settings, limit)?;
    let gates = gates_report(store, settings, limit)?;
    let sports = sports_report(store, settings, limit)?;

    let mut patch = json!({});
    let mut rationale_parts: Vec<Value> = Vec::new();

    let patch_obj = patch.as_object_mut().unwrap();

    if let Some(slope) = pqs_clv.bin_mean_slope {
        if slope <= 0.0 {
            let new_ev = (settings.pqs_weight_ev - 0.02).max(0.05);
            let new_prior = (settings.pqs_weight_clv_prior + 0.02).min(0.30);
            patch_obj.insert("pqs_weight_ev".to_string(), json!(new_ev));
            patch_obj.insert("pqs_weight_clv_prior".to_string(), json!(new_prior));
            rationale_parts.push(json!({
                "rule": "bin_mean_slope_non_positive",
                "bin_mean_slope": slope,
                "action": "pqs_weight_ev -= 0.02 (floor 0.05), pqs_weight_clv_prior += 0.02 (ceil 0.30)",
            }));
        }
    }

    if gates.kept_mean_clv_bps < gates.dropped_mean_clv_bps {
        let new_min_books = settings.min_books + 1;
        patch_obj.insert("min_books".to_string(), json!(new_min_books));
        rationale_parts.push(json!({
            "rule": "kept_clv_below_dropped_clv",
            "kept_mean_clv_bps": gates.kept_mean_clv_bps,
            "dropped_mean_clv_bps": gates.dropped_mean_clv_bps,
            "action": "min_books += 1",
        }));
    } else {
        let total: i64 = gates.drop_reason_counts.values().sum();
        let drop_rate = if pqs_clv.n == 0 { 0.0 } else { total as f64 / pqs_clv.n as f64 };
        if gates.kept_mean_clv_bps > 0.0 && drop_rate > 0.60 {
            let new_min_books = (settings.min_books - 1).max(4);
            patch_obj.insert("min_books".to_string(), json!(new_min_books));
            rationale_parts.push(json!({
                "rule": "kept_clv_positive_and_drop_rate_high",
                "kept_mean_clv_bps": gates.kept_mean_clv_bps,
                "drop_rate": drop_rate,
                "action": "min_books -= 1 (floor 4)",
            }));
        }
    }

    let weak_sports: Vec<&str> = sports
        .iter()
        .filter(|s| s.pct_positive_clv < 0.45)
        .map(|s| s.sport_key.as_str())
        .collect();
    if !weak_sports.is_empty() {
        let new_min_pqs = (settings.sport_default_min_pqs + 0.03).min(0.9);
        let new_max_picks = (settings.sport_default_max_picks - 1).max(1);
        patch_obj.insert("sport_default_min_pqs".to_string(), json!(new_min_pqs));
        patch_obj.insert("sport_default_max_picks".to_string(), json!(new_max_picks));
        rationale_parts.push(json!({
            "rule": "sport_pct_positive_clv_below_0.45",
            "sports": weak_sports,
            "action": "sport_default_min_pqs += 0.03 (ceil 0.9), sport_default_max_picks -= 1 (floor 1)",
        }));
    }

    let rationale = json!({
        "pqs_clv": pqs_clv,
        "gates": gates,
        "rules_triggered": rationale_parts,
    });

    let id = store.with_tx(|tx| {
        tx.execute(
            "INSERT INTO calibration_runs
                (eval_window_start, eval_window_end, pqs_version, current_config_snapshot_json,
                 proposed_config_patch_json, rationale_json, status, applied_at, created_at)
             VALUES (?1,?2,?3,?4,?5,?6,'PROPOSED',NULL,?7)",
            rusqlite::params![
                now.to_rfc3339(),
                now.to_rfc3339(),
                settings.pqs_version,
                serde_json::to_string(&current_config_snapshot(settings)).unwrap(),
                serde_json::to_string(&patch).unwrap(),
                serde_json::to_string(&rationale).unwrap(),
                now.to_rfc3339(),
            ],
        )?;
        Ok(tx.last_insert_rowid())
    })?;

    Ok(CalibrationRunRecord {
        id,
        eval_window_start: now,
        eval_window_end: now,
        pqs_version: settings.pqs_version.clone(),
        current_config_snapshot: current_config_snapshot(settings),
        proposed_config_patch: patch,
        rationale,
        status: "PROPOSED".to_string(),
        applied_at: None,
        created_at: now,
    })
}

/// Flip `status` to `APPLIED`. Never mutates live config: an operator
/// applies the patch to the environment out of band.
pub fn apply_calibration(store: &Store, run_id: i64) -> Result<CalibrationRunRecord, AppError> {
    let now = Utc::now();
    let updated = store.with_tx(|tx| {
        let current_status: String =
            tx.query_row("SELECT status FROM calibration_runs WHERE id=?1", [run_id], |row| row.get(0))?;
        if current_status != "PROPOSED" {
            return Ok(false);
        }
        tx.execute(
            "UPDATE calibration_runs SET status='APPLIED', applied_at=?1 WHERE id=?2",
            rusqlite::params![now.to_rfc3339(), run_id],
        )?;
        Ok(true)
    })?;

    if !updated {
        return Err(AppError::Conflict(format!("calibration run {run_id} is not in PROPOSED state")));
    }

    get_calibration_run(store, run_id)?.ok_or_else(|| AppError::not_found(format!("calibration run {run_id} not found")))
}

fn row_to_record(
    id: i64,
    eval_window_start: String,
    eval_window_end: String,
    pqs_version: String,
    current_config_snapshot_json: String,
    proposed_config_patch_json: String,
    rationale_json: String,
    status: String,
    applied_at: Option<String>,
    created_at: String,
) -> CalibrationRunRecord {
    CalibrationRunRecord {
        id,
        eval_window_start: eval_window_start.parse().unwrap_or_else(|_| Utc::now()),
        eval_window_end: eval_window_end.parse().unwrap_or_else(|_| Utc::now()),
        pqs_version,
        current_config_snapshot: serde_json::from_str(&current_config_snapshot_json).unwrap_or_default(),
        proposed_config_patch: serde_json::from_str(&proposed_config_patch_json).unwrap_or_default(),
        rationale: serde_json::from_str(&rationale_json).unwrap_or_default(),
        status,
        applied_at: applied_at.and_then(|s| s.parse().ok()),
        created_at: created_at.parse().unwrap_or_else(|_| Utc::now()),
    }
}

pub fn get_calibration_run(store: &Store, run_id: i64) -> Result<Option<CalibrationRunRecord>, AppError> {
    let row = store.with_conn(|conn| {
        conn.query_row(
            "SELECT id, eval_window_start, eval_window_end, pqs_version, current_config_snapshot_json,
                    proposed_config_patch_json, rationale_json, status, applied_at, created_at
             FROM calibration_runs WHERE id=?1",
            [run_id],
            |row| {
                Ok(row_to_record(
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                    row.get(7)?,
                    row.get(8)?,
                    row.get(9)?,
                ))
            },
        )
        .ok()
    });
    Ok(row)
}

/// All calibration runs, ascending by id (the order used by the one
/// original listing endpoint).
pub fn list_calibration_runs(store: &Store, limit: i64) -> Result<Vec<CalibrationRunRecord>, AppError> {
    let rows: Vec<CalibrationRunRecord> = store.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT id, eval_window_start, eval_window_end, pqs_version, current_config_snapshot_json,
                    proposed_config_patch_json, rationale_json, status, applied_at, created_at
             FROM calibration_runs ORDER BY id ASC LIMIT ?1",
        )?;
        let out = stmt
            .query_map([limit], |row| {
                Ok(row_to_record(
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                    row.get(7)?,
                    row.get(8)?,
                    row.get(9)?,
                ))
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
    fn propose_persists_a_proposed_run() {
        let store = Store::open_in_memory().unwrap();
        let settings = Settings::from_env();
        let record = propose_calibration(&store, &settings, 100).unwrap();
        assert_eq!(record.status, "PROPOSED");
        assert!(record.applied_at.is_none());
    }

    #[test]
    fn apply_transitions_status_only() {
        let store = Store::open_in_memory().unwrap();
        let settings = Settings::from_env();
        let proposed = propose_calibration(&store, &settings, 100).unwrap();
        let applied = apply_calibration(&store, proposed.id).unwrap();
        assert_eq!(applied.status, "APPLIED");
        assert!(applied.applied_at.is_some());
        assert_eq!(applied.proposed_config_patch, proposed.proposed_config_patch);
    }
}
