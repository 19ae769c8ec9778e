//! Hard gates, adaptive thresholds, and weighted scoring.
//!
//! Grounded on `original_source/.../intelligence/pqs.py`.

use crate::config::Settings;
use crate::db::Store;
use crate::domain::Decision;
use crate::error::AppError;
use crate::features::PickFeatures;
use crate::priors::ClvPrior;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

fn clamp01(v: f64) -> f64 {
    v.clamp(0.0, 1.0)
}

#[derive(Debug, Clone, Serialize)]
pub struct PqsResult {
    pub pqs: f64,
    pub decision: Decision,
    pub drop_reason: Option<String>,
    pub components: BTreeMap<String, f64>,
}

impl PqsResult {
    fn dropped(reason: &str) -> Self {
        PqsResult {
            pqs: 0.0,
            decision: Decision::Drop,
            drop_reason: Some(reason.to_string()),
            components: BTreeMap::new(),
        }
    }
}

pub struct AdaptiveThresholds {
    pub min_pqs: f64,
    pub max_picks: i64,
}

/// Nudge the sport's base min-PQS/max-picks using its rolling CLV prior.
/// Grounded on `intelligence/pqs.py::adaptive_thresholds`.
pub fn adaptive_thresholds(settings: &Settings, prior: Option<&ClvPrior>, sport_key: &str) -> AdaptiveThresholds {
    let mut min_pqs = settings.sport_default_min_pqs;
    let mut max_picks = settings.max_picks_for_sport(sport_key);

    if let Some(prior) = prior {
        if prior.pct_positive_market_clv < 0.45 {
            min_pqs = (min_pqs + 0.05).min(0.9);
            max_picks = (max_picks - 1).max(1);
        } else if prior.pct_positive_market_clv > 0.6 && !prior.is_weak {
            min_pqs = (min_pqs - 0.02).max(0.55);
        }
    }

    AdaptiveThresholds { min_pqs, max_picks }
}

fn adaptive_max_price_dispersion(settings: &Settings, book_count: i64, sharp_book_count: i64, ev: f64) -> f64 {
    let mut adaptive = settings.max_price_dispersion;
    if book_count >= 8 {
        adaptive = adaptive.max(settings.max_price_dispersion_book_count_8);
    }
    if sharp_book_count >= 2 && ev >= 0.05 {
        adaptive = adaptive.max(settings.max_price_dispersion_sharp_ev);
    }
    adaptive
}

fn adaptive_min_minutes_to_start(settings: &Settings, book_count: i64, dispersion: f64) -> f64 {
    if book_count >= settings.min_minutes_to_start_relaxed_min_books
        && dispersion <= settings.min_minutes_to_start_relaxed_max_dispersion
    {
        settings.min_minutes_to_start_relaxed
    } else {
        settings.min_minutes_to_start
    }
}

/// Sequential hard gates, then the weighted component score. Grounded on
/// `intelligence/pqs.py::score_pick`.
pub fn score_pick(
    settings: &Settings,
    sport_key: &str,
    features: &PickFeatures,
    prior: Option<&ClvPrior>,
) -> PqsResult {
    if features.book_count < settings.min_books {
        return PqsResult::dropped("min_books");
    }
    if features.sharp_book_count < settings.sharp_book_min {
        return PqsResult::dropped("sharp_book_min");
    }
    if features.time_to_start_minutes < 0.0 {
        return PqsResult::dropped("min_minutes_to_start");
    }

    let effective_min_minutes =
        adaptive_min_minutes_to_start(settings, features.book_count, features.price_dispersion);
    if features.time_to_start_minutes < effective_min_minutes {
        return PqsResult::dropped("min_minutes_to_start");
    }

    if features.price_dispersion > settings.max_price_dispersion_hard_ceiling {
        return PqsResult::dropped("max_price_dispersion");
    }

    let adaptive_max_dispersion = adaptive_max_price_dispersion(
        settings,
        features.book_count,
        features.sharp_book_count,
        features.ev,
    );
    if features.price_dispersion > adaptive_max_dispersion {
        return PqsResult::dropped("max_price_dispersion");
    }

    if features.agreement_strength < settings.min_agreement {
        return PqsResult::dropped("min_agreement");
    }

    if features.ev < settings.ev_floor {
        return PqsResult::dropped("ev_floor");
    }

    let ev_score = clamp01(features.ev / 0.05);
    let agreement_score = clamp01(features.agreement_strength);
    let dispersion_score = clamp01(1.0 - features.price_dispersion / adaptive_max_dispersion.max(1e-9));
    let coverage_score = clamp01(features.book_count as f64 / (settings.min_books.max(10) as f64));
    let sharp_score = if features.sharp_book_count >= settings.sharp_book_min { 1.0 } else { 0.0 };
    let prior_score = match prior {
        None => 0.5,
        Some(p) => clamp01((p.pct_positive_market_clv - 0.5) * 2.0 + 0.5),
    };
    let time_score = clamp01(features.time_to_start_minutes / settings.time_decay_half_life_min.max(1.0));

    let pqs = settings.pqs_weight_ev * ev_score
        + settings.pqs_weight_agreement * agreement_score
        + settings.pqs_weight_dispersion * dispersion_score
        + settings.pqs_weight_coverage * coverage_score
        + settings.pqs_weight_sharp_presence * sharp_score
        + settings.pqs_weight_clv_prior * prior_score
        + settings.pqs_weight_time_to_start * time_score;

    let thresholds = adaptive_thresholds(settings, prior, sport_key);

    let mut components = BTreeMap::new();
    components.insert("ev_score".to_string(), ev_score);
    components.insert("agreement_score".to_string(), agreement_score);
    components.insert("dispersion_score".to_string(), dispersion_score);
    components.insert("coverage_score".to_string(), coverage_score);
    components.insert("sharp_score".to_string(), sharp_score);
    components.insert("prior_score".to_string(), prior_score);
    components.insert("time_score".to_string(), time_score);
    components.insert("adaptive_min_pqs".to_string(), thresholds.min_pqs);

    if pqs >= thresholds.min_pqs {
        PqsResult { pqs, decision: Decision::Keep, drop_reason: None, components }
    } else {
        PqsResult { pqs, decision: Decision::Drop, drop_reason: Some("below_min_pqs".to_string()), components }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScoredPick {
    pub pick_id: i64,
    pub event_id: String,
    pub sport_key: String,
    pub market_key: String,
    pub pqs: f64,
    pub decision: String,
    pub drop_reason: Option<String>,
    pub version: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default, Clone)]
pub struct ScoredPickFilters {
    pub sport_key: Option<String>,
    pub decision: Option<String>,
    pub min_pqs: Option<f64>,
    pub version: Option<String>,
    pub limit: i64,
}

/// Backs `GET /pqs/latest`; joins the requested (or current) scoring
/// version's rows against their pick/game for display.
pub fn list_scored_picks(store: &Store, settings: &Settings, filters: &ScoredPickFilters) -> Result<Vec<ScoredPick>, AppError> {
    let version = filters.version.clone().unwrap_or_else(|| settings.pqs_version.clone());

    let rows: Vec<ScoredPick> = store.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT p.id, g.event_id, g.sport_key, p.market_key, s.pqs, s.decision, s.drop_reason, s.version, s.created_at
             FROM pick_scores s
             JOIN picks p ON p.id = s.pick_id
             JOIN games g ON g.id = p.game_id
             WHERE s.version = ?1
             ORDER BY s.created_at DESC, s.id DESC",
        )?;
        let out = stmt
            .query_map([version], |row| {
                let created_at_raw: String = row.get(8)?;
                Ok(ScoredPick {
                    pick_id: row.get(0)?,
                    event_id: row.get(1)?,
                    sport_key: row.get(2)?,
                    market_key: row.get(3)?,
                    pqs: row.get(4)?,
                    decision: row.get(5)?,
                    drop_reason: row.get(6)?,
                    version: row.get(7)?,
                    created_at: created_at_raw.parse().unwrap_or_else(|_| Utc::now()),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(out)
    })?;

    let limit = if filters.limit > 0 { filters.limit as usize } else { 100 };
    Ok(rows
        .into_iter()
        .filter(|r| filters.sport_key.as_deref().map(|s| r.sport_key == s).unwrap_or(true))
        .filter(|r| filters.decision.as_deref().map(|d| r.decision == d).unwrap_or(true))
        .filter(|r| filters.min_pqs.map(|m| r.pqs >= m).unwrap_or(true))
        .take(limit)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_features() -> PickFeatures {
        PickFeatures {
            ev: 0.04,
            kelly_fraction: 0.02,
            book_count: 8,
            sharp_book_count: 2,
            agreement_strength: 0.9,
            price_dispersion: 0.05,
            best_vs_consensus_edge: 0.01,
            time_to_start_minutes: 60.0,
            market_liquidity_proxy: 12.0,
        }
    }

    #[test]
    fn drops_on_min_books_gate() {
        let settings = Settings::from_env();
        let mut f = base_features();
        f.book_count = settings.min_books - 1;
        let result = score_pick(&settings, "basketball_nba", &f, None);
        assert_eq!(result.decision, Decision::Drop);
        assert_eq!(result.drop_reason.as_deref(), Some("min_books"));
    }

    #[test]
    fn keeps_strong_pick() {
        let settings = Settings::from_env();
        let f = base_features();
        let result = score_pick(&settings, "basketball_nba", &f, None);
        assert_eq!(result.decision, Decision::Keep);
    }

    #[test]
    fn weak_prior_pct_positive_raises_threshold() {
        let settings = Settings::from_env();
        let prior = ClvPrior {
            sport_key: "basketball_nba".into(),
            market_key: "h2h".into(),
            window_size: 200,
            as_of: chrono::Utc::now(),
            n: 50,
            mean_market_clv_bps: -10.0,
            median_market_clv_bps: -10.0,
            pct_positive_market_clv: 0.40,
            mean_book_clv_bps: None,
            sharpe_like: 0.0,
            is_weak: false,
        };
        let t = adaptive_thresholds(&settings, Some(&prior), "basketball_nba");
        assert!(t.min_pqs > settings.sport_default_min_pqs);
        assert!(t.max_picks < settings.sport_default_max_picks);
    }
}
