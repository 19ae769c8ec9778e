//! Pick generation: consensus -> EV/Kelly -> PQS scoring -> idempotent
//! persistence -> cap-throttle selection.
//!
//! Grounded on `original_source/.../services/picks.py`.

use crate::config::Settings;
use crate::consensus::{build_market_views, compute_consensus_for_view};
use crate::db::Store;
use crate::domain::{required_sides, Decision, MarketKey, Side};
use crate::error::AppError;
use crate::features::compute_features;
use crate::{math, priors, pqs};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Serialize)]
pub struct PersistedPick {
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
    pub consensus_books: i64,
    pub sharp_books: i64,
    pub pqs: f64,
    pub decision: Decision,
    pub drop_reason: Option<String>,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct PicksSummary {
    pub candidates_considered: i64,
    pub picks_kept: i64,
    pub picks_warned: i64,
    pub picks_dropped: i64,
    pub cap_throttled: i64,
    pub inserted: i64,
    pub skipped_existing: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<Value>,
}

struct Candidate {
    game_id: i64,
    event_id: String,
    sport_key: String,
    market_key: MarketKey,
    point: Option<f64>,
    side: Side,
    best_book: String,
    consensus_prob: f64,
    best_decimal: f64,
    ev: f64,
    kelly_fraction: f64,
    stake: f64,
    consensus_books: i64,
    sharp_books: i64,
    captured_at_max: chrono::DateTime<Utc>,
    captured_at_min: chrono::DateTime<Utc>,
    pqs: f64,
    decision: Decision,
    drop_reason: Option<String>,
    components_json: String,
    features_json: String,
}

fn build_candidates(
    store: &Store,
    settings: &Settings,
    sport_key: &str,
    market: MarketKey,
    now: chrono::DateTime<Utc>,
) -> Result<Vec<Candidate>, AppError> {
    let views = build_market_views(store, sport_key, market)?;
    let required = required_sides(sport_key, market);
    let mut out = Vec::new();

    for view in &views {
        let consensus = compute_consensus_for_view(view, settings);
        if consensus.reason.is_some() {
            continue;
        }
        let Some(consensus_probs) = consensus.consensus_probs.clone() else { continue };

        for &side in required {
            let Some(&best_decimal) = consensus.best_decimal.get(side.as_str()) else { continue };
            let Some(&fair_prob) = consensus_probs.get(side.as_str()) else { continue };
            let Some(best_book) = consensus.best_book.get(side.as_str()).cloned() else { continue };

            let ev = match math::ev(fair_prob, best_decimal) {
                Ok(v) => v,
                Err(_) => continue,
            };
            if ev < settings.pick_min_ev {
                continue;
            }

            let kelly_raw = match math::kelly_fraction(
                fair_prob,
                best_decimal,
                settings.kelly_multiplier,
                settings.kelly_max_cap,
            ) {
                Ok(v) => v,
                Err(_) => continue,
            };
            let kelly = kelly_raw.min(settings.kelly_cap);
            let stake = kelly * settings.bankroll_paper;

            let features = compute_features(view, &consensus, side, ev, kelly, now);
            let prior = priors::get_latest_prior(store, sport_key, market.as_str(), settings.clv_prior_window)?;
            let scored = pqs::score_pick(settings, sport_key, &features, prior.as_ref());

            let components_json = serde_json::to_string(&scored.components)
                .map_err(|e| AppError::Internal(anyhow::anyhow!(e)))?;
            let features_json =
                serde_json::to_string(&features).map_err(|e| AppError::Internal(anyhow::anyhow!(e)))?;

            out.push(Candidate {
                game_id: view.game_id,
                event_id: view.event_id.clone(),
                sport_key: sport_key.to_string(),
                market_key: market,
                point: view.point,
                side,
                best_book,
                consensus_prob: fair_prob,
                best_decimal,
                ev,
                kelly_fraction: kelly,
                stake,
                consensus_books: consensus.included_books.len() as i64,
                sharp_books: consensus.sharp_books_included.len() as i64,
                captured_at_max: view.captured_at_max,
                captured_at_min: view.captured_at_min,
                pqs: scored.pqs,
                decision: scored.decision,
                drop_reason: scored.drop_reason,
                components_json,
                features_json,
            });
        }
    }

    Ok(out)
}

/// Persist one pick on the Pick uniqueness key
/// `(game_id, market_key, point, side, best_book, captured_at_max)`. Tests
/// existence first so callers can tell a fresh insert from a re-run hitting
/// the same candidate (`spec.md §4.4`/§7).
fn persist_pick(tx: &rusqlite::Transaction, c: &Candidate, created_at: chrono::DateTime<Utc>) -> rusqlite::Result<(i64, bool)> {
    let existing: Option<i64> = tx
        .query_row(
            "SELECT id FROM picks WHERE game_id=?1 AND market_key=?2 AND point IS ?3
                AND side=?4 AND best_book=?5 AND captured_at_max=?6",
            rusqlite::params![
                c.game_id,
                c.market_key.as_str(),
                c.point,
                c.side.as_str(),
                c.best_book,
                c.captured_at_max.to_rfc3339(),
            ],
            |row| row.get(0),
        )
        .ok();

    if let Some(id) = existing {
        return Ok((id, false));
    }

    tx.execute(
        "INSERT INTO picks
            (game_id, market_key, point, side, best_book, captured_at_max, captured_at_min,
             consensus_prob, best_decimal, ev, kelly_fraction, stake, consensus_books, sharp_books,
             source, created_at)
         VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16)",
        rusqlite::params![
            c.game_id,
            c.market_key.as_str(),
            c.point,
            c.side.as_str(),
            c.best_book,
            c.captured_at_max.to_rfc3339(),
            c.captured_at_min.to_rfc3339(),
            c.consensus_prob,
            c.best_decimal,
            c.ev,
            c.kelly_fraction,
            c.stake,
            c.consensus_books,
            c.sharp_books,
            "pipeline",
            created_at.to_rfc3339(),
        ],
    )?;
    Ok((tx.last_insert_rowid(), true))
}

fn persist_score(
    tx: &rusqlite::Transaction,
    pick_id: i64,
    version: &str,
    c: &Candidate,
    created_at: chrono::DateTime<Utc>,
) -> rusqlite::Result<()> {
    tx.execute(
        "INSERT OR IGNORE INTO pick_scores
            (pick_id, version, pqs, decision, drop_reason, components_json, features_json, created_at)
         VALUES (?1,?2,?3,?4,?5,?6,?7,?8)",
        rusqlite::params![
            pick_id,
            version,
            c.pqs,
            c.decision.as_str(),
            c.drop_reason,
            c.components_json,
            c.features_json,
            created_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

/// Generate, score, and persist picks across every (sport, market) pair,
/// then apply per-sport and global run caps on top of the already-Kept
/// candidates. Ties broken by `(sport_key, market_key, event_id, created_at,
/// pick_id)` ascending once `pqs` descending has been applied, matching
/// `spec.md §4.6`'s deterministic cap-throttle order.
pub fn run_picks(
    store: &Store,
    settings: &Settings,
    sport_keys: &[String],
    markets: &[MarketKey],
) -> Result<PicksSummary, AppError> {
    let now = Utc::now();
    let mut all_candidates = Vec::new();
    for sport_key in sport_keys {
        for &market in markets {
            all_candidates.extend(build_candidates(store, settings, sport_key, market, now)?);
        }
    }

    let considered = all_candidates.len() as i64;

    let mut inserted = 0i64;
    let mut skipped_existing = 0i64;
    let persisted: Vec<(i64, chrono::DateTime<Utc>, Candidate)> = store
        .with_tx(|tx| {
            let mut out = Vec::with_capacity(all_candidates.len());
            for c in all_candidates {
                let created_at = now;
                let (pick_id, was_inserted) = persist_pick(tx, &c, created_at)?;
                if was_inserted {
                    inserted += 1;
                } else {
                    skipped_existing += 1;
                }
                out.push((pick_id, created_at, c));
            }
            Ok(out)
        })
        .map_err(|e| AppError::Internal(anyhow::anyhow!(e)))?;

    // Per-sport cap-throttle over Keep candidates.
    let mut by_sport: std::collections::BTreeMap<String, Vec<usize>> = std::collections::BTreeMap::new();
    for (idx, (_, _, c)) in persisted.iter().enumerate() {
        if c.decision == Decision::Keep {
            by_sport.entry(c.sport_key.clone()).or_default().push(idx);
        }
    }

    let mut throttled_idxs: std::collections::HashSet<usize> = std::collections::HashSet::new();
    for (sport_key, idxs) in &by_sport {
        let cap = settings.max_picks_for_sport(sport_key);
        let mut ordered = idxs.clone();
        ordered.sort_by(|&a, &b| sort_key(&persisted[a]).cmp(&sort_key(&persisted[b])));
        for &idx in ordered.iter().skip(cap.max(0) as usize) {
            throttled_idxs.insert(idx);
        }
    }

    // Global run cap across whatever survives the per-sport cap.
    let mut surviving: Vec<usize> = persisted
        .iter()
        .enumerate()
        .filter(|(idx, (_, _, c))| c.decision == Decision::Keep && !throttled_idxs.contains(idx))
        .map(|(idx, _)| idx)
        .collect();
    surviving.sort_by(|&a, &b| sort_key(&persisted[a]).cmp(&sort_key(&persisted[b])));
    for &idx in surviving.iter().skip(settings.run_max_picks_total.max(0) as usize) {
        throttled_idxs.insert(idx);
    }

    let mut summary = PicksSummary {
        candidates_considered: considered,
        inserted,
        skipped_existing,
        ..Default::default()
    };
    let mut scored: Vec<(i64, chrono::DateTime<Utc>, Candidate)> = Vec::with_capacity(persisted.len());
    for (idx, (pick_id, created_at, c)) in persisted.into_iter().enumerate() {
        let (decision, drop_reason) = if throttled_idxs.contains(&idx) {
            (Decision::Drop, Some("cap_throttle".to_string()))
        } else {
            (c.decision, c.drop_reason.clone())
        };

        match decision {
            Decision::Keep => summary.picks_kept += 1,
            Decision::Warn => summary.picks_warned += 1,
            Decision::Drop => {
                summary.picks_dropped += 1;
                if throttled_idxs.contains(&idx) {
                    summary.cap_throttled += 1;
                }
            }
        }

        let final_candidate = Candidate { decision, drop_reason, ..clone_for_score(&c) };
        scored.push((pick_id, created_at, final_candidate));
    }

    store
        .with_tx(|tx| {
            for (pick_id, created_at, c) in &scored {
                persist_score(tx, *pick_id, &settings.pqs_version, c, *created_at)?;
            }
            Ok(())
        })
        .map_err(|e| AppError::Internal(anyhow::anyhow!(e)))?;

    Ok(summary)
}

fn clone_for_score(c: &Candidate) -> Candidate {
    Candidate {
        game_id: c.game_id,
        event_id: c.event_id.clone(),
        sport_key: c.sport_key.clone(),
        market_key: c.market_key,
        point: c.point,
        side: c.side,
        best_book: c.best_book.clone(),
        consensus_prob: c.consensus_prob,
        best_decimal: c.best_decimal,
        ev: c.ev,
        kelly_fraction: c.kelly_fraction,
        stake: c.stake,
        consensus_books: c.consensus_books,
        sharp_books: c.sharp_books,
        captured_at_max: c.captured_at_max,
        captured_at_min: c.captured_at_min,
        pqs: c.pqs,
        decision: c.decision,
        drop_reason: c.drop_reason.clone(),
        components_json: c.components_json.clone(),
        features_json: c.features_json.clone(),
    }
}

fn sort_key(entry: &(i64, chrono::DateTime<Utc>, Candidate)) -> (i64, String, String, String, String, i64) {
    let (pick_id, created_at, c) = entry;
    // negate pqs via a fixed-point inversion so ascending tuple order yields
    // pqs-descending-then-deterministic-tiebreak.
    let neg_pqs = ((1.0 - c.pqs) * 1_000_000.0).round() as i64;
    (neg_pqs, c.sport_key.clone(), c.market_key.as_str().to_string(), c.event_id.clone(), created_at.to_rfc3339(), *pick_id)
}

#[derive(Debug, Clone, Serialize)]
pub struct PickListItem {
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
    pub pqs: f64,
    pub decision: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default, Clone)]
pub struct PickListFilters {
    pub sport_key: Option<String>,
    pub market_key: Option<String>,
    pub date: Option<NaiveDate>,
    pub limit: i64,
}

/// User-visible picks (`KEEP`/`WARN` only), newest first.
pub fn list_latest_picks(store: &Store, settings: &Settings, filters: &PickListFilters) -> Result<Vec<PickListItem>, AppError> {
    let rows: Vec<PickListItem> = store.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT p.id, g.event_id, g.sport_key, p.market_key, p.point, p.side, p.best_book,
                    p.consensus_prob, p.best_decimal, p.ev, p.kelly_fraction, p.stake,
                    s.pqs, s.decision, p.created_at, g.commence_time
             FROM picks p
             JOIN games g ON g.id = p.game_id
             JOIN pick_scores s ON s.pick_id = p.id AND s.version = ?1
             WHERE s.decision IN ('KEEP','WARN')
             ORDER BY p.created_at DESC, p.id DESC",
        )?;
        let out = stmt
            .query_map([settings.pqs_version.clone()], |row| {
                let created_at_raw: String = row.get(14)?;
                let commence_time_raw: String = row.get(15)?;
                Ok((
                    PickListItem {
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
                        created_at: created_at_raw.parse().unwrap_or_else(|_| Utc::now()),
                    },
                    commence_time_raw,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(out)
    })?;

    let limit = if filters.limit > 0 { filters.limit as usize } else { 100 };
    Ok(rows
        .into_iter()
        .filter(|(item, commence_time_raw)| {
            if let Some(sport_key) = &filters.sport_key {
                if &item.sport_key != sport_key {
                    return false;
                }
            }
            if let Some(market_key) = &filters.market_key {
                if &item.market_key != market_key {
                    return false;
                }
            }
            if let Some(date) = filters.date {
                let matches = commence_time_raw
                    .parse::<DateTime<Utc>>()
                    .map(|dt| dt.date_naive() == date)
                    .unwrap_or(false);
                if !matches {
                    return false;
                }
            }
            true
        })
        .map(|(item, _)| item)
        .take(limit)
        .collect())
}

#[derive(Debug, Clone, Serialize)]
pub struct RecommendedPick {
    #[serde(flatten)]
    pub item: PickListItem,
    pub features: Value,
    pub components: Value,
    pub why: String,
}

fn build_why(item: &PickListItem, features: &Value, components: &Value) -> String {
    let ev_pct = item.ev * 100.0;
    let agreement = features.get("agreement_strength").and_then(|v| v.as_f64()).unwrap_or(0.0);
    let clv_prior = components.get("prior_score").and_then(|v| v.as_f64());
    let mut why = format!(
        "{:.1}% EV at {} ({:.2} decimal), PQS {:.2} from {}",
        ev_pct, item.best_book, item.best_decimal, item.pqs, item.decision
    );
    why.push_str(&format!(", book agreement {:.2}", agreement));
    if let Some(prior) = clv_prior {
        why.push_str(&format!(", CLV-prior component {:.2}", prior));
    }
    why
}

/// `KEEP`-only picks ranked by PQS descending, carrying their feature
/// vector, scoring components, and a short human-readable rationale.
pub fn list_recommended_picks(
    store: &Store,
    settings: &Settings,
    sport_key: Option<&str>,
    market_key: Option<&str>,
    limit: i64,
) -> Result<Vec<RecommendedPick>, AppError> {
    let rows: Vec<(PickListItem, String, String)> = store.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT p.id, g.event_id, g.sport_key, p.market_key, p.point, p.side, p.best_book,
                    p.consensus_prob, p.best_decimal, p.ev, p.kelly_fraction, p.stake,
                    s.pqs, s.decision, p.created_at, s.features_json, s.components_json
             FROM picks p
             JOIN games g ON g.id = p.game_id
             JOIN pick_scores s ON s.pick_id = p.id AND s.version = ?1
             WHERE s.decision = 'KEEP'
             ORDER BY s.pqs DESC, p.id ASC",
        )?;
        let out = stmt
            .query_map([settings.pqs_version.clone()], |row| {
                let created_at_raw: String = row.get(14)?;
                Ok((
                    PickListItem {
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
                        created_at: created_at_raw.parse().unwrap_or_else(|_| Utc::now()),
                    },
                    row.get::<_, String>(15)?,
                    row.get::<_, String>(16)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(out)
    })?;

    let limit = if limit > 0 { limit as usize } else { 50 };
    Ok(rows
        .into_iter()
        .filter(|(item, _, _)| sport_key.map(|s| item.sport_key == s).unwrap_or(true))
        .filter(|(item, _, _)| market_key.map(|m| item.market_key == m).unwrap_or(true))
        .take(limit)
        .map(|(item, features_json, components_json)| {
            let features: Value = serde_json::from_str(&features_json).unwrap_or_default();
            let components: Value = serde_json::from_str(&components_json).unwrap_or_default();
            let why = build_why(&item, &features, &components);
            RecommendedPick { item, features, components, why }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sort_key_orders_by_pqs_descending() {
        let now = Utc::now();
        let hi = Candidate {
            game_id: 1,
            event_id: "e1".into(),
            sport_key: "s".into(),
            market_key: MarketKey::H2h,
            point: None,
            side: Side::Home,
            best_book: "b".into(),
            consensus_prob: 0.5,
            best_decimal: 2.0,
            ev: 0.05,
            kelly_fraction: 0.01,
            stake: 1.0,
            consensus_books: 6,
            sharp_books: 1,
            captured_at_max: now,
            captured_at_min: now,
            pqs: 0.9,
            decision: Decision::Keep,
            drop_reason: None,
            components_json: "{}".into(),
            features_json: "{}".into(),
        };
        let mut lo = clone_for_score(&hi);
        lo.pqs = 0.3;
        let a = (1i64, now, hi);
        let b = (2i64, now, lo);
        assert!(sort_key(&a) < sort_key(&b));
    }
}
