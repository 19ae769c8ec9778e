//! Per-pick feature derivation.
//!
//! Grounded on `original_source/.../intelligence/features.py`.

use crate::consensus::{ConsensusResult, MarketView};
use crate::domain::Side;
use crate::stats::percentile;
use serde::Serialize;

fn clamp01(v: f64) -> f64 {
    v.clamp(0.0, 1.0)
}

/// 90th-minus-10th-percentile spread of vig-adjusted implied probabilities
/// for `side` across every book quoting both it and its opposite. Returns
/// 1.0 (maximally dispersed) when fewer than 3 books contribute, matching
/// the conservative default in `intelligence/features.py`.
pub fn compute_price_dispersion(view: &MarketView, side: Side) -> f64 {
    let opposite = side.opposite();
    let mut probs = Vec::new();

    for book in &view.complete_books {
        let side_decimal = view
            .rows
            .iter()
            .find(|r| &r.bookmaker == book && r.side == side)
            .map(|r| r.decimal);
        let Some(side_decimal) = side_decimal else { continue };
        if side_decimal <= 1.0 {
            continue;
        }
        let side_implied = 1.0 / side_decimal;

        let adjusted = match opposite {
            Some(opp) => {
                let opp_decimal = view
                    .rows
                    .iter()
                    .find(|r| &r.bookmaker == book && r.side == opp)
                    .map(|r| r.decimal);
                match opp_decimal {
                    Some(d) if d > 1.0 => {
                        let opp_implied = 1.0 / d;
                        crate::math::remove_vig(&[side_implied, opp_implied])
                            .map(|v| v[0])
                            .unwrap_or(side_implied)
                    }
                    _ => side_implied,
                }
            }
            None => side_implied,
        };
        probs.push(clamp01(adjusted));
    }

    if probs.len() < 3 {
        return 1.0;
    }
    probs.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let dispersion = percentile(&probs, 0.9) - percentile(&probs, 0.1);
    if dispersion > 0.25 {
        tracing::warn!(dispersion, "unusually wide price dispersion");
    }
    clamp01(dispersion)
}

#[derive(Debug, Clone, Serialize)]
pub struct PickFeatures {
    pub ev: f64,
    pub kelly_fraction: f64,
    pub book_count: i64,
    pub sharp_book_count: i64,
    pub agreement_strength: f64,
    pub price_dispersion: f64,
    pub best_vs_consensus_edge: f64,
    pub time_to_start_minutes: f64,
    pub market_liquidity_proxy: f64,
}

#[allow(clippy::too_many_arguments)]
pub fn compute_features(
    view: &MarketView,
    consensus: &ConsensusResult,
    side: Side,
    ev: f64,
    kelly_fraction: f64,
    now: chrono::DateTime<chrono::Utc>,
) -> PickFeatures {
    let dispersion = compute_price_dispersion(view, side);
    let agreement = clamp01(1.0 - dispersion / 0.5);
    let book_count = consensus.included_books.len() as i64;
    let sharp_book_count = consensus.sharp_books_included.len() as i64;

    let best_decimal = consensus.best_decimal.get(side.as_str()).copied().unwrap_or(1.0);
    let p_consensus = consensus
        .consensus_probs
        .as_ref()
        .and_then(|m| m.get(side.as_str()))
        .copied()
        .unwrap_or(0.0);
    let best_vs_consensus_edge = p_consensus - 1.0 / best_decimal;

    let time_to_start_minutes = (view.commence_time - now).num_seconds() as f64 / 60.0;
    let market_liquidity_proxy = book_count as f64 + 2.0 * sharp_book_count as f64;

    PickFeatures {
        ev,
        kelly_fraction,
        book_count,
        sharp_book_count,
        agreement_strength: agreement,
        price_dispersion: dispersion,
        best_vs_consensus_edge,
        time_to_start_minutes,
        market_liquidity_proxy,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MarketKey;
    use chrono::Utc;

    fn row(bookmaker: &str, side: Side, decimal: f64, fair_prob: f64, ts: chrono::DateTime<Utc>) -> crate::consensus::BookRow {
        crate::consensus::BookRow { bookmaker: bookmaker.to_string(), side, decimal, fair_prob, captured_at: ts }
    }

    #[test]
    fn dispersion_defaults_to_one_below_three_books() {
        let now = Utc::now();
        let view = MarketView {
            game_id: 1,
            event_id: "e".into(),
            sport_key: "basketball_nba".into(),
            home_team: "A".into(),
            away_team: "B".into(),
            commence_time: now,
            market_key: MarketKey::H2h,
            point: None,
            complete_books: vec!["a".into(), "b".into()],
            rows: vec![
                row("a", Side::Home, 2.0, 0.5, now),
                row("a", Side::Away, 2.0, 0.5, now),
                row("b", Side::Home, 2.0, 0.5, now),
                row("b", Side::Away, 2.0, 0.5, now),
            ],
            captured_at_min: now,
            captured_at_max: now,
        };
        assert_eq!(compute_price_dispersion(&view, Side::Home), 1.0);
    }
}
