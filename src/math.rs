//! Pure, deterministic, side-effect-free math kernel.
//!
//! Grounded on `original_source/.../core/math.py`. Every failure is a
//! structured `AppError::InvalidArgument`, never a panic or NaN.

use crate::error::AppError;

pub const EPS: f64 = 1e-9;

fn ensure_finite(value: f64, name: &str) -> Result<f64, AppError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(AppError::invalid(format!("{name} is not finite: {value}")))
    }
}

fn validate_probability(p: f64, name: &str) -> Result<f64, AppError> {
    let p = ensure_finite(p, name)?;
    if !(0.0..=1.0).contains(&p) {
        return Err(AppError::invalid(format!("{name} out of [0,1]: {p}")));
    }
    Ok(p)
}

/// American odds -> decimal odds. Requires |a| >= 100.
pub fn american_to_decimal(a: f64) -> Result<f64, AppError> {
    let a = ensure_finite(a, "american_odds")?;
    if a.abs() < 100.0 {
        return Err(AppError::invalid(format!(
            "american odds must have |a| >= 100, got {a}"
        )));
    }
    if a > 0.0 {
        Ok(1.0 + a / 100.0)
    } else {
        Ok(1.0 + 100.0 / a.abs())
    }
}

/// Decimal odds -> American odds. Requires d > 1.
pub fn decimal_to_american(d: f64) -> Result<i64, AppError> {
    let d = ensure_finite(d, "decimal_odds")?;
    if d <= 1.0 {
        return Err(AppError::invalid(format!("decimal odds must be > 1, got {d}")));
    }
    if d >= 2.0 {
        Ok(((d - 1.0) * 100.0).round() as i64)
    } else {
        Ok((-100.0 / (d - 1.0)).round() as i64)
    }
}

/// American odds -> implied probability (including vig).
pub fn american_to_implied_prob(a: f64) -> Result<f64, AppError> {
    let a = ensure_finite(a, "american_odds")?;
    if a.abs() < 100.0 {
        return Err(AppError::invalid(format!(
            "american odds must have |a| >= 100, got {a}"
        )));
    }
    if a > 0.0 {
        Ok(100.0 / (a + 100.0))
    } else {
        Ok(a.abs() / (a.abs() + 100.0))
    }
}

/// Remove vig: proportionally renormalise a non-empty set of implied
/// probabilities so they sum to 1.
pub fn remove_vig(ps: &[f64]) -> Result<Vec<f64>, AppError> {
    if ps.is_empty() {
        return Err(AppError::invalid("remove_vig requires at least one probability"));
    }
    let mut sum = 0.0;
    for (i, &p) in ps.iter().enumerate() {
        validate_probability(p, &format!("ps[{i}]"))?;
        sum += p;
    }
    if sum <= EPS {
        return Err(AppError::invalid(format!("remove_vig sum too small: {sum}")));
    }
    Ok(ps.iter().map(|p| p / sum).collect())
}

/// Weighted-average-then-devig consensus across books sharing an identical
/// side set. `books` is a slice of per-book fair-probability vectors, all the
/// same length and implicitly over the same ordered side list; `weights`
/// must be non-negative and sum above `EPS`.
pub fn consensus_fair_prob(books: &[Vec<f64>], weights: &[f64]) -> Result<Vec<f64>, AppError> {
    if books.is_empty() {
        return Err(AppError::invalid("consensus_fair_prob requires at least one book"));
    }
    if books.len() != weights.len() {
        return Err(AppError::invalid("books and weights length mismatch"));
    }
    let n_sides = books[0].len();
    if n_sides == 0 {
        return Err(AppError::invalid("consensus_fair_prob requires non-empty side set"));
    }
    for (i, book) in books.iter().enumerate() {
        if book.len() != n_sides {
            return Err(AppError::invalid(format!(
                "book {i} has {} sides, expected {n_sides}",
                book.len()
            )));
        }
    }
    let mut weight_sum = 0.0;
    for (i, &w) in weights.iter().enumerate() {
        let w = ensure_finite(w, &format!("weights[{i}]"))?;
        if w < 0.0 {
            return Err(AppError::invalid(format!("weights[{i}] negative: {w}")));
        }
        weight_sum += w;
    }
    if weight_sum <= EPS {
        return Err(AppError::invalid("weights sum too small"));
    }

    let mut weighted = vec![0.0; n_sides];
    for (book, &w) in books.iter().zip(weights.iter()) {
        for (side_idx, &p) in book.iter().enumerate() {
            validate_probability(p, "book fair prob")?;
            weighted[side_idx] += p * w;
        }
    }
    for v in weighted.iter_mut() {
        *v /= weight_sum;
    }

    let devigged = remove_vig(&weighted)?;
    let drift = (devigged.iter().sum::<f64>() - 1.0).abs();
    if drift > EPS {
        return remove_vig(&devigged);
    }
    Ok(devigged)
}

/// Expected value per unit staked: `p * d - 1`.
pub fn ev(fair_prob: f64, best_decimal_odds: f64) -> Result<f64, AppError> {
    let p = validate_probability(fair_prob, "fair_prob")?;
    let d = ensure_finite(best_decimal_odds, "best_decimal_odds")?;
    if d <= 1.0 {
        return Err(AppError::invalid(format!("best_decimal_odds must be > 1, got {d}")));
    }
    Ok(p * d - 1.0)
}

/// Capped, multiplied fractional Kelly stake.
pub fn kelly_fraction(
    fair_prob: f64,
    best_decimal_odds: f64,
    kelly_multiplier: f64,
    max_cap: f64,
) -> Result<f64, AppError> {
    let p = validate_probability(fair_prob, "fair_prob")?;
    let d = ensure_finite(best_decimal_odds, "best_decimal_odds")?;
    if d <= 1.0 {
        return Err(AppError::invalid(format!("best_decimal_odds must be > 1, got {d}")));
    }
    let b = d - 1.0;
    let q = 1.0 - p;
    let full_kelly = (b * p - q) / b;
    if full_kelly <= 0.0 {
        return Ok(0.0);
    }
    Ok(max_cap.min(kelly_multiplier * full_kelly))
}

/// CLV between a closing and a pick-time probability (market or book flavor
/// share this signature).
pub fn clv_delta(closing_prob: f64, pick_time_prob: f64) -> Result<f64, AppError> {
    let close = validate_probability(closing_prob, "closing_prob")?;
    let pick = validate_probability(pick_time_prob, "pick_time_prob")?;
    Ok(close - pick)
}

/// Product of independent legs' decimal odds.
pub fn parlay_decimal_odds(legs: &[f64]) -> Result<f64, AppError> {
    if legs.is_empty() {
        return Err(AppError::invalid("parlay requires at least one leg"));
    }
    let mut product = 1.0;
    for (i, &d) in legs.iter().enumerate() {
        let d = ensure_finite(d, &format!("legs[{i}]"))?;
        if d <= 1.0 {
            return Err(AppError::invalid(format!("legs[{i}] must be > 1, got {d}")));
        }
        product *= d;
    }
    Ok(product)
}

/// Product of independent legs' fair probabilities.
pub fn parlay_prob(legs: &[f64]) -> Result<f64, AppError> {
    if legs.is_empty() {
        return Err(AppError::invalid("parlay requires at least one leg"));
    }
    let mut product = 1.0;
    for (i, &p) in legs.iter().enumerate() {
        product *= validate_probability(p, &format!("legs[{i}]"))?;
    }
    Ok(product)
}

pub fn parlay_ev(leg_probs: &[f64], leg_decimals: &[f64]) -> Result<f64, AppError> {
    if leg_probs.len() != leg_decimals.len() {
        return Err(AppError::invalid("parlay_ev: probs/decimals length mismatch"));
    }
    let p = parlay_prob(leg_probs)?;
    let d = parlay_decimal_odds(leg_decimals)?;
    Ok(p * d - 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn american_decimal_round_trip() {
        for a in [-250.0, -110.0, 100.0, 150.0, 400.0] {
            let d = american_to_decimal(a).unwrap();
            let back = decimal_to_american(d).unwrap();
            assert_eq!(back, a as i64);
        }
    }

    #[test]
    fn american_to_decimal_rejects_small_magnitude() {
        assert!(american_to_decimal(50.0).is_err());
        assert!(american_to_decimal(-50.0).is_err());
    }

    #[test]
    fn remove_vig_sums_to_one() {
        let out = remove_vig(&[0.55, 0.55]).unwrap();
        let sum: f64 = out.iter().sum();
        assert!((sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn remove_vig_rejects_empty() {
        assert!(remove_vig(&[]).is_err());
    }

    #[test]
    fn ev_and_kelly_scenario_s3() {
        // spec.md S3: p=0.53, d=2.10, mult=0.25, cap=0.05
        let e = ev(0.53, 2.10).unwrap();
        assert!((e - 0.113).abs() < 1e-6);
        let k = kelly_fraction(0.53, 2.10, 0.25, 0.05).unwrap();
        // b=1.10, q=0.47, f*=(1.10*0.53-0.47)/1.10 ~= 0.10272727
        assert!((k - 0.25 * 0.10272727272727).abs() < 1e-6);
        assert!(k < 0.05);
    }

    #[test]
    fn kelly_is_zero_when_no_edge() {
        let k = kelly_fraction(0.40, 2.0, 0.25, 0.05).unwrap();
        assert_eq!(k, 0.0);
    }

    #[test]
    fn consensus_fair_prob_matches_scenario_s1() {
        // spec.md S1: home fair probs {pinnacle:0.62, fanduel:0.50, draftkings:0.50, circa:0.50}
        // side set is [home, away]; away derived as complement for this test input.
        let books = vec![
            vec![0.62, 0.38],
            vec![0.50, 0.50],
            vec![0.50, 0.50],
            vec![0.50, 0.50],
        ];
        let weights = vec![2.0, 1.0, 1.0, 2.0]; // pinnacle, fanduel, draftkings, circa
        let consensus = consensus_fair_prob(&books, &weights).unwrap();
        assert!(consensus[0] > 0.53);
        let sum: f64 = consensus.iter().sum();
        assert!((sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn parlay_multiplies_legs() {
        let d = parlay_decimal_odds(&[2.0, 1.5]).unwrap();
        assert!((d - 3.0).abs() < 1e-9);
    }
}
