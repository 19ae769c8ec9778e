//! Core enums and small value types shared across the pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketKey {
    H2h,
    Spreads,
    Totals,
}

impl MarketKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketKey::H2h => "h2h",
            MarketKey::Spreads => "spreads",
            MarketKey::Totals => "totals",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "h2h" => Some(MarketKey::H2h),
            "spreads" => Some(MarketKey::Spreads),
            "totals" => Some(MarketKey::Totals),
            _ => None,
        }
    }

    /// The side set every fully-quoted group must contain for this market,
    /// ignoring the soccer three-way h2h special case (see `required_sides`).
    pub fn required_sides(&self) -> &'static [Side] {
        match self {
            MarketKey::H2h | MarketKey::Spreads => &[Side::Away, Side::Home],
            MarketKey::Totals => &[Side::Over, Side::Under],
        }
    }
}

impl fmt::Display for MarketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Required side set for a (sport, market) pair, including the soccer
/// three-way h2h special case. Grounded on `services/clv.py::_required_sides`.
pub fn required_sides(sport_key: &str, market: MarketKey) -> &'static [Side] {
    match market {
        MarketKey::H2h if sport_key.starts_with("soccer_") => &[Side::Away, Side::Draw, Side::Home],
        _ => market.required_sides(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Home,
    Away,
    Draw,
    Over,
    Under,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Home => "home",
            Side::Away => "away",
            Side::Draw => "draw",
            Side::Over => "over",
            Side::Under => "under",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "home" => Some(Side::Home),
            "away" => Some(Side::Away),
            "draw" => Some(Side::Draw),
            "over" => Some(Side::Over),
            "under" => Some(Side::Under),
            _ => None,
        }
    }

    /// The complementary two-way side, used by the dispersion feature. DRAW
    /// has no natural opposite; callers should skip dispersion contributions
    /// for DRAW legs rather than calling this.
    pub fn opposite(&self) -> Option<Side> {
        match self {
            Side::Home => Some(Side::Away),
            Side::Away => Some(Side::Home),
            Side::Over => Some(Side::Under),
            Side::Under => Some(Side::Over),
            Side::Draw => None,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Decision {
    Keep,
    Warn,
    Drop,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Keep => "KEEP",
            Decision::Warn => "WARN",
            Decision::Drop => "DROP",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "KEEP" => Some(Decision::Keep),
            "WARN" => Some(Decision::Warn),
            "DROP" => Some(Decision::Drop),
            _ => None,
        }
    }

    pub fn is_user_visible(&self) -> bool {
        matches!(self, Decision::Keep | Decision::Warn)
    }
}

/// A single leg of a (possibly parlayed) bet. Grounded on
/// `domain/types.py::Leg`.
#[derive(Debug, Clone, PartialEq)]
pub struct Leg {
    pub event_id: String,
    pub market_key: MarketKey,
    pub side: Side,
    pub decimal_odds: f64,
    pub fair_prob: f64,
    pub point: Option<f64>,
    pub book: String,
}

impl Leg {
    pub fn new(
        event_id: impl Into<String>,
        market_key: MarketKey,
        side: Side,
        decimal_odds: f64,
        fair_prob: f64,
        point: Option<f64>,
        book: impl Into<String>,
    ) -> Self {
        Self {
            event_id: event_id.into(),
            market_key,
            side,
            decimal_odds,
            fair_prob,
            point,
            book: book.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn market_key_round_trips() {
        for m in [MarketKey::H2h, MarketKey::Spreads, MarketKey::Totals] {
            assert_eq!(MarketKey::parse(m.as_str()), Some(m));
        }
    }

    #[test]
    fn soccer_h2h_includes_draw() {
        let sides = required_sides("soccer_epl", MarketKey::H2h);
        assert!(sides.contains(&Side::Draw));
        let sides = required_sides("basketball_nba", MarketKey::H2h);
        assert!(!sides.contains(&Side::Draw));
    }

    #[test]
    fn opposite_sides() {
        assert_eq!(Side::Home.opposite(), Some(Side::Away));
        assert_eq!(Side::Over.opposite(), Some(Side::Under));
        assert_eq!(Side::Draw.opposite(), None);
    }
}
