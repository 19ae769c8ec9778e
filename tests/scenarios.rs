//! End-to-end scenarios that need a real SQLite file rather than the
//! `#[cfg(test)]`-gated in-memory store, so they live here instead of
//! alongside their modules. Numbers are grounded on `spec.md`'s worked
//! scenarios S4/S5/S6; S1-S3 are covered by unit tests in `math.rs`, and S2
//! by the group-hash unit tests in `ingest/mod.rs` (see `DESIGN.md`).

use chrono::{Duration, Utc};
use edgeline_backend::clv::compute_pick_clv;
use edgeline_backend::config::Settings;
use edgeline_backend::db::Store;
use edgeline_backend::domain::MarketKey;
use edgeline_backend::market_unlock::{allowed_markets, enforce_market_allowed, get_clv_computed_count};

fn open_test_store() -> (tempfile::TempDir, Store) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scenarios.sqlite3");
    let store = Store::open(path.to_str().unwrap()).unwrap();
    (dir, store)
}

/// S4: two-book two-way h2h. Closing consensus averages both books' fair
/// probabilities; a post-commence snapshot row for the same book must not
/// leak into the closing window.
#[test]
fn s4_clv_with_closing_snapshot() {
    let (_dir, store) = open_test_store();
    let mut settings = Settings::from_env();
    settings.consensus_min_books = 2;

    let commence_time = Utc::now() - Duration::hours(2);
    let pre_close = commence_time - Duration::minutes(1);
    let post_close = commence_time + Duration::minutes(1);
    let pick_taken_at = commence_time - Duration::minutes(30);

    store
        .with_tx(|tx| {
            tx.execute(
                "INSERT INTO games (sport_key, event_id, commence_time, home_team, away_team, created_at, updated_at)
                 VALUES ('basketball_nba','e4',?1,'Home','Away',?1,?1)",
                [&commence_time.to_rfc3339()],
            )?;

            let insert_snapshot = |bookmaker: &str,
                                    side: &str,
                                    captured_at: chrono::DateTime<Utc>,
                                    decimal: f64,
                                    fair_prob: f64|
             -> rusqlite::Result<()> {
                tx.execute(
                    "INSERT INTO odds_snapshots (game_id, captured_at, market_key, bookmaker, point, side,
                        american, decimal_odds, implied_prob, fair_prob, group_hash)
                     VALUES (1,?1,'h2h',?2,NULL,?3,?4,?5,?6,?7,?8)",
                    rusqlite::params![
                        captured_at.to_rfc3339(),
                        bookmaker,
                        side,
                        if decimal >= 2.0 { (decimal - 1.0) * 100.0 } else { -100.0 / (decimal - 1.0) },
                        decimal,
                        1.0 / decimal,
                        fair_prob,
                        format!("{bookmaker}-{side}-{captured_at}"),
                    ],
                )?;
                Ok(())
            };

            // booka at T-1m: home fair_prob=0.60, closing decimal 1.95
            insert_snapshot("booka", "home", pre_close, 1.95, 0.60)?;
            insert_snapshot("booka", "away", pre_close, 1.80, 0.40)?;
            // bookb at T-1m: home fair_prob=0.55
            insert_snapshot("bookb", "home", pre_close, 2.05, 0.55)?;
            insert_snapshot("bookb", "away", pre_close, 1.90, 0.45)?;
            // booka again post-commence: must be excluded from the closing window
            insert_snapshot("booka", "home", post_close, 3.00, 0.80)?;
            insert_snapshot("booka", "away", post_close, 1.20, 0.20)?;

            tx.execute(
                "INSERT INTO picks (game_id, market_key, point, side, best_book, captured_at_max, captured_at_min,
                    consensus_prob, best_decimal, ev, kelly_fraction, stake, consensus_books, sharp_books, source, created_at)
                 VALUES (1,'h2h',NULL,'home','booka',?1,?1,0.55,2.10,0.05,0.01,10.0,2,0,'test',?1)",
                [&pick_taken_at.to_rfc3339()],
            )?;
            Ok(())
        })
        .unwrap();

    let result = compute_pick_clv(&store, &settings, 1).unwrap();

    assert!(result.skipped_reason.is_none(), "unexpected skip: {:?}", result.skipped_reason);
    assert!((result.closing_consensus_prob.unwrap() - 0.575).abs() < 1e-9);
    assert!((result.market_clv.unwrap() - 0.025).abs() < 1e-9);
    assert!((result.closing_book_decimal.unwrap() - 1.95).abs() < 1e-9);
    assert!(result.book_clv.unwrap() > 0.0);
}

/// S5: soccer three-way h2h. `required_sides` pulls in the draw side for
/// any `soccer_*` sport key.
#[test]
fn s5_soccer_three_way_clv() {
    let (_dir, store) = open_test_store();
    let mut settings = Settings::from_env();
    settings.consensus_min_books = 2;

    let commence_time = Utc::now() - Duration::hours(2);
    let pre_close = commence_time - Duration::minutes(1);
    let pick_taken_at = commence_time - Duration::minutes(30);

    store
        .with_tx(|tx| {
            tx.execute(
                "INSERT INTO games (sport_key, event_id, commence_time, home_team, away_team, created_at, updated_at)
                 VALUES ('soccer_epl','e5',?1,'Home','Away',?1,?1)",
                [&commence_time.to_rfc3339()],
            )?;

            let insert_snapshot = |bookmaker: &str, side: &str, fair_prob: f64| -> rusqlite::Result<()> {
                let decimal = 1.0 / fair_prob;
                tx.execute(
                    "INSERT INTO odds_snapshots (game_id, captured_at, market_key, bookmaker, point, side,
                        american, decimal_odds, implied_prob, fair_prob, group_hash)
                     VALUES (1,?1,'h2h',?2,NULL,?3,-110.0,?4,?5,?6,?7)",
                    rusqlite::params![
                        pre_close.to_rfc3339(),
                        bookmaker,
                        side,
                        decimal,
                        fair_prob,
                        fair_prob,
                        format!("{bookmaker}-{side}"),
                    ],
                )?;
                Ok(())
            };

            // book1: draw=0.30, home=0.40, away=0.30
            insert_snapshot("book1", "draw", 0.30)?;
            insert_snapshot("book1", "home", 0.40)?;
            insert_snapshot("book1", "away", 0.30)?;
            // book2: draw=0.28, home=0.42, away=0.30
            insert_snapshot("book2", "draw", 0.28)?;
            insert_snapshot("book2", "home", 0.42)?;
            insert_snapshot("book2", "away", 0.30)?;

            tx.execute(
                "INSERT INTO picks (game_id, market_key, point, side, best_book, captured_at_max, captured_at_min,
                    consensus_prob, best_decimal, ev, kelly_fraction, stake, consensus_books, sharp_books, source, created_at)
                 VALUES (1,'h2h',NULL,'draw','book1',?1,?1,0.25,2.50,0.05,0.01,10.0,2,0,'test',?1)",
                [&pick_taken_at.to_rfc3339()],
            )?;
            Ok(())
        })
        .unwrap();

    let result = compute_pick_clv(&store, &settings, 1).unwrap();

    assert!(result.skipped_reason.is_none(), "unexpected skip: {:?}", result.skipped_reason);
    assert!((result.closing_consensus_prob.unwrap() - 0.29).abs() < 1e-9);
    assert!((result.market_clv.unwrap() - 0.04).abs() < 1e-9);
}

/// S6: the spreads/totals market lock lifts once the global CLV-computed
/// pick count crosses `markets_unlock_clv_min`.
#[test]
fn s6_market_unlock_gate_lifts_with_clv_volume() {
    let (_dir, store) = open_test_store();
    let mut settings = Settings::from_env();
    settings.markets_unlock_mode = "gate".to_string();
    settings.markets_unlock_clv_min = 100;

    assert_eq!(get_clv_computed_count(&store).unwrap(), 0);
    assert_eq!(allowed_markets(&store, &settings).unwrap(), vec![MarketKey::H2h]);
    assert!(enforce_market_allowed(&store, &settings, MarketKey::Spreads).is_err());
    assert!(enforce_market_allowed(&store, &settings, MarketKey::H2h).is_ok());

    store
        .with_tx(|tx| {
            let now = Utc::now().to_rfc3339();
            tx.execute(
                "INSERT INTO games (sport_key, event_id, commence_time, home_team, away_team, created_at, updated_at)
                 VALUES ('basketball_nba','e6',?1,'Home','Away',?1,?1)",
                [&now],
            )?;
            for i in 0..101 {
                tx.execute(
                    "INSERT INTO picks (game_id, market_key, point, side, best_book, captured_at_max, captured_at_min,
                        consensus_prob, best_decimal, ev, kelly_fraction, stake, consensus_books, sharp_books, source,
                        created_at, clv_computed_at)
                     VALUES (1,'h2h',NULL,'home',?1,?2,?2,0.55,2.0,0.05,0.01,10.0,5,1,'test',?2,?2)",
                    rusqlite::params![format!("book{i}"), now],
                )?;
            }
            Ok(())
        })
        .unwrap();

    assert_eq!(get_clv_computed_count(&store).unwrap(), 101);
    let allowed = allowed_markets(&store, &settings).unwrap();
    assert!(allowed.contains(&MarketKey::H2h));
    assert!(allowed.contains(&MarketKey::Spreads));
    assert!(allowed.contains(&MarketKey::Totals));
    assert!(enforce_market_allowed(&store, &settings, MarketKey::Spreads).is_ok());
}
