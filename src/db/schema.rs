//! Schema DDL and connection pragmas.
//!
//! Grounded on `src/signals/db_storage.rs`'s `SCHEMA_SQL` constant and WAL
//! pragma set in the reference backend. Column scales follow `spec.md §9`;
//! sqlite has no fixed-point type so everything is `REAL`, rounded at the
//! persistence boundary in `src/db/store.rs`.

pub const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA cache_size = -64000;
PRAGMA temp_store = MEMORY;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS metadata (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS games (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    sport_key      TEXT NOT NULL,
    event_id       TEXT NOT NULL UNIQUE,
    commence_time  TEXT NOT NULL,
    home_team      TEXT NOT NULL,
    away_team      TEXT NOT NULL,
    created_at     TEXT NOT NULL,
    updated_at     TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS ix_games_sport_key ON games(sport_key);
CREATE INDEX IF NOT EXISTS ix_games_commence_time ON games(commence_time);

CREATE TABLE IF NOT EXISTS odds_groups (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    game_id          INTEGER NOT NULL REFERENCES games(id),
    market_key       TEXT NOT NULL,
    bookmaker        TEXT NOT NULL,
    point            REAL,
    last_hash        TEXT NOT NULL,
    last_captured_at TEXT NOT NULL,
    UNIQUE (game_id, market_key, bookmaker, point)
);
CREATE INDEX IF NOT EXISTS ix_odds_groups_lookup ON odds_groups(game_id, market_key, bookmaker);

CREATE TABLE IF NOT EXISTS odds_snapshots (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    game_id       INTEGER NOT NULL REFERENCES games(id),
    captured_at   TEXT NOT NULL,
    market_key    TEXT NOT NULL,
    bookmaker     TEXT NOT NULL,
    point         REAL,
    side          TEXT NOT NULL,
    american      REAL NOT NULL,
    decimal_odds  REAL NOT NULL,
    implied_prob  REAL NOT NULL,
    fair_prob     REAL NOT NULL,
    group_hash    TEXT NOT NULL,
    UNIQUE (game_id, captured_at, market_key, bookmaker, side, point)
);
CREATE INDEX IF NOT EXISTS ix_snapshots_group
    ON odds_snapshots(game_id, market_key, bookmaker, point, captured_at);
CREATE INDEX IF NOT EXISTS ix_snapshots_commence_join ON odds_snapshots(game_id, captured_at);

CREATE TABLE IF NOT EXISTS picks (
    id                       INTEGER PRIMARY KEY AUTOINCREMENT,
    game_id                  INTEGER NOT NULL REFERENCES games(id),
    market_key               TEXT NOT NULL,
    point                    REAL,
    side                     TEXT NOT NULL,
    best_book                TEXT NOT NULL,
    captured_at_max          TEXT NOT NULL,
    captured_at_min          TEXT NOT NULL,
    consensus_prob           REAL NOT NULL,
    best_decimal             REAL NOT NULL,
    ev                       REAL NOT NULL,
    kelly_fraction           REAL NOT NULL,
    stake                    REAL NOT NULL,
    consensus_books          INTEGER NOT NULL,
    sharp_books              INTEGER NOT NULL,
    source                   TEXT NOT NULL,
    created_at               TEXT NOT NULL,
    closing_consensus_prob   REAL,
    closing_book_decimal     REAL,
    closing_book_implied_prob REAL,
    market_clv               REAL,
    book_clv                 REAL,
    clv_computed_at          TEXT,
    UNIQUE (game_id, market_key, point, side, best_book, captured_at_max)
);
CREATE INDEX IF NOT EXISTS ix_picks_created_at ON picks(created_at);
CREATE INDEX IF NOT EXISTS ix_picks_clv_computed ON picks(clv_computed_at);
CREATE INDEX IF NOT EXISTS ix_picks_game ON picks(game_id, market_key);

CREATE TABLE IF NOT EXISTS pick_scores (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    pick_id       INTEGER NOT NULL REFERENCES picks(id),
    version       TEXT NOT NULL,
    pqs           REAL NOT NULL,
    decision      TEXT NOT NULL,
    drop_reason   TEXT,
    components_json TEXT NOT NULL,
    features_json   TEXT NOT NULL,
    created_at    TEXT NOT NULL,
    UNIQUE (pick_id, version)
);
CREATE INDEX IF NOT EXISTS ix_pick_scores_version ON pick_scores(version, decision);

CREATE TABLE IF NOT EXISTS clv_sport_stats (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    sport_key       TEXT NOT NULL,
    market_key      TEXT NOT NULL,
    side_type       TEXT,
    window_size     INTEGER NOT NULL,
    as_of           TEXT NOT NULL,
    n               INTEGER NOT NULL,
    mean_market_clv_bps   REAL NOT NULL,
    median_market_clv_bps REAL NOT NULL,
    pct_positive_market_clv REAL NOT NULL,
    mean_book_clv_bps     REAL,
    sharpe_like           REAL NOT NULL,
    is_weak               INTEGER NOT NULL,
    UNIQUE (sport_key, market_key, side_type, window_size, as_of)
);
CREATE INDEX IF NOT EXISTS ix_clv_sport_stats_lookup
    ON clv_sport_stats(sport_key, market_key, side_type, window_size, as_of);

CREATE TABLE IF NOT EXISTS pipeline_runs (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    run_type    TEXT NOT NULL,
    status      TEXT NOT NULL,
    sports      TEXT NOT NULL,
    markets     TEXT NOT NULL,
    stats_json  TEXT NOT NULL,
    error       TEXT,
    created_at  TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS ix_pipeline_runs_type ON pipeline_runs(run_type, created_at);

CREATE TABLE IF NOT EXISTS calibration_runs (
    id                           INTEGER PRIMARY KEY AUTOINCREMENT,
    eval_window_start            TEXT NOT NULL,
    eval_window_end              TEXT NOT NULL,
    pqs_version                  TEXT NOT NULL,
    current_config_snapshot_json TEXT NOT NULL,
    proposed_config_patch_json   TEXT NOT NULL,
    rationale_json                TEXT NOT NULL,
    status                        TEXT NOT NULL,
    applied_at                    TEXT,
    created_at                    TEXT NOT NULL
);
"#;
