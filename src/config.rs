//! Environment-driven configuration.
//!
//! Grounded on `src/models.rs`'s `Config::from_env()` in the reference
//! backend: `dotenv().ok()` then `std::env::var(..).unwrap_or_else(..)`
//! chains, with `.parse().unwrap_or(default)` numeric coercion. Field list
//! and defaults come from `original_source/.../config.py`; fields that file
//! references but never defines (see DESIGN.md "Open Questions resolved")
//! are given explicit defaults here rather than left to fail at load time,
//! per `spec.md §9`.

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.is_empty())
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_i64(key: &str, default: i64) -> i64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

fn env_csv(key: &str) -> Vec<String> {
    std::env::var(key)
        .unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub app_name: String,
    pub app_env: String,
    pub database_url: String,

    pub odds_api_key: Option<String>,
    pub odds_api_base_url: String,
    pub odds_sports_whitelist: Vec<String>,
    pub odds_markets: Vec<String>,
    pub odds_regions: String,
    pub bookmaker_whitelist: Vec<String>,

    pub sharp_books: Vec<String>,
    pub sharp_weight: f64,
    pub standard_weight: f64,

    pub consensus_min_books: i64,
    pub consensus_eps: f64,

    pub pick_min_ev: f64,
    pub pick_min_books: i64,
    pub pick_max_per_run: i64,

    pub bankroll_paper: f64,
    pub kelly_multiplier: f64,
    pub kelly_max_cap: f64,
    pub kelly_cap: f64,

    pub delta_hash_strict: bool,

    pub enable_scheduler: bool,
    pub sched_ingest_interval_sec: u64,
    pub sched_picks_interval_sec: u64,
    pub sched_clv_interval_sec: u64,
    pub sched_jitter_sec: u64,
    pub sched_max_concurrent: i64,
    pub sched_require_db: bool,

    pub sports_autorun: Vec<String>,
    pub markets_autorun: Vec<String>,

    pub markets_unlock_clv_min: i64,
    pub markets_unlock_mode: String,

    pub pqs_version: String,
    pub pqs_enabled: bool,

    pub clv_prior_window: i64,
    pub clv_min_n_for_prior: i64,

    pub sport_default_min_pqs: f64,
    pub sport_default_max_picks: i64,
    pub ncaab_default_max_picks: Option<i64>,

    pub run_max_picks_total: i64,
    pub min_books: i64,
    pub sharp_book_min: i64,
    pub max_price_dispersion: f64,
    pub min_agreement: f64,
    pub min_minutes_to_start: f64,
    pub time_decay_half_life_min: f64,
    pub ev_floor: f64,

    // Adaptive relaxation constants referenced by intelligence/pqs.py but
    // absent from the retrieved config.py; see DESIGN.md.
    pub max_price_dispersion_book_count_8: f64,
    pub max_price_dispersion_sharp_ev: f64,
    pub max_price_dispersion_hard_ceiling: f64,
    pub min_minutes_to_start_relaxed: f64,
    pub min_minutes_to_start_relaxed_min_books: i64,
    pub min_minutes_to_start_relaxed_max_dispersion: f64,

    pub pqs_weight_ev: f64,
    pub pqs_weight_agreement: f64,
    pub pqs_weight_dispersion: f64,
    pub pqs_weight_coverage: f64,
    pub pqs_weight_sharp_presence: f64,
    pub pqs_weight_clv_prior: f64,
    pub pqs_weight_time_to_start: f64,
}

impl Settings {
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        let sport_default_max_picks = env_i64("SPORT_DEFAULT_MAX_PICKS", 3);

        Settings {
            app_name: env_string("APP_NAME", "edgeline"),
            app_env: env_string("APP_ENV", "development"),
            database_url: env_string("DATABASE_URL", "./edgeline.db"),

            odds_api_key: env_opt_string("ODDS_API_KEY"),
            odds_api_base_url: env_string("ODDS_API_BASE_URL", "https://api.the-odds-api.com/v4"),
            odds_sports_whitelist: env_csv("ODDS_SPORTS_WHITELIST"),
            odds_markets: {
                let v = env_csv("ODDS_MARKETS");
                if v.is_empty() {
                    vec!["h2h".into(), "spreads".into(), "totals".into()]
                } else {
                    v
                }
            },
            odds_regions: env_string("ODDS_REGIONS", "us"),
            bookmaker_whitelist: env_csv("BOOKMAKER_WHITELIST"),

            sharp_books: {
                let v = env_csv("SHARP_BOOKS");
                if v.is_empty() {
                    vec!["pinnacle".into(), "circa".into(), "betonlineag".into(), "bovada".into()]
                } else {
                    v
                }
            },
            sharp_weight: env_f64("SHARP_WEIGHT", 2.0),
            standard_weight: env_f64("STANDARD_WEIGHT", 1.0),

            consensus_min_books: env_i64("CONSENSUS_MIN_BOOKS", 5),
            consensus_eps: env_f64("CONSENSUS_EPS", 1e-9),

            pick_min_ev: env_f64("PICK_MIN_EV", 0.015),
            pick_min_books: env_i64("PICK_MIN_BOOKS", env_i64("CONSENSUS_MIN_BOOKS", 5)),
            pick_max_per_run: env_i64("PICK_MAX_PER_RUN", 50),

            bankroll_paper: env_f64("BANKROLL_PAPER", 10_000.0),
            kelly_multiplier: env_f64("KELLY_MULTIPLIER", 0.25),
            kelly_max_cap: env_f64("KELLY_MAX_CAP", 0.05),
            kelly_cap: env_f64("KELLY_CAP", 0.01),

            delta_hash_strict: env_bool("DELTA_HASH_STRICT", true),

            enable_scheduler: env_bool("ENABLE_SCHEDULER", false),
            sched_ingest_interval_sec: env_u64("SCHED_INGEST_INTERVAL_SEC", 600),
            sched_picks_interval_sec: env_u64("SCHED_PICKS_INTERVAL_SEC", 600),
            sched_clv_interval_sec: env_u64("SCHED_CLV_INTERVAL_SEC", 1800),
            sched_jitter_sec: env_u64("SCHED_JITTER_SEC", 30),
            sched_max_concurrent: env_i64("SCHED_MAX_CONCURRENT", 1),
            sched_require_db: env_bool("SCHED_REQUIRE_DB", true),

            sports_autorun: env_csv("SPORTS_AUTORUN"),
            markets_autorun: {
                let v = env_csv("MARKETS_AUTORUN");
                if v.is_empty() {
                    vec!["h2h".into()]
                } else {
                    v
                }
            },

            markets_unlock_clv_min: env_i64("MARKETS_UNLOCK_CLV_MIN", 100),
            markets_unlock_mode: env_string("MARKETS_UNLOCK_MODE", "gate"),

            pqs_version: env_string("PQS_VERSION", "pqs_v1"),
            pqs_enabled: env_bool("PQS_ENABLED", true),

            clv_prior_window: env_i64("CLV_PRIOR_WINDOW", 200),
            clv_min_n_for_prior: env_i64("CLV_MIN_N_FOR_PRIOR", 30),

            sport_default_min_pqs: env_f64("SPORT_DEFAULT_MIN_PQS", 0.65),
            sport_default_max_picks,
            ncaab_default_max_picks: std::env::var("NCAAB_DEFAULT_MAX_PICKS")
                .ok()
                .and_then(|v| v.parse().ok()),

            run_max_picks_total: env_i64("RUN_MAX_PICKS_TOTAL", 8),
            min_books: env_i64("MIN_BOOKS", 6),
            sharp_book_min: env_i64("SHARP_BOOK_MIN", 1),
            max_price_dispersion: env_f64("MAX_PRICE_DISPERSION", 0.08),
            min_agreement: env_f64("MIN_AGREEMENT", 0.60),
            min_minutes_to_start: env_f64("MIN_MINUTES_TO_START", 15.0),
            time_decay_half_life_min: env_f64("TIME_DECAY_HALF_LIFE_MIN", 240.0),
            ev_floor: env_f64("EV_FLOOR", 0.0),

            max_price_dispersion_book_count_8: env_f64("MAX_PRICE_DISPERSION_BOOK_COUNT_8", 0.12),
            max_price_dispersion_sharp_ev: env_f64("MAX_PRICE_DISPERSION_SHARP_EV", 0.15),
            max_price_dispersion_hard_ceiling: env_f64("MAX_PRICE_DISPERSION_HARD_CEILING", 0.25),
            min_minutes_to_start_relaxed: env_f64("MIN_MINUTES_TO_START_RELAXED", 5.0),
            min_minutes_to_start_relaxed_min_books: env_i64(
                "MIN_MINUTES_TO_START_RELAXED_MIN_BOOKS",
                10,
            ),
            min_minutes_to_start_relaxed_max_dispersion: env_f64(
                "MIN_MINUTES_TO_START_RELAXED_MAX_DISPERSION",
                0.05,
            ),

            pqs_weight_ev: env_f64("PQS_WEIGHT_EV", 0.30),
            pqs_weight_agreement: env_f64("PQS_WEIGHT_AGREEMENT", 0.20),
            pqs_weight_dispersion: env_f64("PQS_WEIGHT_DISPERSION", 0.15),
            pqs_weight_coverage: env_f64("PQS_WEIGHT_COVERAGE", 0.10),
            pqs_weight_sharp_presence: env_f64("PQS_WEIGHT_SHARP_PRESENCE", 0.10),
            pqs_weight_clv_prior: env_f64("PQS_WEIGHT_CLV_PRIOR", 0.10),
            pqs_weight_time_to_start: env_f64("PQS_WEIGHT_TIME_TO_START", 0.05),
        }
    }

    /// Per-sport max-picks override, falling back to the base setting.
    pub fn max_picks_for_sport(&self, sport_key: &str) -> i64 {
        if sport_key == "basketball_ncaab" {
            self.ncaab_default_max_picks.unwrap_or(self.sport_default_max_picks)
        } else {
            self.sport_default_max_picks
        }
    }

    pub fn is_sharp_book(&self, bookmaker: &str) -> bool {
        let lower = bookmaker.to_lowercase();
        self.sharp_books.iter().any(|b| b.to_lowercase() == lower)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pqs_weights_sum_to_one() {
        let s = Settings::from_env();
        let sum = s.pqs_weight_ev
            + s.pqs_weight_agreement
            + s.pqs_weight_dispersion
            + s.pqs_weight_coverage
            + s.pqs_weight_sharp_presence
            + s.pqs_weight_clv_prior
            + s.pqs_weight_time_to_start;
        assert!((sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn ncaab_falls_back_to_base_when_unset() {
        let s = Settings::from_env();
        assert_eq!(s.max_picks_for_sport("basketball_ncaab"), s.sport_default_max_picks);
    }
}
