//! HTTP surface: one module per interface area, composed into a single
//! router in `router()`. Grounded on the teacher's `Router::new().merge(...)`
//! composition in `src/main.rs`.

pub mod calibration;
pub mod clv;
pub mod consensus;
pub mod eval;
pub mod odds;
pub mod picks;
pub mod pipeline;
pub mod pqs;
pub mod system;

use crate::state::AppState;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(system::health))
        .route("/system/market_status", get(system::market_status))
        .route("/system/quota", get(system::quota))
        .route("/odds/ingest", post(odds::ingest))
        .route("/odds/latest", get(odds::latest))
        .route("/consensus/latest", get(consensus::latest))
        .route("/picks/generate", post(picks::generate))
        .route("/picks/latest", get(picks::latest))
        .route("/picks/recommended", get(picks::recommended))
        .route("/clv/compute", post(clv::compute))
        .route("/clv/latest", get(clv::latest))
        .route("/stats/clv/sport", get(clv::sport_stats))
        .route("/metrics/clv", get(clv::health_metrics))
        .route("/pipeline/run", post(pipeline::run))
        .route("/pipeline/runs", get(pipeline::runs))
        .route("/pipeline/health", get(pipeline::health))
        .route("/pqs/latest", get(pqs::latest))
        .route("/pqs/score", post(pqs::score))
        .route("/eval/dataset", get(eval::dataset))
        .route("/eval/dataset.csv", get(eval::dataset_csv))
        .route("/eval/pqs_clv", get(eval::pqs_clv))
        .route("/eval/gates", get(eval::gates))
        .route("/eval/sports", get(eval::sports))
        .route("/eval/volume", get(eval::volume))
        .route("/calibration/propose", post(calibration::propose))
        .route("/calibration/apply/:run_id", post(calibration::apply))
        .route("/calibration/runs", get(calibration::runs))
        .layer(CorsLayer::permissive())
}
