//! Dataset export and the four evaluation reports used by calibration.

use crate::error::AppError;
use crate::eval::{
    dataset_to_csv, gates_report, pqs_clv_report, query_dataset, sports_report, volume_report, DatasetFilters,
};
use crate::state::AppState;
use axum::extract::{Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct DatasetQuery {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub sport_key: Option<String>,
    pub market_key: Option<String>,
    pub decision: Option<String>,
    pub min_n: Option<i64>,
    #[serde(default)]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

impl From<DatasetQuery> for DatasetFilters {
    fn from(q: DatasetQuery) -> Self {
        DatasetFilters {
            start: q.start,
            end: q.end,
            sport_key: q.sport_key,
            market_key: q.market_key,
            decision: q.decision,
            min_n: q.min_n,
            limit: if q.limit > 0 { q.limit } else { 1000 },
            offset: q.offset.max(0),
        }
    }
}

pub async fn dataset(State(state): State<AppState>, Query(q): Query<DatasetQuery>) -> Result<Response, AppError> {
    let filters: DatasetFilters = q.into();
    let result = query_dataset(&state.store, &state.settings, &filters)?;
    Ok(Json(result).into_response())
}

pub async fn dataset_csv(State(state): State<AppState>, Query(q): Query<DatasetQuery>) -> Result<Response, AppError> {
    let filters: DatasetFilters = q.into();
    let result = query_dataset(&state.store, &state.settings, &filters)?;
    let csv = dataset_to_csv(&result.rows);
    Ok((
        [(header::CONTENT_TYPE, "text/csv"), (header::CONTENT_DISPOSITION, "attachment; filename=\"dataset.csv\"")],
        csv,
    )
        .into_response())
}

#[derive(Debug, Deserialize)]
pub struct MinNQuery {
    pub min_n: Option<i64>,
}

pub async fn pqs_clv(State(state): State<AppState>, Query(q): Query<MinNQuery>) -> Result<Json<crate::eval::PqsClvReport>, AppError> {
    Ok(Json(pqs_clv_report(&state.store, &state.settings, q.min_n)?))
}

pub async fn gates(State(state): State<AppState>, Query(q): Query<MinNQuery>) -> Result<Json<crate::eval::GatesReport>, AppError> {
    Ok(Json(gates_report(&state.store, &state.settings, q.min_n)?))
}

pub async fn sports(State(state): State<AppState>, Query(q): Query<MinNQuery>) -> Result<Json<Vec<crate::eval::SportReportRow>>, AppError> {
    Ok(Json(sports_report(&state.store, &state.settings, q.min_n)?))
}

pub async fn volume(State(state): State<AppState>, Query(q): Query<MinNQuery>) -> Result<Json<crate::eval::VolumeReport>, AppError> {
    Ok(Json(volume_report(&state.store, &state.settings, q.min_n)?))
}
