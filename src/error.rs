//! Structured error taxonomy, mapped to HTTP responses at the API boundary.
//!
//! Mirrors `spec.md §7`. Grounded on `auth/api.rs`'s `AuthApiError` pattern
//! in the reference backend, enriched with a JSON body since `MarketLocked`
//! needs to carry structured fields rather than a plain message.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use std::fmt;

#[derive(Debug)]
pub enum AppError {
    InvalidArgument(String),
    NotFound(String),
    UnauthorizedConfiguration(String),
    UpstreamFailure(String),
    MarketLocked(Value),
    Conflict(String),
    Internal(anyhow::Error),
}

impl AppError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        AppError::InvalidArgument(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        AppError::NotFound(msg.into())
    }

    fn code(&self) -> &'static str {
        match self {
            AppError::InvalidArgument(_) => "invalid_argument",
            AppError::NotFound(_) => "not_found",
            AppError::UnauthorizedConfiguration(_) => "unauthorized_configuration",
            AppError::UpstreamFailure(_) => "upstream_failure",
            AppError::MarketLocked(_) => "market_locked",
            AppError::Conflict(_) => "conflict",
            AppError::Internal(_) => "internal_error",
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::InvalidArgument(m)
            | AppError::NotFound(m)
            | AppError::UnauthorizedConfiguration(m)
            | AppError::UpstreamFailure(m)
            | AppError::Conflict(m) => write!(f, "{}", m),
            AppError::MarketLocked(v) => write!(f, "market locked: {}", v),
            AppError::Internal(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for AppError {}

impl From<anyhow::Error> for AppError {
    fn from(e: anyhow::Error) -> Self {
        AppError::Internal(e)
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(e: rusqlite::Error) -> Self {
        AppError::Internal(anyhow::Error::new(e))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::BAD_REQUEST,
            AppError::UnauthorizedConfiguration(_) => StatusCode::BAD_REQUEST,
            AppError::UpstreamFailure(_) => StatusCode::BAD_GATEWAY,
            AppError::MarketLocked(_) => StatusCode::BAD_REQUEST,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Internal(e) => {
                tracing::error!(error = %e, "internal error");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let code = self.code();
        let body = match &self {
            AppError::MarketLocked(reason) => json!({ "error": reason }),
            other => json!({ "error": { "code": code, "message": other.to_string() } }),
        };

        (status, Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn market_locked_carries_structured_reason() {
        let reason = json!({
            "code": "market_locked_until_clv_100",
            "requested_market": "spreads",
            "clv_computed_count": 0,
            "threshold": 100,
            "allowed_markets": ["h2h"],
        });
        let err = AppError::MarketLocked(reason);
        let resp = err.into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn invalid_argument_maps_to_400() {
        let resp = AppError::invalid("bad odds").into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
