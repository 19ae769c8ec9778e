//! Process-wide, last-writer-wins odds-provider quota snapshot.
//!
//! Grounded on `services/quota.py`'s module-level `_quota_state` dict;
//! ported to a `parking_lot::RwLock` since Rust has no implicit module
//! globals, following `spec.md §9`'s guidance to model process-wide state as
//! an explicit, dependency-injected object.

use parking_lot::RwLock;
use reqwest::header::HeaderMap;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, Serialize)]
pub struct QuotaSnapshot {
    pub headers: BTreeMap<String, String>,
    pub fetched_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Default)]
pub struct QuotaState {
    inner: RwLock<QuotaSnapshot>,
}

impl QuotaState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Capture every response header whose lowercase name starts with
    /// `x-requests-`, overwriting the previous snapshot wholesale.
    pub fn record(&self, headers: &HeaderMap, fetched_at: chrono::DateTime<chrono::Utc>) {
        let mut captured = BTreeMap::new();
        for (name, value) in headers.iter() {
            let lower = name.as_str().to_lowercase();
            if lower.starts_with("x-requests-") {
                if let Ok(v) = value.to_str() {
                    captured.insert(lower, v.to_string());
                }
            }
        }
        *self.inner.write() = QuotaSnapshot {
            headers: captured,
            fetched_at: Some(fetched_at),
        };
    }

    pub fn get(&self) -> QuotaSnapshot {
        self.inner.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderMap, HeaderValue};

    #[test]
    fn captures_only_x_requests_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("x-requests-remaining", HeaderValue::from_static("490"));
        headers.insert("x-requests-used", HeaderValue::from_static("10"));
        headers.insert("content-type", HeaderValue::from_static("application/json"));
        let state = QuotaState::new();
        state.record(&headers, chrono::Utc::now());
        let snap = state.get();
        assert_eq!(snap.headers.len(), 2);
        assert_eq!(snap.headers.get("x-requests-remaining").unwrap(), "490");
    }
}
