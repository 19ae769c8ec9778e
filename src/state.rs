//! Shared application state handed to every axum handler.
//!
//! Grounded on the teacher's `src/main.rs` `AppState` composition pattern
//! (one `Arc`-wrapped field per shared resource, `#[derive(Clone)]`), pared
//! down to what this pipeline actually needs: the store, config, the odds
//! client, quota tracking, and the single-writer pipeline lock.

use crate::config::Settings;
use crate::db::Store;
use crate::ingest::quota::QuotaState;
use crate::ingest::ProviderClient;
use std::sync::Arc;
use tokio::sync::Semaphore;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub settings: Arc<Settings>,
    pub provider: Arc<ProviderClient>,
    pub quota: Arc<QuotaState>,
    /// Single permit: only one pipeline run (scheduler tick or HTTP-triggered)
    /// may hold the write path at a time.
    pub pipeline_lock: Arc<Semaphore>,
}

impl AppState {
    pub fn new(store: Store, settings: Settings, provider: ProviderClient) -> Self {
        Self {
            store: Arc::new(store),
            settings: Arc::new(settings),
            provider: Arc::new(provider),
            quota: Arc::new(QuotaState::new()),
            pipeline_lock: Arc::new(Semaphore::new(1)),
        }
    }
}
