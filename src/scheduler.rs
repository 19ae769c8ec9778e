//! Periodic background scheduler: three independent interval jobs
//! (ingest/picks/clv), staggered at startup so they don't all fire at
//! once, each serialized against HTTP-triggered runs through the same
//! single-writer semaphore.
//!
//! Grounded on `original_source/.../services/scheduler.py` (interval +
//! jitter + stagger model) and the teacher's `tokio::spawn` background-task
//! pattern in `src/main.rs`.

use crate::state::AppState;
use rand::Rng;
use std::time::Duration;

const STAGE_OFFSETS_SEC: [u64; 3] = [0, 60, 120];

/// Spawns the three interval tasks if `ENABLE_SCHEDULER=true` and (when
/// `SCHED_REQUIRE_DB=true`) the database is reachable at startup. Returns
/// immediately; the tasks run for the lifetime of the process.
pub fn spawn(state: AppState) {
    if !state.settings.enable_scheduler {
        tracing::info!("scheduler disabled (ENABLE_SCHEDULER=false)");
        return;
    }
    if state.settings.sched_require_db && !state.store.can_reach_db() {
        tracing::error!("scheduler startup check failed: database unreachable, refusing to start");
        return;
    }

    let ingest_interval = state.settings.sched_ingest_interval_sec;
    let picks_interval = state.settings.sched_picks_interval_sec;
    let clv_interval = state.settings.sched_clv_interval_sec;

    spawn_stage(state.clone(), "ingest", STAGE_OFFSETS_SEC[0], ingest_interval);
    spawn_stage(state.clone(), "picks", STAGE_OFFSETS_SEC[1], picks_interval);
    spawn_stage(state, "clv", STAGE_OFFSETS_SEC[2], clv_interval);
}

fn spawn_stage(state: AppState, name: &'static str, initial_offset_sec: u64, interval_sec: u64) {
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(initial_offset_sec)).await;
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_sec.max(1)));
        loop {
            ticker.tick().await;
            run_tick(&state, name).await;
        }
    });
}

async fn run_tick(state: &AppState, run_type: &'static str) {
    let jitter_sec = if state.settings.sched_jitter_sec > 0 {
        rand::thread_rng().gen_range(0..=state.settings.sched_jitter_sec)
    } else {
        0
    };
    if jitter_sec > 0 {
        tokio::time::sleep(Duration::from_secs(jitter_sec)).await;
    }

    let permit = match state.pipeline_lock.clone().try_acquire_owned() {
        Ok(permit) => permit,
        Err(_) => {
            tracing::info!(run_type, "skipping scheduled run: pipeline lock held");
            return;
        }
    };

    let result = crate::pipeline::run_and_log(
        &state.store,
        &state.settings,
        &state.provider,
        &state.quota,
        run_type,
        false,
    )
    .await;

    drop(permit);

    match result {
        Ok(stats) => tracing::info!(run_type, errors = stats.errors.len(), "scheduled run complete"),
        Err(e) => tracing::warn!(run_type, error = %e, "scheduled run failed"),
    }
}
