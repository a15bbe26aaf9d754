//! Event-log retention sweep.
//!
//! Runs at startup and then daily, deleting records whose
//! `server_timestamp` is past the retention window.

use crate::state::AppState;
use chrono::{Duration, Utc};
use std::time::Duration as StdDuration;
use tracing::{info, warn};

const SWEEP_INTERVAL: StdDuration = StdDuration::from_secs(24 * 60 * 60);

pub async fn run_sweeper(state: AppState) {
    let retention = Duration::days(state.config.eventlog.retention_days);
    let mut timer = tokio::time::interval(SWEEP_INTERVAL);
    timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut shutdown = state.shutdown.clone();
    loop {
        tokio::select! {
            _ = shutdown.changed() => return,
            _ = timer.tick() => {
                let cutoff = Utc::now() - retention;
                match state.event_logs.delete_older_than(cutoff).await {
                    Ok(deleted) if deleted > 0 => {
                        info!(deleted, cutoff = %cutoff, "event-log retention sweep");
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "event-log retention sweep failed"),
                }
            }
        }
    }
}
