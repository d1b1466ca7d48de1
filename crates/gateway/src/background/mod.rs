//! Background loops: consolidation, decay, working-memory cleanup, and
//! health snapshots. One instance of each runs process-wide, spawned at
//! boot.

pub mod health;

use std::time::Duration;

use crate::state::AppState;

/// Spawn every periodic task. Handles are deliberately detached: the
/// loops live for the process lifetime.
pub fn spawn_loops(state: &AppState) {
    spawn_consolidation(state.clone());
    spawn_decay(state.clone());
    spawn_cleanup(state.clone());
    spawn_health(state.clone());
}

fn spawn_consolidation(state: AppState) {
    let interval = Duration::from_secs(state.config.intervals.consolidation_secs.max(1));
    let consolidator = state
        .memory
        .consolidator(state.config.memory.consolidation_threshold);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await; // first tick fires immediately; skip it
        loop {
            ticker.tick().await;
            let stats = consolidator.pass().await;
            if stats.failed_batches > 0 {
                tracing::warn!(
                    failed_batches = stats.failed_batches,
                    "consolidation pass had failures"
                );
            }
        }
    });
}

fn spawn_decay(state: AppState) {
    let interval = Duration::from_secs(state.config.intervals.decay_secs.max(1));
    let engine = state.memory.decay_engine(state.config.memory.prune_threshold);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = engine.pass() {
                tracing::warn!(error = %e, "decay pass failed");
            }
        }
    });
}

fn spawn_cleanup(state: AppState) {
    let interval = Duration::from_secs(state.config.intervals.cleanup_secs.max(1));
    let working = state.memory.working();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            working.cleanup();
        }
    });
}

fn spawn_health(state: AppState) {
    let interval = Duration::from_secs(state.config.intervals.health_secs.max(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            health::tick(&state).await;
        }
    });
}
