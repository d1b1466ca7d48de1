//! Periodic health snapshots with a rolling window and low-risk healing.
//!
//! Every tick collects memory/triple counts, per-tool latency
//! percentiles, and skill health into a snapshot. A 20% drop of the
//! aggregate score against the window median is logged; a 40% drop also
//! triggers healing actions, each behind its own cooldown.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use mimo_dispatch::telemetry::ToolLatency;

use crate::state::AppState;

/// Snapshots retained in the rolling window.
const WINDOW: usize = 12;
/// Score ratio below which a warning is logged.
const WARN_RATIO: f64 = 0.8;
/// Score ratio below which healing runs.
const HEAL_RATIO: f64 = 0.6;
/// Per-action healing cooldown.
const HEAL_COOLDOWN: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub at: DateTime<Utc>,
    pub memory_count: usize,
    pub triple_count: usize,
    pub working_items: usize,
    pub running_skills: usize,
    pub failed_skills: usize,
    pub total_calls: u64,
    pub failed_calls: u64,
    pub latency: Vec<ToolLatency>,
    /// Aggregate health in [0, 1].
    pub score: f64,
}

#[derive(Default)]
pub struct HealthMonitor {
    window: Mutex<VecDeque<HealthSnapshot>>,
    cooldowns: Mutex<HashMap<&'static str, Instant>>,
}

impl HealthMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latest(&self) -> Option<HealthSnapshot> {
        self.window.lock().back().cloned()
    }

    pub fn window(&self) -> Vec<HealthSnapshot> {
        self.window.lock().iter().cloned().collect()
    }

    fn push(&self, snapshot: HealthSnapshot) {
        let mut window = self.window.lock();
        window.push_back(snapshot);
        while window.len() > WINDOW {
            window.pop_front();
        }
    }

    fn median_score(&self) -> Option<f64> {
        let window = self.window.lock();
        if window.is_empty() {
            return None;
        }
        let mut scores: Vec<f64> = window.iter().map(|s| s.score).collect();
        scores.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        Some(scores[scores.len() / 2])
    }

    /// True when the action may run now (and marks it as run).
    fn try_heal(&self, action: &'static str) -> bool {
        let mut cooldowns = self.cooldowns.lock();
        let now = Instant::now();
        match cooldowns.get(action) {
            Some(last) if now.duration_since(*last) < HEAL_COOLDOWN => false,
            _ => {
                cooldowns.insert(action, now);
                true
            }
        }
    }
}

/// One health tick: snapshot, compare to the window, heal when degraded.
pub async fn tick(state: &AppState) {
    let snapshot = collect(state);
    let median = state.health.median_score();
    let score = snapshot.score;
    tracing::debug!(score, "health snapshot");
    state.health.push(snapshot);

    // Keep the feedback window anchored to the last seven active days.
    if let Ok(days) = state.memory.store_handle().active_days() {
        if days.len() >= 7 {
            let seventh = days[days.len() - 7];
            if let Some(floor) = seventh.and_hms_opt(0, 0, 0) {
                state
                    .feedback
                    .set_window_floor(DateTime::<Utc>::from_naive_utc_and_offset(floor, Utc));
            }
        }
    }

    let Some(median) = median else { return };
    if median <= f64::EPSILON {
        return;
    }
    let ratio = score / median;

    if ratio < WARN_RATIO {
        tracing::warn!(score, median, "health degraded vs window median");
    }
    if ratio < HEAL_RATIO {
        heal(state).await;
    }
}

fn collect(state: &AppState) -> HealthSnapshot {
    let stats = state.memory.stats().ok();
    let total_calls = state.telemetry.total_calls();
    let failed_calls = state.telemetry.total_failures();

    // Aggregate score: call success ratio, dented by failed skills.
    let success_ratio = if total_calls == 0 {
        1.0
    } else {
        1.0 - failed_calls as f64 / total_calls as f64
    };
    let failed_skills = state.supervisor.failed_count();
    let score = success_ratio / (1.0 + failed_skills as f64 * 0.1);

    HealthSnapshot {
        at: Utc::now(),
        memory_count: stats.as_ref().map(|s| s.total).unwrap_or(0),
        triple_count: state.graph.count().unwrap_or(0),
        working_items: stats.as_ref().map(|s| s.working_items).unwrap_or(0),
        running_skills: state.supervisor.running_count(),
        failed_skills,
        total_calls,
        failed_calls,
        latency: state.telemetry.latency_snapshot(),
        score,
    }
}

/// Low-risk healing actions, each rate-limited by its own cooldown.
async fn heal(state: &AppState) {
    if state.health.try_heal("working_cleanup") {
        let removed = state.memory.working().cleanup();
        tracing::info!(removed, "healing: working-memory cleanup");
    }
    if state.health.try_heal("index_rebuild") {
        state.memory.invalidate_index();
        tracing::info!("healing: retrieval index cleared for rebuild");
    }
    if state.health.try_heal("maintenance_consolidation") {
        let consolidator = state
            .memory
            .consolidator(state.config.memory.consolidation_threshold);
        let stats = consolidator.pass().await;
        tracing::info!(
            consolidated = stats.consolidated,
            "healing: maintenance consolidation pass"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(score: f64) -> HealthSnapshot {
        HealthSnapshot {
            at: Utc::now(),
            memory_count: 0,
            triple_count: 0,
            working_items: 0,
            running_skills: 0,
            failed_skills: 0,
            total_calls: 0,
            failed_calls: 0,
            latency: Vec::new(),
            score,
        }
    }

    #[test]
    fn window_is_bounded_to_twelve() {
        let monitor = HealthMonitor::new();
        for i in 0..20 {
            monitor.push(snapshot(i as f64 / 20.0));
        }
        assert_eq!(monitor.window().len(), WINDOW);
    }

    #[test]
    fn median_over_window() {
        let monitor = HealthMonitor::new();
        for score in [0.2, 1.0, 0.6] {
            monitor.push(snapshot(score));
        }
        assert!((monitor.median_score().unwrap() - 0.6).abs() < 1e-9);
    }

    #[test]
    fn healing_respects_cooldown() {
        let monitor = HealthMonitor::new();
        assert!(monitor.try_heal("working_cleanup"));
        assert!(!monitor.try_heal("working_cleanup"));
        assert!(monitor.try_heal("maintenance_consolidation"));
    }
}
