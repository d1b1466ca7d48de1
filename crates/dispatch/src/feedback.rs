//! Feedback loop and calibration.
//!
//! Per-tool success tracking over a sliding window, routing-accuracy
//! boosts for the meta-cognitive router, and confidence calibration
//! bucketed by predicted-confidence decile. All updates are cheap
//! lock-guarded writes, bounded in memory.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

/// Window cap: the last 100 executions (the active-day floor below can
/// shorten it further).
const WINDOW_EXECUTIONS: usize = 100;

/// Maximum magnitude of a router boost.
pub const MAX_ROUTER_BOOST: f64 = 0.2;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Derived shapes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Improving,
    Stable,
    Declining,
}

/// Summary for one tool, used by enrichment and the `tool_usage` tool.
#[derive(Debug, Clone, Serialize)]
pub struct ToolExperience {
    pub tool: String,
    pub executions: usize,
    pub success_rate: f64,
    pub trend: Trend,
}

#[derive(Default)]
struct ToolWindow {
    outcomes: VecDeque<(DateTime<Utc>, bool)>,
}

#[derive(Default, Clone, Copy)]
struct RoutingCounts {
    correct: u64,
    total: u64,
}

#[derive(Default, Clone, Copy)]
struct CalibrationBucket {
    predicted_sum: f64,
    actual_sum: f64,
    count: u64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// FeedbackLoop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
pub struct FeedbackLoop {
    tools: RwLock<HashMap<String, ToolWindow>>,
    routing: RwLock<HashMap<String, RoutingCounts>>,
    calibration: RwLock<HashMap<String, [CalibrationBucket; 10]>>,
    /// Outcomes older than this fall out of every window. Maintained by
    /// the health loop as the timestamp of the 7th-most-recent active day.
    window_floor: RwLock<DateTime<Utc>>,
}

impl FeedbackLoop {
    pub fn new() -> Self {
        Self {
            window_floor: RwLock::new(DateTime::<Utc>::MIN_UTC),
            ..Default::default()
        }
    }

    /// Refresh the active-day window floor (outcomes before it expire).
    pub fn set_window_floor(&self, floor: DateTime<Utc>) {
        *self.window_floor.write() = floor;
    }

    // ── Tool outcomes ────────────────────────────────────────────────

    pub fn record(&self, tool: &str, success: bool) {
        let floor = *self.window_floor.read();
        let mut tools = self.tools.write();
        let window = tools.entry(tool.to_string()).or_default();
        window.outcomes.push_back((Utc::now(), success));
        while window.outcomes.len() > WINDOW_EXECUTIONS {
            window.outcomes.pop_front();
        }
        while window
            .outcomes
            .front()
            .map(|(at, _)| *at < floor)
            .unwrap_or(false)
        {
            window.outcomes.pop_front();
        }
    }

    pub fn execution_count(&self, tool: &str) -> usize {
        self.tools
            .read()
            .get(tool)
            .map(|w| w.outcomes.len())
            .unwrap_or(0)
    }

    /// Success rate over the window; `None` with no recorded executions.
    pub fn success_rate(&self, tool: &str) -> Option<f64> {
        let tools = self.tools.read();
        let window = tools.get(tool)?;
        if window.outcomes.is_empty() {
            return None;
        }
        let successes = window.outcomes.iter().filter(|(_, ok)| *ok).count();
        Some(successes as f64 / window.outcomes.len() as f64)
    }

    /// Compare the newest quarter of the window against the quarter
    /// before it.
    pub fn trend(&self, tool: &str) -> Trend {
        let tools = self.tools.read();
        let Some(window) = tools.get(tool) else {
            return Trend::Stable;
        };
        let n = window.outcomes.len();
        let quarter = n / 4;
        if quarter == 0 {
            return Trend::Stable;
        }

        let rate = |slice: &[(DateTime<Utc>, bool)]| {
            slice.iter().filter(|(_, ok)| *ok).count() as f64 / slice.len() as f64
        };
        let outcomes: Vec<(DateTime<Utc>, bool)> = window.outcomes.iter().copied().collect();
        let last = rate(&outcomes[n - quarter..]);
        let prior = rate(&outcomes[n - 2 * quarter..n - quarter]);

        if last > prior + 0.05 {
            Trend::Improving
        } else if last < prior - 0.05 {
            Trend::Declining
        } else {
            Trend::Stable
        }
    }

    /// Experience summary; `None` under five executions (too little signal
    /// to enrich results with).
    pub fn experience(&self, tool: &str) -> Option<ToolExperience> {
        let executions = self.execution_count(tool);
        if executions < 5 {
            return None;
        }
        Some(ToolExperience {
            tool: tool.to_string(),
            executions,
            success_rate: self.success_rate(tool).unwrap_or(0.0),
            trend: self.trend(tool),
        })
    }

    pub fn known_tools(&self) -> Vec<String> {
        self.tools.read().keys().cloned().collect()
    }

    // ── Router boosts ────────────────────────────────────────────────

    /// Record whether routing to `store` answered the query.
    pub fn record_routing(&self, store: &str, correct: bool) {
        let mut routing = self.routing.write();
        let counts = routing.entry(store.to_string()).or_default();
        counts.total += 1;
        if correct {
            counts.correct += 1;
        }
    }

    /// Boost in [−0.2, 0.2] derived from observed routing accuracy
    /// (0.5 accuracy is neutral).
    pub fn router_boost(&self, store: &str) -> f64 {
        let routing = self.routing.read();
        let Some(counts) = routing.get(store) else {
            return 0.0;
        };
        if counts.total < 5 {
            return 0.0;
        }
        let accuracy = counts.correct as f64 / counts.total as f64;
        ((accuracy - 0.5) * 2.0 * MAX_ROUTER_BOOST).clamp(-MAX_ROUTER_BOOST, MAX_ROUTER_BOOST)
    }

    // ── Confidence calibration ───────────────────────────────────────

    /// Record a prediction and its eventual correctness for a category.
    pub fn record_confidence(&self, category: &str, predicted: f64, correct: bool) {
        let decile = ((predicted.clamp(0.0, 1.0) * 10.0) as usize).min(9);
        let mut calibration = self.calibration.write();
        let buckets = calibration
            .entry(category.to_string())
            .or_insert_with(|| [CalibrationBucket::default(); 10]);
        let bucket = &mut buckets[decile];
        bucket.predicted_sum += predicted;
        bucket.actual_sum += if correct { 1.0 } else { 0.0 };
        bucket.count += 1;
    }

    /// Multiplicative calibration factor for a category, clamped to
    /// [0.5, 1.5]. 1.0 when there is not enough data.
    pub fn calibration(&self, category: &str) -> f64 {
        let calibration = self.calibration.read();
        let Some(buckets) = calibration.get(category) else {
            return 1.0;
        };
        let (predicted, actual, count) = buckets.iter().fold((0.0, 0.0, 0u64), |acc, b| {
            (acc.0 + b.predicted_sum, acc.1 + b.actual_sum, acc.2 + b.count)
        });
        if count < 10 || predicted <= f64::EPSILON {
            return 1.0;
        }
        (actual / predicted).clamp(0.5, 1.5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_rate_over_window() {
        let feedback = FeedbackLoop::new();
        for i in 0..10 {
            feedback.record("web", i % 2 == 0);
        }
        assert_eq!(feedback.execution_count("web"), 10);
        assert!((feedback.success_rate("web").unwrap() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn window_caps_at_one_hundred() {
        let feedback = FeedbackLoop::new();
        for _ in 0..150 {
            feedback.record("terminal", true);
        }
        assert_eq!(feedback.execution_count("terminal"), 100);
    }

    #[test]
    fn trend_detects_improvement() {
        let feedback = FeedbackLoop::new();
        // Old three quarters failing, newest quarter succeeding.
        for _ in 0..60 {
            feedback.record("code", false);
        }
        for _ in 0..20 {
            feedback.record("code", true);
        }
        assert_eq!(feedback.trend("code"), Trend::Improving);
    }

    #[test]
    fn trend_detects_decline() {
        let feedback = FeedbackLoop::new();
        for _ in 0..60 {
            feedback.record("code", true);
        }
        for _ in 0..20 {
            feedback.record("code", false);
        }
        assert_eq!(feedback.trend("code"), Trend::Declining);
    }

    #[test]
    fn experience_requires_five_executions() {
        let feedback = FeedbackLoop::new();
        for _ in 0..4 {
            feedback.record("reason", true);
        }
        assert!(feedback.experience("reason").is_none());
        feedback.record("reason", true);
        let exp = feedback.experience("reason").unwrap();
        assert_eq!(exp.executions, 5);
        assert!((exp.success_rate - 1.0).abs() < 1e-9);
    }

    #[test]
    fn router_boost_is_bounded_and_neutral_at_half() {
        let feedback = FeedbackLoop::new();
        for _ in 0..20 {
            feedback.record_routing("episodic", true);
        }
        let boost = feedback.router_boost("episodic");
        assert!((boost - MAX_ROUTER_BOOST).abs() < 1e-9);

        for _ in 0..10 {
            feedback.record_routing("semantic", true);
            feedback.record_routing("semantic", false);
        }
        assert!(feedback.router_boost("semantic").abs() < 1e-9);
        assert_eq!(feedback.router_boost("unknown"), 0.0);
    }

    #[test]
    fn calibration_defaults_to_one() {
        let feedback = FeedbackLoop::new();
        assert_eq!(feedback.calibration("factual"), 1.0);
    }

    #[test]
    fn overconfident_category_is_scaled_down() {
        let feedback = FeedbackLoop::new();
        // Predicted 0.9, right only half the time.
        for i in 0..40 {
            feedback.record_confidence("factual", 0.9, i % 2 == 0);
        }
        let factor = feedback.calibration("factual");
        assert!(factor < 1.0);
        assert!(factor >= 0.5);
    }

    #[test]
    fn window_floor_expires_old_outcomes() {
        let feedback = FeedbackLoop::new();
        feedback.record("meta", true);
        std::thread::sleep(std::time::Duration::from_millis(5));
        feedback.set_window_floor(Utc::now());
        feedback.record("meta", false);
        // The pre-floor outcome was dropped at the next record.
        assert_eq!(feedback.execution_count("meta"), 1);
    }
}
