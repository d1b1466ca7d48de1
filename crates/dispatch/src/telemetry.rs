//! Per-call telemetry: one record per dispatched tool call, kept in
//! bounded per-tool latency reservoirs for the health snapshots.

use std::collections::{HashMap, VecDeque};

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;

use mimo_domain::tool::{CallOutcome, TelemetryRecord, ToolOwner};

/// Latency samples retained per tool.
const RESERVOIR_CAP: usize = 256;

#[derive(Default)]
struct ToolStats {
    latencies_ms: VecDeque<u64>,
    successes: u64,
    failures: u64,
    timeouts: u64,
}

/// Latency percentiles for one tool, as reported by health snapshots.
#[derive(Debug, Clone, Serialize)]
pub struct ToolLatency {
    pub tool: String,
    pub calls: u64,
    pub p50_ms: u64,
    pub p95_ms: u64,
}

#[derive(Default)]
pub struct TelemetryRecorder {
    stats: RwLock<HashMap<String, ToolStats>>,
}

impl TelemetryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, tool: &str, owner: ToolOwner, latency_ms: u64, outcome: CallOutcome) {
        let record = TelemetryRecord {
            tool: tool.to_string(),
            owner,
            latency_ms,
            outcome,
            at: Utc::now(),
        };
        tracing::debug!(
            tool = %record.tool,
            owner = ?record.owner,
            latency_ms = record.latency_ms,
            outcome = ?record.outcome,
            "tool call"
        );

        let mut stats = self.stats.write();
        let entry = stats.entry(tool.to_string()).or_default();
        entry.latencies_ms.push_back(latency_ms);
        if entry.latencies_ms.len() > RESERVOIR_CAP {
            entry.latencies_ms.pop_front();
        }
        match outcome {
            CallOutcome::Success => entry.successes += 1,
            CallOutcome::Failure => entry.failures += 1,
            CallOutcome::Timeout => entry.timeouts += 1,
        }
    }

    /// p50/p95 latency per tool over each tool's reservoir.
    pub fn latency_snapshot(&self) -> Vec<ToolLatency> {
        let stats = self.stats.read();
        let mut out: Vec<ToolLatency> = stats
            .iter()
            .filter(|(_, s)| !s.latencies_ms.is_empty())
            .map(|(tool, s)| {
                let mut sorted: Vec<u64> = s.latencies_ms.iter().copied().collect();
                sorted.sort_unstable();
                ToolLatency {
                    tool: tool.clone(),
                    calls: s.successes + s.failures + s.timeouts,
                    p50_ms: percentile(&sorted, 50),
                    p95_ms: percentile(&sorted, 95),
                }
            })
            .collect();
        out.sort_by(|a, b| a.tool.cmp(&b.tool));
        out
    }

    pub fn total_calls(&self) -> u64 {
        self.stats
            .read()
            .values()
            .map(|s| s.successes + s.failures + s.timeouts)
            .sum()
    }

    pub fn total_failures(&self) -> u64 {
        self.stats
            .read()
            .values()
            .map(|s| s.failures + s.timeouts)
            .sum()
    }
}

fn percentile(sorted: &[u64], p: usize) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = (p * sorted.len().saturating_sub(1)) / 100;
    sorted[rank.min(sorted.len() - 1)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentiles_over_reservoir() {
        let recorder = TelemetryRecorder::new();
        for ms in 1..=100u64 {
            recorder.record("web", ToolOwner::Internal, ms, CallOutcome::Success);
        }
        let snapshot = recorder.latency_snapshot();
        assert_eq!(snapshot.len(), 1);
        let web = &snapshot[0];
        assert_eq!(web.tool, "web");
        assert_eq!(web.calls, 100);
        assert!((49..=51).contains(&web.p50_ms));
        assert!((94..=96).contains(&web.p95_ms));
    }

    #[test]
    fn reservoir_is_bounded() {
        let recorder = TelemetryRecorder::new();
        for _ in 0..1000 {
            recorder.record("code", ToolOwner::Internal, 5, CallOutcome::Success);
        }
        let stats = recorder.stats.read();
        assert_eq!(stats.get("code").unwrap().latencies_ms.len(), RESERVOIR_CAP);
    }

    #[test]
    fn failures_and_timeouts_counted() {
        let recorder = TelemetryRecorder::new();
        recorder.record("x", ToolOwner::Internal, 1, CallOutcome::Failure);
        recorder.record("x", ToolOwner::Internal, 1, CallOutcome::Timeout);
        recorder.record("x", ToolOwner::Internal, 1, CallOutcome::Success);
        assert_eq!(recorder.total_calls(), 3);
        assert_eq!(recorder.total_failures(), 2);
    }
}
