//! Decay scoring and pruning.
//!
//! The half-life of a memory is geometric in its importance: 693 active
//! days at importance 1.0 down to 3.5 active days at importance 0.3.
//! Protected memories are never pruned; the hard cap prunes overflow by
//! lowest importance and age regardless of score.

use std::sync::Arc;

use mimo_domain::error::Result;

use crate::ranker::ActiveDayIndex;
use crate::store::{DecayRow, LongTermStore};

const HALF_LIFE_AT_FULL: f64 = 693.0;
const HALF_LIFE_AT_LOW: f64 = 3.5;
const LOW_IMPORTANCE: f64 = 0.3;

/// Half-life in active days for a given importance, interpolated
/// geometrically between the two calibration points.
pub fn half_life_days(importance: f64) -> f64 {
    let importance = importance.clamp(0.0, 1.0);
    let exponent = (1.0 - importance) / (1.0 - LOW_IMPORTANCE);
    HALF_LIFE_AT_FULL * (HALF_LIFE_AT_LOW / HALF_LIFE_AT_FULL).powf(exponent)
}

/// Decay score: `importance · exp(−λ·age) · (1 + log(1+access)·0.1)`,
/// with λ scaled by the per-memory decay-rate multiplier.
pub fn decay_score(row: &DecayRow, age_active_days: f64) -> f64 {
    let lambda = std::f64::consts::LN_2 / half_life_days(row.importance) * row.decay_rate;
    row.importance
        * (-lambda * age_active_days).exp()
        * (1.0 + (1.0 + row.access_count as f64).ln() * 0.1)
}

/// Outcome of one decay pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct DecayStats {
    pub scanned: usize,
    pub pruned: usize,
    /// Rows removed by the hard-cap overflow sweep, independent of score.
    pub evicted: usize,
}

pub struct DecayEngine {
    store: Arc<LongTermStore>,
    prune_threshold: f64,
}

impl DecayEngine {
    pub fn new(store: Arc<LongTermStore>, prune_threshold: f64) -> Self {
        Self {
            store,
            prune_threshold,
        }
    }

    /// Score every live unprotected row and prune those below threshold,
    /// then sweep any cap overflow back down regardless of score.
    pub fn pass(&self) -> Result<DecayStats> {
        let rows = self.store.decay_rows()?;
        let active = ActiveDayIndex::new(self.store.active_days()?);
        let mut stats = DecayStats {
            scanned: rows.len(),
            ..Default::default()
        };

        let victims: Vec<i64> = rows
            .iter()
            .filter(|row| !row.protected)
            .filter(|row| {
                let age = active.active_days_since(row.last_accessed_at);
                decay_score(row, age) < self.prune_threshold
            })
            .map(|row| row.id)
            .collect();

        if !victims.is_empty() {
            stats.pruned = self.store.prune(&victims)?;
        }
        stats.evicted = self.store.evict_overflow()?;

        if stats.pruned > 0 || stats.evicted > 0 {
            tracing::info!(
                scanned = stats.scanned,
                pruned = stats.pruned,
                evicted = stats.evicted,
                "decay pass complete"
            );
        }
        Ok(stats)
    }
}
