//! Hybrid ranker: combines similarity, recency, importance, and access
//! popularity into one score. Recency ages only over *active* days,
//! days on which the gateway observed at least one tool call.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use mimo_domain::engram::Engram;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Weight presets
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RankPreset {
    #[default]
    Balanced,
    Semantic,
    Recent,
    Important,
    Popular,
}

impl RankPreset {
    /// `(similarity, recency, importance, popularity)` weights.
    pub fn weights(&self) -> (f64, f64, f64, f64) {
        match self {
            RankPreset::Balanced => (0.45, 0.25, 0.20, 0.10),
            RankPreset::Semantic => (0.85, 0.05, 0.05, 0.05),
            RankPreset::Recent => (0.20, 0.55, 0.15, 0.10),
            RankPreset::Important => (0.20, 0.10, 0.60, 0.10),
            RankPreset::Popular => (0.20, 0.10, 0.10, 0.60),
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "balanced" => Some(RankPreset::Balanced),
            "semantic" => Some(RankPreset::Semantic),
            "recent" => Some(RankPreset::Recent),
            "important" => Some(RankPreset::Important),
            "popular" => Some(RankPreset::Popular),
            _ => None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Active-day index
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Sorted snapshot of recorded active days; answers "how many active days
/// elapsed since this timestamp" by binary search.
#[derive(Debug, Clone, Default)]
pub struct ActiveDayIndex {
    days: Vec<NaiveDate>,
}

impl ActiveDayIndex {
    /// `days` must be ascending (the store returns them ordered).
    pub fn new(days: Vec<NaiveDate>) -> Self {
        Self { days }
    }

    /// Active days strictly after the day of `since`, up to now.
    pub fn active_days_since(&self, since: DateTime<Utc>) -> f64 {
        let since_day = since.date_naive();
        let idx = self.days.partition_point(|d| *d <= since_day);
        (self.days.len() - idx) as f64
    }

    pub fn len(&self) -> usize {
        self.days.len()
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scoring
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A scored candidate: the retrieval similarity plus the combined score.
#[derive(Debug, Clone)]
pub struct RankedHit {
    pub engram: Engram,
    pub similarity: f64,
    pub score: f64,
}

pub fn recency_factor(age_active_days: f64) -> f64 {
    (-age_active_days / 7.0).exp()
}

pub fn popularity_factor(access_count: i64) -> f64 {
    (1.0 + access_count as f64).ln() * 0.1
}

/// Rank candidates and return the top `k` by combined score. Ties break by
/// descending id (newest first).
pub fn rank(
    candidates: Vec<(Engram, f64)>,
    preset: RankPreset,
    active_days: &ActiveDayIndex,
    k: usize,
) -> Vec<RankedHit> {
    let (w_s, w_r, w_i, w_p) = preset.weights();
    let mut hits: Vec<RankedHit> = candidates
        .into_iter()
        .map(|(engram, similarity)| {
            let age = active_days.active_days_since(engram.last_accessed_at);
            let score = w_s * similarity
                + w_r * recency_factor(age)
                + w_i * engram.importance
                + w_p * popularity_factor(engram.access_count);
            RankedHit {
                engram,
                similarity,
                score,
            }
        })
        .collect();

    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.engram.id.cmp(&a.engram.id))
    });
    hits.truncate(k);
    hits
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use mimo_domain::engram::MemoryCategory;
    use std::collections::HashMap;

    fn engram(id: i64, importance: f64, access_count: i64) -> Engram {
        Engram {
            id,
            content: format!("memory {id}"),
            category: MemoryCategory::Fact,
            importance,
            created_at: Utc::now(),
            last_accessed_at: Utc::now(),
            access_count,
            decay_rate: 1.0,
            protected: false,
            embedding: Vec::new(),
            metadata: HashMap::new(),
            superseded_by: None,
        }
    }

    #[test]
    fn semantic_preset_preserves_similarity_order() {
        let candidates = vec![
            (engram(1, 0.1, 0), 0.9),
            (engram(2, 1.0, 500), 0.5),
            (engram(3, 0.9, 100), 0.7),
        ];
        let hits = rank(candidates, RankPreset::Semantic, &ActiveDayIndex::default(), 3);
        let ids: Vec<i64> = hits.iter().map(|h| h.engram.id).collect();
        assert_eq!(ids, vec![1, 3, 2]);
    }

    #[test]
    fn ties_break_newest_first() {
        let candidates = vec![(engram(1, 0.5, 0), 0.8), (engram(2, 0.5, 0), 0.8)];
        let hits = rank(candidates, RankPreset::Balanced, &ActiveDayIndex::default(), 2);
        assert_eq!(hits[0].engram.id, 2);
    }

    #[test]
    fn important_preset_prefers_importance() {
        let candidates = vec![(engram(1, 0.1, 0), 0.8), (engram(2, 0.95, 0), 0.6)];
        let hits = rank(candidates, RankPreset::Important, &ActiveDayIndex::default(), 2);
        assert_eq!(hits[0].engram.id, 2);
    }

    #[test]
    fn active_day_index_counts_only_recorded_days() {
        let today = Utc::now().date_naive();
        let index = ActiveDayIndex::new(vec![
            today - Duration::days(9),
            today - Duration::days(4),
            today,
        ]);
        // A memory last touched 10 calendar days ago has aged 3 active days.
        let since = Utc::now() - Duration::days(10);
        assert_eq!(index.active_days_since(since), 3.0);
        // Touched today: zero active days.
        assert_eq!(index.active_days_since(Utc::now()), 0.0);
    }

    #[test]
    fn recency_decays_with_age() {
        assert!((recency_factor(0.0) - 1.0).abs() < 1e-12);
        assert!(recency_factor(7.0) < recency_factor(1.0));
    }

    #[test]
    fn truncates_to_k() {
        let candidates = (0..10).map(|i| (engram(i, 0.5, 0), 0.5)).collect();
        let hits = rank(candidates, RankPreset::Balanced, &ActiveDayIndex::default(), 3);
        assert_eq!(hits.len(), 3);
    }
}
