use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Background loop cadences
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntervalsConfig {
    /// Working-memory consolidation pass into the long-term store.
    #[serde(default = "d_consolidation")]
    pub consolidation_secs: u64,
    /// Decay scoring and pruning pass.
    #[serde(default = "d_decay")]
    pub decay_secs: u64,
    /// Working-memory TTL cleaner.
    #[serde(default = "d_cleanup")]
    pub cleanup_secs: u64,
    /// Health snapshot collection.
    #[serde(default = "d_health")]
    pub health_secs: u64,
}

impl Default for IntervalsConfig {
    fn default() -> Self {
        Self {
            consolidation_secs: d_consolidation(),
            decay_secs: d_decay(),
            cleanup_secs: d_cleanup(),
            health_secs: d_health(),
        }
    }
}

fn d_consolidation() -> u64 {
    60
}

fn d_decay() -> u64 {
    3600
}

fn d_cleanup() -> u64 {
    60
}

fn d_health() -> u64 {
    300
}
