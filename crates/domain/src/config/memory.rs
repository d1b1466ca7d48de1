use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Memory core
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// SQLite database path. `:memory:` is accepted for tests.
    #[serde(default = "d_db_path")]
    pub db_path: PathBuf,
    /// Embedding dimension D, fixed per deployment.
    #[serde(default = "d_embedding_dim")]
    pub embedding_dim: usize,
    /// Hard cap on total long-term memories.
    #[serde(default = "d_cap")]
    pub cap: usize,
    /// Working-memory items at or above this importance are consolidated.
    #[serde(default = "d_consolidation_threshold")]
    pub consolidation_threshold: f64,
    /// Working-memory item TTL in seconds.
    #[serde(default = "d_working_ttl")]
    pub working_ttl_secs: u64,
    /// Decay scores below this are pruned (unprotected memories only).
    #[serde(default = "d_prune_threshold")]
    pub prune_threshold: f64,
    /// Optional embedding service endpoint. Absent, the deterministic
    /// hash fallback is used alone.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_url: Option<String>,
    /// Optional completion service endpoint for synthesis and analysis.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_url: Option<String>,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            db_path: d_db_path(),
            embedding_dim: d_embedding_dim(),
            cap: d_cap(),
            consolidation_threshold: d_consolidation_threshold(),
            working_ttl_secs: d_working_ttl(),
            prune_threshold: d_prune_threshold(),
            embedding_url: None,
            completion_url: None,
        }
    }
}

fn d_db_path() -> PathBuf {
    PathBuf::from("./data/mimo.db")
}

fn d_embedding_dim() -> usize {
    256
}

fn d_cap() -> usize {
    100_000
}

fn d_consolidation_threshold() -> f64 {
    0.7
}

fn d_working_ttl() -> u64 {
    300
}

fn d_prune_threshold() -> f64 {
    0.05
}
