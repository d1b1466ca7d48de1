use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Feature flags
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureFlags {
    /// Binary-index approximate retrieval for large corpora.
    #[serde(default = "d_true")]
    pub approximate_index: bool,
    /// Temporal memory chains (supersession classification on store).
    #[serde(default = "d_true")]
    pub temporal_chains: bool,
    /// Emergence pattern tracking surfaced via the `meta` tool.
    #[serde(default)]
    pub emergence: bool,
    /// LLM-assisted analysis for routing and chain classification.
    #[serde(default)]
    pub analyzer: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            approximate_index: true,
            temporal_chains: true,
            emergence: false,
            analyzer: false,
        }
    }
}

fn d_true() -> bool {
    true
}
