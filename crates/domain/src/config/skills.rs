use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// External skill providers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillsConfig {
    /// Allowed executable basenames. A provider whose command basename is
    /// not listed fails config validation; the supervisor re-checks at
    /// spawn time.
    #[serde(default)]
    pub command_whitelist: Vec<String>,
    /// Subprocess skill providers, spawned lazily on first call.
    #[serde(default)]
    pub providers: Vec<SkillProviderConfig>,
    /// Cap on concurrently running skill subprocesses.
    #[serde(default = "d_max_processes")]
    pub max_processes: usize,
    /// Per-skill cap on in-flight calls.
    #[serde(default = "d_max_in_flight")]
    pub max_in_flight: usize,
}

impl Default for SkillsConfig {
    fn default() -> Self {
        Self {
            command_whitelist: Vec::new(),
            providers: Vec::new(),
            max_processes: d_max_processes(),
            max_in_flight: d_max_in_flight(),
        }
    }
}

/// Config for one subprocess skill provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SkillProviderConfig {
    /// Stable skill identifier; owns the tools the skill registers.
    pub id: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Tool names the skill declares up front. They resolve lazily before
    /// the first spawn; after the handshake the skill's own `tools/list`
    /// descriptors replace these.
    #[serde(default)]
    pub tools: Vec<String>,
}

impl SkillsConfig {
    /// Check a command against the whitelist by its basename.
    ///
    /// An empty whitelist rejects everything: external skills are opt-in.
    pub fn check_command(&self, command: &str) -> Result<(), String> {
        let basename = Path::new(command)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(command);
        if self.command_whitelist.iter().any(|w| w == basename) {
            Ok(())
        } else {
            Err(format!("command '{basename}' is not whitelisted"))
        }
    }
}

fn d_max_processes() -> usize {
    32
}

fn d_max_in_flight() -> usize {
    16
}
