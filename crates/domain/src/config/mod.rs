mod features;
mod intervals;
mod memory;
mod server;
mod skills;

pub use features::*;
pub use intervals::*;
pub use memory::*;
pub use server::*;
pub use skills::*;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub intervals: IntervalsConfig,
    #[serde(default)]
    pub features: FeatureFlags,
    #[serde(default)]
    pub skills: SkillsConfig,
    #[serde(default)]
    pub snapshots: SnapshotsConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sandbox
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// File-operation confinement. Every `file`, `code`, and `terminal`
/// operation resolves paths relative to `root` and rejects traversal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    #[serde(default = "d_sandbox_root")]
    pub root: PathBuf,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self { root: d_sandbox_root() }
    }
}

fn d_sandbox_root() -> PathBuf {
    PathBuf::from("./data/sandbox")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Snapshots
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Pre-migration database snapshot settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotsConfig {
    /// Directory receiving timestamped full copies. `None` disables snapshots.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
    #[serde(default = "d_retention_days")]
    pub retention_days: u32,
}

impl Default for SnapshotsConfig {
    fn default() -> Self {
        Self {
            dir: None,
            retention_days: d_retention_days(),
        }
    }
}

fn d_retention_days() -> u32 {
    7
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.server.http_port == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "server.http_port".into(),
                message: "port must be greater than 0".into(),
            });
        }

        if self.server.host.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "server.host".into(),
                message: "host must not be empty".into(),
            });
        }

        if self.server.production && std::env::var(&self.server.api_key_env).is_err() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "server.api_key_env".into(),
                message: format!(
                    "production mode requires the {} environment variable",
                    self.server.api_key_env
                ),
            });
        }

        if self.memory.embedding_dim == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "memory.embedding_dim".into(),
                message: "embedding dimension must be greater than 0".into(),
            });
        }

        if self.memory.cap == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "memory.cap".into(),
                message: "memory cap must be greater than 0".into(),
            });
        }

        if !(0.0..=1.0).contains(&self.memory.consolidation_threshold) {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "memory.consolidation_threshold".into(),
                message: "must be within [0, 1]".into(),
            });
        }

        if self.skills.providers.is_empty() && !self.skills.command_whitelist.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "skills.command_whitelist".into(),
                message: "whitelist configured but no skill providers defined".into(),
            });
        }

        for provider in &self.skills.providers {
            if let Err(msg) = self.skills.check_command(&provider.command) {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("skills.providers.{}", provider.id),
                    message: msg,
                });
            }
        }

        errors
    }
}
