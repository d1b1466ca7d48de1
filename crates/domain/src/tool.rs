//! Tool surface types shared by the registry, the dispatcher, and both
//! protocol frontends.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Descriptors
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Who answers calls to a public tool name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "skill_id")]
pub enum ToolOwner {
    Internal,
    Skill(String),
}

/// A public, schema-described tool addressable by name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Unique, stable public identifier.
    pub name: String,
    pub description: String,
    /// JSON-Schema-shaped description of accepted arguments. Multi-op
    /// tools carry an `operation` enum in `properties`.
    pub schema: serde_json::Value,
    pub owner: ToolOwner,
    /// Canonical replacement when this name is a deprecated alias.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deprecated_alias_of: Option<String>,
}

impl ToolDescriptor {
    pub fn internal(
        name: impl Into<String>,
        description: impl Into<String>,
        schema: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            schema,
            owner: ToolOwner::Internal,
            deprecated_alias_of: None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Call context
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-call context threaded from the frontend through the dispatcher to
/// the handler. Stack-local; the dispatcher holds no global call state.
#[derive(Debug, Clone)]
pub struct CallContext {
    /// Session tag attached to stored memories (`metadata.session_tag`).
    pub session_tag: Option<String>,
    /// Caller agent type (`metadata.agent_type`).
    pub agent_type: Option<String>,
    /// Sandboxed calls may not reach write-side tools.
    pub sandbox: bool,
    /// Hard deadline for the whole call.
    pub deadline: Duration,
}

impl CallContext {
    pub fn new(deadline: Duration) -> Self {
        Self {
            session_tag: None,
            agent_type: None,
            sandbox: false,
            deadline,
        }
    }

    pub fn sandboxed(mut self) -> Self {
        self.sandbox = true;
        self
    }
}

impl Default for CallContext {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Telemetry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Outcome classification recorded per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallOutcome {
    Success,
    Failure,
    Timeout,
}

/// One telemetry record per dispatched call.
#[derive(Debug, Clone, Serialize)]
pub struct TelemetryRecord {
    pub tool: String,
    pub owner: ToolOwner,
    pub latency_ms: u64,
    pub outcome: CallOutcome,
    pub at: DateTime<Utc>,
}
