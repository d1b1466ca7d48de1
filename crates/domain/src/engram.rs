//! Memory records: the persisted engram, the short-lived working-memory
//! item, and the supersession link kinds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Maximum accepted engram content, in bytes. Larger stores are rejected
/// with `invalid_arguments`.
pub const MAX_CONTENT_BYTES: usize = 100 * 1024;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Category
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryCategory {
    Fact,
    Observation,
    Action,
    Plan,
}

impl MemoryCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryCategory::Fact => "fact",
            MemoryCategory::Observation => "observation",
            MemoryCategory::Action => "action",
            MemoryCategory::Plan => "plan",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "fact" => Some(MemoryCategory::Fact),
            "observation" => Some(MemoryCategory::Observation),
            "action" => Some(MemoryCategory::Action),
            "plan" => Some(MemoryCategory::Plan),
            _ => None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Engram
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A single persisted memory record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Engram {
    /// Assigned on persistence (SQLite rowid).
    pub id: i64,
    pub content: String,
    pub category: MemoryCategory,
    /// Clamped to [0, 1]; violating writes are rejected upstream.
    pub importance: f64,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    /// Monotonic; decreases are forbidden.
    pub access_count: i64,
    /// Per-memory decay multiplier.
    pub decay_rate: f64,
    /// Protected memories are exempt from decay-based pruning.
    pub protected: bool,
    /// Full float vector of the deployment's fixed dimension. Every
    /// persisted engram carries either a real embedding or a deterministic
    /// hash-derived fallback.
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    /// Set when a newer memory replaced this one.
    #[serde(default)]
    pub superseded_by: Option<i64>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Supersession
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// How a newer memory relates to the one it replaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SupersessionKind {
    Update,
    Correction,
    Refinement,
}

impl SupersessionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SupersessionKind::Update => "update",
            SupersessionKind::Correction => "correction",
            SupersessionKind::Refinement => "refinement",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "update" => Some(SupersessionKind::Update),
            "correction" => Some(SupersessionKind::Correction),
            "refinement" => Some(SupersessionKind::Refinement),
            _ => None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Working memory
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Short-lived working-memory item. No embedding until consolidation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkingItem {
    pub id: String,
    pub content: String,
    pub category: MemoryCategory,
    pub importance: f64,
    pub inserted_at: DateTime<Utc>,
}
