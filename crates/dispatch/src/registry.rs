//! Authoritative, thread-safe mapping from public tool name to owner.
//!
//! Writers serialize on the lock; readers take consistent snapshots and
//! re-verify skill liveness against the supervisor before returning a
//! running-skill record. A record whose process died transparently
//! downgrades to lazy (config still known) or disappears.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use mimo_domain::error::{Error, Result};
use mimo_domain::tool::{ToolDescriptor, ToolOwner};
use mimo_skills::SkillSupervisor;

use crate::ToolHandler;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Lookup result
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Owner classification at lookup time. Never blocks on spawning; lazy
/// resolution is a marker for the dispatcher to act on.
pub enum Lookup {
    Internal {
        descriptor: ToolDescriptor,
        handler: Arc<dyn ToolHandler>,
    },
    SkillLazy {
        descriptor: ToolDescriptor,
        skill_id: String,
    },
    SkillRunning {
        descriptor: ToolDescriptor,
        skill_id: String,
    },
    NotFound,
}

enum Entry {
    Internal {
        descriptor: ToolDescriptor,
        handler: Arc<dyn ToolHandler>,
    },
    Skill {
        descriptor: ToolDescriptor,
        skill_id: String,
    },
}

impl Entry {
    fn descriptor(&self) -> &ToolDescriptor {
        match self {
            Entry::Internal { descriptor, .. } => descriptor,
            Entry::Skill { descriptor, .. } => descriptor,
        }
    }

    fn skill_id(&self) -> Option<&str> {
        match self {
            Entry::Internal { .. } => None,
            Entry::Skill { skill_id, .. } => Some(skill_id),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ToolRegistry {
    entries: RwLock<HashMap<String, Entry>>,
    supervisor: SkillSupervisor,
}

impl ToolRegistry {
    pub fn new(supervisor: SkillSupervisor) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            supervisor,
        }
    }

    /// Register an in-process handler. Overwriting an existing name is
    /// rejected.
    pub fn register_internal(&self, handler: Arc<dyn ToolHandler>) -> Result<()> {
        let descriptor = handler.descriptor();
        let mut entries = self.entries.write();
        if entries.contains_key(&descriptor.name) {
            return Err(Error::Conflict(format!(
                "tool '{}' is already registered",
                descriptor.name
            )));
        }
        tracing::debug!(tool = %descriptor.name, "internal tool registered");
        entries.insert(descriptor.name.clone(), Entry::Internal { descriptor, handler });
        Ok(())
    }

    /// Register a skill's tools as one atomic batch.
    ///
    /// Re-registering an identical batch for the same skill is a no-op;
    /// any name owned by a different owner rejects the whole batch.
    pub fn register_skill_tools(
        &self,
        skill_id: &str,
        descriptors: Vec<ToolDescriptor>,
    ) -> Result<()> {
        let mut entries = self.entries.write();

        for descriptor in &descriptors {
            match entries.get(&descriptor.name) {
                None => {}
                Some(existing) if existing.skill_id() == Some(skill_id) => {}
                Some(_) => {
                    return Err(Error::Conflict(format!(
                        "tool '{}' is owned by another provider",
                        descriptor.name
                    )));
                }
            }
        }

        let count = descriptors.len();
        for mut descriptor in descriptors {
            descriptor.owner = ToolOwner::Skill(skill_id.to_string());
            entries.insert(
                descriptor.name.clone(),
                Entry::Skill {
                    descriptor,
                    skill_id: skill_id.to_string(),
                },
            );
        }
        tracing::info!(skill_id = %skill_id, tools = count, "skill tools registered");
        Ok(())
    }

    /// Atomically remove every name owned by `skill_id`.
    pub fn unregister_skill(&self, skill_id: &str) {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| entry.skill_id() != Some(skill_id));
        let removed = before - entries.len();
        if removed > 0 {
            tracing::info!(skill_id = %skill_id, removed, "skill tools unregistered");
        }
    }

    /// Classify the owner of `name`. Liveness of running skills is
    /// re-verified; an entry whose skill lost both its process and its
    /// config is removed on observation.
    pub fn lookup(&self, name: &str) -> Lookup {
        let (descriptor, skill_id, handler) = {
            let entries = self.entries.read();
            match entries.get(name) {
                None => return Lookup::NotFound,
                Some(Entry::Internal { descriptor, handler }) => {
                    (descriptor.clone(), None, Some(handler.clone()))
                }
                Some(Entry::Skill { descriptor, skill_id }) => {
                    (descriptor.clone(), Some(skill_id.clone()), None)
                }
            }
        };

        match (skill_id, handler) {
            (None, Some(handler)) => Lookup::Internal { descriptor, handler },
            (Some(skill_id), _) => {
                if self.supervisor.is_running(&skill_id) {
                    Lookup::SkillRunning { descriptor, skill_id }
                } else if self.supervisor.has_config(&skill_id) {
                    Lookup::SkillLazy { descriptor, skill_id }
                } else {
                    // Dead with no config left: drop the stale names.
                    self.unregister_skill(&skill_id);
                    Lookup::NotFound
                }
            }
            _ => Lookup::NotFound,
        }
    }

    /// Descriptors of every live tool. Deprecated aliases are hidden
    /// unless requested; entries of configless dead skills are filtered.
    pub fn list_all(&self, include_deprecated: bool) -> Vec<ToolDescriptor> {
        let entries = self.entries.read();
        let mut out: Vec<ToolDescriptor> = entries
            .values()
            .filter(|entry| match entry.skill_id() {
                None => true,
                Some(skill_id) => {
                    self.supervisor.is_running(skill_id) || self.supervisor.has_config(skill_id)
                }
            })
            .map(|entry| entry.descriptor().clone())
            .filter(|d| include_deprecated || d.deprecated_alias_of.is_none())
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    /// Process a skill-death notification: nothing to do while the config
    /// survives (lookups downgrade lazily); configless skills lose their
    /// names here, exactly once.
    pub fn on_skill_death(&self, skill_id: &str) {
        if !self.supervisor.has_config(skill_id) {
            self.unregister_skill(skill_id);
        }
    }

    /// Hot reload: clear every external-skill entry and re-register the
    /// declared tools of `configs` in one atomic swap. In-flight calls
    /// keep their resolved handles.
    pub fn reload_skills(&self, configs: &[mimo_domain::config::SkillProviderConfig]) {
        let mut entries = self.entries.write();
        entries.retain(|_, entry| entry.skill_id().is_none());
        for config in configs {
            for tool_name in &config.tools {
                entries.insert(
                    tool_name.clone(),
                    Entry::Skill {
                        descriptor: declared_descriptor(tool_name, &config.id),
                        skill_id: config.id.clone(),
                    },
                );
            }
        }
        tracing::info!(skills = configs.len(), "external skills re-registered from config");
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

/// Placeholder descriptor for a config-declared tool; replaced by the
/// skill's own `tools/list` descriptor after the first spawn.
pub fn declared_descriptor(tool_name: &str, skill_id: &str) -> ToolDescriptor {
    ToolDescriptor {
        name: tool_name.to_string(),
        description: format!("tool provided by skill '{skill_id}'"),
        schema: serde_json::json!({ "type": "object", "properties": {} }),
        owner: ToolOwner::Skill(skill_id.to_string()),
        deprecated_alias_of: None,
    }
}
