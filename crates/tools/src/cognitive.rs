//! The `cognitive` tool: the working-memory surface. Items focused here
//! are consolidation candidates once their importance clears the
//! configured threshold.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use mimo_domain::engram::MemoryCategory;
use mimo_domain::error::{Error, Result};
use mimo_domain::tool::{CallContext, ToolDescriptor};
use mimo_memory::working::WorkingMemory;

use crate::{operation, optional_str, required_str, success, ToolHandler};

pub struct CognitiveTool {
    working: Arc<WorkingMemory>,
}

impl CognitiveTool {
    pub fn new(working: Arc<WorkingMemory>) -> Self {
        Self { working }
    }
}

#[async_trait]
impl ToolHandler for CognitiveTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::internal(
            "cognitive",
            "Working memory: focus short-lived items, recall them, inspect the buffer.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "operation": {
                        "type": "string",
                        "enum": ["focus", "recall", "drop", "status"]
                    },
                    "content": { "type": "string" },
                    "category": {
                        "type": "string",
                        "enum": ["fact", "observation", "action", "plan"]
                    },
                    "importance": { "type": "number", "minimum": 0.0, "maximum": 1.0 },
                    "id": { "type": "string", "description": "Working item id" }
                },
                "required": ["operation"]
            }),
        )
    }

    async fn handle(&self, args: Value, _ctx: &CallContext) -> Result<Value> {
        match operation(&args)? {
            "focus" => {
                let content = required_str(&args, "content")?.to_string();
                let category = optional_str(&args, "category")
                    .and_then(MemoryCategory::parse)
                    .unwrap_or(MemoryCategory::Observation);
                let importance = args
                    .get("importance")
                    .and_then(|v| v.as_f64())
                    .unwrap_or(0.5);
                if !(0.0..=1.0).contains(&importance) {
                    return Err(Error::InvalidArguments(format!(
                        "importance must be within [0, 1], got {importance}"
                    )));
                }
                let id = optional_str(&args, "id").map(str::to_string);
                let item = self.working.put(id, content, category, importance);
                Ok(success(serde_json::json!({
                    "id": item.id,
                    "inserted_at": item.inserted_at,
                })))
            }
            "recall" => match optional_str(&args, "id") {
                Some(id) => {
                    let item = self
                        .working
                        .get(id)
                        .ok_or_else(|| Error::NotFound(format!("working item {id}")))?;
                    Ok(success(serde_json::to_value(item)?))
                }
                None => {
                    let items = self.working.list();
                    Ok(success(serde_json::json!({
                        "count": items.len(),
                        "items": items,
                    })))
                }
            },
            "drop" => {
                let id = required_str(&args, "id")?;
                if !self.working.remove(id) {
                    return Err(Error::NotFound(format!("working item {id}")));
                }
                Ok(success(serde_json::json!({ "id": id, "dropped": true })))
            }
            "status" => Ok(success(serde_json::json!({
                "items": self.working.len(),
            }))),
            other => Err(Error::InvalidArguments(format!("unknown operation '{other}'"))),
        }
    }
}
