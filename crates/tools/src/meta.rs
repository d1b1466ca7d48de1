//! The `meta` tool: emergence patterns and per-tool experience, surfaced
//! read-only. Pattern detection itself is a collaborator; this is its
//! dispatch and persistence surface.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use mimo_dispatch::FeedbackLoop;
use mimo_domain::error::{Error, Result};
use mimo_domain::tool::{CallContext, ToolDescriptor};
use mimo_memory::store::LongTermStore;

use crate::{operation, required_str, success, ToolHandler};

pub struct MetaTool {
    store: Arc<LongTermStore>,
    feedback: Arc<FeedbackLoop>,
}

impl MetaTool {
    pub fn new(store: Arc<LongTermStore>, feedback: Arc<FeedbackLoop>) -> Self {
        Self { store, feedback }
    }
}

#[async_trait]
impl ToolHandler for MetaTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::internal(
            "meta",
            "Meta-cognition: reflect on usage patterns and their impact.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "operation": { "type": "string", "enum": ["reflect", "impact", "status"] },
                    "tool": { "type": "string", "description": "Tool name for impact analysis" },
                    "limit": { "type": "integer" }
                },
                "required": ["operation"]
            }),
        )
    }

    async fn handle(&self, args: Value, _ctx: &CallContext) -> Result<Value> {
        match operation(&args)? {
            "reflect" => {
                let limit = args
                    .get("limit")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(20)
                    .min(100) as usize;
                let patterns = self.store.patterns(limit)?;
                Ok(success(serde_json::json!({
                    "count": patterns.len(),
                    "patterns": patterns,
                })))
            }
            "impact" => {
                let tool = required_str(&args, "tool")?;
                let executions = self.feedback.execution_count(tool);
                if executions == 0 {
                    return Err(Error::NotFound(format!("no recorded executions for '{tool}'")));
                }
                Ok(success(serde_json::json!({
                    "tool": tool,
                    "executions": executions,
                    "success_rate": self.feedback.success_rate(tool),
                    "trend": self.feedback.trend(tool),
                })))
            }
            "status" => {
                let tools = self.feedback.known_tools();
                let summaries: Vec<Value> = tools
                    .iter()
                    .filter_map(|tool| self.feedback.experience(tool))
                    .map(|e| serde_json::to_value(e).unwrap_or(Value::Null))
                    .collect();
                Ok(success(serde_json::json!({
                    "tools_tracked": tools.len(),
                    "experienced": summaries,
                })))
            }
            other => Err(Error::InvalidArguments(format!("unknown operation '{other}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn tool() -> MetaTool {
        let store = Arc::new(LongTermStore::open(Path::new(":memory:"), 100).unwrap());
        MetaTool::new(store, Arc::new(FeedbackLoop::new()))
    }

    #[tokio::test]
    async fn reflect_lists_recorded_patterns() {
        let meta = tool();
        meta.store.record_pattern_use("web.fetch->memory.store", true).unwrap();
        meta.store.record_pattern_use("web.fetch->memory.store", true).unwrap();

        let out = meta
            .handle(serde_json::json!({ "operation": "reflect" }), &CallContext::default())
            .await
            .unwrap();
        assert_eq!(out["data"]["count"], 1);
        assert_eq!(out["data"]["patterns"][0]["usage_count"], 2);
    }

    #[tokio::test]
    async fn impact_requires_recorded_executions() {
        let meta = tool();
        let err = meta
            .handle(
                serde_json::json!({ "operation": "impact", "tool": "web" }),
                &CallContext::default(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "not_found");

        meta.feedback.record("web", true);
        let out = meta
            .handle(
                serde_json::json!({ "operation": "impact", "tool": "web" }),
                &CallContext::default(),
            )
            .await
            .unwrap();
        assert_eq!(out["data"]["executions"], 1);
    }
}
