//! The `reason` tool: structured reasoning delegated to the external
//! completion interface. The gateway never generates free-form text on
//! its own; without a configured completer every operation reports
//! `dependency_unavailable`.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use mimo_domain::error::{Error, Result};
use mimo_domain::tool::{CallContext, ToolDescriptor};
use mimo_memory::completer::Completer;

use crate::{operation, required_str, success, ToolHandler};

pub struct ReasonTool {
    completer: Option<Arc<dyn Completer>>,
}

impl ReasonTool {
    pub fn new(completer: Option<Arc<dyn Completer>>) -> Self {
        Self { completer }
    }

    fn completer(&self) -> Result<&Arc<dyn Completer>> {
        self.completer.as_ref().ok_or_else(|| {
            Error::DependencyUnavailable("no completion endpoint is configured".into())
        })
    }
}

#[async_trait]
impl ToolHandler for ReasonTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::internal(
            "reason",
            "Reasoning over supplied context via the completion interface.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "operation": { "type": "string", "enum": ["think", "chain", "summarize"] },
                    "prompt": { "type": "string" },
                    "context": { "type": "string" },
                    "steps": { "type": "array", "items": { "type": "string" } },
                    "max_tokens": { "type": "integer" }
                },
                "required": ["operation"]
            }),
        )
    }

    async fn handle(&self, args: Value, _ctx: &CallContext) -> Result<Value> {
        let max_tokens = args
            .get("max_tokens")
            .and_then(|v| v.as_u64())
            .unwrap_or(512) as u32;

        match operation(&args)? {
            "think" => {
                let prompt = required_str(&args, "prompt")?;
                let context = args.get("context").and_then(|v| v.as_str()).unwrap_or("");
                let full = if context.is_empty() {
                    prompt.to_string()
                } else {
                    format!("Context:\n{context}\n\nTask:\n{prompt}")
                };
                let answer = self.completer()?.complete(&full, max_tokens).await?;
                Ok(success(serde_json::json!({ "answer": answer })))
            }
            "chain" => {
                let steps = args
                    .get("steps")
                    .and_then(|v| v.as_array())
                    .ok_or_else(|| {
                        Error::InvalidArguments("missing required argument 'steps'".into())
                    })?;
                let completer = self.completer()?;
                let mut transcript = Vec::with_capacity(steps.len());
                let mut carried = String::new();
                for step in steps {
                    let Some(step) = step.as_str() else {
                        return Err(Error::InvalidArguments("steps must be strings".into()));
                    };
                    let prompt = if carried.is_empty() {
                        step.to_string()
                    } else {
                        format!("Previous result:\n{carried}\n\nNext step:\n{step}")
                    };
                    carried = completer.complete(&prompt, max_tokens).await?;
                    transcript.push(serde_json::json!({ "step": step, "result": carried }));
                }
                Ok(success(serde_json::json!({
                    "steps": transcript,
                    "final": carried,
                })))
            }
            "summarize" => {
                let context = required_str(&args, "context")?;
                let prompt = format!("Summarize the following concisely:\n\n{context}");
                let answer = self.completer()?.complete(&prompt, max_tokens).await?;
                Ok(success(serde_json::json!({ "summary": answer })))
            }
            other => Err(Error::InvalidArguments(format!("unknown operation '{other}'"))),
        }
    }
}
