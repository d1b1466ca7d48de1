//! Session-level tools: `onboard` (agent bootstrap), `autonomous`
//! (plan/execute contract over the completion interface), and
//! `orchestrate` (sequential tool pipelines through the dispatcher).

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use mimo_dispatch::Dispatcher;
use mimo_domain::error::{Error, Result};
use mimo_domain::tool::{CallContext, ToolDescriptor};
use mimo_knowledge::KnowledgeGraph;
use mimo_memory::completer::Completer;
use mimo_memory::MemoryCore;

use crate::{operation, required_str, success, ToolHandler};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// onboard
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// First-contact surface for a fresh agent session: what this gateway
/// holds and how to address it.
pub struct OnboardTool {
    memory: Arc<MemoryCore>,
    graph: Arc<KnowledgeGraph>,
}

impl OnboardTool {
    pub fn new(memory: Arc<MemoryCore>, graph: Arc<KnowledgeGraph>) -> Self {
        Self { memory, graph }
    }
}

#[async_trait]
impl ToolHandler for OnboardTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::internal(
            "onboard",
            "Session bootstrap: memory counts and usage guidance for a new agent.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "operation": { "type": "string", "enum": ["bootstrap", "status"] }
                },
                "required": ["operation"]
            }),
        )
    }

    async fn handle(&self, args: Value, ctx: &CallContext) -> Result<Value> {
        match operation(&args)? {
            "bootstrap" => {
                let stats = self.memory.stats()?;
                Ok(success(serde_json::json!({
                    "session_tag": ctx.session_tag,
                    "memory": stats,
                    "triples": self.graph.count()?,
                    "guidance": [
                        "Store durable observations with memory/store.",
                        "Search before storing; duplicates are folded automatically.",
                        "Use cognitive/focus for short-lived context.",
                        "Teach stable facts as knowledge triples.",
                    ],
                })))
            }
            "status" => Ok(success(serde_json::json!({
                "memory": self.memory.stats()?,
                "triples": self.graph.count()?,
            }))),
            other => Err(Error::InvalidArguments(format!("unknown operation '{other}'"))),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// autonomous
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Goal decomposition via the completion interface. Execution of the
/// produced steps stays with the caller (or `orchestrate`).
pub struct AutonomousTool {
    completer: Option<Arc<dyn Completer>>,
}

impl AutonomousTool {
    pub fn new(completer: Option<Arc<dyn Completer>>) -> Self {
        Self { completer }
    }
}

#[async_trait]
impl ToolHandler for AutonomousTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::internal(
            "autonomous",
            "Decompose a goal into tool-addressable steps.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "operation": { "type": "string", "enum": ["plan", "execute"] },
                    "goal": { "type": "string" },
                    "max_steps": { "type": "integer" }
                },
                "required": ["operation", "goal"]
            }),
        )
    }

    async fn handle(&self, args: Value, _ctx: &CallContext) -> Result<Value> {
        let completer = self.completer.as_ref().ok_or_else(|| {
            Error::DependencyUnavailable("no completion endpoint is configured".into())
        })?;
        let goal = required_str(&args, "goal")?;
        let max_steps = args.get("max_steps").and_then(|v| v.as_u64()).unwrap_or(5);

        match operation(&args)? {
            "plan" => {
                let prompt = format!(
                    "Decompose the goal into at most {max_steps} steps, each addressed \
                     to one of: memory, file, terminal, web, code, reason, knowledge. \
                     Reply with a JSON array of {{\"tool\", \"arguments\"}} objects only.\n\
                     Goal: {goal}"
                );
                let raw = completer.complete(&prompt, 1024).await?;
                let steps: Value = serde_json::from_str(raw.trim()).map_err(|e| {
                    Error::DependencyUnavailable(format!("planner reply unparsable: {e}"))
                })?;
                Ok(success(serde_json::json!({ "goal": goal, "steps": steps })))
            }
            "execute" => {
                // Execution is deliberately indirect: produce the plan and
                // hand it to the caller for an orchestrate run, keeping a
                // human-auditable boundary between planning and effects.
                let plan = self
                    .handle(
                        serde_json::json!({ "operation": "plan", "goal": goal, "max_steps": max_steps }),
                        _ctx,
                    )
                    .await?;
                Ok(success(serde_json::json!({
                    "goal": goal,
                    "plan": plan["data"]["steps"],
                    "next": "submit the plan to orchestrate/run",
                })))
            }
            other => Err(Error::InvalidArguments(format!("unknown operation '{other}'"))),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// orchestrate
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Sequential, fail-fast pipeline of tool calls routed back through the
/// dispatcher (aliases, validation, sandbox gating, and telemetry all
/// apply to every step).
pub struct OrchestrateTool {
    dispatcher: Arc<Dispatcher>,
}

impl OrchestrateTool {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }
}

/// Steps per pipeline, bounded.
const MAX_STEPS: usize = 16;

#[async_trait]
impl ToolHandler for OrchestrateTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::internal(
            "orchestrate",
            "Run a sequential pipeline of tool calls, stopping at the first failure.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "operation": { "type": "string", "enum": ["run"] },
                    "steps": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "tool": { "type": "string" },
                                "arguments": { "type": "object" }
                            },
                            "required": ["tool"]
                        }
                    }
                },
                "required": ["operation", "steps"]
            }),
        )
    }

    async fn handle(&self, args: Value, ctx: &CallContext) -> Result<Value> {
        match operation(&args)? {
            "run" => {
                let steps = args
                    .get("steps")
                    .and_then(|v| v.as_array())
                    .ok_or_else(|| {
                        Error::InvalidArguments("missing required argument 'steps'".into())
                    })?;
                if steps.len() > MAX_STEPS {
                    return Err(Error::InvalidArguments(format!(
                        "at most {MAX_STEPS} steps per pipeline"
                    )));
                }

                let mut results = Vec::with_capacity(steps.len());
                for (index, step) in steps.iter().enumerate() {
                    let tool = step
                        .get("tool")
                        .and_then(|t| t.as_str())
                        .ok_or_else(|| {
                            Error::InvalidArguments(format!("step {index} is missing 'tool'"))
                        })?;
                    if tool == "orchestrate" {
                        return Err(Error::InvalidArguments(
                            "orchestrate pipelines cannot nest".into(),
                        ));
                    }
                    let arguments = step
                        .get("arguments")
                        .cloned()
                        .unwrap_or_else(|| serde_json::json!({}));

                    match self.dispatcher.dispatch(tool, arguments, ctx).await {
                        Ok(value) => {
                            results.push(serde_json::json!({
                                "step": index,
                                "tool": tool,
                                "result": value,
                            }));
                        }
                        Err(e) => {
                            // Fail fast: report completed steps and stop.
                            return Ok(success(serde_json::json!({
                                "completed": results,
                                "failed_step": index,
                                "error": { "kind": e.kind(), "message": e.to_string() },
                            })));
                        }
                    }
                }
                Ok(success(serde_json::json!({
                    "completed": results,
                    "failed_step": Value::Null,
                })))
            }
            other => Err(Error::InvalidArguments(format!("unknown operation '{other}'"))),
        }
    }
}
