//! Status surfaces: `awakening_status` (one-shot gateway snapshot) and
//! `tool_usage` (per-tool execution statistics).

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;

use mimo_dispatch::{FeedbackLoop, TelemetryRecorder};
use mimo_domain::error::{Error, Result};
use mimo_domain::tool::{CallContext, ToolDescriptor};
use mimo_knowledge::KnowledgeGraph;
use mimo_memory::MemoryCore;
use mimo_skills::SkillSupervisor;

use crate::{operation, optional_str, success, ToolHandler};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// awakening_status
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Whole-gateway snapshot: memory, knowledge, skills, and call volume.
/// Single-operation tool; `operation` is accepted but not required.
pub struct AwakeningStatusTool {
    memory: Arc<MemoryCore>,
    graph: Arc<KnowledgeGraph>,
    supervisor: SkillSupervisor,
    telemetry: Arc<TelemetryRecorder>,
    started_at: Instant,
}

impl AwakeningStatusTool {
    pub fn new(
        memory: Arc<MemoryCore>,
        graph: Arc<KnowledgeGraph>,
        supervisor: SkillSupervisor,
        telemetry: Arc<TelemetryRecorder>,
    ) -> Self {
        Self {
            memory,
            graph,
            supervisor,
            telemetry,
            started_at: Instant::now(),
        }
    }
}

#[async_trait]
impl ToolHandler for AwakeningStatusTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::internal(
            "awakening_status",
            "Snapshot of the gateway: memory counts, skills, call volume, uptime.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "operation": { "type": "string" }
                }
            }),
        )
    }

    async fn handle(&self, _args: Value, _ctx: &CallContext) -> Result<Value> {
        let stats = self.memory.stats()?;
        Ok(success(serde_json::json!({
            "uptime_secs": self.started_at.elapsed().as_secs(),
            "memory": stats,
            "triples": self.graph.count()?,
            "skills": {
                "running": self.supervisor.running_count(),
                "failed": self.supervisor.failed_count(),
            },
            "calls": {
                "total": self.telemetry.total_calls(),
                "failed": self.telemetry.total_failures(),
            },
        })))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// tool_usage
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ToolUsageTool {
    feedback: Arc<FeedbackLoop>,
    telemetry: Arc<TelemetryRecorder>,
}

impl ToolUsageTool {
    pub fn new(feedback: Arc<FeedbackLoop>, telemetry: Arc<TelemetryRecorder>) -> Self {
        Self { feedback, telemetry }
    }
}

#[async_trait]
impl ToolHandler for ToolUsageTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::internal(
            "tool_usage",
            "Per-tool execution statistics: success rates, trends, latency.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "operation": { "type": "string", "enum": ["stats", "log"] },
                    "tool": { "type": "string" }
                },
                "required": ["operation"]
            }),
        )
    }

    async fn handle(&self, args: Value, _ctx: &CallContext) -> Result<Value> {
        match operation(&args)? {
            "stats" => match optional_str(&args, "tool") {
                Some(tool) => {
                    let executions = self.feedback.execution_count(tool);
                    if executions == 0 {
                        return Err(Error::NotFound(format!(
                            "no recorded executions for '{tool}'"
                        )));
                    }
                    Ok(success(serde_json::json!({
                        "tool": tool,
                        "executions": executions,
                        "success_rate": self.feedback.success_rate(tool),
                        "trend": self.feedback.trend(tool),
                    })))
                }
                None => {
                    let mut tools = self.feedback.known_tools();
                    tools.sort();
                    let stats: Vec<Value> = tools
                        .iter()
                        .map(|tool| {
                            serde_json::json!({
                                "tool": tool,
                                "executions": self.feedback.execution_count(tool),
                                "success_rate": self.feedback.success_rate(tool),
                            })
                        })
                        .collect();
                    Ok(success(serde_json::json!({ "tools": stats })))
                }
            },
            "log" => Ok(success(serde_json::json!({
                "latency": self.telemetry.latency_snapshot(),
            }))),
            other => Err(Error::InvalidArguments(format!("unknown operation '{other}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mimo_domain::config::{MemoryConfig, SkillsConfig};
    use std::path::{Path, PathBuf};

    #[tokio::test]
    async fn awakening_status_snapshot() {
        let memory = Arc::new(
            MemoryCore::open(
                &MemoryConfig {
                    db_path: PathBuf::from(":memory:"),
                    embedding_dim: 32,
                    ..Default::default()
                },
                None,
                true,
                true,
            )
            .unwrap(),
        );
        let graph = Arc::new(KnowledgeGraph::open(Path::new(":memory:")).unwrap());
        let tool = AwakeningStatusTool::new(
            memory,
            graph,
            SkillSupervisor::new(SkillsConfig::default()),
            Arc::new(TelemetryRecorder::new()),
        );
        let out = tool
            .handle(serde_json::json!({}), &CallContext::default())
            .await
            .unwrap();
        assert_eq!(out["data"]["skills"]["running"], 0);
        assert_eq!(out["data"]["calls"]["total"], 0);
    }

    #[tokio::test]
    async fn tool_usage_stats_for_unknown_tool() {
        let tool = ToolUsageTool::new(
            Arc::new(FeedbackLoop::new()),
            Arc::new(TelemetryRecorder::new()),
        );
        let err = tool
            .handle(
                serde_json::json!({ "operation": "stats", "tool": "ghost" }),
                &CallContext::default(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[tokio::test]
    async fn tool_usage_lists_all_known() {
        let feedback = Arc::new(FeedbackLoop::new());
        feedback.record("web", true);
        feedback.record("memory", false);
        let tool = ToolUsageTool::new(feedback, Arc::new(TelemetryRecorder::new()));
        let out = tool
            .handle(serde_json::json!({ "operation": "stats" }), &CallContext::default())
            .await
            .unwrap();
        assert_eq!(out["data"]["tools"].as_array().unwrap().len(), 2);
    }
}
