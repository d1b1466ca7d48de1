//! The single entry point for every tool call regardless of frontend.
//!
//! Every call passes through alias resolution, the sandbox gate, registry
//! lookup, argument validation, handler invocation under the call
//! deadline, result enrichment, and finally feedback and telemetry
//! recording. Per-call state is stack-local; the only shared mutable
//! state is the registry, the feedback counters, and the telemetry
//! reservoirs.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;

use mimo_domain::error::{Error, Result};
use mimo_domain::tool::{CallContext, CallOutcome, ToolOwner};
use mimo_memory::ranker::RankPreset;
use mimo_memory::{MemoryCore, SearchRequest};
use mimo_skills::SkillSupervisor;

use crate::registry::{declared_descriptor, Lookup, ToolRegistry};
use crate::{aliases, validate, FeedbackLoop, TelemetryRecorder};

/// Similarity floor for knowledge injection.
const INJECTION_THRESHOLD: f64 = 0.7;
/// Executions before experience context is attached.
const EXPERIENCE_MIN_EXECUTIONS: usize = 5;

pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
    supervisor: SkillSupervisor,
    feedback: Arc<FeedbackLoop>,
    telemetry: Arc<TelemetryRecorder>,
    memory: Arc<MemoryCore>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<ToolRegistry>,
        supervisor: SkillSupervisor,
        feedback: Arc<FeedbackLoop>,
        telemetry: Arc<TelemetryRecorder>,
        memory: Arc<MemoryCore>,
    ) -> Self {
        Self {
            registry,
            supervisor,
            feedback,
            telemetry,
            memory,
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn feedback(&self) -> &Arc<FeedbackLoop> {
        &self.feedback
    }

    pub fn telemetry(&self) -> &Arc<TelemetryRecorder> {
        &self.telemetry
    }

    /// Default deadline by tool class: memory-read surfaces are fast,
    /// browser automation is slow, everything else is plain I/O.
    pub fn default_deadline(tool: &str, operation: Option<&str>) -> Duration {
        match tool {
            "web" if operation == Some("browser") => Duration::from_secs(120),
            "memory" | "cognitive" | "meta" | "knowledge" | "tool_usage"
            | "awakening_status" => Duration::from_secs(5),
            _ => Duration::from_secs(30),
        }
    }

    /// Dispatch one call. Errors carry stable kinds; they are surfaced to
    /// the caller untranslated.
    pub async fn dispatch(&self, tool_name: &str, args: Value, ctx: &CallContext) -> Result<Value> {
        let started = Instant::now();
        let (name, args) = aliases::resolve(tool_name, args);
        self.memory.record_active_day();

        let operation = args
            .get("operation")
            .and_then(|o| o.as_str())
            .map(str::to_string);

        if ctx.sandbox && validate::is_write_side(&name, operation.as_deref()) {
            return Err(Error::ToolDisabledInSandbox(match &operation {
                Some(op) => format!("{name}/{op}"),
                None => name.clone(),
            }));
        }

        let result = self.invoke(&name, args, ctx).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        let (outcome, owner) = match &result {
            Ok(_) => (CallOutcome::Success, self.owner_of(&name)),
            Err(Error::Timeout(_)) => (CallOutcome::Timeout, self.owner_of(&name)),
            Err(_) => (CallOutcome::Failure, self.owner_of(&name)),
        };
        self.feedback.record(&name, outcome == CallOutcome::Success);
        self.telemetry.record(&name, owner, latency_ms, outcome);

        match result {
            Ok(value) => Ok(self.enrich(&name, value).await),
            Err(e) => Err(e),
        }
    }

    fn owner_of(&self, name: &str) -> ToolOwner {
        match self.registry.lookup(name) {
            Lookup::SkillLazy { skill_id, .. } | Lookup::SkillRunning { skill_id, .. } => {
                ToolOwner::Skill(skill_id)
            }
            _ => ToolOwner::Internal,
        }
    }

    // ── Invocation ───────────────────────────────────────────────────

    async fn invoke(&self, name: &str, args: Value, ctx: &CallContext) -> Result<Value> {
        match self.registry.lookup(name) {
            Lookup::NotFound => Err(Error::UnknownTool(name.to_string())),
            Lookup::Internal { descriptor, handler } => {
                validate::validate_args(&descriptor.schema, &args)?;
                match tokio::time::timeout(ctx.deadline, handler.handle(args, ctx)).await {
                    Ok(result) => result,
                    Err(_) => Err(Error::Timeout(name.to_string())),
                }
            }
            Lookup::SkillLazy { descriptor, skill_id }
            | Lookup::SkillRunning { descriptor, skill_id } => {
                validate::validate_args(&descriptor.schema, &args)?;
                self.invoke_skill(&skill_id, name, args, ctx.deadline).await
            }
        }
    }

    /// Call a skill tool with one transparent respawn-and-retry on a
    /// freshly-died subprocess.
    async fn invoke_skill(
        &self,
        skill_id: &str,
        tool_name: &str,
        args: Value,
        deadline: Duration,
    ) -> Result<Value> {
        let was_running = self.supervisor.is_running(skill_id);
        let first = self
            .supervisor
            .call_tool(skill_id, tool_name, args.clone(), deadline)
            .await;

        let value = match first {
            Ok(value) => value,
            Err(Error::SkillUnavailable(_)) if was_running => {
                tracing::info!(
                    skill_id = %skill_id,
                    tool = %tool_name,
                    "stale skill process, retrying once with a fresh spawn"
                );
                self.supervisor
                    .call_tool(skill_id, tool_name, args, deadline)
                    .await?
            }
            Err(e) => return Err(e),
        };

        if !was_running {
            // Fresh spawn: refresh the registry with the skill's own
            // descriptors in the background.
            self.refresh_skill_tools(skill_id.to_string());
        }
        Ok(value)
    }

    fn refresh_skill_tools(&self, skill_id: String) {
        let supervisor = self.supervisor.clone();
        let registry = self.registry.clone();
        tokio::spawn(async move {
            match supervisor.discover_tools(&skill_id).await {
                Ok(tools) if !tools.is_empty() => {
                    let descriptors = tools
                        .into_iter()
                        .map(|t| {
                            let mut d = declared_descriptor(&t.name, &skill_id);
                            d.description = t.description;
                            d.schema = t.input_schema;
                            d
                        })
                        .collect();
                    if let Err(e) = registry.register_skill_tools(&skill_id, descriptors) {
                        tracing::warn!(skill_id = %skill_id, error = %e, "tool refresh rejected");
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(skill_id = %skill_id, error = %e, "tool discovery failed");
                }
            }
        });
    }

    // ── Enrichment ───────────────────────────────────────────────────

    async fn enrich(&self, name: &str, mut value: Value) -> Value {
        let Some(map) = value.as_object_mut() else {
            return value;
        };

        if self.feedback.execution_count(name) >= EXPERIENCE_MIN_EXECUTIONS {
            if let Some(experience) = self.feedback.experience(name) {
                map.insert(
                    "_experience_context".into(),
                    serde_json::json!({
                        "success_rate": experience.success_rate,
                        "trend": experience.trend,
                        "executions": experience.executions,
                    }),
                );
            }
        }

        // Memory surfaces already return memories; injecting them back
        // would only echo the result.
        if name != "memory" && name != "cognitive" {
            if let Some(context) = semantic_context(map) {
                match self
                    .memory
                    .search(SearchRequest {
                        query: context,
                        limit: 3,
                        preset: RankPreset::Semantic,
                        include_superseded: false,
                        min_similarity: INJECTION_THRESHOLD,
                        category: None,
                    })
                    .await
                {
                    Ok(hits) if !hits.is_empty() => {
                        let injected: Vec<Value> = hits
                            .iter()
                            .map(|h| {
                                serde_json::json!({
                                    "id": h.id,
                                    "content": h.content,
                                    "similarity": h.similarity,
                                })
                            })
                            .collect();
                        map.insert("_knowledge_injection".into(), Value::Array(injected));
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::debug!(error = %e, "knowledge injection search failed");
                    }
                }
            }
        }

        value
    }
}

/// Text to search memories with, drawn from the result's own string
/// fields. Short results carry no useful context.
fn semantic_context(map: &serde_json::Map<String, Value>) -> Option<String> {
    let mut parts: Vec<&str> = Vec::new();
    for (key, value) in map {
        if key.starts_with('_') {
            continue;
        }
        if let Some(s) = value.as_str() {
            if !s.is_empty() {
                parts.push(s);
            }
        }
    }
    if parts.is_empty() {
        return None;
    }
    let joined = parts.join(" ");
    let context: String = joined.chars().take(200).collect();
    if context.len() < 8 {
        None
    } else {
        Some(context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ToolHandler;
    use async_trait::async_trait;
    use mimo_domain::config::{MemoryConfig, SkillsConfig};
    use mimo_domain::tool::ToolDescriptor;
    use std::path::PathBuf;

    struct EchoTool;

    #[async_trait]
    impl ToolHandler for EchoTool {
        fn descriptor(&self) -> ToolDescriptor {
            ToolDescriptor::internal(
                "memory",
                "test memory tool",
                serde_json::json!({
                    "type": "object",
                    "properties": {
                        "operation": { "type": "string", "enum": ["store", "search"] }
                    },
                    "required": ["operation"]
                }),
            )
        }
        async fn handle(&self, args: Value, _ctx: &CallContext) -> Result<Value> {
            Ok(serde_json::json!({"echoed": args}))
        }
    }

    struct SlowTool;

    #[async_trait]
    impl ToolHandler for SlowTool {
        fn descriptor(&self) -> ToolDescriptor {
            ToolDescriptor::internal("web", "slow tool", serde_json::json!({"type": "object"}))
        }
        async fn handle(&self, _args: Value, _ctx: &CallContext) -> Result<Value> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Value::Null)
        }
    }

    fn dispatcher() -> Dispatcher {
        let supervisor = SkillSupervisor::new(SkillsConfig::default());
        let registry = Arc::new(ToolRegistry::new(supervisor.clone()));
        registry.register_internal(Arc::new(EchoTool)).unwrap();
        registry.register_internal(Arc::new(SlowTool)).unwrap();
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
        Dispatcher::new(
            registry,
            supervisor,
            Arc::new(FeedbackLoop::new()),
            Arc::new(TelemetryRecorder::new()),
            memory,
        )
    }

    #[tokio::test]
    async fn unknown_tool_is_surfaced() {
        let d = dispatcher();
        let err = d
            .dispatch("ghost", serde_json::json!({}), &CallContext::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "unknown_tool");
    }

    #[tokio::test]
    async fn sandbox_blocks_write_side_operations() {
        let d = dispatcher();
        let ctx = CallContext::default().sandboxed();
        let err = d
            .dispatch("memory", serde_json::json!({"operation": "store"}), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "tool_disabled_in_sandbox");

        // Read-side operations still pass in sandbox mode.
        let ok = d
            .dispatch("memory", serde_json::json!({"operation": "search"}), &ctx)
            .await;
        assert!(ok.is_ok());
    }

    #[tokio::test]
    async fn invalid_operation_is_rejected_before_handler() {
        let d = dispatcher();
        let err = d
            .dispatch(
                "memory",
                serde_json::json!({"operation": "explode"}),
                &CallContext::default(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_arguments");
    }

    #[tokio::test]
    async fn deprecated_alias_resolves_to_canonical() {
        let d = dispatcher();
        let value = d
            .dispatch("recall", serde_json::json!({}), &CallContext::default())
            .await
            .unwrap();
        assert_eq!(value["echoed"]["operation"], "search");
    }

    #[tokio::test]
    async fn zero_deadline_times_out() {
        let d = dispatcher();
        let ctx = CallContext::new(Duration::from_millis(0));
        let err = d
            .dispatch("web", serde_json::json!({}), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "timeout");
    }

    #[tokio::test]
    async fn experience_context_attaches_after_five_calls() {
        let d = dispatcher();
        let ctx = CallContext::default();
        let args = serde_json::json!({"operation": "search"});
        for _ in 0..5 {
            d.dispatch("memory", args.clone(), &ctx).await.unwrap();
        }
        let value = d.dispatch("memory", args, &ctx).await.unwrap();
        let experience = &value["_experience_context"];
        assert!(experience.is_object());
        assert!((experience["success_rate"].as_f64().unwrap() - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn default_deadlines_by_tool_class() {
        assert_eq!(
            Dispatcher::default_deadline("memory", Some("search")),
            Duration::from_secs(5)
        );
        assert_eq!(
            Dispatcher::default_deadline("web", Some("browser")),
            Duration::from_secs(120)
        );
        assert_eq!(
            Dispatcher::default_deadline("terminal", Some("execute")),
            Duration::from_secs(30)
        );
    }
}
