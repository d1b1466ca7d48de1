//! The `memory` tool: the public surface of the long-term store.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use mimo_domain::engram::SupersessionKind;
use mimo_domain::error::{Error, Result};
use mimo_domain::tool::{CallContext, ToolDescriptor};
use mimo_memory::{MemoryCore, SearchRequest, StoreRequest};

use crate::{operation, required_id, success, ToolHandler};

pub struct MemoryTool {
    core: Arc<MemoryCore>,
}

impl MemoryTool {
    pub fn new(core: Arc<MemoryCore>) -> Self {
        Self { core }
    }
}

#[async_trait]
impl ToolHandler for MemoryTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::internal(
            "memory",
            "Persistent memory: store, search, and manage long-term memories.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "operation": {
                        "type": "string",
                        "enum": ["store", "search", "get", "update", "delete", "stats", "protect", "forget"]
                    },
                    "content": { "type": "string", "description": "Content to store" },
                    "category": {
                        "type": "string",
                        "enum": ["fact", "observation", "action", "plan"]
                    },
                    "importance": { "type": "number", "minimum": 0.0, "maximum": 1.0 },
                    "query": { "type": "string", "description": "Search query" },
                    "limit": { "type": "integer", "description": "Max results (default 10)" },
                    "preset": {
                        "type": "string",
                        "enum": ["balanced", "semantic", "recent", "important", "popular"]
                    },
                    "include_superseded": { "type": "boolean" },
                    "min_similarity": { "type": "number" },
                    "id": { "type": "integer", "description": "Memory id" },
                    "supersedes": { "type": "integer", "description": "Id of the memory this one replaces" },
                    "supersession_kind": {
                        "type": "string",
                        "enum": ["update", "correction", "refinement"]
                    },
                    "protected": { "type": "boolean" },
                    "metadata": { "type": "object" }
                },
                "required": ["operation"]
            }),
        )
    }

    async fn handle(&self, args: Value, ctx: &CallContext) -> Result<Value> {
        match operation(&args)? {
            "store" => self.store(args, ctx).await,
            "search" => self.search(args).await,
            "get" => self.get(&args),
            "update" => self.update(&args),
            "delete" => self.delete(&args),
            "stats" => self.stats(),
            "protect" => self.protect(&args),
            "forget" => self.forget(&args),
            other => Err(Error::InvalidArguments(format!("unknown operation '{other}'"))),
        }
    }
}

impl MemoryTool {
    async fn store(&self, args: Value, ctx: &CallContext) -> Result<Value> {
        let mut req: StoreRequest = serde_json::from_value(args)
            .map_err(|e| Error::InvalidArguments(format!("malformed store arguments: {e}")))?;
        if let Some(tag) = &ctx.session_tag {
            req.metadata
                .entry("session_tag".into())
                .or_insert_with(|| serde_json::json!(tag));
        }
        if let Some(agent) = &ctx.agent_type {
            req.metadata
                .entry("agent_type".into())
                .or_insert_with(|| serde_json::json!(agent));
        }
        let outcome = self.core.store(req).await?;
        let id = outcome.effective_id();
        let mut data = serde_json::to_value(&outcome)?;
        if let Some(map) = data.as_object_mut() {
            map.insert("id".into(), serde_json::json!(id));
        }
        Ok(success(data))
    }

    async fn search(&self, args: Value) -> Result<Value> {
        let req: SearchRequest = serde_json::from_value(args)
            .map_err(|e| Error::InvalidArguments(format!("malformed search arguments: {e}")))?;
        let hits = self.core.search(req).await?;
        Ok(success(serde_json::json!({
            "count": hits.len(),
            "results": hits,
        })))
    }

    fn get(&self, args: &Value) -> Result<Value> {
        let id = required_id(args, "id")?;
        let engram = self.core.get(id)?;
        Ok(success(serde_json::json!({
            "id": engram.id,
            "content": engram.content,
            "category": engram.category,
            "importance": engram.importance,
            "access_count": engram.access_count,
            "protected": engram.protected,
            "created_at": engram.created_at,
            "last_accessed_at": engram.last_accessed_at,
            "metadata": engram.metadata,
            "superseded_by": engram.superseded_by,
        })))
    }

    fn update(&self, args: &Value) -> Result<Value> {
        let id = required_id(args, "id")?;
        let mut touched = false;
        if let Some(importance) = args.get("importance").and_then(|v| v.as_f64()) {
            self.core.set_importance(id, importance)?;
            touched = true;
        }
        if let Some(protected) = args.get("protected").and_then(|v| v.as_bool()) {
            self.core.set_protected(id, protected)?;
            touched = true;
        }
        if let Some(supersedes) = args.get("supersedes").and_then(|v| v.as_i64()) {
            let kind = args
                .get("supersession_kind")
                .and_then(|v| v.as_str())
                .and_then(SupersessionKind::parse)
                .unwrap_or(SupersessionKind::Update);
            self.core.supersede(supersedes, id, kind)?;
            touched = true;
        }
        if !touched {
            return Err(Error::InvalidArguments(
                "update requires importance, protected, or supersedes".into(),
            ));
        }
        Ok(success(serde_json::json!({ "id": id, "updated": true })))
    }

    fn delete(&self, args: &Value) -> Result<Value> {
        let id = required_id(args, "id")?;
        self.core.delete(id)?;
        Ok(success(serde_json::json!({ "id": id, "deleted": true })))
    }

    fn stats(&self) -> Result<Value> {
        let stats = self.core.stats()?;
        Ok(success(serde_json::to_value(stats)?))
    }

    fn protect(&self, args: &Value) -> Result<Value> {
        let id = required_id(args, "id")?;
        let protected = args
            .get("protected")
            .and_then(|v| v.as_bool())
            .unwrap_or(true);
        self.core.set_protected(id, protected)?;
        Ok(success(serde_json::json!({ "id": id, "protected": protected })))
    }

    /// Run one decay pass on demand with the supplied threshold.
    fn forget(&self, args: &Value) -> Result<Value> {
        let threshold = args
            .get("threshold")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.05);
        let stats = self.core.decay_engine(threshold).pass()?;
        Ok(success(serde_json::json!({
            "scanned": stats.scanned,
            "pruned": stats.pruned,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mimo_domain::config::MemoryConfig;
    use std::path::PathBuf;

    fn tool() -> MemoryTool {
        let core = MemoryCore::open(
            &MemoryConfig {
                db_path: PathBuf::from(":memory:"),
                embedding_dim: 32,
                ..Default::default()
            },
            None,
            true,
            true,
        )
        .unwrap();
        MemoryTool::new(Arc::new(core))
    }

    #[tokio::test]
    async fn store_then_search_roundtrip() {
        let tool = tool();
        let ctx = CallContext::default();
        let stored = tool
            .handle(
                serde_json::json!({
                    "operation": "store",
                    "content": "User prefers dark mode",
                    "category": "observation",
                    "importance": 0.8
                }),
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(stored["status"], "success");
        let id = stored["data"]["id"].as_i64().unwrap();

        let found = tool
            .handle(
                serde_json::json!({
                    "operation": "search",
                    "query": "User prefers dark mode",
                    "limit": 5
                }),
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(found["data"]["results"][0]["id"].as_i64().unwrap(), id);
        assert!(found["data"]["results"][0]["similarity"].as_f64().unwrap() > 0.99);
    }

    #[tokio::test]
    async fn session_tag_lands_in_metadata() {
        let tool = tool();
        let mut ctx = CallContext::default();
        ctx.session_tag = Some("sess-42".into());
        let stored = tool
            .handle(
                serde_json::json!({ "operation": "store", "content": "tagged memory" }),
                &ctx,
            )
            .await
            .unwrap();
        let id = stored["data"]["id"].as_i64().unwrap();

        let got = tool
            .handle(serde_json::json!({ "operation": "get", "id": id }), &ctx)
            .await
            .unwrap();
        assert_eq!(got["data"]["metadata"]["session_tag"], "sess-42");
    }

    #[tokio::test]
    async fn unknown_operation_is_invalid() {
        let tool = tool();
        let err = tool
            .handle(
                serde_json::json!({ "operation": "defragment" }),
                &CallContext::default(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_arguments");
    }

    #[tokio::test]
    async fn delete_then_get_is_not_found() {
        let tool = tool();
        let ctx = CallContext::default();
        let stored = tool
            .handle(
                serde_json::json!({ "operation": "store", "content": "short lived" }),
                &ctx,
            )
            .await
            .unwrap();
        let id = stored["data"]["id"].as_i64().unwrap();

        tool.handle(serde_json::json!({ "operation": "delete", "id": id }), &ctx)
            .await
            .unwrap();
        let err = tool
            .handle(serde_json::json!({ "operation": "get", "id": id }), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }
}
