//! The `knowledge` tool: the dispatch surface of the triple store.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use mimo_domain::error::{Error, Result};
use mimo_domain::tool::{CallContext, ToolDescriptor};
use mimo_domain::triple::Triple;
use mimo_knowledge::{KnowledgeGraph, TripleFilter};

use crate::{operation, optional_str, required_str, success, ToolHandler};

pub struct KnowledgeTool {
    graph: Arc<KnowledgeGraph>,
}

impl KnowledgeTool {
    pub fn new(graph: Arc<KnowledgeGraph>) -> Self {
        Self { graph }
    }
}

#[async_trait]
impl ToolHandler for KnowledgeTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::internal(
            "knowledge",
            "Knowledge graph: teach triples, query, and traverse relations.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "operation": { "type": "string", "enum": ["teach", "query", "traverse", "stats"] },
                    "subject": { "type": "string" },
                    "predicate": { "type": "string" },
                    "object": { "type": "string" },
                    "confidence": { "type": "number", "minimum": 0.0, "maximum": 1.0 },
                    "source": { "type": "string" },
                    "start": { "type": "string", "description": "Traversal start node" },
                    "max_depth": { "type": "integer" },
                    "limit": { "type": "integer" }
                },
                "required": ["operation"]
            }),
        )
    }

    async fn handle(&self, args: Value, _ctx: &CallContext) -> Result<Value> {
        match operation(&args)? {
            "teach" => {
                let triple = Triple {
                    subject: required_str(&args, "subject")?.to_string(),
                    predicate: required_str(&args, "predicate")?.to_string(),
                    object: required_str(&args, "object")?.to_string(),
                    confidence: args
                        .get("confidence")
                        .and_then(|v| v.as_f64())
                        .unwrap_or(1.0),
                    source: optional_str(&args, "source").map(str::to_string),
                };
                self.graph.teach(&triple)?;
                Ok(success(serde_json::json!({ "taught": triple })))
            }
            "query" => {
                let filter = TripleFilter {
                    subject: optional_str(&args, "subject").map(str::to_string),
                    predicate: optional_str(&args, "predicate").map(str::to_string),
                    object: optional_str(&args, "object").map(str::to_string),
                };
                let limit = args
                    .get("limit")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(50)
                    .min(500) as usize;
                let triples = self.graph.query(&filter, limit)?;
                Ok(success(serde_json::json!({
                    "count": triples.len(),
                    "triples": triples,
                })))
            }
            "traverse" => {
                let start = required_str(&args, "start")?;
                let max_depth = args
                    .get("max_depth")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(2) as usize;
                let edges = self.graph.traverse(start, max_depth)?;
                Ok(success(serde_json::json!({
                    "start": start,
                    "count": edges.len(),
                    "edges": edges,
                })))
            }
            "stats" => Ok(success(serde_json::json!({
                "triples": self.graph.count()?,
            }))),
            other => Err(Error::InvalidArguments(format!("unknown operation '{other}'"))),
        }
    }
}
