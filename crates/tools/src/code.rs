//! The `code` tool: symbol listing, regex search, and outlines over files
//! inside the sandbox root. Pattern-based: a real language indexer is a
//! collaborator, not part of the gateway.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use tokio::fs;

use mimo_domain::error::{Error, Result};
use mimo_domain::tool::{CallContext, ToolDescriptor};

use crate::files::validate_path;
use crate::{operation, required_str, success, ToolHandler};

/// Line cap per search response.
const MAX_MATCHES: usize = 200;

pub struct CodeTool {
    sandbox_root: Arc<PathBuf>,
    symbol_pattern: Regex,
}

impl CodeTool {
    pub fn new(sandbox_root: PathBuf) -> Self {
        Self {
            sandbox_root: Arc::new(sandbox_root),
            // Function/type/constant definition heads across the common
            // languages seen in sandboxes.
            symbol_pattern: Regex::new(
                r"(?m)^\s*(?:pub\s+)?(?:async\s+)?(fn|struct|enum|trait|impl|class|def|function|const|static|interface|type)\s+([A-Za-z_][A-Za-z0-9_]*)",
            )
            .expect("symbol pattern must compile"),
        }
    }
}

#[async_trait]
impl ToolHandler for CodeTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::internal(
            "code",
            "Code intelligence over sandbox files: symbols, search, outline.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "operation": { "type": "string", "enum": ["symbols", "search", "outline"] },
                    "path": { "type": "string", "description": "File path relative to the sandbox root" },
                    "pattern": { "type": "string", "description": "Regex for search" }
                },
                "required": ["operation", "path"]
            }),
        )
    }

    async fn handle(&self, args: Value, _ctx: &CallContext) -> Result<Value> {
        let relative = required_str(&args, "path")?;
        let path = validate_path(&self.sandbox_root, relative)?;
        let content = fs::read_to_string(&path)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => Error::NotFound(format!("file '{relative}'")),
                _ => Error::Io(e),
            })?;

        match operation(&args)? {
            "symbols" => {
                let symbols: Vec<Value> = self
                    .symbol_pattern
                    .captures_iter(&content)
                    .take(MAX_MATCHES)
                    .map(|caps| {
                        let offset = caps.get(0).map(|m| m.start()).unwrap_or(0);
                        let line = content[..offset].matches('\n').count() + 1;
                        serde_json::json!({
                            "kind": &caps[1],
                            "name": &caps[2],
                            "line": line,
                        })
                    })
                    .collect();
                Ok(success(serde_json::json!({
                    "path": relative,
                    "symbols": symbols,
                })))
            }
            "search" => {
                let pattern = required_str(&args, "pattern")?;
                let regex = Regex::new(pattern)
                    .map_err(|e| Error::InvalidArguments(format!("bad pattern: {e}")))?;
                let matches: Vec<Value> = content
                    .lines()
                    .enumerate()
                    .filter(|(_, line)| regex.is_match(line))
                    .take(MAX_MATCHES)
                    .map(|(i, line)| {
                        serde_json::json!({ "line": i + 1, "text": line })
                    })
                    .collect();
                Ok(success(serde_json::json!({
                    "path": relative,
                    "count": matches.len(),
                    "matches": matches,
                })))
            }
            "outline" => {
                // Symbols plus section comments, in file order.
                let section = Regex::new(r"(?m)^\s*(?://|#)\s*[-=━─]{3,}").expect("static pattern");
                let mut items: Vec<(usize, Value)> = Vec::new();
                for caps in self.symbol_pattern.captures_iter(&content).take(MAX_MATCHES) {
                    let offset = caps.get(0).map(|m| m.start()).unwrap_or(0);
                    let line = content[..offset].matches('\n').count() + 1;
                    items.push((
                        line,
                        serde_json::json!({ "line": line, "kind": &caps[1], "name": &caps[2] }),
                    ));
                }
                for m in section.find_iter(&content).take(MAX_MATCHES) {
                    let line = content[..m.start()].matches('\n').count() + 1;
                    items.push((line, serde_json::json!({ "line": line, "kind": "section" })));
                }
                items.sort_by_key(|(line, _)| *line);
                let outline: Vec<Value> = items.into_iter().map(|(_, v)| v).collect();
                Ok(success(serde_json::json!({
                    "path": relative,
                    "outline": outline,
                })))
            }
            other => Err(Error::InvalidArguments(format!("unknown operation '{other}'"))),
        }
    }
}
