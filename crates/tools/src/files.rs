//! The `file` tool: safe, auditable file I/O constrained to the sandbox
//! root. Paths containing `..`, absolute paths, and symlinks escaping the
//! root are rejected before any I/O happens.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::fs;

use mimo_domain::error::{Error, Result};
use mimo_domain::tool::{CallContext, ToolDescriptor};

use crate::{operation, required_str, success, ToolHandler};

pub struct FileTool {
    sandbox_root: Arc<PathBuf>,
}

impl FileTool {
    pub fn new(sandbox_root: PathBuf) -> Self {
        Self {
            sandbox_root: Arc::new(sandbox_root),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Path validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Validate and resolve a requested path within the sandbox root.
///
/// 1. Rejects absolute paths; everything is relative to the root.
/// 2. Rejects raw `..` components before any resolution.
/// 3. Canonicalizes the nearest existing ancestor and checks containment,
///    so symlinks cannot escape the root either.
pub fn validate_path(sandbox_root: &Path, requested: &str) -> Result<PathBuf> {
    let requested_path = Path::new(requested);
    if requested_path.is_absolute() {
        return Err(Error::InvalidArguments(format!(
            "absolute paths are not allowed; use a path relative to the sandbox root (got '{requested}')"
        )));
    }

    for component in requested_path.components() {
        if matches!(component, Component::ParentDir) {
            return Err(Error::InvalidArguments(format!(
                "path traversal is not allowed (got '{requested}')"
            )));
        }
    }

    let root = sandbox_root
        .canonicalize()
        .map_err(|e| Error::Internal(format!("sandbox root unavailable: {e}")))?;
    let full = root.join(requested_path);

    // Canonicalize the deepest existing ancestor so new files can still
    // be created while symlink escapes are caught.
    let mut probe = full.clone();
    let canonical_ancestor = loop {
        match probe.canonicalize() {
            Ok(resolved) => break resolved,
            Err(_) => match probe.parent() {
                Some(parent) => probe = parent.to_path_buf(),
                None => break root.clone(),
            },
        }
    };
    if !canonical_ancestor.starts_with(&root) {
        return Err(Error::Forbidden(format!(
            "path escapes the sandbox root (got '{requested}')"
        )));
    }

    Ok(full)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait]
impl ToolHandler for FileTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::internal(
            "file",
            "File operations inside the sandbox root.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "operation": {
                        "type": "string",
                        "enum": ["read", "write", "append", "delete", "list", "exists"]
                    },
                    "path": { "type": "string", "description": "Path relative to the sandbox root" },
                    "content": { "type": "string" },
                    "offset": { "type": "integer", "description": "Start line (0-indexed)" },
                    "limit": { "type": "integer", "description": "Max lines to return" }
                },
                "required": ["operation"]
            }),
        )
    }

    async fn handle(&self, args: Value, _ctx: &CallContext) -> Result<Value> {
        match operation(&args)? {
            "read" => self.read(&args).await,
            "write" => self.write(&args, false).await,
            "append" => self.write(&args, true).await,
            "delete" => self.delete(&args).await,
            "list" => self.list(&args).await,
            "exists" => self.exists(&args).await,
            other => Err(Error::InvalidArguments(format!("unknown operation '{other}'"))),
        }
    }
}

impl FileTool {
    async fn read(&self, args: &Value) -> Result<Value> {
        let path = validate_path(&self.sandbox_root, required_str(args, "path")?)?;
        let raw = fs::read_to_string(&path)
            .await
            .map_err(|e| map_io(e, args))?;

        let offset = args.get("offset").and_then(|v| v.as_u64()).unwrap_or(0) as usize;
        let limit = args.get("limit").and_then(|v| v.as_u64()).map(|l| l as usize);

        let content = match (offset, limit) {
            (0, None) => raw,
            (offset, limit) => {
                let lines: Vec<&str> = raw.lines().collect();
                let end = limit
                    .map(|l| (offset + l).min(lines.len()))
                    .unwrap_or(lines.len());
                lines[offset.min(lines.len())..end].join("\n")
            }
        };

        Ok(success(serde_json::json!({
            "path": required_str(args, "path")?,
            "content": content,
        })))
    }

    async fn write(&self, args: &Value, append: bool) -> Result<Value> {
        let relative = required_str(args, "path")?;
        let path = validate_path(&self.sandbox_root, relative)?;
        let content = required_str(args, "content")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(Error::Io)?;
        }

        if append {
            use tokio::io::AsyncWriteExt;
            let mut file = fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await
                .map_err(Error::Io)?;
            file.write_all(content.as_bytes()).await.map_err(Error::Io)?;
        } else {
            fs::write(&path, content).await.map_err(Error::Io)?;
        }

        Ok(success(serde_json::json!({
            "path": relative,
            "bytes": content.len(),
            "appended": append,
        })))
    }

    async fn delete(&self, args: &Value) -> Result<Value> {
        let relative = required_str(args, "path")?;
        let path = validate_path(&self.sandbox_root, relative)?;
        fs::remove_file(&path).await.map_err(|e| map_io(e, args))?;
        Ok(success(serde_json::json!({ "path": relative, "deleted": true })))
    }

    async fn list(&self, args: &Value) -> Result<Value> {
        let relative = args
            .get("path")
            .and_then(|v| v.as_str())
            .unwrap_or(".");
        let path = validate_path(&self.sandbox_root, relative)?;

        let mut entries = Vec::new();
        let mut dir = fs::read_dir(&path).await.map_err(|e| map_io(e, args))?;
        while let Some(entry) = dir.next_entry().await.map_err(Error::Io)? {
            let meta = entry.metadata().await.map_err(Error::Io)?;
            entries.push(serde_json::json!({
                "name": entry.file_name().to_string_lossy(),
                "size": meta.len(),
                "is_dir": meta.is_dir(),
            }));
        }
        entries.sort_by(|a, b| {
            a["name"]
                .as_str()
                .unwrap_or_default()
                .cmp(b["name"].as_str().unwrap_or_default())
        });

        Ok(success(serde_json::json!({
            "path": relative,
            "entries": entries,
        })))
    }

    async fn exists(&self, args: &Value) -> Result<Value> {
        let relative = required_str(args, "path")?;
        let path = validate_path(&self.sandbox_root, relative)?;
        let exists = fs::try_exists(&path).await.unwrap_or(false);
        Ok(success(serde_json::json!({ "path": relative, "exists": exists })))
    }
}

fn map_io(e: std::io::Error, args: &Value) -> Error {
    let path = args.get("path").and_then(|v| v.as_str()).unwrap_or("?");
    if e.kind() == std::io::ErrorKind::NotFound {
        Error::NotFound(format!("file '{path}'"))
    } else {
        Error::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool() -> (FileTool, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        (FileTool::new(dir.path().to_path_buf()), dir)
    }

    #[tokio::test]
    async fn write_read_roundtrip() {
        let (tool, _dir) = tool();
        let ctx = CallContext::default();
        tool.handle(
            serde_json::json!({ "operation": "write", "path": "notes/a.txt", "content": "hello" }),
            &ctx,
        )
        .await
        .unwrap();

        let read = tool
            .handle(
                serde_json::json!({ "operation": "read", "path": "notes/a.txt" }),
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(read["data"]["content"], "hello");
    }

    #[tokio::test]
    async fn traversal_and_absolute_paths_rejected() {
        let (tool, _dir) = tool();
        let ctx = CallContext::default();
        for path in ["../escape.txt", "/etc/passwd"] {
            let err = tool
                .handle(
                    serde_json::json!({ "operation": "read", "path": path }),
                    &ctx,
                )
                .await
                .unwrap_err();
            assert_eq!(err.kind(), "invalid_arguments", "{path}");
        }
    }

    #[tokio::test]
    async fn read_missing_file_is_not_found() {
        let (tool, _dir) = tool();
        let err = tool
            .handle(
                serde_json::json!({ "operation": "read", "path": "ghost.txt" }),
                &CallContext::default(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[tokio::test]
    async fn list_and_exists() {
        let (tool, _dir) = tool();
        let ctx = CallContext::default();
        tool.handle(
            serde_json::json!({ "operation": "write", "path": "x.txt", "content": "1" }),
            &ctx,
        )
        .await
        .unwrap();

        let listed = tool
            .handle(serde_json::json!({ "operation": "list" }), &ctx)
            .await
            .unwrap();
        assert_eq!(listed["data"]["entries"][0]["name"], "x.txt");

        let exists = tool
            .handle(
                serde_json::json!({ "operation": "exists", "path": "x.txt" }),
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(exists["data"]["exists"], true);
    }

    #[tokio::test]
    async fn offset_and_limit_slice_lines() {
        let (tool, _dir) = tool();
        let ctx = CallContext::default();
        tool.handle(
            serde_json::json!({ "operation": "write", "path": "l.txt", "content": "a\nb\nc\nd" }),
            &ctx,
        )
        .await
        .unwrap();

        let read = tool
            .handle(
                serde_json::json!({ "operation": "read", "path": "l.txt", "offset": 1, "limit": 2 }),
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(read["data"]["content"], "b\nc");
    }
}
