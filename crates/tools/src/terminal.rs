//! The `terminal` tool: run whitelisted executables inside the sandbox
//! root. No shell is ever involved; the command is exec'd directly with
//! screened arguments.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;

use mimo_domain::error::{Error, Result};
use mimo_domain::tool::{CallContext, ToolDescriptor};

use crate::{operation, required_str, success, ToolHandler};

/// Output tail cap per stream, in bytes.
const OUTPUT_CAP: usize = 64 * 1024;

pub struct TerminalTool {
    whitelist: Arc<Vec<String>>,
    sandbox_root: Arc<PathBuf>,
}

impl TerminalTool {
    pub fn new(whitelist: Vec<String>, sandbox_root: PathBuf) -> Self {
        Self {
            whitelist: Arc::new(whitelist),
            sandbox_root: Arc::new(sandbox_root),
        }
    }

    fn check_command(&self, command: &str) -> Result<()> {
        let basename = std::path::Path::new(command)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(command);
        if self.whitelist.iter().any(|w| w == basename) {
            Ok(())
        } else {
            tracing::warn!(command = %basename, "terminal command blocked by whitelist");
            Err(Error::Forbidden(format!(
                "command '{basename}' is not whitelisted"
            )))
        }
    }
}

#[async_trait]
impl ToolHandler for TerminalTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::internal(
            "terminal",
            "Run a whitelisted executable in the sandbox (no shell).",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "operation": { "type": "string", "enum": ["execute", "which"] },
                    "command": { "type": "string", "description": "Executable basename" },
                    "args": { "type": "array", "items": { "type": "string" } }
                },
                "required": ["operation", "command"]
            }),
        )
    }

    async fn handle(&self, args: Value, _ctx: &CallContext) -> Result<Value> {
        let command = required_str(&args, "command")?;
        match operation(&args)? {
            "which" => {
                let allowed = self.check_command(command).is_ok();
                Ok(success(serde_json::json!({
                    "command": command,
                    "allowed": allowed,
                })))
            }
            "execute" => {
                self.check_command(command)?;
                let arg_list: Vec<String> = args
                    .get("args")
                    .and_then(|a| a.as_array())
                    .map(|items| {
                        items
                            .iter()
                            .filter_map(|v| v.as_str().map(str::to_string))
                            .collect()
                    })
                    .unwrap_or_default();
                for arg in &arg_list {
                    mimo_skills::transport::screen_argument(arg)
                        .map_err(|e| Error::InvalidArguments(e.to_string()))?;
                }

                let output = Command::new(command)
                    .args(&arg_list)
                    .current_dir(self.sandbox_root.as_ref())
                    .stdin(Stdio::null())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::piped())
                    .kill_on_drop(true)
                    .output()
                    .await
                    .map_err(|e| Error::Internal(format!("exec {command}: {e}")))?;

                Ok(success(serde_json::json!({
                    "command": command,
                    "exit_code": output.status.code(),
                    "stdout": tail(&output.stdout),
                    "stderr": tail(&output.stderr),
                })))
            }
            other => Err(Error::InvalidArguments(format!("unknown operation '{other}'"))),
        }
    }
}

fn tail(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    if text.len() <= OUTPUT_CAP {
        text.into_owned()
    } else {
        let start = text.len() - OUTPUT_CAP;
        // Snap to a char boundary.
        let start = text
            .char_indices()
            .map(|(i, _)| i)
            .find(|i| *i >= start)
            .unwrap_or(0);
        text[start..].to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool(dir: &tempfile::TempDir) -> TerminalTool {
        TerminalTool::new(
            vec!["echo".into(), "ls".into()],
            dir.path().to_path_buf(),
        )
    }

    #[tokio::test]
    async fn executes_whitelisted_command() {
        let dir = tempfile::tempdir().unwrap();
        let out = tool(&dir)
            .handle(
                serde_json::json!({
                    "operation": "execute",
                    "command": "echo",
                    "args": ["hello"]
                }),
                &CallContext::default(),
            )
            .await
            .unwrap();
        assert_eq!(out["data"]["exit_code"], 0);
        assert_eq!(out["data"]["stdout"], "hello\n");
    }

    #[tokio::test]
    async fn rejects_non_whitelisted_command() {
        let dir = tempfile::tempdir().unwrap();
        let err = tool(&dir)
            .handle(
                serde_json::json!({ "operation": "execute", "command": "rm", "args": ["-rf"] }),
                &CallContext::default(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "forbidden");
    }

    #[tokio::test]
    async fn rejects_dangerous_arguments() {
        let dir = tempfile::tempdir().unwrap();
        let err = tool(&dir)
            .handle(
                serde_json::json!({
                    "operation": "execute",
                    "command": "echo",
                    "args": ["a;b"]
                }),
                &CallContext::default(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_arguments");
    }

    #[tokio::test]
    async fn which_reports_whitelist_membership() {
        let dir = tempfile::tempdir().unwrap();
        let t = tool(&dir);
        let yes = t
            .handle(
                serde_json::json!({ "operation": "which", "command": "echo" }),
                &CallContext::default(),
            )
            .await
            .unwrap();
        assert_eq!(yes["data"]["allowed"], true);
        let no = t
            .handle(
                serde_json::json!({ "operation": "which", "command": "rm" }),
                &CallContext::default(),
            )
            .await
            .unwrap();
        assert_eq!(no["data"]["allowed"], false);
    }
}
