//! Stdio JSON-RPC frontend ("MCP" server).
//!
//! One JSON object per line on stdin, one per line on stdout; logging
//! goes to stderr only. Requests carry ids; notifications carry none and
//! receive no response. EOF drains and returns cleanly so the process
//! exits with status 0.

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use mimo_dispatch::Dispatcher;
use mimo_domain::tool::CallContext;

use crate::state::AppState;

const PROTOCOL_VERSION: &str = "2024-11-05";

/// Run the stdio loop until EOF.
pub async fn run(state: AppState) -> anyhow::Result<()> {
    let stdin = tokio::io::stdin();
    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(stdin).lines();

    tracing::info!("stdio frontend ready");

    while let Some(line) = lines.next_line().await? {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(response) = handle_line(&state, trimmed).await {
            let encoded = serde_json::to_string(&response)?;
            stdout.write_all(encoded.as_bytes()).await?;
            stdout.write_all(b"\n").await?;
            stdout.flush().await?;
        }
    }

    tracing::info!("stdin closed, draining");
    Ok(())
}

/// Handle one input line. `None` means no response is sent (valid
/// notifications).
pub async fn handle_line(state: &AppState, line: &str) -> Option<Value> {
    let request: Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(_) => {
            return Some(serde_json::json!({
                "jsonrpc": "2.0",
                "id": null,
                "error": { "code": -32700, "message": "parse error" },
            }));
        }
    };

    let id = request.get("id").cloned();
    let method = request.get("method").and_then(|m| m.as_str()).unwrap_or("");
    let params = request.get("params").cloned().unwrap_or(Value::Null);

    // Notifications (no id) receive no response.
    let Some(id) = id else {
        tracing::debug!(method, "notification received");
        return None;
    };

    let result = match method {
        "initialize" => Ok(serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "serverInfo": {
                "name": "mimo",
                "version": env!("CARGO_PKG_VERSION"),
            },
            "capabilities": { "tools": {} },
        })),
        "tools/list" => {
            let tools: Vec<Value> = state
                .registry
                .list_all(false)
                .into_iter()
                .map(|d| {
                    serde_json::json!({
                        "name": d.name,
                        "description": d.description,
                        "inputSchema": d.schema,
                    })
                })
                .collect();
            Ok(serde_json::json!({ "tools": tools }))
        }
        "tools/call" => call_tool(state, &params).await,
        "" => Err(RpcError {
            code: -32600,
            message: "missing method".into(),
            kind: None,
        }),
        other => Err(RpcError {
            code: -32601,
            message: format!("method not found: {other}"),
            kind: None,
        }),
    };

    Some(match result {
        Ok(result) => serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": result,
        }),
        Err(e) => {
            let mut error = serde_json::json!({
                "code": e.code,
                "message": e.message,
            });
            if let Some(kind) = e.kind {
                error["data"] = serde_json::json!({ "kind": kind });
            }
            serde_json::json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": error,
            })
        }
    })
}

struct RpcError {
    code: i64,
    message: String,
    kind: Option<&'static str>,
}

async fn call_tool(state: &AppState, params: &Value) -> Result<Value, RpcError> {
    let name = params
        .get("name")
        .and_then(|n| n.as_str())
        .ok_or_else(|| RpcError {
            code: -32602,
            message: "params.name is required".into(),
            kind: Some("invalid_arguments"),
        })?;
    let arguments = params
        .get("arguments")
        .cloned()
        .unwrap_or_else(|| serde_json::json!({}));

    let operation = arguments.get("operation").and_then(|o| o.as_str());
    let ctx = CallContext::new(Dispatcher::default_deadline(name, operation));

    match state.dispatcher.dispatch(name, arguments, &ctx).await {
        Ok(value) => {
            // MCP-shaped content blocks.
            let text = serde_json::to_string(&value).unwrap_or_default();
            Ok(serde_json::json!({
                "content": [{ "type": "text", "text": text }],
                "isError": false,
            }))
        }
        Err(e) => Err(RpcError {
            code: e.jsonrpc_code(),
            message: e.to_string(),
            kind: Some(e.kind()),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap::build_app_state;
    use mimo_domain::config::Config;
    use std::path::PathBuf;
    use std::sync::Arc;

    async fn state() -> (AppState, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.memory.db_path = dir.path().join("mimo.db");
        config.memory.embedding_dim = 32;
        config.sandbox.root = dir.path().join("sandbox");
        let state = build_app_state(Arc::new(config)).await.unwrap();
        (state, dir)
    }

    #[tokio::test]
    async fn initialize_then_list_exposes_the_tool_surface() {
        let (state, _guard) = state().await;
        let init = handle_line(
            &state,
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#,
        )
        .await
        .unwrap();
        assert_eq!(init["id"], 1);
        assert_eq!(init["result"]["protocolVersion"], PROTOCOL_VERSION);

        let listed = handle_line(&state, r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#)
            .await
            .unwrap();
        let tools = listed["result"]["tools"].as_array().unwrap();
        let names: Vec<&str> = tools.iter().filter_map(|t| t["name"].as_str()).collect();
        for expected in [
            "memory", "file", "terminal", "web", "code", "reason", "cognitive",
            "meta", "knowledge", "onboard", "autonomous", "orchestrate",
            "awakening_status", "tool_usage",
        ] {
            assert!(names.contains(&expected), "missing {expected}");
        }
    }

    #[tokio::test]
    async fn unparsable_line_yields_parse_error_with_null_id() {
        let (state, _guard) = state().await;
        let resp = handle_line(&state, "{not json").await.unwrap();
        assert_eq!(resp["id"], Value::Null);
        assert_eq!(resp["error"]["code"], -32700);
    }

    #[tokio::test]
    async fn unknown_method_yields_method_not_found() {
        let (state, _guard) = state().await;
        let resp = handle_line(&state, r#"{"jsonrpc":"2.0","id":3,"method":"shrug"}"#)
            .await
            .unwrap();
        assert_eq!(resp["error"]["code"], -32601);
    }

    #[tokio::test]
    async fn notifications_receive_no_response() {
        let (state, _guard) = state().await;
        let resp = handle_line(
            &state,
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
        )
        .await;
        assert!(resp.is_none());
    }

    #[tokio::test]
    async fn tools_call_roundtrips_through_the_dispatcher() {
        let (state, _guard) = state().await;
        let resp = handle_line(
            &state,
            r#"{"jsonrpc":"2.0","id":7,"method":"tools/call","params":{"name":"memory","arguments":{"operation":"stats"}}}"#,
        )
        .await
        .unwrap();
        assert_eq!(resp["id"], 7);
        assert_eq!(resp["result"]["isError"], false);
        let text = resp["result"]["content"][0]["text"].as_str().unwrap();
        let inner: Value = serde_json::from_str(text).unwrap();
        assert_eq!(inner["status"], "success");
    }

    #[tokio::test]
    async fn missing_tool_name_is_invalid_params() {
        let (state, _guard) = state().await;
        let resp = handle_line(
            &state,
            r#"{"jsonrpc":"2.0","id":5,"method":"tools/call","params":{"arguments":{}}}"#,
        )
        .await
        .unwrap();
        assert_eq!(resp["error"]["code"], -32602);
        assert_eq!(resp["error"]["data"]["kind"], "invalid_arguments");
    }

    #[tokio::test]
    async fn unknown_tool_error_carries_kind() {
        let (state, _guard) = state().await;
        let resp = handle_line(
            &state,
            r#"{"jsonrpc":"2.0","id":8,"method":"tools/call","params":{"name":"ghost","arguments":{}}}"#,
        )
        .await
        .unwrap();
        assert_eq!(resp["error"]["data"]["kind"], "unknown_tool");
    }
}
