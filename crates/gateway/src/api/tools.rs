//! Tools API: `GET /v1/tools` (catalog) and `POST /v1/tool` (dispatch).

use std::time::{Duration, Instant};

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;

use mimo_dispatch::Dispatcher;
use mimo_domain::tool::CallContext;

use crate::api::error::ApiError;
use crate::state::AppState;

/// Hard ceiling on caller-supplied timeouts.
const MAX_TIMEOUT_MS: u64 = 300_000;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/tools
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize, Default)]
pub struct ListToolsParams {
    #[serde(default)]
    pub include_deprecated: bool,
}

pub async fn list_tools(
    State(state): State<AppState>,
    Query(params): Query<ListToolsParams>,
) -> Json<serde_json::Value> {
    let mut tools = state.registry.list_all(params.include_deprecated);

    // Deprecated names are resolved by the alias layer rather than
    // registered, so the flag surfaces them from the table.
    if params.include_deprecated {
        for (alias, canonical, operation) in mimo_dispatch::aliases::ALIAS_TABLE {
            let mut descriptor = mimo_domain::tool::ToolDescriptor::internal(
                *alias,
                format!("Deprecated alias of {canonical} operation={operation}"),
                serde_json::json!({ "type": "object", "properties": {} }),
            );
            descriptor.deprecated_alias_of = Some((*canonical).to_string());
            tools.push(descriptor);
        }
        tools.sort_by(|a, b| a.name.cmp(&b.name));
    }

    Json(serde_json::json!({
        "count": tools.len(),
        "tools": tools,
    }))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/tool
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct ToolCallBody {
    pub tool: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
    /// Per-call deadline override.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// Build the per-call context from headers and body.
pub fn call_context(headers: &HeaderMap, tool: &str, body_timeout_ms: Option<u64>, args: &serde_json::Value) -> CallContext {
    let operation = args.get("operation").and_then(|o| o.as_str());
    let deadline = body_timeout_ms
        .map(|ms| Duration::from_millis(ms.min(MAX_TIMEOUT_MS)))
        .unwrap_or_else(|| Dispatcher::default_deadline(tool, operation));

    let mut ctx = CallContext::new(deadline);
    ctx.sandbox = headers
        .get("x-sandbox")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    ctx.session_tag = headers
        .get("x-session-tag")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    ctx.agent_type = headers
        .get("x-agent-type")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    ctx
}

pub async fn call_tool(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ToolCallBody>,
) -> Response {
    let started = Instant::now();
    let ctx = call_context(&headers, &body.tool, body.timeout_ms, &body.arguments);

    match state.dispatcher.dispatch(&body.tool, body.arguments, &ctx).await {
        Ok(value) => Json(value).into_response(),
        Err(e) => {
            ApiError::with_latency(e, started.elapsed().as_millis() as u64).into_response()
        }
    }
}
