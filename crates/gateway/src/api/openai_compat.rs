//! OpenAI-compatible `/v1/chat/completions` adapter and `/v1/models`.
//!
//! The adapter performs no free-form generation. A first call returns a
//! single `tool_calls` entry pointing the client at `mimo_search_memory`;
//! a follow-up call carrying `tool` role messages gets its content
//! synthesized from those results (delegated to the completion interface
//! when configured, a plain digest otherwise).

use axum::extract::State;
use axum::response::{IntoResponse, Json, Response};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use mimo_domain::error::Error;

use crate::api::error::ApiError;
use crate::state::AppState;

/// The single synthetic model this gateway advertises.
pub const MODEL_ID: &str = "mimo-gateway";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / response shapes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[allow(dead_code)]
    pub model: Option<String>,
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Serialize)]
struct ChatResponse {
    id: String,
    object: &'static str,
    created: i64,
    model: &'static str,
    choices: Vec<Choice>,
}

#[derive(Debug, Serialize)]
struct Choice {
    index: u32,
    message: ResponseMessage,
    finish_reason: &'static str,
}

#[derive(Debug, Serialize)]
struct ResponseMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ToolCall>>,
}

#[derive(Debug, Serialize)]
struct ToolCall {
    id: String,
    #[serde(rename = "type")]
    call_type: &'static str,
    function: FunctionCall,
}

#[derive(Debug, Serialize)]
struct FunctionCall {
    name: &'static str,
    /// JSON-encoded arguments, per the OpenAI wire shape.
    arguments: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/chat/completions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn chat_completions(
    State(state): State<AppState>,
    Json(body): Json<ChatRequest>,
) -> Response {
    let tool_results: Vec<&str> = body
        .messages
        .iter()
        .filter(|m| m.role == "tool")
        .filter_map(|m| m.content.as_deref())
        .collect();

    if tool_results.is_empty() {
        // First leg: direct the client at the memory search tool.
        let Some(query) = body
            .messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .and_then(|m| m.content.as_deref())
        else {
            return ApiError::new(Error::InvalidArguments(
                "no user message to derive a query from".into(),
            ))
            .into_response();
        };

        let arguments =
            serde_json::to_string(&serde_json::json!({ "query": query, "limit": 10 }))
                .unwrap_or_else(|_| "{}".into());
        return Json(ChatResponse {
            id: format!("chatcmpl-{}", uuid::Uuid::new_v4()),
            object: "chat.completion",
            created: Utc::now().timestamp(),
            model: MODEL_ID,
            choices: vec![Choice {
                index: 0,
                message: ResponseMessage {
                    role: "assistant",
                    content: None,
                    tool_calls: Some(vec![ToolCall {
                        id: format!("call_{}", uuid::Uuid::new_v4().simple()),
                        call_type: "function",
                        function: FunctionCall {
                            name: "mimo_search_memory",
                            arguments,
                        },
                    }]),
                },
                finish_reason: "tool_calls",
            }],
        })
        .into_response();
    }

    // Second leg: synthesize from the supplied tool results.
    let question = body
        .messages
        .iter()
        .find(|m| m.role == "user")
        .and_then(|m| m.content.as_deref())
        .unwrap_or("");
    let content = match &state.completer {
        Some(completer) => {
            let prompt = format!(
                "Answer the question from the tool results only. Be concise.\n\n\
                 Question: {question}\n\nResults:\n{}",
                tool_results.join("\n")
            );
            match completer.complete(&prompt, 512).await {
                Ok(answer) => answer,
                Err(e) => {
                    tracing::warn!(error = %e, "synthesis failed, returning digest");
                    digest(&tool_results)
                }
            }
        }
        None => digest(&tool_results),
    };

    Json(ChatResponse {
        id: format!("chatcmpl-{}", uuid::Uuid::new_v4()),
        object: "chat.completion",
        created: Utc::now().timestamp(),
        model: MODEL_ID,
        choices: vec![Choice {
            index: 0,
            message: ResponseMessage {
                role: "assistant",
                content: Some(content),
                tool_calls: None,
            },
            finish_reason: "stop",
        }],
    })
    .into_response()
}

/// Plain concatenated digest when no completion interface is available.
fn digest(tool_results: &[&str]) -> String {
    let joined = tool_results.join("\n");
    joined.chars().take(2000).collect()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/models
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn models() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "object": "list",
        "data": [{
            "id": MODEL_ID,
            "object": "model",
            "created": Utc::now().timestamp(),
            "owned_by": "mimo",
        }],
    }))
}
