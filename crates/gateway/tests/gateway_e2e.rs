//! End-to-end scenarios through the HTTP router and the dispatcher:
//! store/search round trips, supersession, sandbox gating, skill
//! lifecycle, aggregation routing, and authentication.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use sha2::{Digest, Sha256};
use tower::ServiceExt;

use mimo_domain::config::{Config, SkillProviderConfig};
use mimo_gateway::api;
use mimo_gateway::bootstrap::build_app_state;
use mimo_gateway::state::AppState;

async fn test_state(mutate: impl FnOnce(&mut Config)) -> (AppState, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.memory.db_path = dir.path().join("mimo.db");
    config.memory.embedding_dim = 256;
    config.sandbox.root = dir.path().join("sandbox");
    mutate(&mut config);
    let state = build_app_state(Arc::new(config)).await.unwrap();
    (state, dir)
}

fn app(state: AppState) -> axum::Router {
    api::router(state.clone()).with_state(state)
}

async fn post_json(
    app: &axum::Router,
    path: &str,
    body: serde_json::Value,
    headers: &[(&str, &str)],
) -> (StatusCode, serde_json::Value) {
    let mut request = Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json");
    for (name, value) in headers {
        request = request.header(*name, *value);
    }
    let response = app
        .clone()
        .oneshot(request.body(Body::from(body.to_string())).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, value)
}

async fn get_json(app: &axum::Router, path: &str) -> (StatusCode, serde_json::Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri(path)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, value)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store / search round trip
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn store_then_search_returns_the_stored_memory_first() {
    let (state, _guard) = test_state(|_| {}).await;
    let app = app(state);

    let (status, stored) = post_json(
        &app,
        "/v1/tool",
        serde_json::json!({
            "tool": "memory",
            "arguments": {
                "operation": "store",
                "content": "User prefers dark mode",
                "category": "observation",
                "importance": 0.8
            }
        }),
        &[],
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stored["status"], "success");
    let id = stored["data"]["id"].as_i64().unwrap();

    let (status, found) = post_json(
        &app,
        "/v1/tool",
        serde_json::json!({
            "tool": "memory",
            "arguments": { "operation": "search", "query": "dark mode", "limit": 5 }
        }),
        &[],
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let first = &found["data"]["results"][0];
    assert_eq!(first["id"].as_i64().unwrap(), id);
    // Token-overlap similarity under the hash-fallback embedder; a real
    // embedding backend scores this well above 0.7.
    assert!(first["similarity"].as_f64().unwrap() > 0.4);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Supersession
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn supersession_hides_the_old_memory_from_default_search() {
    let (state, _guard) = test_state(|_| {}).await;
    let app = app(state);

    let (_, first) = post_json(
        &app,
        "/v1/tool",
        serde_json::json!({
            "tool": "memory",
            "arguments": { "operation": "store", "content": "Project uses Postgres" }
        }),
        &[],
    )
    .await;
    let old_id = first["data"]["id"].as_i64().unwrap();

    let (_, second) = post_json(
        &app,
        "/v1/tool",
        serde_json::json!({
            "tool": "memory",
            "arguments": {
                "operation": "store",
                "content": "Project uses MySQL",
                "supersedes": old_id,
                "supersession_kind": "correction"
            }
        }),
        &[],
    )
    .await;
    let new_id = second["data"]["id"].as_i64().unwrap();

    let (_, found) = post_json(
        &app,
        "/v1/tool",
        serde_json::json!({
            "tool": "memory",
            "arguments": { "operation": "search", "query": "project database", "limit": 10 }
        }),
        &[],
    )
    .await;
    let ids: Vec<i64> = found["data"]["results"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|h| h["id"].as_i64())
        .collect();
    assert!(ids.contains(&new_id));
    assert!(!ids.contains(&old_id));

    let (_, with_history) = post_json(
        &app,
        "/v1/tool",
        serde_json::json!({
            "tool": "memory",
            "arguments": {
                "operation": "search",
                "query": "project database",
                "limit": 10,
                "include_superseded": true
            }
        }),
        &[],
    )
    .await;
    let all_ids: Vec<i64> = with_history["data"]["results"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|h| h["id"].as_i64())
        .collect();
    assert!(all_ids.contains(&old_id));
    assert!(all_ids.contains(&new_id));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sandbox gating
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn sandbox_header_forbids_writes_but_allows_reads() {
    let (state, _guard) = test_state(|_| {}).await;
    let app = app(state);
    let sandbox = [("x-sandbox", "1")];

    let (status, body) = post_json(
        &app,
        "/v1/tool",
        serde_json::json!({
            "tool": "memory",
            "arguments": { "operation": "store", "content": "blocked" }
        }),
        &sandbox,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["kind"], "tool_disabled_in_sandbox");

    let (status, _) = post_json(
        &app,
        "/v1/tool",
        serde_json::json!({
            "tool": "memory",
            "arguments": { "operation": "search", "query": "anything" }
        }),
        &sandbox,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Skill lifecycle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn skill_tool_spawns_lazily_and_survives_a_kill() {
    let (state, _guard) = test_state(|config| {
        config.skills.command_whitelist = vec!["cat".into()];
        config.skills.providers = vec![SkillProviderConfig {
            id: "echo".into(),
            command: "cat".into(),
            args: vec![],
            env: Default::default(),
            tools: vec!["echo_tool".into()],
        }];
    })
    .await;
    let app = app(state.clone());

    // Listed before any spawn (lazy, config-declared).
    let (_, listed) = get_json(&app, "/v1/tools").await;
    let names: Vec<&str> = listed["tools"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|t| t["name"].as_str())
        .collect();
    assert!(names.contains(&"echo_tool"));

    // First call spawns the subprocess. `cat` echoes the request line,
    // which reads back as a null-result response.
    let (status, _) = post_json(
        &app,
        "/v1/tool",
        serde_json::json!({ "tool": "echo_tool", "arguments": {} }),
        &[],
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(state.supervisor.is_running("echo"));

    // Kill the subprocess out from under the registry; the next call
    // respawns transparently (one retry).
    state.supervisor.kill("echo").await;
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    let (status, _) = post_json(
        &app,
        "/v1/tool",
        serde_json::json!({ "tool": "echo_tool", "arguments": {} }),
        &[],
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(state.supervisor.is_running("echo"));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Aggregation routing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn ask_routes_counting_questions_to_the_aggregation_surface() {
    let (state, _guard) = test_state(|_| {}).await;
    let app = app(state);

    for content in ["saw a red bird", "saw a blue bird"] {
        post_json(
            &app,
            "/v1/tool",
            serde_json::json!({
                "tool": "memory",
                "arguments": { "operation": "store", "content": content, "category": "observation" }
            }),
            &[],
        )
        .await;
    }

    let (status, body) = post_json(
        &app,
        "/v1/ask",
        serde_json::json!({ "query": "how many observations do I have" }),
        &[],
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["router_decision"]["query_type"], "aggregation");
    assert_eq!(body["router_decision"]["primary_store"], "aggregation");
    assert_eq!(body["results"]["aggregation"]["count"], 2);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Authentication
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn bearer_key_is_enforced_when_configured() {
    let (mut state, _guard) = test_state(|_| {}).await;
    state.api_key_hash = Some(Sha256::digest(b"sekrit").to_vec());
    let app = app(state);

    // Health stays public.
    let (status, _) = get_json(&app, "/health").await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = post_json(
        &app,
        "/v1/tool",
        serde_json::json!({ "tool": "memory", "arguments": { "operation": "stats" } }),
        &[],
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["kind"], "unauthenticated");

    let (status, _) = post_json(
        &app,
        "/v1/tool",
        serde_json::json!({ "tool": "memory", "arguments": { "operation": "stats" } }),
        &[("authorization", "Bearer sekrit")],
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Chat adapter
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn chat_completions_points_at_memory_search_then_synthesizes() {
    let (state, _guard) = test_state(|_| {}).await;
    let app = app(state);

    let (status, first) = post_json(
        &app,
        "/v1/chat/completions",
        serde_json::json!({
            "model": "mimo-gateway",
            "messages": [{ "role": "user", "content": "what do you know about me" }]
        }),
        &[],
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let choice = &first["choices"][0];
    assert_eq!(choice["finish_reason"], "tool_calls");
    assert_eq!(
        choice["message"]["tool_calls"][0]["function"]["name"],
        "mimo_search_memory"
    );

    let (status, second) = post_json(
        &app,
        "/v1/chat/completions",
        serde_json::json!({
            "model": "mimo-gateway",
            "messages": [
                { "role": "user", "content": "what do you know about me" },
                { "role": "tool", "content": "User prefers dark mode" }
            ]
        }),
        &[],
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let choice = &second["choices"][0];
    assert_eq!(choice["finish_reason"], "stop");
    assert!(choice["message"]["content"]
        .as_str()
        .unwrap()
        .contains("dark mode"));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Deprecated aliases
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn deprecated_alias_dispatches_but_is_hidden_from_listing() {
    let (state, _guard) = test_state(|_| {}).await;
    let app = app(state);

    // `recall` resolves to memory/search.
    let (status, _) = post_json(
        &app,
        "/v1/tool",
        serde_json::json!({ "tool": "recall", "arguments": { "query": "anything" } }),
        &[],
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, listed) = get_json(&app, "/v1/tools").await;
    let names: Vec<&str> = listed["tools"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|t| t["name"].as_str())
        .collect();
    assert!(!names.contains(&"recall"));
    assert!(names.contains(&"memory"));

    let (_, with_deprecated) = get_json(&app, "/v1/tools?include_deprecated=true").await;
    let all_names: Vec<&str> = with_deprecated["tools"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|t| t["name"].as_str())
        .collect();
    assert!(all_names.contains(&"recall"));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Listed-schema round trip
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Minimal arguments satisfying a descriptor schema: first enum value for
/// enums, type-appropriate placeholders for the rest.
fn minimal_args(schema: &serde_json::Value) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
        for field in required.iter().filter_map(|f| f.as_str()) {
            let prop = schema.pointer(&format!("/properties/{field}"));
            let value = match prop
                .and_then(|p| p.get("enum"))
                .and_then(|e| e.as_array())
                .and_then(|a| a.first())
            {
                Some(first) => first.clone(),
                None => match prop.and_then(|p| p.get("type")).and_then(|t| t.as_str()) {
                    Some("integer") | Some("number") => serde_json::json!(1),
                    Some("array") => serde_json::json!([]),
                    Some("object") => serde_json::json!({}),
                    Some("boolean") => serde_json::json!(false),
                    _ => serde_json::json!("placeholder"),
                },
            };
            map.insert(field.to_string(), value);
        }
    }
    serde_json::Value::Object(map)
}

#[tokio::test]
async fn every_listed_tool_accepts_schema_minimal_arguments() {
    let (state, _guard) = test_state(|_| {}).await;
    let tools = state.registry.list_all(false);
    assert!(tools.len() >= 14);

    for descriptor in tools {
        let args = minimal_args(&descriptor.schema);
        mimo_dispatch::validate::validate_args(&descriptor.schema, &args)
            .unwrap_or_else(|e| panic!("{}: {e}", descriptor.name));
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Content-size boundary
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn content_over_the_cap_is_rejected() {
    let (state, _guard) = test_state(|_| {}).await;
    let app = app(state);
    let over = "x".repeat(100 * 1024 + 1);

    let (status, body) = post_json(
        &app,
        "/v1/tool",
        serde_json::json!({
            "tool": "memory",
            "arguments": { "operation": "store", "content": over }
        }),
        &[],
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "invalid_arguments");
}
