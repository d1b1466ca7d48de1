//! `POST /v1/ask`: route a free-form query across the memory surfaces,
//! aggregate per-store results, and optionally synthesize an answer.
//!
//! Partial failure of one backing store yields an empty result list for
//! that store plus a `warnings` entry; the response is 200 unless every
//! consulted store failed.

use std::collections::HashMap;
use std::time::Instant;

use axum::extract::State;
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;
use serde_json::Value;

use mimo_domain::engram::MemoryCategory;
use mimo_domain::error::Error;
use mimo_memory::ranker::RankPreset;
use mimo_memory::SearchRequest;
use mimo_router::{RouterDecision, Store};

use crate::api::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AskBody {
    pub query: String,
    #[serde(default)]
    pub context_id: Option<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// End-to-end ceiling on caller-supplied ask timeouts.
const MAX_ASK_TIMEOUT_MS: u64 = 120_000;
const DEFAULT_ASK_TIMEOUT_MS: u64 = 30_000;

pub async fn ask(State(state): State<AppState>, Json(body): Json<AskBody>) -> Response {
    let started = Instant::now();
    if body.query.trim().is_empty() {
        return ApiError::new(Error::InvalidArguments("query must not be empty".into()))
            .into_response();
    }

    let deadline = std::time::Duration::from_millis(
        body.timeout_ms
            .unwrap_or(DEFAULT_ASK_TIMEOUT_MS)
            .min(MAX_ASK_TIMEOUT_MS),
    );
    match tokio::time::timeout(deadline, ask_inner(&state, &body, started)).await {
        Ok(response) => response,
        Err(_) => ApiError::with_latency(
            Error::Timeout("ask".into()),
            started.elapsed().as_millis() as u64,
        )
        .into_response(),
    }
}

async fn ask_inner(state: &AppState, body: &AskBody, started: Instant) -> Response {
    let decision = state.router.route(&body.query).await;
    let mut stores = vec![decision.primary_store];
    stores.extend(decision.secondary_stores.iter().copied());

    let mut results: HashMap<&'static str, Value> = HashMap::new();
    let mut warnings: Vec<String> = Vec::new();
    let mut failures = 0usize;

    for store in &stores {
        match consult(&state, *store, &body.query, &decision).await {
            Ok(value) => {
                results.insert(store.as_str(), value);
            }
            Err(e) => {
                tracing::warn!(store = store.as_str(), error = %e, "store consultation failed");
                warnings.push(format!("{}: {}", store.as_str(), e.kind()));
                results.insert(store.as_str(), Value::Array(Vec::new()));
                failures += 1;
            }
        }
    }

    if failures == stores.len() {
        return ApiError::with_latency(
            Error::Internal("every backing store failed".into()),
            started.elapsed().as_millis() as u64,
        )
        .into_response();
    }

    let synthesis = if decision.requires_synthesis {
        synthesize(&state, &body.query, &results, &mut warnings).await
    } else {
        None
    };

    Json(serde_json::json!({
        "query_id": uuid::Uuid::new_v4().to_string(),
        "context_id": body.context_id.clone(),
        "router_decision": decision,
        "results": results,
        "synthesis": synthesis,
        "warnings": warnings,
        "latency_ms": started.elapsed().as_millis() as u64,
    }))
    .into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store consultation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn consult(
    state: &AppState,
    store: Store,
    query: &str,
    decision: &RouterDecision,
) -> mimo_domain::error::Result<Value> {
    match store {
        // Aggregation answers with counts, not lists.
        Store::Aggregation => {
            let stats = state.memory.stats()?;
            let subject_count = decision
                .aggregation
                .as_deref()
                .and_then(|subject| category_for(subject))
                .and_then(|cat| stats.by_category.get(cat).copied());
            Ok(serde_json::json!({
                "count": subject_count.unwrap_or(stats.total),
                "total": stats.total,
                "by_category": stats.by_category,
            }))
        }
        Store::Episodic => {
            let mut hits = state
                .memory
                .search(SearchRequest {
                    query: query.to_string(),
                    limit: 10,
                    preset: RankPreset::Recent,
                    include_superseded: false,
                    min_similarity: 0.0,
                    category: None,
                })
                .await?;
            if let Some(cutoff) = time_cutoff(decision.time_filter.as_ref()) {
                hits.retain(|h| h.created_at >= cutoff);
            }
            Ok(serde_json::to_value(hits)?)
        }
        Store::Semantic => {
            let hits = state
                .memory
                .search(SearchRequest {
                    query: query.to_string(),
                    limit: 10,
                    preset: RankPreset::Semantic,
                    include_superseded: false,
                    min_similarity: 0.0,
                    category: None,
                })
                .await?;
            Ok(serde_json::to_value(hits)?)
        }
        Store::Procedural => {
            let hits = state
                .memory
                .search(SearchRequest {
                    query: query.to_string(),
                    limit: 20,
                    preset: RankPreset::Balanced,
                    include_superseded: false,
                    min_similarity: 0.0,
                    category: None,
                })
                .await?;
            let procedural: Vec<_> = hits
                .into_iter()
                .filter(|h| {
                    matches!(h.category, MemoryCategory::Action | MemoryCategory::Plan)
                })
                .take(10)
                .collect();
            Ok(serde_json::to_value(procedural)?)
        }
    }
}

/// Start-of-window timestamp for a routed time filter.
fn time_cutoff(filter: Option<&mimo_router::TimeFilter>) -> Option<chrono::DateTime<chrono::Utc>> {
    use chrono::{Duration, Utc};
    use mimo_router::TimeFilter;

    let now = Utc::now();
    let today = now.date_naive().and_hms_opt(0, 0, 0)?;
    let today = chrono::DateTime::<Utc>::from_naive_utc_and_offset(today, Utc);
    match filter? {
        TimeFilter::Today => Some(today),
        TimeFilter::Yesterday => Some(today - Duration::days(1)),
        TimeFilter::LastWeek => Some(now - Duration::days(7)),
        TimeFilter::LastMonth => Some(now - Duration::days(30)),
        TimeFilter::DaysAgo(days) => Some(now - Duration::days(i64::from(*days))),
    }
}

/// Map an aggregation subject ("observations", "facts I have") onto a
/// memory category column.
fn category_for(subject: &str) -> Option<&'static str> {
    let lower = subject.to_lowercase();
    for (needle, category) in [
        ("observation", "observation"),
        ("fact", "fact"),
        ("action", "action"),
        ("plan", "plan"),
    ] {
        if lower.contains(needle) {
            return Some(category);
        }
    }
    None
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Synthesis
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Delegate synthesis to the completion interface; absence or failure is
/// a warning, never a request failure.
async fn synthesize(
    state: &AppState,
    query: &str,
    results: &HashMap<&'static str, Value>,
    warnings: &mut Vec<String>,
) -> Option<String> {
    let completer = match &state.completer {
        Some(completer) => completer,
        None => {
            warnings.push("synthesis: dependency_unavailable".into());
            return None;
        }
    };

    let context = serde_json::to_string(results).unwrap_or_default();
    let prompt = format!(
        "Answer the question from the retrieved memory results only. \
         Be concise.\n\nQuestion: {query}\n\nResults: {context}"
    );
    match completer.complete(&prompt, 512).await {
        Ok(answer) => Some(answer),
        Err(e) => {
            warnings.push(format!("synthesis: {}", e.kind()));
            None
        }
    }
}
