//! `GET /health`: unauthenticated service probe.

use axum::extract::State;
use axum::response::Json;

use crate::state::AppState;

pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let memory = state.memory.stats().ok();
    let triples = state.graph.count().unwrap_or(0);
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "memory": memory,
        "triples": triples,
        "skills": {
            "running": state.supervisor.running_count(),
            "failed": state.supervisor.failed_count(),
        },
    }))
}
