pub mod ask;
pub mod auth;
pub mod error;
pub mod health;
pub mod openai_compat;
pub mod tools;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

/// Build the full API router.
///
/// Routes split into **public** (health only) and **protected** (gated
/// behind the bearer-key middleware). `state` is needed to wire the auth
/// middleware at build time.
pub fn router(state: AppState) -> Router<AppState> {
    let public = Router::new().route("/health", get(health::health));

    let protected = Router::new()
        .route("/v1/tools", get(tools::list_tools))
        .route("/v1/tool", post(tools::call_tool))
        .route("/v1/ask", post(ask::ask))
        .route("/v1/chat/completions", post(openai_compat::chat_completions))
        .route("/v1/models", get(openai_compat::models))
        .route_layer(middleware::from_fn_with_state(
            state,
            auth::require_api_key,
        ));

    public.merge(protected)
}
