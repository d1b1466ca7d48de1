//! API authentication middleware.
//!
//! The env var named by `config.server.api_key_env` is read **once at
//! startup** and its SHA-256 digest cached in `AppState`.
//! - Key configured: every protected request must carry
//!   `Authorization: Bearer <key>`.
//! - Key absent outside production: a warning is logged once at startup
//!   and unauthenticated access is allowed (dev mode).

use axum::body::Body;
use axum::extract::State;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use mimo_domain::error::Error;

use crate::api::error::ApiError;
use crate::state::AppState;

/// Axum middleware enforcing bearer-key authentication on protected
/// routes. Attach via `axum::middleware::from_fn_with_state`.
pub async fn require_api_key(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let expected_hash = match &state.api_key_hash {
        Some(h) => h,
        None => return next.run(req).await,
    };

    let provided = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("");

    // Hash the provided key to a fixed-length digest, then compare in
    // constant time. This also avoids leaking the key length.
    let provided_hash = Sha256::digest(provided.as_bytes());

    if !bool::from(provided_hash.ct_eq(expected_hash.as_slice())) {
        return ApiError::new(Error::Unauthenticated(
            "invalid or missing API key".into(),
        ))
        .into_response();
    }

    next.run(req).await
}
