//! The stable HTTP error body: `{error, kind, message, latency_ms?}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use mimo_domain::error::Error;

/// Wrapper turning a domain error into the gateway's error response.
pub struct ApiError {
    pub error: Error,
    pub latency_ms: Option<u64>,
}

impl ApiError {
    pub fn new(error: Error) -> Self {
        Self {
            error,
            latency_ms: None,
        }
    }

    pub fn with_latency(error: Error, latency_ms: u64) -> Self {
        Self {
            error,
            latency_ms: Some(latency_ms),
        }
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        Self::new(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.error.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut body = serde_json::json!({
            "error": self.error.to_string(),
            "kind": self.error.kind(),
            "message": self.error.to_string(),
        });
        if let Some(latency_ms) = self.latency_ms {
            body["latency_ms"] = serde_json::json!(latency_ms);
        }
        (status, Json(body)).into_response()
    }
}
