/// Shared error type used across all mimo crates.
///
/// Every variant maps to a stable machine-readable `kind()` string that is
/// surfaced verbatim to callers (HTTP body `kind` field, JSON-RPC
/// `error.data.kind`). Handlers never translate errors into prose beyond
/// the human-readable message each variant carries.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("tool disabled in sandbox: {0}")]
    ToolDisabledInSandbox(String),

    #[error("skill unavailable: {0}")]
    SkillUnavailable(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("dependency unavailable: {0}")]
    DependencyUnavailable(String),

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("storage: {0}")]
    Storage(String),

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Stable machine-readable error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::InvalidArguments(_) => "invalid_arguments",
            Error::UnknownTool(_) => "unknown_tool",
            Error::ToolDisabledInSandbox(_) => "tool_disabled_in_sandbox",
            Error::SkillUnavailable(_) => "skill_unavailable",
            Error::Timeout(_) => "timeout",
            Error::NotFound(_) => "not_found",
            Error::Conflict(_) => "conflict",
            Error::RateLimited(_) => "rate_limited",
            Error::Unauthenticated(_) => "unauthenticated",
            Error::Forbidden(_) => "forbidden",
            Error::DependencyUnavailable(_) => "dependency_unavailable",
            Error::Io(_) | Error::Json(_) | Error::Storage(_) | Error::Config(_) => "internal",
            Error::Internal(_) => "internal",
        }
    }

    /// HTTP status code for surfacing this error through the gateway.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::InvalidArguments(_) => 400,
            Error::Unauthenticated(_) => 401,
            Error::ToolDisabledInSandbox(_) | Error::Forbidden(_) => 403,
            Error::UnknownTool(_) | Error::NotFound(_) => 404,
            Error::Conflict(_) => 409,
            Error::RateLimited(_) => 429,
            Error::Timeout(_) => 504,
            Error::SkillUnavailable(_) | Error::DependencyUnavailable(_) => 503,
            _ => 500,
        }
    }

    /// JSON-RPC error code for the stdio frontend.
    ///
    /// User-caused errors map to the standard `-32602`; everything else
    /// lands in the application range.
    pub fn jsonrpc_code(&self) -> i64 {
        match self {
            Error::InvalidArguments(_) => -32602,
            Error::UnknownTool(_) => -32000,
            Error::ToolDisabledInSandbox(_) | Error::Forbidden(_) => -32001,
            Error::SkillUnavailable(_) | Error::DependencyUnavailable(_) => -32002,
            Error::Timeout(_) => -32003,
            Error::NotFound(_) => -32004,
            Error::Conflict(_) => -32005,
            Error::RateLimited(_) => -32006,
            Error::Unauthenticated(_) => -32007,
            _ => -32099,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable() {
        assert_eq!(Error::InvalidArguments("x".into()).kind(), "invalid_arguments");
        assert_eq!(Error::UnknownTool("x".into()).kind(), "unknown_tool");
        assert_eq!(
            Error::ToolDisabledInSandbox("x".into()).kind(),
            "tool_disabled_in_sandbox"
        );
        assert_eq!(Error::Timeout("x".into()).kind(), "timeout");
        assert_eq!(Error::Storage("x".into()).kind(), "internal");
    }

    #[test]
    fn http_status_mapping() {
        assert_eq!(Error::InvalidArguments("x".into()).http_status(), 400);
        assert_eq!(Error::Unauthenticated("x".into()).http_status(), 401);
        assert_eq!(Error::ToolDisabledInSandbox("x".into()).http_status(), 403);
        assert_eq!(Error::NotFound("x".into()).http_status(), 404);
        assert_eq!(Error::Conflict("x".into()).http_status(), 409);
        assert_eq!(Error::RateLimited("x".into()).http_status(), 429);
        assert_eq!(Error::Timeout("x".into()).http_status(), 504);
    }

    #[test]
    fn invalid_params_uses_standard_jsonrpc_code() {
        assert_eq!(Error::InvalidArguments("x".into()).jsonrpc_code(), -32602);
        assert!(Error::Timeout("x".into()).jsonrpc_code() <= -32000);
    }
}
