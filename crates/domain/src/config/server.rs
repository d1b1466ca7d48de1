use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// HTTP server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_host")]
    pub host: String,
    #[serde(default = "d_http_port")]
    pub http_port: u16,
    /// Environment variable holding the API bearer key.
    /// If the env var is unset outside production, auth is disabled (dev mode).
    #[serde(default = "d_api_key_env")]
    pub api_key_env: String,
    /// When true, a missing API key is a startup error and unauthenticated
    /// requests are rejected with 401.
    #[serde(default)]
    pub production: bool,
    /// Per-IP token-bucket rate limit. `None` disables rate limiting.
    #[serde(default = "d_rate_limit", skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitConfig>,
    /// Maximum concurrent in-flight HTTP requests.
    #[serde(default = "d_max_concurrent")]
    pub max_concurrent_requests: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: d_host(),
            http_port: d_http_port(),
            api_key_env: d_api_key_env(),
            production: false,
            rate_limit: d_rate_limit(),
            max_concurrent_requests: d_max_concurrent(),
        }
    }
}

/// Per-IP token bucket. The default works out to 60 requests/minute.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "d_rps")]
    pub requests_per_second: u64,
    #[serde(default = "d_burst")]
    pub burst_size: u32,
}

fn d_host() -> String {
    "127.0.0.1".into()
}

fn d_http_port() -> u16 {
    4000
}

fn d_api_key_env() -> String {
    "MIMO_API_KEY".into()
}

fn d_rate_limit() -> Option<RateLimitConfig> {
    Some(RateLimitConfig {
        requests_per_second: d_rps(),
        burst_size: d_burst(),
    })
}

fn d_rps() -> u64 {
    1
}

fn d_burst() -> u32 {
    60
}

fn d_max_concurrent() -> usize {
    256
}
