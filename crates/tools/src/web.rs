//! The `web` tool: HTTP fetch and naive text extraction. Browser
//! automation is a dispatch-contract surface only: without a configured
//! backend the `browser` operation reports `dependency_unavailable`.

use async_trait::async_trait;
use serde_json::Value;

use mimo_domain::error::{Error, Result};
use mimo_domain::tool::{CallContext, ToolDescriptor};

use crate::{operation, required_str, success, ToolHandler};

/// Response body cap, in bytes.
const BODY_CAP: usize = 512 * 1024;

pub struct WebTool {
    client: reqwest::Client,
}

impl WebTool {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .user_agent(concat!("mimo/", env!("CARGO_PKG_VERSION")))
                .build()
                .unwrap_or_default(),
        }
    }
}

impl Default for WebTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolHandler for WebTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::internal(
            "web",
            "Fetch a URL, optionally extracting readable text.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "operation": { "type": "string", "enum": ["fetch", "extract", "browser"] },
                    "url": { "type": "string", "description": "http(s) URL" },
                    "max_bytes": { "type": "integer" }
                },
                "required": ["operation"]
            }),
        )
    }

    async fn handle(&self, args: Value, _ctx: &CallContext) -> Result<Value> {
        match operation(&args)? {
            "fetch" => self.fetch(&args, false).await,
            "extract" => self.fetch(&args, true).await,
            "browser" => Err(Error::DependencyUnavailable(
                "no browser automation backend is configured".into(),
            )),
            other => Err(Error::InvalidArguments(format!("unknown operation '{other}'"))),
        }
    }
}

impl WebTool {
    async fn fetch(&self, args: &Value, extract: bool) -> Result<Value> {
        let url = required_str(args, "url")?;
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(Error::InvalidArguments(format!(
                "only http(s) URLs are supported (got '{url}')"
            )));
        }
        let cap = args
            .get("max_bytes")
            .and_then(|v| v.as_u64())
            .map(|v| (v as usize).min(BODY_CAP))
            .unwrap_or(BODY_CAP);

        let resp = self.client.get(url).send().await.map_err(|e| {
            tracing::debug!(url = %url, error = %e, "fetch failed");
            Error::DependencyUnavailable(format!("fetch {url}: {e}"))
        })?;
        let status = resp.status().as_u16();
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let body = resp
            .text()
            .await
            .map_err(|e| Error::DependencyUnavailable(format!("read body from {url}: {e}")))?;

        let mut body: String = body.chars().take(cap).collect();
        if extract {
            body = extract_text(&body);
        }

        Ok(success(serde_json::json!({
            "url": url,
            "http_status": status,
            "content_type": content_type,
            "body": body,
        })))
    }
}

/// Strip tags, scripts, and styles from an HTML body. Deliberately naive:
/// real rendering is a collaborator concern.
fn extract_text(html: &str) -> String {
    let mut out = String::with_capacity(html.len() / 2);
    let mut rest = html;

    while !rest.is_empty() {
        if rest.starts_with('<') {
            if starts_with_ci(rest, "<script") {
                match find_ci(rest, "</script>") {
                    Some(idx) => rest = &rest[idx + "</script>".len()..],
                    None => break,
                }
                continue;
            }
            if starts_with_ci(rest, "<style") {
                match find_ci(rest, "</style>") {
                    Some(idx) => rest = &rest[idx + "</style>".len()..],
                    None => break,
                }
                continue;
            }
            match rest.find('>') {
                Some(idx) => {
                    rest = &rest[idx + 1..];
                    out.push(' ');
                }
                None => break,
            }
        } else {
            match rest.find('<') {
                Some(idx) => {
                    out.push_str(&rest[..idx]);
                    rest = &rest[idx..];
                }
                None => {
                    out.push_str(rest);
                    break;
                }
            }
        }
    }

    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn starts_with_ci(s: &str, prefix: &str) -> bool {
    s.get(..prefix.len())
        .map(|head| head.eq_ignore_ascii_case(prefix))
        .unwrap_or(false)
}

/// ASCII-case-insensitive substring search. Matches only at positions that
/// begin an ASCII byte, which are always char boundaries.
fn find_ci(haystack: &str, needle: &str) -> Option<usize> {
    let h = haystack.as_bytes();
    let n = needle.as_bytes();
    if n.is_empty() || h.len() < n.len() {
        return None;
    }
    (0..=h.len() - n.len()).find(|&i| h[i..i + n.len()].eq_ignore_ascii_case(n))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_strips_tags_and_scripts() {
        let html = "<html><head><script>var x = 1;</script></head>\
                    <body><h1>Title</h1><p>Hello <b>world</b></p></body></html>";
        assert_eq!(extract_text(html), "Title Hello world");
    }

    #[test]
    fn extract_handles_plain_text() {
        assert_eq!(extract_text("just text"), "just text");
    }

    #[tokio::test]
    async fn non_http_url_is_invalid() {
        let tool = WebTool::new();
        let err = tool
            .handle(
                serde_json::json!({ "operation": "fetch", "url": "file:///etc/passwd" }),
                &CallContext::default(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_arguments");
    }

    #[tokio::test]
    async fn browser_without_backend_is_dependency_unavailable() {
        let tool = WebTool::new();
        let err = tool
            .handle(
                serde_json::json!({ "operation": "browser", "url": "https://example.com" }),
                &CallContext::default(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "dependency_unavailable");
    }
}
