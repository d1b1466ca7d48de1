//! Completion and analysis seams. The gateway never generates free-form
//! text itself; synthesis and query analysis are delegated through these
//! traits to an external completion endpoint when one is configured.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use mimo_domain::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Completer
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Abstract completion provider used for synthesis and the `reason` tool.
#[async_trait]
pub trait Completer: Send + Sync {
    async fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String>;
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    prompt: &'a str,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    text: String,
}

/// Completer backed by an HTTP endpoint (`POST {url}` with
/// `{"prompt", "max_tokens"}`, responding `{"text"}`).
pub struct HttpCompleter {
    client: reqwest::Client,
    url: String,
}

impl HttpCompleter {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl Completer for HttpCompleter {
    async fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String> {
        let resp = self
            .client
            .post(&self.url)
            .json(&CompletionRequest { prompt, max_tokens })
            .send()
            .await
            .map_err(|e| Error::DependencyUnavailable(format!("completion service: {e}")))?;

        if !resp.status().is_success() {
            return Err(Error::DependencyUnavailable(format!(
                "completion service returned {}",
                resp.status()
            )));
        }

        let body: CompletionResponse = resp
            .json()
            .await
            .map_err(|e| Error::DependencyUnavailable(format!("completion response: {e}")))?;
        Ok(body.text)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Analyzer
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Structured analysis of a free-form query, used by the meta-cognitive
/// router and the temporal-chain classifier. Optional: every caller has a
/// heuristic fallback when no analyzer is configured or a call fails.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryAnalysis {
    #[serde(default)]
    pub query_type: Option<String>,
    #[serde(default)]
    pub intent: Option<String>,
    #[serde(default)]
    pub entities: Vec<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
}

/// Verdict on how a new memory relates to an existing similar one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainVerdict {
    Update,
    Correction,
    Refinement,
    New,
}

#[async_trait]
pub trait Analyzer: Send + Sync {
    /// Classify a free-form query into structured routing hints.
    async fn analyze_query(&self, query: &str) -> Result<QueryAnalysis>;

    /// Decide whether `new_content` supersedes `existing_content`.
    async fn classify_chain(&self, existing_content: &str, new_content: &str)
        -> Result<ChainVerdict>;
}

/// Analyzer implemented on top of a [`Completer`], parsing a JSON reply.
pub struct CompletionAnalyzer<C: Completer> {
    completer: C,
}

impl<C: Completer> CompletionAnalyzer<C> {
    pub fn new(completer: C) -> Self {
        Self { completer }
    }
}

#[async_trait]
impl<C: Completer> Analyzer for CompletionAnalyzer<C> {
    async fn analyze_query(&self, query: &str) -> Result<QueryAnalysis> {
        let prompt = format!(
            "Classify the query below. Reply with JSON only: \
             {{\"query_type\": \"factual|episodic|procedural|aggregation|explanatory\", \
             \"intent\": string, \"entities\": [string], \"confidence\": number}}\n\
             Query: {query}"
        );
        let raw = self.completer.complete(&prompt, 256).await?;
        serde_json::from_str(raw.trim())
            .map_err(|e| Error::DependencyUnavailable(format!("analyzer reply unparsable: {e}")))
    }

    async fn classify_chain(
        &self,
        existing_content: &str,
        new_content: &str,
    ) -> Result<ChainVerdict> {
        let prompt = format!(
            "Two memory records follow. Decide the relation of NEW to OLD. \
             Reply with exactly one word: update, correction, refinement, or new.\n\
             OLD: {existing_content}\nNEW: {new_content}"
        );
        let raw = self.completer.complete(&prompt, 8).await?;
        match raw.trim().to_ascii_lowercase().as_str() {
            "update" => Ok(ChainVerdict::Update),
            "correction" => Ok(ChainVerdict::Correction),
            "refinement" => Ok(ChainVerdict::Refinement),
            "new" => Ok(ChainVerdict::New),
            other => Err(Error::DependencyUnavailable(format!(
                "analyzer reply unparsable: {other}"
            ))),
        }
    }
}
