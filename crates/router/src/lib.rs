//! Meta-cognitive router: classifies a free-form query into a routing
//! decision over the memory surfaces.
//!
//! Two stages: token-level heuristics produce a provisional decision; an
//! optional analyzer refines it. Feedback-derived boosts then adjust the
//! confidence, bounded to ±0.2. Analyzer failures never surface; the
//! heuristic decision stands.

use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};

use mimo_dispatch::FeedbackLoop;
use mimo_memory::completer::Analyzer;

/// Confidence at or above which the primary store is consulted alone.
pub const PRIMARY_ONLY_THRESHOLD: f64 = 0.8;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Decision shapes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Memory surfaces a query can be routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Store {
    Semantic,
    Episodic,
    Procedural,
    Aggregation,
}

impl Store {
    pub fn as_str(&self) -> &'static str {
        match self {
            Store::Semantic => "semantic",
            Store::Episodic => "episodic",
            Store::Procedural => "procedural",
            Store::Aggregation => "aggregation",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryType {
    Factual,
    Episodic,
    Procedural,
    Aggregation,
    Explanatory,
    General,
}

/// Time anchor extracted from the query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeFilter {
    Today,
    Yesterday,
    LastWeek,
    LastMonth,
    DaysAgo(u32),
}

/// The structured routing decision.
#[derive(Debug, Clone, Serialize)]
pub struct RouterDecision {
    pub primary_store: Store,
    pub secondary_stores: Vec<Store>,
    /// Confidence after feedback boost and calibration.
    pub confidence: f64,
    /// Confidence before adjustment.
    pub raw_confidence: f64,
    pub requires_synthesis: bool,
    pub query_type: QueryType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_filter: Option<TimeFilter>,
    /// Set for aggregation queries: what to count.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregation: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Router
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct MetaRouter {
    analyzer: Option<Arc<dyn Analyzer>>,
    feedback: Arc<FeedbackLoop>,
    patterns: Patterns,
}

struct Patterns {
    aggregation: Regex,
    episodic: Regex,
    procedural: Regex,
    semantic: Regex,
    explanatory: Regex,
    days_ago: Regex,
}

impl Patterns {
    fn compile() -> Self {
        Self {
            aggregation: Regex::new(r"(?i)\b(how many|count|number of|total)\b").unwrap(),
            episodic: Regex::new(r"(?i)\b(remember|recall|did i|last time|what did|what happened)\b")
                .unwrap(),
            procedural: Regex::new(r"(?i)\bhow (do|to|can|should) (i|we|you)\b|\bsteps to\b")
                .unwrap(),
            semantic: Regex::new(r"(?i)\b(who|what|where|which) (is|are|was|were)\b|\bdefine\b")
                .unwrap(),
            explanatory: Regex::new(r"(?i)\b(why|explain|reason for)\b").unwrap(),
            days_ago: Regex::new(r"(?i)\b(\d+)\s+days?\s+ago\b").unwrap(),
        }
    }
}

impl MetaRouter {
    pub fn new(analyzer: Option<Arc<dyn Analyzer>>, feedback: Arc<FeedbackLoop>) -> Self {
        Self {
            analyzer,
            feedback,
            patterns: Patterns::compile(),
        }
    }

    /// Classify a query into a routing decision.
    pub async fn route(&self, query: &str) -> RouterDecision {
        let mut decision = self.heuristic(query);

        // LLM-assisted refinement, when available. Any failure leaves the
        // heuristic decision in place.
        if let Some(analyzer) = &self.analyzer {
            match analyzer.analyze_query(query).await {
                Ok(analysis) => {
                    if let Some(query_type) = analysis.query_type.as_deref() {
                        if let Some((qt, store)) = map_analyzed_type(query_type) {
                            decision.query_type = qt;
                            decision.primary_store = store;
                        }
                    }
                    if let Some(confidence) = analysis.confidence {
                        decision.raw_confidence = confidence.clamp(0.0, 1.0);
                    }
                }
                Err(e) => {
                    tracing::debug!(error = %e, "query analyzer failed, keeping heuristic decision");
                }
            }
        }

        // Feedback adjustment: boost by observed routing accuracy, then
        // calibrate by query-type history.
        let boost = self.feedback.router_boost(decision.primary_store.as_str());
        let calibration = self
            .feedback
            .calibration(query_type_name(decision.query_type));
        decision.confidence =
            ((decision.raw_confidence + boost) * calibration).clamp(0.0, 1.0);

        decision.secondary_stores = if decision.confidence >= PRIMARY_ONLY_THRESHOLD {
            Vec::new()
        } else {
            default_secondaries(decision.primary_store)
        };

        decision.requires_synthesis =
            decision.query_type == QueryType::Explanatory || !decision.secondary_stores.is_empty();

        decision
    }

    // ── Heuristic stage ──────────────────────────────────────────────

    fn heuristic(&self, query: &str) -> RouterDecision {
        let time_filter = self.extract_time_filter(query);

        let (query_type, primary_store, raw_confidence, aggregation) =
            if self.patterns.aggregation.is_match(query) {
                (
                    QueryType::Aggregation,
                    Store::Aggregation,
                    0.85,
                    Some(extract_aggregation_subject(query)),
                )
            } else if self.patterns.procedural.is_match(query) {
                (QueryType::Procedural, Store::Procedural, 0.75, None)
            } else if self.patterns.episodic.is_match(query) {
                (QueryType::Episodic, Store::Episodic, 0.75, None)
            } else if self.patterns.explanatory.is_match(query) {
                (QueryType::Explanatory, Store::Semantic, 0.6, None)
            } else if self.patterns.semantic.is_match(query) {
                (QueryType::Factual, Store::Semantic, 0.7, None)
            } else if time_filter.is_some() {
                // A bare time anchor reads as an episodic lookup.
                (QueryType::Episodic, Store::Episodic, 0.6, None)
            } else {
                (QueryType::General, Store::Episodic, 0.4, None)
            };

        RouterDecision {
            primary_store,
            secondary_stores: Vec::new(),
            confidence: raw_confidence,
            raw_confidence,
            requires_synthesis: false,
            query_type,
            time_filter,
            aggregation,
        }
    }

    fn extract_time_filter(&self, query: &str) -> Option<TimeFilter> {
        let lower = query.to_lowercase();
        if lower.contains("yesterday") {
            return Some(TimeFilter::Yesterday);
        }
        if lower.contains("today") {
            return Some(TimeFilter::Today);
        }
        if lower.contains("last week") {
            return Some(TimeFilter::LastWeek);
        }
        if lower.contains("last month") {
            return Some(TimeFilter::LastMonth);
        }
        if let Some(caps) = self.patterns.days_ago.captures(query) {
            if let Ok(days) = caps[1].parse::<u32>() {
                return Some(TimeFilter::DaysAgo(days));
            }
        }
        None
    }
}

fn map_analyzed_type(query_type: &str) -> Option<(QueryType, Store)> {
    match query_type {
        "factual" => Some((QueryType::Factual, Store::Semantic)),
        "episodic" => Some((QueryType::Episodic, Store::Episodic)),
        "procedural" => Some((QueryType::Procedural, Store::Procedural)),
        "aggregation" => Some((QueryType::Aggregation, Store::Aggregation)),
        "explanatory" => Some((QueryType::Explanatory, Store::Semantic)),
        _ => None,
    }
}

fn query_type_name(query_type: QueryType) -> &'static str {
    match query_type {
        QueryType::Factual => "factual",
        QueryType::Episodic => "episodic",
        QueryType::Procedural => "procedural",
        QueryType::Aggregation => "aggregation",
        QueryType::Explanatory => "explanatory",
        QueryType::General => "general",
    }
}

fn default_secondaries(primary: Store) -> Vec<Store> {
    match primary {
        Store::Semantic => vec![Store::Episodic],
        Store::Episodic => vec![Store::Semantic],
        Store::Procedural => vec![Store::Episodic, Store::Semantic],
        Store::Aggregation => vec![Store::Episodic],
    }
}

/// The thing being counted, for aggregation responses: the last token run
/// after "how many"/"count"/"number of", cleaned of punctuation.
fn extract_aggregation_subject(query: &str) -> String {
    let lower = query.to_lowercase();
    for marker in ["how many", "number of", "count of", "count"] {
        if let Some(idx) = lower.find(marker) {
            let rest = lower[idx + marker.len()..].trim();
            let subject: String = rest
                .chars()
                .take_while(|c| c.is_alphanumeric() || c.is_whitespace())
                .collect();
            let subject = subject
                .split_whitespace()
                .take(3)
                .collect::<Vec<_>>()
                .join(" ");
            if !subject.is_empty() {
                return subject;
            }
        }
    }
    "memories".into()
}
