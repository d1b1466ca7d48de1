//! Temporal memory chains: classify how a new memory relates to its
//! nearest existing neighbours before it is persisted.

use std::sync::Arc;

use mimo_domain::engram::{Engram, SupersessionKind};

use crate::completer::{Analyzer, ChainVerdict};

/// Similarity at or above which the new content is a duplicate.
pub const REDUNDANT_THRESHOLD: f64 = 0.95;
/// Similarity range in which the relation is ambiguous.
pub const AMBIGUOUS_THRESHOLD: f64 = 0.80;

/// Outcome of pre-store classification.
#[derive(Debug, Clone, PartialEq)]
pub enum ChainDecision {
    /// Do not store; bump access on the existing memory instead.
    Redundant { existing_id: i64 },
    /// Store and link as superseding the existing memory.
    Supersede {
        old_id: i64,
        kind: SupersessionKind,
    },
    /// Store as an unrelated new memory.
    New,
}

pub struct ChainClassifier {
    analyzer: Option<Arc<dyn Analyzer>>,
}

impl ChainClassifier {
    pub fn new(analyzer: Option<Arc<dyn Analyzer>>) -> Self {
        Self { analyzer }
    }

    /// Classify `new_content` against the best-matching neighbour.
    ///
    /// The ambiguous band consults the analyzer when one is configured;
    /// on analyzer failure or absence the content is stored as new.
    pub async fn classify(
        &self,
        new_content: &str,
        neighbours: &[(Engram, f64)],
    ) -> ChainDecision {
        let Some((best, similarity)) = neighbours.first() else {
            return ChainDecision::New;
        };

        if *similarity >= REDUNDANT_THRESHOLD {
            return ChainDecision::Redundant {
                existing_id: best.id,
            };
        }

        if *similarity >= AMBIGUOUS_THRESHOLD {
            if let Some(analyzer) = &self.analyzer {
                match analyzer.classify_chain(&best.content, new_content).await {
                    Ok(ChainVerdict::Update) => {
                        return ChainDecision::Supersede {
                            old_id: best.id,
                            kind: SupersessionKind::Update,
                        }
                    }
                    Ok(ChainVerdict::Correction) => {
                        return ChainDecision::Supersede {
                            old_id: best.id,
                            kind: SupersessionKind::Correction,
                        }
                    }
                    Ok(ChainVerdict::Refinement) => {
                        return ChainDecision::Supersede {
                            old_id: best.id,
                            kind: SupersessionKind::Refinement,
                        }
                    }
                    Ok(ChainVerdict::New) => return ChainDecision::New,
                    Err(e) => {
                        tracing::debug!(error = %e, "chain analyzer failed, storing as new");
                    }
                }
            }
        }

        ChainDecision::New
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use mimo_domain::engram::MemoryCategory;
    use mimo_domain::error::Result;
    use std::collections::HashMap;

    fn engram(id: i64, content: &str) -> Engram {
        Engram {
            id,
            content: content.into(),
            category: MemoryCategory::Fact,
            importance: 0.5,
            created_at: Utc::now(),
            last_accessed_at: Utc::now(),
            access_count: 0,
            decay_rate: 1.0,
            protected: false,
            embedding: Vec::new(),
            metadata: HashMap::new(),
            superseded_by: None,
        }
    }

    struct FixedAnalyzer(ChainVerdict);

    #[async_trait]
    impl Analyzer for FixedAnalyzer {
        async fn analyze_query(&self, _query: &str) -> Result<crate::completer::QueryAnalysis> {
            Ok(Default::default())
        }
        async fn classify_chain(&self, _existing: &str, _new: &str) -> Result<ChainVerdict> {
            Ok(self.0)
        }
    }

    #[tokio::test]
    async fn near_duplicate_is_redundant() {
        let classifier = ChainClassifier::new(None);
        let decision = classifier
            .classify("same thing", &[(engram(7, "same thing"), 0.99)])
            .await;
        assert_eq!(decision, ChainDecision::Redundant { existing_id: 7 });
    }

    #[tokio::test]
    async fn ambiguous_without_analyzer_is_new() {
        let classifier = ChainClassifier::new(None);
        let decision = classifier
            .classify("updated fact", &[(engram(7, "old fact"), 0.85)])
            .await;
        assert_eq!(decision, ChainDecision::New);
    }

    #[tokio::test]
    async fn ambiguous_with_analyzer_supersedes() {
        let classifier = ChainClassifier::new(Some(Arc::new(FixedAnalyzer(ChainVerdict::Correction))));
        let decision = classifier
            .classify("project uses mysql", &[(engram(3, "project uses postgres"), 0.88)])
            .await;
        assert_eq!(
            decision,
            ChainDecision::Supersede {
                old_id: 3,
                kind: SupersessionKind::Correction
            }
        );
    }

    #[tokio::test]
    async fn distant_content_is_new() {
        let classifier = ChainClassifier::new(None);
        let decision = classifier
            .classify("unrelated", &[(engram(1, "other"), 0.4)])
            .await;
        assert_eq!(decision, ChainDecision::New);
    }

    #[tokio::test]
    async fn empty_neighbours_is_new() {
        let classifier = ChainClassifier::new(None);
        assert_eq!(classifier.classify("anything", &[]).await, ChainDecision::New);
    }
}
