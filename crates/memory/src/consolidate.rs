//! Consolidation: move qualifying working-memory items into the long-term
//! store with embeddings attached. Batches of up to 50 commit in their own
//! transactions; a failed batch rolls back alone and its items stay in
//! working memory for the next pass.

use std::collections::HashMap;
use std::sync::Arc;

use crate::embedding::EmbeddingService;
use crate::retrieval::Retriever;
use crate::store::{LongTermStore, NewEngram};
use crate::working::WorkingMemory;

const BATCH_SIZE: usize = 50;

#[derive(Debug, Clone, Copy, Default)]
pub struct ConsolidationStats {
    pub candidates: usize,
    pub consolidated: usize,
    pub failed_batches: usize,
}

pub struct Consolidator {
    working: Arc<WorkingMemory>,
    store: Arc<LongTermStore>,
    embedder: Arc<EmbeddingService>,
    retriever: Arc<Retriever>,
    threshold: f64,
}

impl Consolidator {
    pub fn new(
        working: Arc<WorkingMemory>,
        store: Arc<LongTermStore>,
        embedder: Arc<EmbeddingService>,
        retriever: Arc<Retriever>,
        threshold: f64,
    ) -> Self {
        Self {
            working,
            store,
            embedder,
            retriever,
            threshold,
        }
    }

    pub async fn pass(&self) -> ConsolidationStats {
        let candidates = self.working.consolidation_candidates(self.threshold);
        let mut stats = ConsolidationStats {
            candidates: candidates.len(),
            ..Default::default()
        };
        if candidates.is_empty() {
            return stats;
        }

        for batch in candidates.chunks(BATCH_SIZE) {
            let texts: Vec<String> = batch.iter().map(|i| i.content.clone()).collect();
            let embeddings = self.embedder.embed_batch(&texts).await;

            let rows: Vec<NewEngram> = batch
                .iter()
                .zip(embeddings)
                .map(|(item, embedding)| {
                    let mut metadata: HashMap<String, serde_json::Value> = HashMap::new();
                    metadata.insert("source".into(), serde_json::json!("consolidated"));
                    metadata.insert("working_id".into(), serde_json::json!(item.id));
                    NewEngram {
                        content: item.content.clone(),
                        category: item.category,
                        importance: item.importance,
                        decay_rate: 1.0,
                        protected: false,
                        embedding,
                        metadata,
                    }
                })
                .collect();

            match self.store.insert_batch(&rows) {
                Ok(ids) => {
                    stats.consolidated += ids.len();
                    for item in batch {
                        self.working.remove(&item.id);
                    }
                }
                Err(e) => {
                    stats.failed_batches += 1;
                    tracing::warn!(
                        error = %e,
                        batch_size = batch.len(),
                        "consolidation batch rolled back"
                    );
                }
            }
        }

        if stats.consolidated > 0 {
            self.retriever.invalidate();
            tracing::info!(
                candidates = stats.candidates,
                consolidated = stats.consolidated,
                "consolidation pass complete"
            );
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mimo_domain::engram::MemoryCategory;
    use std::path::Path;
    use std::time::Duration;

    #[tokio::test]
    async fn consolidates_only_above_threshold() {
        let working = Arc::new(WorkingMemory::new(Duration::from_secs(300)));
        let store = Arc::new(LongTermStore::open(Path::new(":memory:"), 1000).unwrap());
        let embedder = Arc::new(EmbeddingService::new(None, 32));
        let retriever = Arc::new(Retriever::new(store.clone(), true));
        let consolidator =
            Consolidator::new(working.clone(), store.clone(), embedder, retriever, 0.7);

        working.put(None, "minor detail".into(), MemoryCategory::Observation, 0.3);
        working.put(None, "key decision".into(), MemoryCategory::Plan, 0.9);

        let stats = consolidator.pass().await;
        assert_eq!(stats.candidates, 1);
        assert_eq!(stats.consolidated, 1);
        assert_eq!(store.count().unwrap(), 1);

        // Consolidated item leaves working memory; the low one stays.
        assert_eq!(working.len(), 1);

        let row = store.scan(0, 10, false).unwrap().remove(0);
        assert_eq!(row.content, "key decision");
        assert_eq!(
            row.metadata.get("source"),
            Some(&serde_json::json!("consolidated"))
        );
    }

    #[tokio::test]
    async fn empty_working_memory_is_a_noop() {
        let working = Arc::new(WorkingMemory::new(Duration::from_secs(300)));
        let store = Arc::new(LongTermStore::open(Path::new(":memory:"), 1000).unwrap());
        let embedder = Arc::new(EmbeddingService::new(None, 32));
        let retriever = Arc::new(Retriever::new(store.clone(), true));
        let consolidator = Consolidator::new(working, store, embedder, retriever, 0.7);
        let stats = consolidator.pass().await;
        assert_eq!(stats.candidates, 0);
        assert_eq!(stats.consolidated, 0);
    }
}
