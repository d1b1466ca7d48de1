//! Persistent memory subsystem: working buffer, long-term episodic store
//! with vector search, hybrid ranking, consolidation, decay, and temporal
//! memory chains. [`MemoryCore`] is the facade every tool handler and
//! frontend goes through.

pub mod access;
pub mod chains;
pub mod completer;
pub mod consolidate;
pub mod decay;
pub mod embedding;
pub mod ranker;
pub mod retrieval;
pub mod store;
pub mod working;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use mimo_domain::config::MemoryConfig;
use mimo_domain::engram::{Engram, MemoryCategory, SupersessionKind, MAX_CONTENT_BYTES};
use mimo_domain::error::{Error, Result};

use crate::access::AccessTracker;
use crate::chains::{ChainClassifier, ChainDecision};
use crate::completer::Analyzer;
use crate::embedding::{Embedder, EmbeddingService, HttpEmbedder};
use crate::ranker::{ActiveDayIndex, RankPreset, RankedHit};
use crate::retrieval::Retriever;
use crate::store::{LongTermStore, NewEngram};
use crate::working::WorkingMemory;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Requests / responses
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Deserialize)]
pub struct StoreRequest {
    pub content: String,
    #[serde(default = "d_category")]
    pub category: MemoryCategory,
    #[serde(default = "d_importance")]
    pub importance: f64,
    #[serde(default)]
    pub protected: bool,
    #[serde(default = "d_decay_rate")]
    pub decay_rate: f64,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    /// Explicit supersession target; skips chain classification.
    #[serde(default)]
    pub supersedes: Option<i64>,
    #[serde(default)]
    pub supersession_kind: Option<SupersessionKind>,
}

fn d_category() -> MemoryCategory {
    MemoryCategory::Observation
}

fn d_importance() -> f64 {
    0.5
}

fn d_decay_rate() -> f64 {
    1.0
}

/// What happened to a store request.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum StoreOutcome {
    Stored { id: i64 },
    /// Near-duplicate: nothing stored, the existing memory was touched.
    Redundant { existing_id: i64 },
    Superseded { id: i64, old_id: i64, kind: SupersessionKind },
}

impl StoreOutcome {
    /// The id a caller should reference after the store.
    pub fn effective_id(&self) -> i64 {
        match self {
            StoreOutcome::Stored { id } => *id,
            StoreOutcome::Redundant { existing_id } => *existing_id,
            StoreOutcome::Superseded { id, .. } => *id,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default = "d_limit")]
    pub limit: usize,
    #[serde(default)]
    pub preset: RankPreset,
    #[serde(default)]
    pub include_superseded: bool,
    /// Hits below this similarity are dropped after ranking.
    #[serde(default)]
    pub min_similarity: f64,
    #[serde(default)]
    pub category: Option<MemoryCategory>,
}

fn d_limit() -> usize {
    10
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub id: i64,
    pub content: String,
    pub category: MemoryCategory,
    pub importance: f64,
    pub similarity: f64,
    pub score: f64,
    pub access_count: i64,
    pub created_at: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl From<RankedHit> for SearchHit {
    fn from(hit: RankedHit) -> Self {
        Self {
            id: hit.engram.id,
            content: hit.engram.content,
            category: hit.engram.category,
            importance: hit.engram.importance,
            similarity: hit.similarity,
            score: hit.score,
            access_count: hit.engram.access_count,
            created_at: hit.engram.created_at,
            metadata: hit.engram.metadata,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MemoryStats {
    pub total: usize,
    pub by_category: HashMap<String, usize>,
    pub working_items: usize,
    pub active_days: usize,
    pub embedding_dim: usize,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// MemoryCore
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Facade over the whole memory subsystem.
pub struct MemoryCore {
    store: Arc<LongTermStore>,
    working: Arc<WorkingMemory>,
    embedder: Arc<EmbeddingService>,
    retriever: Arc<Retriever>,
    chains: ChainClassifier,
    tracker: AccessTracker,
    temporal_chains: bool,
    embedding_dim: usize,
}

impl MemoryCore {
    /// Open the store and wire the subsystem. Spawns the access-tracker
    /// drain task; the consolidation/decay/cleanup loops are driven by the
    /// gateway's background scheduler via [`MemoryCore::consolidator`] and
    /// [`MemoryCore::decay_engine`].
    pub fn open(
        config: &MemoryConfig,
        analyzer: Option<Arc<dyn Analyzer>>,
        approximate_index: bool,
        temporal_chains: bool,
    ) -> Result<Self> {
        let store = Arc::new(LongTermStore::open(&config.db_path, config.cap)?);
        let working = Arc::new(WorkingMemory::new(Duration::from_secs(
            config.working_ttl_secs,
        )));
        let backend: Option<Box<dyn Embedder>> = config
            .embedding_url
            .as_ref()
            .map(|url| Box::new(HttpEmbedder::new(url, config.embedding_dim)) as Box<dyn Embedder>);
        let embedder = Arc::new(EmbeddingService::new(backend, config.embedding_dim));
        let retriever = Arc::new(Retriever::new(store.clone(), approximate_index));
        let tracker = AccessTracker::spawn(store.clone());

        Ok(Self {
            store,
            working,
            embedder,
            retriever,
            chains: ChainClassifier::new(analyzer),
            tracker,
            temporal_chains,
            embedding_dim: config.embedding_dim,
        })
    }

    pub fn store_handle(&self) -> Arc<LongTermStore> {
        self.store.clone()
    }

    pub fn working(&self) -> Arc<WorkingMemory> {
        self.working.clone()
    }

    pub fn consolidator(&self, threshold: f64) -> consolidate::Consolidator {
        consolidate::Consolidator::new(
            self.working.clone(),
            self.store.clone(),
            self.embedder.clone(),
            self.retriever.clone(),
            threshold,
        )
    }

    pub fn decay_engine(&self, prune_threshold: f64) -> decay::DecayEngine {
        decay::DecayEngine::new(self.store.clone(), prune_threshold)
    }

    /// Drop the cached retrieval index; the next search rebuilds it from
    /// the store.
    pub fn invalidate_index(&self) {
        self.retriever.invalidate();
    }

    /// Record that today saw gateway activity (called per dispatched tool
    /// call; drives active-day aging).
    pub fn record_active_day(&self) {
        if let Err(e) = self.store.record_active_day() {
            tracing::debug!(error = %e, "failed to record active day");
        }
    }

    // ── Store ────────────────────────────────────────────────────────

    pub async fn store(&self, req: StoreRequest) -> Result<StoreOutcome> {
        if req.content.len() > MAX_CONTENT_BYTES {
            return Err(Error::InvalidArguments(format!(
                "content exceeds {} bytes (got {})",
                MAX_CONTENT_BYTES,
                req.content.len()
            )));
        }
        if req.content.is_empty() {
            return Err(Error::InvalidArguments("content must not be empty".into()));
        }
        if !(0.0..=1.0).contains(&req.importance) {
            return Err(Error::InvalidArguments(format!(
                "importance must be within [0, 1], got {}",
                req.importance
            )));
        }

        let embedding = self.embedder.embed(&req.content).await;

        // Explicit supersession skips classification entirely.
        if let Some(old_id) = req.supersedes {
            let kind = req.supersession_kind.unwrap_or(SupersessionKind::Update);
            let id = self
                .store
                .insert_superseding(new_engram(&req, embedding), old_id, kind)?;
            self.retriever.invalidate();
            return Ok(StoreOutcome::Superseded { id, old_id, kind });
        }

        if self.temporal_chains {
            let neighbours = self.retriever.search(&embedding, 5, false)?;
            match self.chains.classify(&req.content, &neighbours).await {
                ChainDecision::Redundant { existing_id } => {
                    self.store.update_access(existing_id)?;
                    return Ok(StoreOutcome::Redundant { existing_id });
                }
                ChainDecision::Supersede { old_id, kind } => {
                    let id = self
                        .store
                        .insert_superseding(new_engram(&req, embedding), old_id, kind)?;
                    self.retriever.invalidate();
                    return Ok(StoreOutcome::Superseded { id, old_id, kind });
                }
                ChainDecision::New => {}
            }
        }

        let id = self.store.insert(new_engram(&req, embedding))?;
        self.retriever.invalidate();
        Ok(StoreOutcome::Stored { id })
    }

    // ── Search ───────────────────────────────────────────────────────

    pub async fn search(&self, req: SearchRequest) -> Result<Vec<SearchHit>> {
        if req.query.is_empty() {
            return Err(Error::InvalidArguments("query must not be empty".into()));
        }
        let limit = req.limit.clamp(1, 100);
        let query_vec = self.embedder.embed(&req.query).await;
        let mut candidates = self
            .retriever
            .search(&query_vec, limit, req.include_superseded)?;

        if let Some(category) = req.category {
            candidates.retain(|(e, _)| e.category == category);
        }

        let active = ActiveDayIndex::new(self.store.active_days()?);
        let ranked = ranker::rank(candidates, req.preset, &active, limit);

        let hits: Vec<SearchHit> = ranked
            .into_iter()
            .filter(|h| h.similarity >= req.min_similarity)
            .map(SearchHit::from)
            .collect();

        // Access bumps are applied asynchronously; this call's scoring
        // used the pre-update state.
        for hit in &hits {
            self.tracker.on_search_hit(hit.id);
        }
        Ok(hits)
    }

    // ── Point operations ─────────────────────────────────────────────

    pub fn get(&self, id: i64) -> Result<Engram> {
        let engram = self
            .store
            .get(id)?
            .ok_or_else(|| Error::NotFound(format!("memory {id}")))?;
        self.tracker.on_search_hit(id);
        Ok(engram)
    }

    pub fn delete(&self, id: i64) -> Result<()> {
        if !self.store.delete(id)? {
            return Err(Error::NotFound(format!("memory {id}")));
        }
        self.retriever.invalidate();
        Ok(())
    }

    pub fn set_importance(&self, id: i64, importance: f64) -> Result<()> {
        self.store.set_importance(id, importance)
    }

    pub fn set_protected(&self, id: i64, protected: bool) -> Result<()> {
        self.store.set_protected(id, protected)
    }

    pub fn supersede(&self, old_id: i64, new_id: i64, kind: SupersessionKind) -> Result<()> {
        self.store.supersede(old_id, new_id, kind)?;
        self.retriever.invalidate();
        Ok(())
    }

    pub fn stats(&self) -> Result<MemoryStats> {
        Ok(MemoryStats {
            total: self.store.count()?,
            by_category: self.store.count_by_category()?,
            working_items: self.working.len(),
            active_days: self.store.active_days()?.len(),
            embedding_dim: self.embedding_dim,
        })
    }

    pub fn count(&self) -> Result<usize> {
        self.store.count()
    }
}

fn new_engram(req: &StoreRequest, embedding: Vec<f32>) -> NewEngram {
    NewEngram {
        content: req.content.clone(),
        category: req.category,
        importance: req.importance,
        decay_rate: req.decay_rate,
        protected: req.protected,
        embedding,
        metadata: req.metadata.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn core() -> MemoryCore {
        let config = MemoryConfig {
            db_path: PathBuf::from(":memory:"),
            embedding_dim: 64,
            cap: 1000,
            ..Default::default()
        };
        MemoryCore::open(&config, None, true, true).unwrap()
    }

    #[tokio::test]
    async fn store_then_search_returns_it_first() {
        let core = core();
        let outcome = core
            .store(StoreRequest {
                content: "User prefers dark mode".into(),
                category: MemoryCategory::Observation,
                importance: 0.8,
                protected: false,
                decay_rate: 1.0,
                metadata: HashMap::new(),
                supersedes: None,
                supersession_kind: None,
            })
            .await
            .unwrap();
        let id = outcome.effective_id();

        let hits = core
            .search(SearchRequest {
                query: "User prefers dark mode".into(),
                limit: 5,
                preset: RankPreset::Semantic,
                include_superseded: false,
                min_similarity: 0.0,
                category: None,
            })
            .await
            .unwrap();
        assert_eq!(hits[0].id, id);
        assert!(hits[0].similarity > 0.99);
    }

    #[tokio::test]
    async fn oversized_content_is_rejected() {
        let core = core();
        let exact = "x".repeat(MAX_CONTENT_BYTES);
        let over = "x".repeat(MAX_CONTENT_BYTES + 1);

        assert!(core
            .store(StoreRequest {
                content: exact,
                category: MemoryCategory::Fact,
                importance: 0.5,
                protected: false,
                decay_rate: 1.0,
                metadata: HashMap::new(),
                supersedes: None,
                supersession_kind: None,
            })
            .await
            .is_ok());

        let err = core
            .store(StoreRequest {
                content: over,
                category: MemoryCategory::Fact,
                importance: 0.5,
                protected: false,
                decay_rate: 1.0,
                metadata: HashMap::new(),
                supersedes: None,
                supersession_kind: None,
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_arguments");
    }

    #[tokio::test]
    async fn duplicate_store_is_redundant() {
        let core = core();
        let first = core
            .store(StoreRequest {
                content: "exact duplicate".into(),
                category: MemoryCategory::Fact,
                importance: 0.5,
                protected: false,
                decay_rate: 1.0,
                metadata: HashMap::new(),
                supersedes: None,
                supersession_kind: None,
            })
            .await
            .unwrap();
        let second = core
            .store(StoreRequest {
                content: "exact duplicate".into(),
                category: MemoryCategory::Fact,
                importance: 0.5,
                protected: false,
                decay_rate: 1.0,
                metadata: HashMap::new(),
                supersedes: None,
                supersession_kind: None,
            })
            .await
            .unwrap();
        assert_eq!(
            second,
            StoreOutcome::Redundant {
                existing_id: first.effective_id()
            }
        );
        assert_eq!(core.count().unwrap(), 1);
    }

    #[tokio::test]
    async fn explicit_supersession_hides_old_from_search() {
        let core = core();
        let old = core
            .store(StoreRequest {
                content: "Project uses Postgres".into(),
                category: MemoryCategory::Fact,
                importance: 0.6,
                protected: false,
                decay_rate: 1.0,
                metadata: HashMap::new(),
                supersedes: None,
                supersession_kind: None,
            })
            .await
            .unwrap()
            .effective_id();

        let new = core
            .store(StoreRequest {
                content: "Project uses MySQL".into(),
                category: MemoryCategory::Fact,
                importance: 0.6,
                protected: false,
                decay_rate: 1.0,
                metadata: HashMap::new(),
                supersedes: Some(old),
                supersession_kind: Some(SupersessionKind::Correction),
            })
            .await
            .unwrap()
            .effective_id();

        let hits = core
            .search(SearchRequest {
                query: "project database".into(),
                limit: 10,
                preset: RankPreset::Semantic,
                include_superseded: false,
                min_similarity: 0.0,
                category: None,
            })
            .await
            .unwrap();
        let ids: Vec<i64> = hits.iter().map(|h| h.id).collect();
        assert!(ids.contains(&new));
        assert!(!ids.contains(&old));

        let with_history = core
            .search(SearchRequest {
                query: "project database".into(),
                limit: 10,
                preset: RankPreset::Semantic,
                include_superseded: true,
                min_similarity: 0.0,
                category: None,
            })
            .await
            .unwrap();
        let all_ids: Vec<i64> = with_history.iter().map(|h| h.id).collect();
        assert!(all_ids.contains(&old));
        assert!(all_ids.contains(&new));
    }

    #[tokio::test]
    async fn importance_out_of_range_rejected_on_store() {
        let core = core();
        let err = core
            .store(StoreRequest {
                content: "too important".into(),
                category: MemoryCategory::Fact,
                importance: 1.2,
                protected: false,
                decay_rate: 1.0,
                metadata: HashMap::new(),
                supersedes: None,
                supersession_kind: None,
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_arguments");
    }
}
