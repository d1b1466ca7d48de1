//! Corpus-size-aware retrieval.
//!
//! - Small corpus (< 500): exact scan over full float vectors.
//! - Medium (500–999): Hamming prefilter on binary embeddings, float rescore.
//! - Large (≥ 1000): the cached binary index serves as the approximate
//!   structure; an index failure falls back to the exact scan (local
//!   recovery, never surfaced).
//!
//! Every stage yields the same contract: `(engram, similarity)` pairs,
//! best-first, capped at ten times the requested k.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use mimo_domain::engram::Engram;
use mimo_domain::error::Result;

use crate::embedding::{binarize, cosine_similarity, hamming_distance};
use crate::store::{BinaryRow, LongTermStore};

const EXACT_SCAN_MAX: usize = 500;
const APPROXIMATE_MIN: usize = 1000;
const SCAN_BATCH: usize = 512;

pub struct Retriever {
    store: Arc<LongTermStore>,
    approximate_enabled: bool,
    /// Cached binary rows; `None` means stale and rebuilt on next use.
    index: RwLock<Option<Vec<BinaryRow>>>,
    /// Bumped on every invalidation so a rebuild raced by a write is not
    /// installed as current.
    generation: AtomicU64,
}

impl Retriever {
    pub fn new(store: Arc<LongTermStore>, approximate_enabled: bool) -> Self {
        Self {
            store,
            approximate_enabled,
            index: RwLock::new(None),
            generation: AtomicU64::new(0),
        }
    }

    /// Drop the cached binary index; the next search rebuilds it.
    pub fn invalidate(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        *self.index.write() = None;
    }

    /// Retrieve candidates for `query` best-first. `include_superseded`
    /// always uses the exact scan so history queries see every row.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        include_superseded: bool,
    ) -> Result<Vec<(Engram, f64)>> {
        let n = self.store.count()?;
        let want = (k.max(1)) * 10;

        if include_superseded || n < EXACT_SCAN_MAX {
            return self.exact_scan(query, want, include_superseded);
        }

        if n >= APPROXIMATE_MIN && !self.approximate_enabled {
            return self.exact_scan(query, want, false);
        }

        match self.prefiltered(query, want) {
            Ok(hits) => Ok(hits),
            Err(e) => {
                tracing::warn!(error = %e, "binary prefilter failed, falling back to exact scan");
                self.exact_scan(query, want, false)
            }
        }
    }

    // ── Exact scan ───────────────────────────────────────────────────

    fn exact_scan(
        &self,
        query: &[f32],
        want: usize,
        include_superseded: bool,
    ) -> Result<Vec<(Engram, f64)>> {
        let mut hits: Vec<(Engram, f64)> = Vec::new();
        let mut after_id = 0i64;
        loop {
            let batch = self.store.scan(after_id, SCAN_BATCH, include_superseded)?;
            if batch.is_empty() {
                break;
            }
            after_id = batch.last().map(|e| e.id).unwrap_or(after_id);
            for engram in batch {
                let sim = cosine_similarity(query, &engram.embedding);
                hits.push((engram, sim));
            }
        }
        sort_and_cap(&mut hits, want);
        Ok(hits)
    }

    // ── Binary prefilter + rescore ───────────────────────────────────

    fn prefiltered(&self, query: &[f32], want: usize) -> Result<Vec<(Engram, f64)>> {
        let query_bin = binarize(query);

        {
            let index = self.index.read();
            if let Some(rows) = index.as_ref() {
                return self.rescore(query, &query_bin, rows, want);
            }
        }

        let generation = self.generation.load(Ordering::SeqCst);
        let rows = self.store.binary_rows()?;
        let result = self.rescore(query, &query_bin, &rows, want);
        // Install only if no write invalidated the cache while we built it.
        if self.generation.load(Ordering::SeqCst) == generation {
            *self.index.write() = Some(rows);
        }
        result
    }

    fn rescore(
        &self,
        query: &[f32],
        query_bin: &[u8],
        rows: &[BinaryRow],
        want: usize,
    ) -> Result<Vec<(Engram, f64)>> {
        let mut by_hamming: Vec<(i64, u32)> = rows
            .iter()
            .map(|row| (row.id, hamming_distance(query_bin, &row.binary)))
            .collect();
        by_hamming.sort_by_key(|(_, dist)| *dist);
        by_hamming.truncate(want);

        let ids: Vec<i64> = by_hamming.iter().map(|(id, _)| *id).collect();
        let engrams = self.store.get_many(&ids)?;
        let mut hits: Vec<(Engram, f64)> = engrams
            .into_iter()
            .filter(|e| e.superseded_by.is_none())
            .map(|engram| {
                let sim = cosine_similarity(query, &engram.embedding);
                (engram, sim)
            })
            .collect();
        sort_and_cap(&mut hits, want);
        Ok(hits)
    }
}

fn sort_and_cap(hits: &mut Vec<(Engram, f64)>, want: usize) {
    hits.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.0.id.cmp(&a.0.id))
    });
    hits.truncate(want);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::hash_embedding;
    use crate::store::NewEngram;
    use mimo_domain::engram::MemoryCategory;
    use std::collections::HashMap;
    use std::path::Path;

    fn seeded_store(contents: &[&str]) -> Arc<LongTermStore> {
        let store = Arc::new(LongTermStore::open(Path::new(":memory:"), 100_000).unwrap());
        for content in contents {
            store
                .insert(NewEngram {
                    content: content.to_string(),
                    category: MemoryCategory::Fact,
                    importance: 0.5,
                    decay_rate: 1.0,
                    protected: false,
                    embedding: hash_embedding(content, 64),
                    metadata: HashMap::new(),
                })
                .unwrap();
        }
        store
    }

    #[test]
    fn exact_scan_finds_identical_content_first() {
        let store = seeded_store(&["alpha", "beta", "gamma"]);
        let retriever = Retriever::new(store, true);
        let hits = retriever
            .search(&hash_embedding("beta", 64), 1, false)
            .unwrap();
        assert_eq!(hits[0].0.content, "beta");
        assert!((hits[0].1 - 1.0).abs() < 1e-6);
    }

    #[test]
    fn prefilter_matches_exact_scan_top_hit() {
        let contents: Vec<String> = (0..40).map(|i| format!("document number {i}")).collect();
        let refs: Vec<&str> = contents.iter().map(|s| s.as_str()).collect();
        let store = seeded_store(&refs);
        let retriever = Retriever::new(store, true);

        let query = hash_embedding("document number 17", 64);
        let exact = retriever.exact_scan(&query, 10, false).unwrap();
        let pre = retriever.prefiltered(&query, 10).unwrap();
        assert_eq!(exact[0].0.id, pre[0].0.id);
    }

    #[test]
    fn invalidate_forces_rebuild() {
        let store = seeded_store(&["one"]);
        let retriever = Retriever::new(store.clone(), true);
        let query = hash_embedding("one", 64);
        retriever.prefiltered(&query, 10).unwrap();
        assert!(retriever.index.read().is_some());

        retriever.invalidate();
        assert!(retriever.index.read().is_none());
    }
}
