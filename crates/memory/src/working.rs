//! Working-memory buffer: a process-shared TTL table of short-lived items,
//! candidates for consolidation into the long-term store.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use mimo_domain::engram::{MemoryCategory, WorkingItem};

/// In-process working-memory table keyed by id. Last-writer-wins on the
/// same id. Capacity is bounded only by TTL and insertion rate.
pub struct WorkingMemory {
    items: RwLock<HashMap<String, WorkingItem>>,
    ttl: Duration,
}

impl WorkingMemory {
    pub fn new(ttl: Duration) -> Self {
        Self {
            items: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Store an item, generating an id when the caller supplies none.
    pub fn put(
        &self,
        id: Option<String>,
        content: String,
        category: MemoryCategory,
        importance: f64,
    ) -> WorkingItem {
        let item = WorkingItem {
            id: id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            content,
            category,
            importance,
            inserted_at: Utc::now(),
        };
        self.items.write().insert(item.id.clone(), item.clone());
        item
    }

    /// Fetch an item if it has not expired.
    pub fn get(&self, id: &str) -> Option<WorkingItem> {
        let items = self.items.read();
        let item = items.get(id)?;
        if self.is_expired(item, Utc::now()) {
            return None;
        }
        Some(item.clone())
    }

    pub fn remove(&self, id: &str) -> bool {
        self.items.write().remove(id).is_some()
    }

    /// All unexpired items, newest first.
    pub fn list(&self) -> Vec<WorkingItem> {
        let now = Utc::now();
        let mut items: Vec<WorkingItem> = self
            .items
            .read()
            .values()
            .filter(|i| !self.is_expired(i, now))
            .cloned()
            .collect();
        items.sort_by(|a, b| b.inserted_at.cmp(&a.inserted_at));
        items
    }

    /// Unexpired items at or above the importance threshold, for the
    /// consolidator. The returned items are removed from the buffer by
    /// [`WorkingMemory::remove`] once their batch commits.
    pub fn consolidation_candidates(&self, threshold: f64) -> Vec<WorkingItem> {
        self.list()
            .into_iter()
            .filter(|i| i.importance >= threshold)
            .collect()
    }

    /// Drop expired items. Returns how many were removed.
    pub fn cleanup(&self) -> usize {
        let now = Utc::now();
        let mut items = self.items.write();
        let before = items.len();
        items.retain(|_, item| !self.is_expired(item, now));
        let removed = before - items.len();
        if removed > 0 {
            tracing::debug!(removed, "working memory cleanup");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }

    fn is_expired(&self, item: &WorkingItem, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(item.inserted_at);
        age.num_milliseconds() as u128 > self.ttl.as_millis()
    }
}
