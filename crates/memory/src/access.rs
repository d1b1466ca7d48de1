//! Asynchronous access tracking.
//!
//! Search hits enqueue ids on a bounded channel; a single drain task
//! applies them in batched transactions so hot queries do not amplify
//! into per-hit writes. Retrieval scoring within the same call always
//! sees the pre-update state.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::store::LongTermStore;

const QUEUE_CAPACITY: usize = 1024;
const FLUSH_BATCH: usize = 64;
const FLUSH_INTERVAL: Duration = Duration::from_secs(1);

/// Cheap cloneable handle for enqueueing access bumps.
#[derive(Clone)]
pub struct AccessTracker {
    tx: mpsc::Sender<i64>,
}

impl AccessTracker {
    /// Spawn the drain task and return the enqueue handle.
    pub fn spawn(store: Arc<LongTermStore>) -> Self {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        tokio::spawn(drain_loop(store, rx));
        Self { tx }
    }

    /// Record a search hit. Non-blocking; drops the update when the queue
    /// is saturated (the next hit on the same id will catch up).
    pub fn on_search_hit(&self, id: i64) {
        if let Err(e) = self.tx.try_send(id) {
            tracing::debug!(error = %e, "access queue full, dropping update");
        }
    }
}

async fn drain_loop(store: Arc<LongTermStore>, mut rx: mpsc::Receiver<i64>) {
    let mut pending: Vec<i64> = Vec::with_capacity(FLUSH_BATCH);
    let mut ticker = tokio::time::interval(FLUSH_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            received = rx.recv() => {
                match received {
                    Some(id) => {
                        pending.push(id);
                        if pending.len() >= FLUSH_BATCH {
                            flush(&store, &mut pending);
                        }
                    }
                    None => {
                        flush(&store, &mut pending);
                        return;
                    }
                }
            }
            _ = ticker.tick() => {
                flush(&store, &mut pending);
            }
        }
    }
}

fn flush(store: &LongTermStore, pending: &mut Vec<i64>) {
    if pending.is_empty() {
        return;
    }
    if let Err(e) = store.apply_access_batch(pending) {
        tracing::warn!(error = %e, count = pending.len(), "access batch failed");
    }
    pending.clear();
}
