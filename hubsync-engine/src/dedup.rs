//! Content-hash deduplication state.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use hubsync_types::Outcome;

/// Storage for per-record outcomes, keyed by content hash.
///
/// The engine consults the store before any remote call and writes exactly
/// one outcome per processed record, success or failure.
#[async_trait]
pub trait DedupStateStore: Send + Sync {
    async fn get(&self, hash: &str) -> Option<Outcome>;
    async fn put(&self, outcome: Outcome);
}

/// In-memory store. Deduplicates within a process lifetime only.
#[derive(Default)]
pub struct MemoryDedupStore {
    outcomes: RwLock<HashMap<String, Outcome>>,
}

impl MemoryDedupStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl DedupStateStore for MemoryDedupStore {
    async fn get(&self, hash: &str) -> Option<Outcome> {
        self.outcomes.read().await.get(hash).cloned()
    }

    async fn put(&self, outcome: Outcome) {
        self.outcomes
            .write()
            .await
            .insert(outcome.hash.clone(), outcome);
    }
}
