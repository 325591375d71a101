//! Sharded metric id -> metric store map

use super::metric_store::MetricStore;
use crate::{MemDbError, MetricId, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

type Shard = RwLock<HashMap<MetricId, Arc<MetricStore>>>;

/// Concurrent map of metric stores
///
/// Metric ids are spread over a power-of-two number of shards so writers
/// on different metrics rarely contend.
#[derive(Debug)]
pub struct MetricBucketStore {
    shards: Vec<Shard>,
    mask: usize,
}

impl MetricBucketStore {
    /// Create a map with `shards` shards, which must be a power of two
    pub fn new(shards: usize) -> Result<Self> {
        if shards == 0 || !shards.is_power_of_two() {
            return Err(MemDbError::Config(format!(
                "bucket shards must be a power of two, got {}",
                shards
            )));
        }
        Ok(Self {
            shards: (0..shards).map(|_| RwLock::new(HashMap::new())).collect(),
            mask: shards - 1,
        })
    }

    fn shard(&self, metric_id: MetricId) -> &Shard {
        // fibonacci hashing spreads sequential ids
        let hash = (metric_id as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15) >> 32;
        &self.shards[hash as usize & self.mask]
    }

    pub fn get(&self, metric_id: MetricId) -> Option<Arc<MetricStore>> {
        self.shard(metric_id).read().get(&metric_id).cloned()
    }

    /// Insert or replace
    pub fn put(&self, metric_id: MetricId, store: Arc<MetricStore>) {
        self.shard(metric_id).write().insert(metric_id, store);
    }

    /// Get the store, creating it with `create` if missing.
    /// The flag is true when this call created it.
    pub fn get_or_create<F>(&self, metric_id: MetricId, create: F) -> (Arc<MetricStore>, bool)
    where
        F: FnOnce() -> MetricStore,
    {
        if let Some(store) = self.get(metric_id) {
            return (store, false);
        }
        let mut shard = self.shard(metric_id).write();
        if let Some(store) = shard.get(&metric_id) {
            return (Arc::clone(store), false);
        }
        let store = Arc::new(create());
        shard.insert(metric_id, Arc::clone(&store));
        (store, true)
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.read().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|s| s.read().is_empty())
    }

    /// Visit every metric ascending by id, stopping at the first error
    pub fn walk_entry<F>(&self, mut visit: F) -> Result<()>
    where
        F: FnMut(MetricId, &Arc<MetricStore>) -> Result<()>,
    {
        let mut entries: Vec<(MetricId, Arc<MetricStore>)> = self
            .shards
            .iter()
            .flat_map(|shard| {
                shard
                    .read()
                    .iter()
                    .map(|(id, store)| (*id, Arc::clone(store)))
                    .collect::<Vec<_>>()
            })
            .collect();
        entries.sort_unstable_by_key(|(id, _)| *id);

        for (metric_id, store) in &entries {
            visit(*metric_id, store)?;
        }
        Ok(())
    }
}
