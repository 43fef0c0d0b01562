//! GC-BF observer (spec.md §4.7): inserts `(node, piece)` pairs into
//! per-node bloom filters and uploads the finished filter packs.

use crate::bloom::SimpleBloom;
use crate::collab::{BloomFilterStore, CollabError};
use rangedloop_core::{NodeId, Observer, ObserverError, RangeContext, Segment};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::SystemTime;

pub struct GcBloomFilterObserver<S> {
    store: S,
    filters: Mutex<HashMap<NodeId, SimpleBloom>>,
}

impl<S: BloomFilterStore> GcBloomFilterObserver<S> {
    #[must_use]
    pub fn new(store: S) -> Self {
        Self {
            store,
            filters: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.filters.lock().unwrap().len()
    }
}

#[derive(Default)]
pub struct GcBloomPartition {
    local: HashMap<NodeId, SimpleBloom>,
}

impl<S: BloomFilterStore + Send + Sync> Observer for GcBloomFilterObserver<S> {
    type Partition = GcBloomPartition;

    fn name(&self) -> &str {
        "gc_bloom_filter"
    }

    async fn start(&self, _cycle_start: SystemTime) -> Result<(), ObserverError> {
        self.filters.lock().unwrap().clear();
        Ok(())
    }

    async fn fork(&self, _ctx: &RangeContext) -> Result<Self::Partition, ObserverError> {
        Ok(GcBloomPartition::default())
    }

    async fn process(
        &self,
        _ctx: &RangeContext,
        partition: &mut Self::Partition,
        batch: &[Segment],
    ) -> Result<(), ObserverError> {
        for segment in batch {
            for piece in &segment.pieces {
                let key = (segment.stream_id, segment.position, piece.number);
                partition
                    .local
                    .entry(piece.node)
                    .or_default()
                    .insert(&format!("{key:?}"));
            }
        }
        Ok(())
    }

    async fn join(&self, partition: Self::Partition) -> Result<(), ObserverError> {
        let mut filters = self.filters.lock().unwrap();
        for (node, filter) in partition.local {
            filters.entry(node).or_default().merge(&filter);
        }
        Ok(())
    }

    async fn finish(&self) -> Result<(), ObserverError> {
        let filters: Vec<(NodeId, Vec<u8>)> = self
            .filters
            .lock()
            .unwrap()
            .iter()
            .map(|(&node, filter)| (node, filter.to_bytes()))
            .collect();
        for (node, bytes) in filters {
            self.store
                .upload(node, bytes)
                .await
                .map_err(|e: CollabError| ObserverError::Finish(e.to_string()))?;
        }
        Ok(())
    }
}
