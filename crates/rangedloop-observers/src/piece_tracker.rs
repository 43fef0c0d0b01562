//! PieceTracker observer (spec.md §4.7): builds per-node piece tallies and
//! persists them at the end of the cycle.

use crate::collab::{CollabError, PieceStore};
use rangedloop_core::{NodeId, Observer, ObserverError, RangeContext, Segment};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::SystemTime;

pub struct PieceTrackerObserver<S> {
    store: S,
    tallies: Mutex<HashMap<NodeId, u64>>,
}

impl<S: PieceStore> PieceTrackerObserver<S> {
    #[must_use]
    pub fn new(store: S) -> Self {
        Self {
            store,
            tallies: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn tallies(&self) -> HashMap<NodeId, u64> {
        self.tallies.lock().unwrap().clone()
    }
}

#[derive(Default)]
pub struct PieceTrackerPartition {
    local: HashMap<NodeId, u64>,
}

impl<S: PieceStore + Send + Sync> Observer for PieceTrackerObserver<S> {
    type Partition = PieceTrackerPartition;

    fn name(&self) -> &str {
        "piece_tracker"
    }

    async fn start(&self, _cycle_start: SystemTime) -> Result<(), ObserverError> {
        self.tallies.lock().unwrap().clear();
        Ok(())
    }

    async fn fork(&self, _ctx: &RangeContext) -> Result<Self::Partition, ObserverError> {
        Ok(PieceTrackerPartition::default())
    }

    async fn process(
        &self,
        _ctx: &RangeContext,
        partition: &mut Self::Partition,
        batch: &[Segment],
    ) -> Result<(), ObserverError> {
        for segment in batch {
            for piece in &segment.pieces {
                *partition.local.entry(piece.node).or_insert(0) += 1;
            }
        }
        Ok(())
    }

    async fn join(&self, partition: Self::Partition) -> Result<(), ObserverError> {
        let mut tallies = self.tallies.lock().unwrap();
        for (node, count) in partition.local {
            *tallies.entry(node).or_insert(0) += count;
        }
        Ok(())
    }

    async fn finish(&self) -> Result<(), ObserverError> {
        let tallies = self.tallies.lock().unwrap().clone();
        if tallies.is_empty() {
            return Ok(());
        }
        self.store
            .persist(tallies)
            .await
            .map_err(|e: CollabError| ObserverError::Finish(e.to_string()))
    }
}
