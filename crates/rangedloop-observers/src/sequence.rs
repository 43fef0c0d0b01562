//! The `SequenceObserver` composite (spec.md §4.6): fans one segment stream
//! out to an ordered list of inner observers, each addressed through the
//! object-safe [`DynObserver`] twin so the list can be heterogeneous.

use rangedloop_core::{DynObserver, ObserverError, RangeContext, Segment};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::any::Any;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

/// Scratch state for one range: one boxed partition per inner observer,
/// `None` where that inner's `fork` failed. `process`/`join` skip `None`
/// slots rather than failing the whole composite (spec.md §4.6).
pub struct SequencePartition {
    slots: Vec<Option<Box<dyn Any + Send>>>,
}

pub struct SequenceObserver {
    order: Mutex<Vec<Arc<dyn DynObserver>>>,
}

impl SequenceObserver {
    #[must_use]
    pub fn new(observers: Vec<Arc<dyn DynObserver>>) -> Self {
        Self {
            order: Mutex::new(observers),
        }
    }

    /// Reorders the inner observer list using a cycle-id-seeded RNG so
    /// permutation is reproducible across runs of the same cycle id
    /// (spec.md §9 Open Question (b)). Called by the Service between
    /// cycles, never concurrently with a cycle in flight.
    pub fn permute(&self, cycle_id: u64) {
        let mut rng = StdRng::seed_from_u64(cycle_id);
        self.order.lock().unwrap().shuffle(&mut rng);
    }

    #[must_use]
    pub fn inner_names(&self) -> Vec<String> {
        self.order
            .lock()
            .unwrap()
            .iter()
            .map(|o| o.name().to_string())
            .collect()
    }

    fn snapshot(&self) -> Vec<Arc<dyn DynObserver>> {
        self.order.lock().unwrap().clone()
    }
}

impl rangedloop_core::Observer for SequenceObserver {
    type Partition = SequencePartition;

    fn name(&self) -> &str {
        "sequence"
    }

    async fn start(&self, cycle_start: SystemTime) -> Result<(), ObserverError> {
        for inner in self.snapshot() {
            inner.start_dyn(cycle_start).await?;
        }
        Ok(())
    }

    async fn fork(&self, ctx: &RangeContext) -> Result<Self::Partition, ObserverError> {
        let mut slots = Vec::new();
        for inner in self.snapshot() {
            match inner.fork_dyn(ctx).await {
                Ok(partition) => slots.push(Some(partition)),
                Err(_) => slots.push(None),
            }
        }
        Ok(SequencePartition { slots })
    }

    async fn process(
        &self,
        ctx: &RangeContext,
        partition: &mut Self::Partition,
        batch: &[Segment],
    ) -> Result<(), ObserverError> {
        let inners = self.snapshot();
        for (inner, slot) in inners.iter().zip(partition.slots.iter_mut()) {
            if let Some(boxed) = slot {
                if inner.process_dyn(ctx, boxed, batch).await.is_err() {
                    *slot = None;
                }
            }
        }
        Ok(())
    }

    async fn join(&self, partition: Self::Partition) -> Result<(), ObserverError> {
        let inners = self.snapshot();
        for (inner, slot) in inners.iter().zip(partition.slots.into_iter()) {
            if let Some(boxed) = slot {
                let _ = inner.join_dyn(boxed).await;
            }
        }
        Ok(())
    }

    async fn finish(&self) -> Result<(), ObserverError> {
        for inner in self.snapshot() {
            let _ = inner.finish_dyn().await;
        }
        Ok(())
    }

    fn permute_for_cycle(&self, cycle_id: u64) {
        self.permute(cycle_id);
    }
}
