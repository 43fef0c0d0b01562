//! RepairChecker observer (spec.md §4.7): classifies segment health against
//! the reliability cache and queues unhealthy segments for repair.

use crate::collab::{CollabError, RepairEntry, RepairQueue, ReliabilityCache};
use rangedloop_core::{Observer, ObserverError, RangeContext, Segment};
use std::sync::Mutex;
use std::time::SystemTime;
use tracing::info;

/// Health buckets counted for the finish-time histogram: healthy, needs
/// repair, and unrecoverable.
#[derive(Debug, Default, Clone, Copy)]
pub struct HealthHistogram {
    pub healthy: u64,
    pub needs_repair: u64,
    pub unrecoverable: u64,
}

pub struct RepairCheckerObserver<C, Q> {
    cache: C,
    queue: Q,
    histogram: Mutex<HealthHistogram>,
}

impl<C: ReliabilityCache, Q: RepairQueue> RepairCheckerObserver<C, Q> {
    #[must_use]
    pub fn new(cache: C, queue: Q) -> Self {
        Self {
            cache,
            queue,
            histogram: Mutex::new(HealthHistogram::default()),
        }
    }

    #[must_use]
    pub fn histogram(&self) -> HealthHistogram {
        *self.histogram.lock().unwrap()
    }
}

#[derive(Default)]
pub struct RepairPartition {
    unhealthy: Vec<RepairEntry>,
}

impl<C: ReliabilityCache + Send + Sync, Q: RepairQueue + Send + Sync> Observer
    for RepairCheckerObserver<C, Q>
{
    type Partition = RepairPartition;

    fn name(&self) -> &str {
        "repair_checker"
    }

    async fn start(&self, _cycle_start: SystemTime) -> Result<(), ObserverError> {
        *self.histogram.lock().unwrap() = HealthHistogram::default();
        Ok(())
    }

    async fn fork(&self, _ctx: &RangeContext) -> Result<Self::Partition, ObserverError> {
        Ok(RepairPartition::default())
    }

    async fn process(
        &self,
        _ctx: &RangeContext,
        partition: &mut Self::Partition,
        batch: &[Segment],
    ) -> Result<(), ObserverError> {
        let online = |node| self.cache.is_online(node);
        let mut histogram = self.histogram.lock().unwrap();
        for segment in batch {
            let retrievable = segment.retrievable_pieces(&online);
            if segment.redundancy.is_unrecoverable(retrievable) {
                histogram.unrecoverable += 1;
                partition.unhealthy.push(RepairEntry {
                    stream_id: segment.stream_id,
                    position: segment.position,
                    retrievable_pieces: retrievable,
                    required_shares: segment.redundancy.required_shares,
                });
            } else if segment.redundancy.needs_repair(retrievable) {
                histogram.needs_repair += 1;
                partition.unhealthy.push(RepairEntry {
                    stream_id: segment.stream_id,
                    position: segment.position,
                    retrievable_pieces: retrievable,
                    required_shares: segment.redundancy.required_shares,
                });
            } else {
                histogram.healthy += 1;
            }
        }
        Ok(())
    }

    async fn join(&self, partition: Self::Partition) -> Result<(), ObserverError> {
        if partition.unhealthy.is_empty() {
            return Ok(());
        }
        self.queue
            .enqueue(partition.unhealthy)
            .await
            .map_err(|e: CollabError| ObserverError::Join(e.to_string()))
    }

    async fn finish(&self) -> Result<(), ObserverError> {
        let histogram = self.histogram();
        info!(
            healthy = histogram.healthy,
            needs_repair = histogram.needs_repair,
            unrecoverable = histogram.unrecoverable,
            "repair_checker health histogram"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::InMemoryCollaborators;
    use rangedloop_core::{NodeId, Piece, RedundancyScheme, UuidRange};
    use std::sync::Arc;
    use uuid::Uuid;

    fn segment(pieces: Vec<Piece>) -> Segment {
        Segment {
            stream_id: Uuid::new_v4(),
            position: 0,
            placement: 0,
            created_at: SystemTime::now(),
            expires_at: None,
            encrypted_size: 1,
            plain_size: 1,
            redundancy: RedundancyScheme {
                required_shares: 2,
                repair_shares: 3,
                optimal_shares: 4,
                total_shares: 4,
                share_size: 1,
            },
            pieces,
        }
    }

    #[tokio::test]
    async fn unhealthy_segments_go_to_the_repair_queue() {
        let offline_node = NodeId::new([9; 32]);
        let collab = Arc::new(InMemoryCollaborators::new());
        let observer = RepairCheckerObserver::new(collab.clone(), collab.clone());
        let ctx = RangeContext {
            range_index: 0,
            range: UuidRange::full(),
            progress: Arc::new(rangedloop_core::ProgressCounter::new(1000)),
        };
        observer.start(SystemTime::now()).await.unwrap();
        let mut partition = observer.fork(&ctx).await.unwrap();

        let unhealthy = segment(vec![
            Piece { node: offline_node, number: 0 },
            Piece { node: offline_node, number: 1 },
        ]);
        observer
            .process(&ctx, &mut partition, &[unhealthy])
            .await
            .unwrap();
        observer.join(partition).await.unwrap();

        assert_eq!(collab.repair_entries.lock().unwrap().len(), 1);
        assert_eq!(observer.histogram().unrecoverable, 1);
    }

    #[tokio::test]
    async fn healthy_segments_are_not_queued() {
        let online_node = NodeId::new([1; 32]);
        let collab = Arc::new(InMemoryCollaborators::new().with_online_nodes([online_node]));
        let observer = RepairCheckerObserver::new(collab.clone(), collab.clone());
        let ctx = RangeContext {
            range_index: 0,
            range: UuidRange::full(),
            progress: Arc::new(rangedloop_core::ProgressCounter::new(1000)),
        };
        observer.start(SystemTime::now()).await.unwrap();
        let mut partition = observer.fork(&ctx).await.unwrap();

        let healthy = segment(vec![
            Piece { node: online_node, number: 0 },
            Piece { node: online_node, number: 1 },
            Piece { node: online_node, number: 2 },
            Piece { node: online_node, number: 3 },
        ]);
        observer
            .process(&ctx, &mut partition, &[healthy])
            .await
            .unwrap();
        observer.join(partition).await.unwrap();

        assert!(collab.repair_entries.lock().unwrap().is_empty());
        assert_eq!(observer.histogram().healthy, 1);
    }
}
