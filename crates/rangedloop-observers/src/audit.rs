//! Audit observer (spec.md §4.7): samples segments with probability derived
//! from reverse placement, queuing the sampled ones for verification.

use crate::collab::{CollabError, VerifyEntry, VerifyQueue};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rangedloop_core::{Observer, ObserverError, RangeContext, Segment};
use std::time::SystemTime;
use tracing::{debug, instrument};

/// `placement` is a small signed weight; segments with a higher (worse)
/// placement are sampled more aggressively since they are the ones most
/// worth re-verifying. `base_rate` is the floor sampling probability applied
/// to a segment with the best possible placement.
pub struct AuditObserver<Q> {
    queue: Q,
    base_rate: f64,
    rng_seed: u64,
}

impl<Q: VerifyQueue> AuditObserver<Q> {
    #[must_use]
    pub fn new(queue: Q, base_rate: f64, rng_seed: u64) -> Self {
        Self {
            queue,
            base_rate: base_rate.clamp(0.0, 1.0),
            rng_seed,
        }
    }

    /// Reverse placement: the worse (higher) `placement`, the closer the
    /// sampling probability climbs to 1.0.
    fn sample_probability(&self, placement: i16) -> f64 {
        let worseness = f64::from(placement.max(0)) / f64::from(i16::MAX);
        (self.base_rate + worseness * (1.0 - self.base_rate)).clamp(0.0, 1.0)
    }
}

pub struct AuditPartition {
    rng: StdRng,
    sampled: Vec<VerifyEntry>,
}

impl<Q: VerifyQueue + Send + Sync> Observer for AuditObserver<Q> {
    type Partition = AuditPartition;

    fn name(&self) -> &str {
        "audit"
    }

    async fn start(&self, _cycle_start: SystemTime) -> Result<(), ObserverError> {
        Ok(())
    }

    async fn fork(&self, ctx: &RangeContext) -> Result<Self::Partition, ObserverError> {
        Ok(AuditPartition {
            rng: StdRng::seed_from_u64(self.rng_seed.wrapping_add(ctx.range_index as u64)),
            sampled: Vec::new(),
        })
    }

    #[instrument(skip_all, fields(range = ctx.range_index, batch = batch.len()))]
    async fn process(
        &self,
        ctx: &RangeContext,
        partition: &mut Self::Partition,
        batch: &[Segment],
    ) -> Result<(), ObserverError> {
        for segment in batch {
            let p = self.sample_probability(segment.placement);
            if partition.rng.gen_bool(p) {
                partition.sampled.push(VerifyEntry {
                    stream_id: segment.stream_id,
                    position: segment.position,
                });
            }
        }
        Ok(())
    }

    async fn join(&self, partition: Self::Partition) -> Result<(), ObserverError> {
        if partition.sampled.is_empty() {
            return Ok(());
        }
        self.queue
            .enqueue(partition.sampled)
            .await
            .map_err(|e: CollabError| ObserverError::Join(e.to_string()))
    }

    async fn finish(&self) -> Result<(), ObserverError> {
        debug!("audit cycle complete");
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

    fn segment(placement: i16) -> Segment {
        Segment {
            stream_id: Uuid::new_v4(),
            position: 0,
            placement,
            created_at: SystemTime::now(),
            expires_at: None,
            encrypted_size: 1,
            plain_size: 1,
            redundancy: RedundancyScheme {
                required_shares: 1,
                repair_shares: 1,
                optimal_shares: 1,
                total_shares: 1,
                share_size: 1,
            },
            pieces: vec![Piece {
                node: NodeId::new([0; 32]),
                number: 0,
            }],
        }
    }

    #[tokio::test]
    async fn worse_placement_samples_more_often() {
        let collab = Arc::new(InMemoryCollaborators::new());
        let good = AuditObserver::new(collab.clone(), 0.0, 1);
        let bad = AuditObserver::new(collab.clone(), 0.0, 1);

        let ctx = RangeContext {
            range_index: 0,
            range: UuidRange::full(),
            progress: Arc::new(rangedloop_core::ProgressCounter::new(1000)),
        };
        let batch_good: Vec<Segment> = (0..200).map(|_| segment(0)).collect();
        let batch_bad: Vec<Segment> = (0..200).map(|_| segment(i16::MAX)).collect();

        let mut good_partition = good.fork(&ctx).await.unwrap();
        good.process(&ctx, &mut good_partition, &batch_good)
            .await
            .unwrap();

        let mut bad_partition = bad.fork(&ctx).await.unwrap();
        bad.process(&ctx, &mut bad_partition, &batch_bad)
            .await
            .unwrap();

        assert!(bad_partition.sampled.len() > good_partition.sampled.len());
    }

    #[tokio::test]
    async fn join_flushes_sampled_entries_to_the_queue() {
        let collab = Arc::new(InMemoryCollaborators::new());
        let observer = AuditObserver::new(collab.clone(), 1.0, 7);
        let ctx = RangeContext {
            range_index: 0,
            range: UuidRange::full(),
            progress: Arc::new(rangedloop_core::ProgressCounter::new(1000)),
        };
        let mut partition = observer.fork(&ctx).await.unwrap();
        let batch = vec![segment(10), segment(20)];
        observer.process(&ctx, &mut partition, &batch).await.unwrap();
        observer.join(partition).await.unwrap();

        assert_eq!(collab.verify_entries.lock().unwrap().len(), 2);
    }
}
