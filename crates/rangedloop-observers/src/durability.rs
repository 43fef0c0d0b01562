//! Durability observer (spec.md §4.7): for one node classifier, counts
//! segments whose durability drops below threshold when that class goes
//! unavailable. The catalogue runs one instance per classifier wrapped in a
//! [`crate::sequence::SequenceObserver`], so each instance here is
//! intentionally single-purpose and cheap to construct.

use rangedloop_core::{NodeId, Observer, ObserverError, RangeContext, Segment};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;
use tracing::info;

/// Groups nodes into a class (e.g. a datacenter, an ASN, an operator). A
/// segment is "at risk" under this classifier if losing every piece on
/// nodes sharing any one class would drop it below its repair threshold.
pub trait NodeClassifier: Send + Sync {
    fn class_name(&self) -> &str;
    fn class_of(&self, node: NodeId) -> u32;
}

pub struct DurabilityObserver<C> {
    classifier: C,
    at_risk: AtomicU64,
    scanned: AtomicU64,
}

impl<C: NodeClassifier> DurabilityObserver<C> {
    #[must_use]
    pub fn new(classifier: C) -> Self {
        Self {
            classifier,
            at_risk: AtomicU64::new(0),
            scanned: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn at_risk_count(&self) -> u64 {
        self.at_risk.load(Ordering::Relaxed)
    }

    fn worst_class_loss(&self, segment: &Segment) -> u16 {
        let mut by_class: std::collections::HashMap<u32, u16> = std::collections::HashMap::new();
        for piece in &segment.pieces {
            *by_class.entry(self.classifier.class_of(piece.node)).or_insert(0) += 1;
        }
        by_class.values().copied().max().unwrap_or(0)
    }
}

impl<C: NodeClassifier> Observer for DurabilityObserver<C> {
    type Partition = ();

    fn name(&self) -> &str {
        self.classifier.class_name()
    }

    async fn start(&self, _cycle_start: SystemTime) -> Result<(), ObserverError> {
        self.at_risk.store(0, Ordering::Relaxed);
        self.scanned.store(0, Ordering::Relaxed);
        Ok(())
    }

    async fn fork(&self, _ctx: &RangeContext) -> Result<Self::Partition, ObserverError> {
        Ok(())
    }

    async fn process(
        &self,
        _ctx: &RangeContext,
        _partition: &mut Self::Partition,
        batch: &[Segment],
    ) -> Result<(), ObserverError> {
        for segment in batch {
            self.scanned.fetch_add(1, Ordering::Relaxed);
            let worst_loss = self.worst_class_loss(segment);
            let remaining = segment.pieces.len() as u16 - worst_loss;
            if segment.redundancy.needs_repair(remaining) {
                self.at_risk.fetch_add(1, Ordering::Relaxed);
            }
        }
        Ok(())
    }

    async fn join(&self, _partition: Self::Partition) -> Result<(), ObserverError> {
        Ok(())
    }

    async fn finish(&self) -> Result<(), ObserverError> {
        info!(
            classifier = self.classifier.class_name(),
            scanned = self.scanned.load(Ordering::Relaxed),
            at_risk = self.at_risk_count(),
            "durability classifier report"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rangedloop_core::{Piece, RedundancyScheme, UuidRange};
    use uuid::Uuid;

    struct ByFirstByte;
    impl NodeClassifier for ByFirstByte {
        fn class_name(&self) -> &str {
            "by_first_byte"
        }
        fn class_of(&self, node: NodeId) -> u32 {
            u32::from(node.0[0])
        }
    }

    fn segment(nodes: &[NodeId], repair_shares: u16) -> Segment {
        Segment {
            stream_id: Uuid::new_v4(),
            position: 0,
            placement: 0,
            created_at: SystemTime::now(),
            expires_at: None,
            encrypted_size: 1,
            plain_size: 1,
            redundancy: RedundancyScheme {
                required_shares: 1,
                repair_shares,
                optimal_shares: nodes.len() as u16,
                total_shares: nodes.len() as u16,
                share_size: 1,
            },
            pieces: nodes
                .iter()
                .enumerate()
                .map(|(i, &node)| Piece { node, number: i as u16 })
                .collect(),
        }
    }

    #[tokio::test]
    async fn losing_the_biggest_class_can_push_a_segment_into_repair() {
        // All four pieces share class 7 (same first byte): losing the class
        // loses the whole segment, well below a repair_shares of 2.
        let nodes = [
            NodeId::new([7; 32]),
            NodeId::new([7; 32]),
            NodeId::new([7; 32]),
            NodeId::new([7; 32]),
        ];
        let observer = DurabilityObserver::new(ByFirstByte);
        let ctx = RangeContext {
            range_index: 0,
            range: UuidRange::full(),
            progress: std::sync::Arc::new(rangedloop_core::ProgressCounter::new(1000)),
        };
        observer.start(SystemTime::now()).await.unwrap();
        let mut partition = observer.fork(&ctx).await.unwrap();
        observer
            .process(&ctx, &mut partition, &[segment(&nodes, 2)])
            .await
            .unwrap();

        assert_eq!(observer.at_risk_count(), 1);
    }

    #[tokio::test]
    async fn spread_across_classes_survives_losing_one() {
        let nodes = [
            NodeId::new([1; 32]),
            NodeId::new([2; 32]),
            NodeId::new([3; 32]),
            NodeId::new([4; 32]),
        ];
        let observer = DurabilityObserver::new(ByFirstByte);
        let ctx = RangeContext {
            range_index: 0,
            range: UuidRange::full(),
            progress: std::sync::Arc::new(rangedloop_core::ProgressCounter::new(1000)),
        };
        observer.start(SystemTime::now()).await.unwrap();
        let mut partition = observer.fork(&ctx).await.unwrap();
        observer
            .process(&ctx, &mut partition, &[segment(&nodes, 2)])
            .await
            .unwrap();

        assert_eq!(observer.at_risk_count(), 0);
    }
}
