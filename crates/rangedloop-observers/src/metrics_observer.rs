//! Metrics observer (spec.md §4.7): counts segments, remote vs inline,
//! unhealthy counts, and placement distribution, logging gauges at finish.

use crate::collab::ReliabilityCache;
use rangedloop_core::{Observer, ObserverError, RangeContext, Segment};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::SystemTime;
use tracing::info;

#[derive(Debug, Default)]
struct Counters {
    segments: AtomicU64,
    remote: AtomicU64,
    inline: AtomicU64,
    unhealthy: AtomicU64,
    placement_sum: AtomicI64,
}

pub struct MetricsObserver<C> {
    cache: C,
    counters: Counters,
    placement_histogram: Mutex<HashMap<i16, u64>>,
}

/// A point-in-time read of [`MetricsObserver`]'s gauges, returned alongside
/// a cycle's `CycleReport` (spec.md §6) for callers that want the numbers
/// without re-deriving them from `ObserverReport`.
#[derive(Debug, Clone, Default)]
pub struct CycleMetricsSnapshot {
    pub segments: u64,
    pub remote: u64,
    pub inline: u64,
    pub unhealthy: u64,
    pub placement_histogram: HashMap<i16, u64>,
}

impl<C: ReliabilityCache> MetricsObserver<C> {
    #[must_use]
    pub fn new(cache: C) -> Self {
        Self {
            cache,
            counters: Counters::default(),
            placement_histogram: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn segment_count(&self) -> u64 {
        self.counters.segments.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn remote_count(&self) -> u64 {
        self.counters.remote.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn inline_count(&self) -> u64 {
        self.counters.inline.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn unhealthy_count(&self) -> u64 {
        self.counters.unhealthy.load(Ordering::Relaxed)
    }

    /// Snapshots every gauge at once, for a caller (the demo binary, or any
    /// other consumer) that wants to log or export them together with the
    /// cycle's `CycleReport`.
    #[must_use]
    pub fn snapshot(&self) -> CycleMetricsSnapshot {
        CycleMetricsSnapshot {
            segments: self.segment_count(),
            remote: self.remote_count(),
            inline: self.inline_count(),
            unhealthy: self.unhealthy_count(),
            placement_histogram: self.placement_histogram.lock().unwrap().clone(),
        }
    }
}

impl<C: ReliabilityCache + Send + Sync> Observer for MetricsObserver<C> {
    type Partition = ();

    fn name(&self) -> &str {
        "metrics"
    }

    async fn start(&self, _cycle_start: SystemTime) -> Result<(), ObserverError> {
        self.counters.segments.store(0, Ordering::Relaxed);
        self.counters.remote.store(0, Ordering::Relaxed);
        self.counters.inline.store(0, Ordering::Relaxed);
        self.counters.unhealthy.store(0, Ordering::Relaxed);
        self.counters.placement_sum.store(0, Ordering::Relaxed);
        self.placement_histogram.lock().unwrap().clear();
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
        let online = |node| self.cache.is_online(node);
        let mut histogram = self.placement_histogram.lock().unwrap();
        for segment in batch {
            self.counters.segments.fetch_add(1, Ordering::Relaxed);
            if segment.is_inline() {
                self.counters.inline.fetch_add(1, Ordering::Relaxed);
            } else {
                self.counters.remote.fetch_add(1, Ordering::Relaxed);
            }
            let retrievable = segment.retrievable_pieces(&online);
            if segment.redundancy.needs_repair(retrievable) {
                self.counters.unhealthy.fetch_add(1, Ordering::Relaxed);
            }
            self.counters
                .placement_sum
                .fetch_add(i64::from(segment.placement), Ordering::Relaxed);
            *histogram.entry(segment.placement).or_insert(0) += 1;
        }
        Ok(())
    }

    async fn join(&self, _partition: Self::Partition) -> Result<(), ObserverError> {
        Ok(())
    }

    async fn finish(&self) -> Result<(), ObserverError> {
        info!(
            segments = self.segment_count(),
            remote = self.remote_count(),
            inline = self.inline_count(),
            unhealthy = self.unhealthy_count(),
            distinct_placements = self.placement_histogram.lock().unwrap().len(),
            "ranged_loop metrics gauges"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::InMemoryCollaborators;
    use rangedloop_core::{NodeId, Piece, RedundancyScheme, UuidRange};
    use uuid::Uuid;

    fn inline_segment() -> Segment {
        Segment {
            stream_id: Uuid::new_v4(),
            position: 0,
            placement: 5,
            created_at: SystemTime::now(),
            expires_at: None,
            encrypted_size: 10,
            plain_size: 10,
            redundancy: RedundancyScheme {
                required_shares: 1,
                repair_shares: 1,
                optimal_shares: 1,
                total_shares: 1,
                share_size: 1,
            },
            pieces: vec![],
        }
    }

    fn remote_segment() -> Segment {
        let mut s = inline_segment();
        s.pieces = vec![Piece {
            node: NodeId::new([1; 32]),
            number: 0,
        }];
        s
    }

    #[tokio::test]
    async fn counts_inline_vs_remote_segments() {
        let collab = InMemoryCollaborators::new();
        let observer = MetricsObserver::new(collab);
        let ctx = RangeContext {
            range_index: 0,
            range: UuidRange::full(),
            progress: std::sync::Arc::new(rangedloop_core::ProgressCounter::new(1000)),
        };
        observer.start(SystemTime::now()).await.unwrap();
        let mut partition = observer.fork(&ctx).await.unwrap();
        observer
            .process(&ctx, &mut partition, &[inline_segment(), remote_segment()])
            .await
            .unwrap();

        assert_eq!(observer.segment_count(), 2);
        assert_eq!(observer.inline_count(), 1);
        assert_eq!(observer.remote_count(), 1);
    }

    #[tokio::test]
    async fn snapshot_mirrors_the_individual_getters() {
        let collab = InMemoryCollaborators::new();
        let observer = MetricsObserver::new(collab);
        let ctx = RangeContext {
            range_index: 0,
            range: UuidRange::full(),
            progress: std::sync::Arc::new(rangedloop_core::ProgressCounter::new(1000)),
        };
        observer.start(SystemTime::now()).await.unwrap();
        let mut partition = observer.fork(&ctx).await.unwrap();
        observer
            .process(&ctx, &mut partition, &[inline_segment(), remote_segment()])
            .await
            .unwrap();

        let snapshot = observer.snapshot();
        assert_eq!(snapshot.segments, observer.segment_count());
        assert_eq!(snapshot.inline, observer.inline_count());
        assert_eq!(snapshot.remote, observer.remote_count());
        assert_eq!(snapshot.placement_histogram.get(&5), Some(&2));
    }
}
