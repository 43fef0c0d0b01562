//! The Observer contract (spec.md §4.3).
//!
//! `Observer` is the ergonomic, generic trait implementors write against,
//! with `async fn` methods exactly like `span_collector::exporter::SpanExporter`.
//! `DynObserver` is its object-safe twin (again mirroring `SpanExporterBoxed`),
//! needed because the Service holds a heterogeneous `Vec<Arc<dyn DynObserver>>`
//! where each observer has its own `Partition` associated type; the boxed
//! twin erases `Partition` to `Box<dyn Any + Send>` the same way the boxed
//! exporter erases its return type to `Pin<Box<dyn Future>>`.

use crate::cycle::ProgressCounter;
use crate::error::ObserverError;
use crate::range::UuidRange;
use crate::segment::Segment;
use std::any::Any;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::SystemTime;

/// Per-range context handed to `fork` and `process`.
#[derive(Debug, Clone)]
pub struct RangeContext {
    /// Index of this range within the cycle's range list (stable for the
    /// cycle, used to order deterministic-join and to label metrics/logs).
    pub range_index: usize,
    pub range: UuidRange,
    /// Shared with the Service for the whole cycle; the conventional
    /// consumer is a live-count observer that increments it once per batch,
    /// keeping the anomaly-check counter in lockstep with what every other
    /// observer on the same batch saw.
    pub progress: Arc<ProgressCounter>,
}

/// A pluggable consumer of the per-cycle segment stream (spec.md §3, §4.3).
///
/// All methods take `&self`: an `Observer` is shared across concurrently
/// running range workers via `Arc`, so any mutable state it keeps (counters,
/// accumulators) must use interior mutability — exactly the pattern the
/// teacher's `CircuitBreakerExporter` and `RetryingExporter` use for their
/// atomics and `Mutex`-guarded state behind `&self` methods.
pub trait Observer: Send + Sync {
    /// Scratch state owned exclusively by one range worker for one range.
    type Partition: Send + 'static;

    fn name(&self) -> &str;

    /// Cheap per-cycle setup, run once on the coordinator before any range
    /// is forked.
    fn start(
        &self,
        cycle_start: SystemTime,
    ) -> impl Future<Output = Result<(), ObserverError>> + Send;

    /// Creates this range's scratch state. Run on the range worker before
    /// iteration begins.
    fn fork(
        &self,
        ctx: &RangeContext,
    ) -> impl Future<Output = Result<Self::Partition, ObserverError>> + Send;

    /// Called once per batch. Must not block on other partitions or ranges.
    fn process(
        &self,
        ctx: &RangeContext,
        partition: &mut Self::Partition,
        batch: &[Segment],
    ) -> impl Future<Output = Result<(), ObserverError>> + Send;

    /// Called on the coordinator after a range finishes iterating, serialized
    /// across partitions of the same observer. Typical use: merge partial
    /// results into observer-wide state.
    fn join(&self, partition: Self::Partition)
        -> impl Future<Output = Result<(), ObserverError>> + Send;

    /// Called once per cycle, after every `join`. Typical use: flush,
    /// publish metrics, write to a downstream sink.
    fn finish(&self) -> impl Future<Output = Result<(), ObserverError>> + Send;

    /// Called by the coordinator once per cycle, before `start`. A no-op for
    /// most observers; `SequenceObserver` overrides it to reorder its inner
    /// list (spec.md §4.6).
    fn permute_for_cycle(&self, _cycle_id: u64) {}
}

type BoxedPartition = Box<dyn Any + Send>;
type BoxedFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Object-safe twin of [`Observer`] with `Partition` erased to `Box<dyn Any + Send>`.
pub trait DynObserver: Send + Sync {
    fn name(&self) -> &str;

    fn start_dyn(&self, cycle_start: SystemTime) -> BoxedFuture<'_, Result<(), ObserverError>>;

    fn fork_dyn<'a>(
        &'a self,
        ctx: &'a RangeContext,
    ) -> BoxedFuture<'a, Result<BoxedPartition, ObserverError>>;

    fn process_dyn<'a>(
        &'a self,
        ctx: &'a RangeContext,
        partition: &'a mut BoxedPartition,
        batch: &'a [Segment],
    ) -> BoxedFuture<'a, Result<(), ObserverError>>;

    fn join_dyn(&self, partition: BoxedPartition) -> BoxedFuture<'_, Result<(), ObserverError>>;

    fn finish_dyn(&self) -> BoxedFuture<'_, Result<(), ObserverError>>;

    fn permute_for_cycle_dyn(&self, cycle_id: u64);
}

impl<O: Observer> DynObserver for O {
    fn name(&self) -> &str {
        Observer::name(self)
    }

    fn permute_for_cycle_dyn(&self, cycle_id: u64) {
        self.permute_for_cycle(cycle_id);
    }

    fn start_dyn(&self, cycle_start: SystemTime) -> BoxedFuture<'_, Result<(), ObserverError>> {
        Box::pin(self.start(cycle_start))
    }

    fn fork_dyn<'a>(
        &'a self,
        ctx: &'a RangeContext,
    ) -> BoxedFuture<'a, Result<BoxedPartition, ObserverError>> {
        Box::pin(async move {
            let partition = self.fork(ctx).await?;
            Ok(Box::new(partition) as BoxedPartition)
        })
    }

    fn process_dyn<'a>(
        &'a self,
        ctx: &'a RangeContext,
        partition: &'a mut BoxedPartition,
        batch: &'a [Segment],
    ) -> BoxedFuture<'a, Result<(), ObserverError>> {
        Box::pin(async move {
            let typed = partition.downcast_mut::<O::Partition>().ok_or_else(|| {
                ObserverError::Process(format!(
                    "partition type mismatch for observer {}",
                    Observer::name(self)
                ))
            })?;
            self.process(ctx, typed, batch).await
        })
    }

    fn join_dyn(&self, partition: BoxedPartition) -> BoxedFuture<'_, Result<(), ObserverError>> {
        Box::pin(async move {
            let typed = *partition.downcast::<O::Partition>().map_err(|_| {
                ObserverError::Join(format!(
                    "partition type mismatch for observer {}",
                    Observer::name(self)
                ))
            })?;
            self.join(typed).await
        })
    }

    fn finish_dyn(&self) -> BoxedFuture<'_, Result<(), ObserverError>> {
        Box::pin(self.finish())
    }
}
