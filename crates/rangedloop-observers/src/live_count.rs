//! Observer #0: keeps the shared [`ProgressCounter`] up to date.
//!
//! Always present as the first observer in the sequence (spec.md §4.5). It
//! carries no state of its own beyond the shared counter, and its `finish`
//! is a no-op: the anomaly ratio check is performed by the Service, not here.

use rangedloop_core::{Observer, ObserverError, RangeContext, Segment};
use std::time::SystemTime;

/// Increments the [`rangedloop_core::ProgressCounter`] carried on every
/// [`RangeContext`] (the Service constructs one counter per cycle and hands
/// the same `Arc` to every range worker). Holds no state of its own: the
/// Service reads the counter directly for the anomaly ratio check.
pub struct LiveCountObserver;

impl Observer for LiveCountObserver {
    type Partition = ();

    fn name(&self) -> &str {
        "live_count"
    }

    async fn start(&self, _cycle_start: SystemTime) -> Result<(), ObserverError> {
        Ok(())
    }

    async fn fork(&self, _ctx: &RangeContext) -> Result<Self::Partition, ObserverError> {
        Ok(())
    }

    async fn process(
        &self,
        ctx: &RangeContext,
        _partition: &mut Self::Partition,
        batch: &[Segment],
    ) -> Result<(), ObserverError> {
        ctx.progress.add_processed(batch.len() as u64);
        Ok(())
    }

    async fn join(&self, _partition: Self::Partition) -> Result<(), ObserverError> {
        Ok(())
    }

    async fn finish(&self) -> Result<(), ObserverError> {
        Ok(())
    }
}
