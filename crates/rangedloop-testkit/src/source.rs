//! A deterministic, programmable `SegmentSource` double.
//!
//! Plays the role the teacher's `TestExporter`/`SlowExporter`/`FailingExporter`
//! play for `SpanExporter`: a stand-in collaborator used across the service's
//! scenario tests, here for the much bigger `SegmentSource` contract.

use rangedloop_core::{IterateError, RangeProvider, Segment, SegmentSource, SourceError, UuidRange};
use rangedloop_splitter::UniformSplitter;
use std::collections::HashMap;
use std::future::Future;
use tokio_util::sync::CancellationToken;

/// A fault injected into one range provider, to exercise spec.md §8 scenario 3
/// ("the middle range's provider errors after 200 segments").
#[derive(Debug, Clone, Copy)]
pub enum ProviderFault {
    /// Stop delivering and return `Err` after this many segments have been
    /// yielded from this provider.
    ErrorAfter(usize),
}

/// An in-memory `SegmentSource` over a fixed, pre-sorted segment set.
pub struct InMemorySource {
    segments: Vec<Segment>,
    estimate_override: Option<i64>,
    faults: HashMap<usize, ProviderFault>,
}

impl InMemorySource {
    /// `segments` need not be pre-sorted; it is sorted by `(stream_id, position)`
    /// here so the invariant the real source must uphold holds by construction.
    #[must_use]
    pub fn new(mut segments: Vec<Segment>) -> Self {
        segments.sort_by_key(Segment::sort_key);
        Self {
            segments,
            estimate_override: None,
            faults: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_estimate(mut self, estimate: i64) -> Self {
        self.estimate_override = Some(estimate);
        self
    }

    /// Injects a fault into the provider for range index `range_index`
    /// (0-based, in the order `create_ranges` returns providers).
    #[must_use]
    pub fn with_fault(mut self, range_index: usize, fault: ProviderFault) -> Self {
        self.faults.insert(range_index, fault);
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

impl SegmentSource for InMemorySource {
    fn create_ranges(
        &self,
        n_suggested: u32,
        _batch_size: usize,
    ) -> impl Future<
        Output = Result<
            (Vec<Box<dyn rangedloop_core::RangeProviderBoxed>>, i64),
            SourceError,
        >,
    > + Send {
        let n = n_suggested.max(1);
        let ranges = UniformSplitter::split(n)
            .expect("n is clamped to at least 1, so split never rejects it");

        let mut providers: Vec<Box<dyn rangedloop_core::RangeProviderBoxed>> =
            Vec::with_capacity(ranges.len());
        for (index, range) in ranges.into_iter().enumerate() {
            let segments = self
                .segments
                .iter()
                .filter(|s| range.contains(s.stream_id))
                .cloned()
                .collect();
            providers.push(Box::new(InMemoryRangeProvider {
                range,
                segments,
                fault: self.faults.get(&index).copied(),
            }));
        }

        let estimate = self
            .estimate_override
            .unwrap_or(self.segments.len() as i64);

        async move { Ok((providers, estimate)) }
    }
}

struct InMemoryRangeProvider {
    range: UuidRange,
    segments: Vec<Segment>,
    fault: Option<ProviderFault>,
}

impl RangeProvider for InMemoryRangeProvider {
    fn range(&self) -> UuidRange {
        self.range
    }

    fn iterate(
        &self,
        cancel: &CancellationToken,
        batch_size: usize,
        yield_fn: &mut rangedloop_core::YieldFn<'_>,
    ) -> impl Future<Output = Result<(), IterateError>> + Send {
        async move {
            let batch_size = batch_size.max(1);
            let mut delivered = 0usize;

            for chunk in self.segments.chunks(batch_size) {
                if cancel.is_cancelled() {
                    return Ok(());
                }

                let mut chunk = chunk.to_vec();
                if let Some(ProviderFault::ErrorAfter(limit)) = self.fault {
                    if delivered >= limit {
                        return Err(IterateError::Backend(
                            "simulated metadata store failure".to_string(),
                        ));
                    }
                    if delivered + chunk.len() > limit {
                        chunk.truncate(limit - delivered);
                    }
                }

                let was_truncated_by_fault = matches!(
                    self.fault,
                    Some(ProviderFault::ErrorAfter(limit)) if delivered + chunk.len() >= limit
                );

                delivered += chunk.len();
                yield_fn(chunk).await.map_err(IterateError::YieldRejected)?;

                if was_truncated_by_fault {
                    return Err(IterateError::Backend(
                        "simulated metadata store failure".to_string(),
                    ));
                }
            }

            Ok(())
        }
    }
}
