//! Segment source contract (spec.md §4.1).
//!
//! Follows the teacher workspace's native-async-trait-plus-boxed-twin split
//! (see `SpanExporter`/`SpanExporterBoxed` in `span_collector::exporter`):
//! the ergonomic trait uses `impl Future<...> + Send` so implementors write
//! plain `async fn`, and a parallel object-safe trait with
//! `Pin<Box<dyn Future>>` lets the Service hold a `Box<dyn ... Boxed>`.

use crate::error::{IterateError, SourceError};
use crate::range::UuidRange;
use crate::segment::Segment;
use std::future::Future;
use std::pin::Pin;
use tokio_util::sync::CancellationToken;

/// A callback invoked once per batch during [`RangeProvider::iterate`].
///
/// Returns a boxed future rather than a plain `Result` so the callback can
/// itself await dispatching the batch to every active observer partition —
/// the same "closure returning `Pin<Box<dyn Future>>`" shape the teacher
/// uses wherever a `dyn FnMut` needs to call async code. Returning `Err`
/// stops iteration for that range and the error is recorded verbatim as the
/// range's `IterateError` (spec.md: "returns the first `yield` error
/// verbatim").
pub type YieldFn<'a> =
    dyn FnMut(Vec<Segment>) -> Pin<Box<dyn Future<Output = Result<(), String>> + Send + 'a>>
        + Send
        + 'a;

/// Streams segments of one [`UuidRange`] in ascending key order.
pub trait RangeProvider: Send + Sync {
    fn range(&self) -> UuidRange;

    /// Streams this provider's segments to `yield_fn` in batches of up to
    /// `batch_size`, polling `cancel` between batches (spec.md §5: "batch
    /// boundaries are the only cancellation poll points inside iteration").
    fn iterate(
        &self,
        cancel: &CancellationToken,
        batch_size: usize,
        yield_fn: &mut YieldFn<'_>,
    ) -> impl Future<Output = Result<(), IterateError>> + Send;
}

/// Object-safe twin of [`RangeProvider`] for heterogeneous `Box<dyn ...>` use.
pub trait RangeProviderBoxed: Send + Sync {
    fn range(&self) -> UuidRange;

    fn iterate_boxed<'a>(
        &'a self,
        cancel: &'a CancellationToken,
        batch_size: usize,
        yield_fn: &'a mut YieldFn<'_>,
    ) -> Pin<Box<dyn Future<Output = Result<(), IterateError>> + Send + 'a>>;
}

impl<T: RangeProvider> RangeProviderBoxed for T {
    fn range(&self) -> UuidRange {
        RangeProvider::range(self)
    }

    fn iterate_boxed<'a>(
        &'a self,
        cancel: &'a CancellationToken,
        batch_size: usize,
        yield_fn: &'a mut YieldFn<'_>,
    ) -> Pin<Box<dyn Future<Output = Result<(), IterateError>> + Send + 'a>> {
        Box::pin(self.iterate(cancel, batch_size, yield_fn))
    }
}

/// Yields range providers covering the whole keyspace against one consistent
/// snapshot (spec.md §4.1).
pub trait SegmentSource: Send + Sync {
    /// Splits the keyspace into range providers and reports the source's best
    /// estimate of the total segment count.
    ///
    /// `n_suggested` is a hint; the source may return a different number of
    /// providers if it can split more intelligently off its own index
    /// statistics.
    fn create_ranges(
        &self,
        n_suggested: u32,
        batch_size: usize,
    ) -> impl Future<Output = Result<(Vec<Box<dyn RangeProviderBoxed>>, i64), SourceError>> + Send;
}

/// Object-safe twin of [`SegmentSource`].
pub trait SegmentSourceBoxed: Send + Sync {
    fn create_ranges_boxed<'a>(
        &'a self,
        n_suggested: u32,
        batch_size: usize,
    ) -> Pin<
        Box<
            dyn Future<Output = Result<(Vec<Box<dyn RangeProviderBoxed>>, i64), SourceError>>
                + Send
                + 'a,
        >,
    >;
}

impl<T: SegmentSource> SegmentSourceBoxed for T {
    fn create_ranges_boxed<'a>(
        &'a self,
        n_suggested: u32,
        batch_size: usize,
    ) -> Pin<
        Box<
            dyn Future<Output = Result<(Vec<Box<dyn RangeProviderBoxed>>, i64), SourceError>>
                + Send
                + 'a,
        >,
    > {
        Box::pin(self.create_ranges(n_suggested, batch_size))
    }
}
