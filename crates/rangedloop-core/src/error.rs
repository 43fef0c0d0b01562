//! Error kinds shared across the ranged-loop crates.
//!
//! Mirrors the teacher workspace's one-error-enum-per-failure-surface style
//! (`ExportError`, `SubmitError`, `ChannelError`): each variant names a single
//! failure cause with a `#[error("...")]` message, and wrapping errors use
//! `#[from]` instead of manual `From` impls.

use thiserror::Error;

/// Failure of [`crate::source::SegmentSource::create_ranges`].
///
/// Fatal for the cycle: spec.md §4.1 requires the coordinator to abandon the
/// whole cycle and retry on the next tick rather than sweep a subset of the
/// keyspace.
#[derive(Debug, Error, Clone)]
pub enum SourceError {
    #[error("snapshot read unavailable: {0}")]
    SnapshotUnavailable(String),
    #[error("metadata store error: {0}")]
    Backend(String),
}

/// Failure while a single range provider streams its segments.
///
/// Fails only the range it occurred on; sibling ranges are unaffected.
#[derive(Debug, Error, Clone)]
pub enum IterateError {
    #[error("metadata store error: {0}")]
    Backend(String),
    #[error("yield callback rejected a batch: {0}")]
    YieldRejected(String),
}

/// Failure of [`crate::splitter`]-style range splitting.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SplitError {
    #[error("cannot split the keyspace into zero ranges")]
    ZeroRanges,
}

/// Failure from any single `Observer` lifecycle method.
///
/// Always recorded per observer/range; never aborts sibling observers or
/// ranges (spec.md §7, kinds 2-4).
#[derive(Debug, Error, Clone)]
pub enum ObserverError {
    #[error("observer setup failed: {0}")]
    Start(String),
    #[error("observer fork failed: {0}")]
    Fork(String),
    #[error("observer process failed: {0}")]
    Process(String),
    #[error("observer join failed: {0}")]
    Join(String),
    #[error("observer finish failed: {0}")]
    Finish(String),
}

/// Coordinator-level failure. The only failures that abort a cycle outright.
#[derive(Debug, Error, Clone)]
pub enum ServiceError {
    #[error("failed to create ranges for cycle: {0}")]
    Source(#[from] SourceError),
    #[error(
        "cycle anomaly: processed {processed}/{estimated} segments (ratio {ratio:.4} < threshold {threshold:.4})"
    )]
    Anomaly {
        processed: u64,
        estimated: i64,
        ratio: f64,
        threshold: f64,
    },
}
