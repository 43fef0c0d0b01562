//! Cycle bookkeeping: the per-sweep report and the shared progress counter.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

/// Integer pair `(processed, estimated)` updated atomically by range workers
/// and read by the live-count observer to compute the processed ratio
/// (spec.md §3). Relaxed ordering throughout: these are pure statistics with
/// no happens-before relationship to guard, the same rationale the teacher
/// documents at length on `span_collector::collector::CollectorMetrics`.
#[derive(Debug, Default)]
pub struct ProgressCounter {
    processed: AtomicU64,
    estimated: AtomicI64,
}

impl ProgressCounter {
    #[must_use]
    pub fn new(estimated: i64) -> Self {
        Self {
            processed: AtomicU64::new(0),
            estimated: AtomicI64::new(estimated),
        }
    }

    pub fn add_processed(&self, count: u64) {
        self.processed.fetch_add(count, Ordering::Relaxed);
    }

    #[must_use]
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn estimated(&self) -> i64 {
        self.estimated.load(Ordering::Relaxed)
    }

    /// `processed / max(estimated, 1)`, per spec.md §4.4 step 6.
    #[must_use]
    pub fn ratio(&self) -> f64 {
        let estimated = self.estimated().max(1) as f64;
        self.processed() as f64 / estimated
    }
}

/// Terminal state of one (range, observer) partition (spec.md §4.4 state
/// machine). `Join` is called iff the outcome is `Done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionOutcome {
    Done,
    ForkFailed,
    ProcessFailed,
    IterFailed,
    Cancelled,
}

impl PartitionOutcome {
    #[must_use]
    pub const fn should_join(self) -> bool {
        matches!(self, Self::Done)
    }
}

/// Per-observer timing and error accumulation for one cycle.
#[derive(Debug, Clone, Default)]
pub struct ObserverReport {
    pub join_durations: Vec<Duration>,
    pub finish_duration: Duration,
    pub errors: Vec<String>,
}

impl ObserverReport {
    pub fn record_error(&mut self, err: impl ToString) {
        self.errors.push(err.to_string());
    }

    #[must_use]
    pub fn is_partial(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// Final status of a cycle (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleStatus {
    Ok,
    Anomaly,
    Cancelled,
    Error,
}

/// Everything the Service reports about one completed (or aborted) cycle.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub id: u64,
    pub started: SystemTime,
    pub ended: SystemTime,
    pub processed: u64,
    pub estimated: i64,
    pub ratio: f64,
    pub per_observer: Vec<(String, ObserverReport)>,
    pub status: CycleStatus,
    pub range_errors: Vec<String>,
}

impl CycleReport {
    #[must_use]
    pub fn is_anomaly(&self) -> bool {
        matches!(self.status, CycleStatus::Anomaly)
    }
}
