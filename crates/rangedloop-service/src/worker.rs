//! One range worker: owns exactly one [`RangeProviderBoxed`] and runs every
//! active observer's `Fork`/`Process` over it (spec.md §4.4 step 3).

use rangedloop_core::{
    DynObserver, PartitionOutcome, ProgressCounter, RangeContext, RangeProviderBoxed, Segment,
    UuidRange,
};
use std::any::Any;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{instrument, warn};

/// What became of one observer's partition on this range, for the
/// coordinator to fold into [`rangedloop_core::ObserverReport`].
pub enum WorkerPartitionResult {
    /// The partition completed; `Join` should be called with the boxed state.
    Done(Box<dyn Any + Send>),
    ForkFailed(String),
    ProcessFailed(String),
    IterFailed(String),
    Cancelled,
}

impl WorkerPartitionResult {
    #[must_use]
    pub fn outcome(&self) -> PartitionOutcome {
        match self {
            Self::Done(_) => PartitionOutcome::Done,
            Self::ForkFailed(_) => PartitionOutcome::ForkFailed,
            Self::ProcessFailed(_) => PartitionOutcome::ProcessFailed,
            Self::IterFailed(_) => PartitionOutcome::IterFailed,
            Self::Cancelled => PartitionOutcome::Cancelled,
        }
    }
}

pub struct WorkerOutput {
    pub range_index: usize,
    pub range: UuidRange,
    /// Index-aligned with the observer list the worker was given.
    pub per_observer: Vec<WorkerPartitionResult>,
    pub range_error: Option<String>,
}

/// Runs one range to completion: forks every observer, iterates the
/// provider, and dispatches each batch to every still-active partition.
#[instrument(skip_all, fields(range_index))]
pub async fn run_range_worker(
    range_index: usize,
    provider: Box<dyn RangeProviderBoxed>,
    observers: Arc<Vec<Arc<dyn DynObserver>>>,
    progress: Arc<ProgressCounter>,
    batch_size: usize,
    cancel: CancellationToken,
) -> WorkerOutput {
    let range = provider.range();
    let ctx = RangeContext {
        range_index,
        range,
        progress,
    };

    // Fork every observer; a failure disables that observer for this range
    // only (spec.md §4.3 item 2).
    let mut partitions: Vec<Option<Box<dyn Any + Send>>> = Vec::with_capacity(observers.len());
    let mut outcomes: Vec<Option<WorkerPartitionResult>> = Vec::with_capacity(observers.len());
    for observer in observers.iter() {
        match observer.fork_dyn(&ctx).await {
            Ok(partition) => {
                partitions.push(Some(partition));
                outcomes.push(None);
            }
            Err(e) => {
                partitions.push(None);
                outcomes.push(Some(WorkerPartitionResult::ForkFailed(e.to_string())));
            }
        }
    }

    let mut cancelled = false;
    // The closure is built inline (not bound via `let` first) so the
    // expected `YieldFn` signature guides inference into unsizing the boxed
    // future to `Pin<Box<dyn Future<...>>>`; it isn't `move`, so each call
    // takes a fresh reborrow of the locals it needs rather than consuming
    // them on the first batch (an `FnMut` can't move its captures away and
    // still be callable for the second).
    let iter_result = provider
        .iterate_boxed(
            &cancel,
            batch_size.max(1),
            &mut |batch: Vec<Segment>| {
                let ctx = &ctx;
                let observers = observers.as_ref();
                let partitions: &mut _ = &mut partitions;
                let outcomes: &mut _ = &mut outcomes;
                let is_cancelled = cancel.is_cancelled();
                let cancelled: &mut bool = &mut cancelled;
                Box::pin(async move {
                    if is_cancelled {
                        *cancelled = true;
                        return Ok(());
                    }
                    dispatch_batch(ctx, observers, partitions, outcomes, &batch).await;
                    Ok(())
                })
            },
        )
        .await;

    let range_error = iter_result.as_ref().err().map(ToString::to_string);

    let mut per_observer = Vec::with_capacity(observers.len());
    for i in 0..observers.len() {
        let result = if let Some(result) = outcomes[i].take() {
            result
        } else if cancelled {
            WorkerPartitionResult::Cancelled
        } else if let Some(e) = &range_error {
            WorkerPartitionResult::IterFailed(e.clone())
        } else if let Some(partition) = partitions[i].take() {
            WorkerPartitionResult::Done(partition)
        } else {
            WorkerPartitionResult::ProcessFailed("partition discarded after process error".to_string())
        };
        per_observer.push(result);
    }

    WorkerOutput {
        range_index,
        range: ctx.range,
        per_observer,
        range_error,
    }
}

/// Dispatches one batch to every partition that hasn't already failed or
/// been forked out; records the first `Process` error per observer and
/// drops that partition (spec.md §4.3 item 3: stop calling Process on it,
/// keep feeding the others).
async fn dispatch_batch(
    ctx: &RangeContext,
    observers: &[Arc<dyn DynObserver>],
    partitions: &mut [Option<Box<dyn Any + Send>>],
    outcomes: &mut [Option<WorkerPartitionResult>],
    batch: &[Segment],
) {
    for (i, observer) in observers.iter().enumerate() {
        if outcomes[i].is_some() {
            continue;
        }
        let Some(partition) = partitions[i].as_mut() else {
            continue;
        };
        if let Err(e) = observer.process_dyn(ctx, partition, batch).await {
            warn!(observer = observer.name(), error = %e, "observer process failed");
            outcomes[i] = Some(WorkerPartitionResult::ProcessFailed(e.to_string()));
            partitions[i] = None;
        }
    }
}
