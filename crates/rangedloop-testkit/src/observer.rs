//! A recording `Observer` double used to assert the lifecycle invariants in
//! spec.md §8 (Fork-before-Join ordering, Finish-always-called, strictly
//! increasing per-partition keys, partial failure isolation, ...).

use rangedloop_core::{Observer, ObserverError, RangeContext, Segment};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::SystemTime;

#[derive(Debug, Default)]
struct RecordingState {
    start_calls: u32,
    fork_calls: Vec<usize>,
    process_calls: Vec<(usize, usize)>,
    join_calls: Vec<usize>,
    finish_calls: u32,
    joined_segments: Vec<Segment>,
}

/// Per-range scratch state: the segments this partition has seen so far, kept
/// to assert strictly-increasing keys within the partition.
pub struct RecordingPartition {
    range_index: usize,
    last_key: Option<(rangedloop_core::StreamId, i64)>,
    segments: Vec<Segment>,
    process_calls_on_range: usize,
}

/// Configurable failure injection, keyed by 0-based range index.
#[derive(Debug, Default, Clone)]
pub struct FaultPlan {
    pub fail_start: bool,
    pub fail_fork_on: HashSet<usize>,
    /// range_index -> 1-based process call number at which to start failing.
    pub fail_process_from_call: HashMap<usize, usize>,
    pub fail_finish: bool,
}

pub struct RecordingObserver {
    name: String,
    faults: FaultPlan,
    state: Mutex<RecordingState>,
}

impl RecordingObserver {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            faults: FaultPlan::default(),
            state: Mutex::new(RecordingState::default()),
        }
    }

    #[must_use]
    pub fn with_faults(mut self, faults: FaultPlan) -> Self {
        self.faults = faults;
        self
    }

    #[must_use]
    pub fn start_calls(&self) -> u32 {
        self.state.lock().unwrap().start_calls
    }

    #[must_use]
    pub fn fork_calls(&self) -> Vec<usize> {
        self.state.lock().unwrap().fork_calls.clone()
    }

    #[must_use]
    pub fn join_calls(&self) -> Vec<usize> {
        self.state.lock().unwrap().join_calls.clone()
    }

    #[must_use]
    pub fn finish_calls(&self) -> u32 {
        self.state.lock().unwrap().finish_calls
    }

    #[must_use]
    pub fn process_call_count(&self, range_index: usize) -> usize {
        self.state
            .lock()
            .unwrap()
            .process_calls
            .iter()
            .filter(|(r, _)| *r == range_index)
            .count()
    }

    #[must_use]
    pub fn joined_segments(&self) -> Vec<Segment> {
        self.state.lock().unwrap().joined_segments.clone()
    }
}

impl Observer for RecordingObserver {
    type Partition = RecordingPartition;

    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&self, _cycle_start: SystemTime) -> Result<(), ObserverError> {
        if self.faults.fail_start {
            return Err(ObserverError::Start(format!("{} fails start", self.name)));
        }
        self.state.lock().unwrap().start_calls += 1;
        Ok(())
    }

    async fn fork(&self, ctx: &RangeContext) -> Result<Self::Partition, ObserverError> {
        if self.faults.fail_fork_on.contains(&ctx.range_index) {
            return Err(ObserverError::Fork(format!(
                "{} fails fork on range {}",
                self.name, ctx.range_index
            )));
        }
        self.state.lock().unwrap().fork_calls.push(ctx.range_index);
        Ok(RecordingPartition {
            range_index: ctx.range_index,
            last_key: None,
            segments: Vec::new(),
            process_calls_on_range: 0,
        })
    }

    async fn process(
        &self,
        ctx: &RangeContext,
        partition: &mut Self::Partition,
        batch: &[Segment],
    ) -> Result<(), ObserverError> {
        partition.process_calls_on_range += 1;
        self.state
            .lock()
            .unwrap()
            .process_calls
            .push((ctx.range_index, batch.len()));

        if let Some(&fail_from) = self.faults.fail_process_from_call.get(&ctx.range_index) {
            if partition.process_calls_on_range >= fail_from {
                return Err(ObserverError::Process(format!(
                    "{} fails process on range {}",
                    self.name, ctx.range_index
                )));
            }
        }

        for segment in batch {
            let key = segment.sort_key();
            if let Some(last) = partition.last_key {
                assert!(
                    key > last,
                    "segments delivered out of order within a partition: {last:?} then {key:?}"
                );
            }
            partition.last_key = Some(key);
        }
        partition.segments.extend(batch.iter().cloned());
        Ok(())
    }

    async fn join(&self, partition: Self::Partition) -> Result<(), ObserverError> {
        let mut state = self.state.lock().unwrap();
        state.join_calls.push(partition.range_index);
        state.joined_segments.extend(partition.segments);
        Ok(())
    }

    async fn finish(&self) -> Result<(), ObserverError> {
        if self.faults.fail_finish {
            return Err(ObserverError::Finish(format!(
                "{} fails finish",
                self.name
            )));
        }
        self.state.lock().unwrap().finish_calls += 1;
        Ok(())
    }
}
