//! The coordinator: runs one cycle's worth of spec.md §4.4 steps 1-7 and
//! loops them, the way the teacher's `AsyncSpanCollector` consumer task
//! drains one channel batch at a time and fans work out over a `JoinSet`.

use crate::config::ServiceConfig;
use crate::worker::{self, WorkerPartitionResult};
use rangedloop_core::{
    CycleReport, CycleStatus, DynObserver, ObserverReport, PartitionOutcome, ProgressCounter,
    SegmentSourceBoxed, ServiceError,
};
use rangedloop_observers::LiveCountObserver;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

pub struct Service {
    source: Box<dyn SegmentSourceBoxed>,
    observers: Vec<Arc<dyn DynObserver>>,
    config: ServiceConfig,
    next_cycle_id: std::sync::atomic::AtomicU64,
}

impl Service {
    /// Prepends [`LiveCountObserver`] as observer #0 (spec.md §4.5: "always
    /// present ... not user-configurable") ahead of whatever the caller
    /// supplies.
    #[must_use]
    pub fn new(
        source: Box<dyn SegmentSourceBoxed>,
        observers: Vec<Arc<dyn DynObserver>>,
        config: ServiceConfig,
    ) -> Self {
        let mut with_live_count: Vec<Arc<dyn DynObserver>> =
            Vec::with_capacity(observers.len() + 1);
        with_live_count.push(Arc::new(LiveCountObserver));
        with_live_count.extend(observers);
        Self {
            source,
            observers: with_live_count,
            config,
            next_cycle_id: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// Runs cycles back to back, sleeping the remainder of
    /// `coalesce_duration` between them, until `cancel` fires. Surfaces
    /// `ServiceError::Anomaly` to the caller rather than swallowing it —
    /// deciding what to do about a truncated sweep (alert, exit nonzero) is
    /// the caller's job, not the library's.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), ServiceError> {
        if !self.config.initial_delay.is_zero() {
            tokio::select! {
                () = tokio::time::sleep(self.config.initial_delay) => {}
                () = cancel.cancelled() => return Ok(()),
            }
        }

        while !cancel.is_cancelled() {
            let cycle_start = std::time::Instant::now();
            match self.run_once(cancel.clone()).await {
                Ok(report) => {
                    info!(
                        cycle = report.id,
                        processed = report.processed,
                        estimated = report.estimated,
                        ratio = report.ratio,
                        status = ?report.status,
                        "cycle complete"
                    );
                }
                Err(e @ ServiceError::Anomaly { .. }) => {
                    error!(error = %e, "cycle aborted: anomaly");
                    return Err(e);
                }
                Err(e) => {
                    warn!(error = %e, "cycle failed, retrying next tick");
                }
            }

            if cancel.is_cancelled() {
                break;
            }
            let elapsed = cycle_start.elapsed();
            let remaining = self.config.coalesce_duration.saturating_sub(elapsed);
            if !remaining.is_zero() {
                tokio::select! {
                    () = tokio::time::sleep(remaining) => {}
                    () = cancel.cancelled() => break,
                }
            }
        }
        Ok(())
    }

    /// Runs exactly one cycle: spec.md §4.4 steps 1-7.
    #[instrument(skip_all, fields(cycle_id = tracing::field::Empty))]
    pub async fn run_once(&self, cancel: CancellationToken) -> Result<CycleReport, ServiceError> {
        let cycle_id = self
            .next_cycle_id
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        tracing::Span::current().record("cycle_id", cycle_id);
        let started = SystemTime::now();

        // Reorder any composite observer's inner list before Start (spec.md
        // §4.6: "Between cycles the Service permutes the inner list").
        for observer in &self.observers {
            observer.permute_for_cycle_dyn(cycle_id);
        }

        // Step 1: Start every observer; a failed Start disables it for this
        // cycle only (spec.md §4.4 step 1).
        let mut active = Vec::with_capacity(self.observers.len());
        let mut reports: Vec<ObserverReport> = Vec::with_capacity(self.observers.len());
        for observer in &self.observers {
            let mut report = ObserverReport::default();
            let ok = match observer.start_dyn(started).await {
                Ok(()) => true,
                Err(e) => {
                    report.record_error(e);
                    false
                }
            };
            active.push(ok);
            reports.push(report);
        }

        // Step 2: ask the source for ranges.
        let (providers, estimated) = match self
            .source
            .create_ranges_boxed(self.config.parallelism, self.config.batch_size)
            .await
        {
            Ok(pair) => pair,
            Err(e) => {
                warn!(error = %e, "failed to create ranges for cycle");
                return Err(ServiceError::Source(e));
            }
        };

        let progress = Arc::new(ProgressCounter::new(estimated));
        let active_observers: Arc<Vec<Arc<dyn DynObserver>>> = Arc::new(
            self.observers
                .iter()
                .zip(&active)
                .filter(|(_, &ok)| ok)
                .map(|(o, _)| o.clone())
                .collect(),
        );

        // Step 3: fan every range out to its own worker.
        let mut join_set: JoinSet<worker::WorkerOutput> = JoinSet::new();
        for (range_index, provider) in providers.into_iter().enumerate() {
            let observers = active_observers.clone();
            let progress = progress.clone();
            let cancel = cancel.clone();
            let batch_size = self.config.batch_size;
            join_set.spawn(worker::run_range_worker(
                range_index,
                provider,
                observers,
                progress,
                batch_size,
                cancel,
            ));
        }

        // Step 4: wait for every range, then Join each observer's partitions
        // in range order (deterministic, per observer).
        let mut outputs = Vec::new();
        let mut range_errors = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(output) => {
                    if let Some(err) = &output.range_error {
                        range_errors.push(format!("range {}: {err}", output.range_index));
                    }
                    outputs.push(output);
                }
                Err(e) => range_errors.push(format!("range worker panicked: {e}")),
            }
        }
        outputs.sort_by_key(|o| o.range_index);

        // `active_observers` indices don't line up with `self.observers`
        // indices (inactive ones were filtered out); map back by identity.
        let report_index_for_active: Vec<usize> = active
            .iter()
            .enumerate()
            .filter(|(_, &ok)| ok)
            .map(|(i, _)| i)
            .collect();

        // Transpose range-major `outputs` into observer-major partition
        // lists, in range order, so each observer's partitions can be
        // joined sequentially (spec.md §4.4 step 4).
        let num_active = active_observers.len();
        let mut per_observer_results: Vec<Vec<(usize, WorkerPartitionResult)>> =
            (0..num_active).map(|_| Vec::with_capacity(outputs.len())).collect();
        for output in &mut outputs {
            let range_index = output.range_index;
            for (i, result) in std::mem::take(&mut output.per_observer).into_iter().enumerate() {
                per_observer_results[i].push((range_index, result));
            }
        }

        for (active_index, &report_index) in report_index_for_active.iter().enumerate() {
            let observer = active_observers[active_index].clone();
            let report = &mut reports[report_index];
            for (range_index, result) in per_observer_results[active_index].drain(..) {
                if result.outcome() != PartitionOutcome::Done {
                    report.record_error(format!(
                        "range {range_index}: partition {:?}",
                        result.outcome()
                    ));
                    continue;
                }
                let WorkerPartitionResult::Done(partition) = result else {
                    unreachable!("outcome() == Done implies the Done variant")
                };
                let join_start = std::time::Instant::now();
                if let Err(e) = observer.join_dyn(partition).await {
                    report.record_error(e);
                }
                report.join_durations.push(join_start.elapsed());
            }
        }

        // Step 5: Finish every observer that was active for this cycle.
        for (i, &ok) in active.iter().enumerate() {
            if !ok {
                continue;
            }
            let observer = &self.observers[i];
            let finish_start = std::time::Instant::now();
            if let Err(e) = observer.finish_dyn().await {
                reports[i].record_error(e);
            }
            reports[i].finish_duration = finish_start.elapsed();
        }

        let ended = SystemTime::now();
        let processed = progress.processed();

        // Step 6: anomaly check, skipped when the dataset is legitimately
        // empty or the threshold is disabled.
        let ratio = progress.ratio();
        let status = if cancel.is_cancelled() {
            CycleStatus::Cancelled
        } else if !range_errors.is_empty() {
            CycleStatus::Error
        } else if estimated != 0
            && !self.config.anomaly_disabled()
            && ratio < self.config.suspicious_processed_ratio
        {
            CycleStatus::Anomaly
        } else {
            CycleStatus::Ok
        };

        let per_observer = self
            .observers
            .iter()
            .zip(reports)
            .map(|(o, r)| (o.name().to_string(), r))
            .collect();

        let report = CycleReport {
            id: cycle_id,
            started,
            ended,
            processed,
            estimated,
            ratio,
            per_observer,
            status,
            range_errors,
        };

        if status == CycleStatus::Anomaly {
            return Err(ServiceError::Anomaly {
                processed,
                estimated,
                ratio,
                threshold: self.config.suspicious_processed_ratio,
            });
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rangedloop_core::{NodeId, Piece, RedundancyScheme, Segment};
    use rangedloop_splitter::UniformSplitter;
    use rangedloop_testkit::{FaultPlan, InMemorySource, ProviderFault, RecordingObserver};

    fn segment(stream: u128, position: i64) -> Segment {
        Segment {
            stream_id: uuid::Uuid::from_u128(stream),
            position,
            placement: 0,
            created_at: SystemTime::now(),
            expires_at: None,
            encrypted_size: 1024,
            plain_size: 1000,
            redundancy: RedundancyScheme {
                required_shares: 2,
                repair_shares: 3,
                optimal_shares: 4,
                total_shares: 5,
                share_size: 256,
            },
            pieces: vec![Piece {
                node: NodeId::new([1; 32]),
                number: 0,
            }],
        }
    }

    /// `count` segments guaranteed to land inside range `index` of an
    /// `n`-way uniform split, by building stream ids directly off that
    /// range's own boundaries rather than hoping a global spread lands
    /// evenly.
    fn segments_for_range(n: u32, index: usize, count: usize) -> Vec<Segment> {
        let ranges = UniformSplitter::split(n).unwrap();
        let start = ranges[index].start.map_or(0, uuid::Uuid::as_u128);
        (0..count)
            .map(|k| segment(start + k as u128, k as i64))
            .collect()
    }

    fn all_segments(n: u32, per_range: usize) -> Vec<Segment> {
        (0..n as usize)
            .flat_map(|i| segments_for_range(n, i, per_range))
            .collect()
    }

    fn config(parallelism: u32) -> ServiceConfig {
        ServiceConfig {
            parallelism,
            batch_size: 50,
            ..ServiceConfig::default()
        }
    }

    #[tokio::test]
    async fn scenario_1_empty_dataset_still_forks_and_joins_every_range() {
        let source = InMemorySource::new(vec![]);
        let observers: Vec<Arc<RecordingObserver>> = (0..3)
            .map(|i| Arc::new(RecordingObserver::new(format!("obs-{i}"))))
            .collect();
        let dyn_observers: Vec<Arc<dyn DynObserver>> = observers
            .iter()
            .map(|o| o.clone() as Arc<dyn DynObserver>)
            .collect();
        let service = Service::new(Box::new(source), dyn_observers, config(4));

        let report = service.run_once(CancellationToken::new()).await.unwrap();

        assert_eq!(report.processed, 0);
        assert!(!report.is_anomaly());
        for observer in &observers {
            assert_eq!(observer.start_calls(), 1);
            assert_eq!(observer.fork_calls().len(), 4);
            assert_eq!(observer.join_calls().len(), 4);
            assert_eq!(observer.finish_calls(), 1);
        }
    }

    #[tokio::test]
    async fn scenario_2_full_ratio_is_not_an_anomaly() {
        let segments = all_segments(4, 250);
        let source = InMemorySource::new(segments).with_estimate(1000);
        let metrics = Arc::new(RecordingObserver::new("metrics"));
        let dyn_observers: Vec<Arc<dyn DynObserver>> = vec![metrics.clone()];
        let service = Service::new(Box::new(source), dyn_observers, config(4));

        let report = service.run_once(CancellationToken::new()).await.unwrap();

        assert_eq!(report.processed, 1000);
        assert!((report.ratio - 1.0).abs() < 1e-9);
        assert!(!report.is_anomaly());
        assert_eq!(metrics.joined_segments().len(), 1000);
    }

    #[tokio::test]
    async fn scenario_3_one_range_errors_others_still_complete() {
        let mut segments = all_segments(4, 250);
        // Fault range 1 after 200 segments; drop the rest of its segments so
        // the provider's own data doesn't mask the injected failure.
        let range1_start = UniformSplitter::split(4).unwrap()[1]
            .start
            .map_or(0, uuid::Uuid::as_u128);
        segments.retain(|s| {
            let id = s.stream_id.as_u128();
            !(id >= range1_start && id < range1_start + 250) || id < range1_start + 200
        });

        let source = InMemorySource::new(segments)
            .with_estimate(1000)
            .with_fault(1, ProviderFault::ErrorAfter(200));
        let repair = Arc::new(RecordingObserver::new("repair"));
        let dyn_observers: Vec<Arc<dyn DynObserver>> = vec![repair.clone()];
        let service = Service::new(Box::new(source), dyn_observers, config(4));

        let report = service.run_once(CancellationToken::new()).await.unwrap();

        assert_eq!(report.range_errors.len(), 1);
        assert_eq!(repair.finish_calls(), 1);
        assert_eq!(repair.fork_calls().len(), 4);
        // The faulted range's partition never reaches Join.
        assert_eq!(repair.join_calls().len(), 3);
        assert!(!report.is_anomaly());
    }

    #[tokio::test]
    async fn scenario_4_one_observers_process_failure_does_not_affect_others() {
        let segments = all_segments(4, 100);
        let source = InMemorySource::new(segments);
        let audit = Arc::new(RecordingObserver::new("audit").with_faults(FaultPlan {
            fail_process_from_call: [(2, 1)].into_iter().collect(),
            ..FaultPlan::default()
        }));
        let metrics = Arc::new(RecordingObserver::new("metrics"));
        let dyn_observers: Vec<Arc<dyn DynObserver>> =
            vec![audit.clone(), metrics.clone()];
        let service = Service::new(Box::new(source), dyn_observers, config(4));

        let report = service.run_once(CancellationToken::new()).await.unwrap();

        assert!(!report.is_anomaly());
        assert_eq!(audit.fork_calls().len(), 4);
        assert_eq!(audit.join_calls().len(), 3);
        assert_eq!(metrics.fork_calls().len(), 4);
        assert_eq!(metrics.join_calls().len(), 4);
    }

    #[tokio::test]
    async fn scenario_5_a_big_shortfall_is_reported_as_anomaly() {
        let segments = all_segments(1, 100);
        let source = InMemorySource::new(segments).with_estimate(10_000);
        let observer: Arc<dyn DynObserver> = Arc::new(RecordingObserver::new("metrics"));
        let service = Service::new(Box::new(source), vec![observer], config(1));

        let err = service.run_once(CancellationToken::new()).await.unwrap_err();

        match err {
            ServiceError::Anomaly { processed, estimated, ratio, .. } => {
                assert_eq!(processed, 100);
                assert_eq!(estimated, 10_000);
                assert!(ratio < 0.95);
            }
            other => panic!("expected an anomaly, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn scenario_6_a_pre_cancelled_token_yields_a_cancelled_cycle_without_errors() {
        let segments = all_segments(4, 100);
        let source = InMemorySource::new(segments);
        let observer = Arc::new(RecordingObserver::new("obs"));
        let dyn_observers: Vec<Arc<dyn DynObserver>> = vec![observer.clone()];
        let service = Service::new(Box::new(source), dyn_observers, config(4));

        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = service.run_once(cancel).await.unwrap();

        assert_eq!(report.status, CycleStatus::Cancelled);
        assert!(!report.is_anomaly());
        assert_eq!(observer.finish_calls(), 1);
    }

    #[tokio::test]
    async fn zero_estimate_never_triggers_anomaly_even_with_no_data() {
        let source = InMemorySource::new(vec![]);
        let observer: Arc<dyn DynObserver> = Arc::new(RecordingObserver::new("obs"));
        let service = Service::new(Box::new(source), vec![observer], config(1));

        let report = service.run_once(CancellationToken::new()).await.unwrap();
        assert!(!report.is_anomaly());
    }

    #[tokio::test]
    async fn zero_threshold_disables_anomaly_detection() {
        let segments = all_segments(1, 10);
        let source = InMemorySource::new(segments).with_estimate(10_000);
        let observer: Arc<dyn DynObserver> = Arc::new(RecordingObserver::new("obs"));
        let cfg = ServiceConfig {
            suspicious_processed_ratio: 0.0,
            ..config(1)
        };
        let service = Service::new(Box::new(source), vec![observer], cfg);

        let report = service.run_once(CancellationToken::new()).await.unwrap();
        assert!(!report.is_anomaly());
    }

    #[tokio::test]
    async fn parallelism_one_and_parallelism_many_see_the_same_segments() {
        let segments = all_segments(8, 20);

        let observer_one = Arc::new(RecordingObserver::new("obs"));
        let dyn_one: Vec<Arc<dyn DynObserver>> = vec![observer_one.clone()];
        let service_one = Service::new(
            Box::new(InMemorySource::new(segments.clone())),
            dyn_one,
            config(1),
        );
        service_one.run_once(CancellationToken::new()).await.unwrap();

        let observer_many = Arc::new(RecordingObserver::new("obs"));
        let dyn_many: Vec<Arc<dyn DynObserver>> = vec![observer_many.clone()];
        let service_many = Service::new(
            Box::new(InMemorySource::new(segments)),
            dyn_many,
            config(64),
        );
        service_many.run_once(CancellationToken::new()).await.unwrap();

        let mut one = observer_one.joined_segments();
        let mut many = observer_many.joined_segments();
        one.sort_by_key(Segment::sort_key);
        many.sort_by_key(Segment::sort_key);
        assert_eq!(one, many);
    }

    #[tokio::test]
    async fn an_observer_that_fails_start_is_skipped_for_the_whole_cycle() {
        let segments = all_segments(2, 10);
        let source = InMemorySource::new(segments);
        let broken = Arc::new(RecordingObserver::new("broken").with_faults(FaultPlan {
            fail_start: true,
            ..FaultPlan::default()
        }));
        let healthy = Arc::new(RecordingObserver::new("healthy"));
        let dyn_observers: Vec<Arc<dyn DynObserver>> = vec![broken.clone(), healthy.clone()];
        let service = Service::new(Box::new(source), dyn_observers, config(2));

        let report = service.run_once(CancellationToken::new()).await.unwrap();

        assert_eq!(broken.fork_calls().len(), 0);
        assert_eq!(broken.finish_calls(), 0);
        assert_eq!(healthy.fork_calls().len(), 2);
        assert_eq!(healthy.finish_calls(), 1);
        let (_, broken_report) = report
            .per_observer
            .iter()
            .find(|(name, _)| name == "broken")
            .unwrap();
        assert!(broken_report.is_partial());
    }
}
