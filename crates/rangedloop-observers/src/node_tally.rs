//! NodeTally observer (spec.md §4.7): aggregates byte-hours per storage node
//! and writes an accounting rollup at the end of the cycle.

use crate::collab::{AccountingRow, AccountingSink, CollabError};
use rangedloop_core::{NodeId, Observer, ObserverError, RangeContext, Segment};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

/// Placement horizon used to convert a segment's size into byte-hours: how
/// long a piece is assumed to stay on a node per cycle, for nodes without a
/// tracked expiry.
const DEFAULT_HORIZON: Duration = Duration::from_secs(3600);

pub struct NodeTallyObserver<S> {
    sink: S,
    totals: Mutex<HashMap<NodeId, i64>>,
}

impl<S: AccountingSink> NodeTallyObserver<S> {
    #[must_use]
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            totals: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn totals(&self) -> HashMap<NodeId, i64> {
        self.totals.lock().unwrap().clone()
    }

    fn byte_hours(segment: &Segment, now: SystemTime) -> i64 {
        let horizon = segment
            .expires_at
            .and_then(|expires| expires.duration_since(now).ok())
            .unwrap_or(DEFAULT_HORIZON);
        let hours = horizon.as_secs_f64() / 3600.0;
        (segment.plain_size as f64 * hours).round() as i64
    }
}

#[derive(Default)]
pub struct NodeTallyPartition {
    local_totals: HashMap<NodeId, i64>,
}

impl<S: AccountingSink + Send + Sync> Observer for NodeTallyObserver<S> {
    type Partition = NodeTallyPartition;

    fn name(&self) -> &str {
        "node_tally"
    }

    async fn start(&self, _cycle_start: SystemTime) -> Result<(), ObserverError> {
        self.totals.lock().unwrap().clear();
        Ok(())
    }

    async fn fork(&self, _ctx: &RangeContext) -> Result<Self::Partition, ObserverError> {
        Ok(NodeTallyPartition::default())
    }

    async fn process(
        &self,
        _ctx: &RangeContext,
        partition: &mut Self::Partition,
        batch: &[Segment],
    ) -> Result<(), ObserverError> {
        let now = SystemTime::now();
        for segment in batch {
            let contribution = Self::byte_hours(segment, now);
            for piece in &segment.pieces {
                *partition.local_totals.entry(piece.node).or_insert(0) += contribution;
            }
        }
        Ok(())
    }

    async fn join(&self, partition: Self::Partition) -> Result<(), ObserverError> {
        let mut totals = self.totals.lock().unwrap();
        for (node, amount) in partition.local_totals {
            *totals.entry(node).or_insert(0) += amount;
        }
        Ok(())
    }

    async fn finish(&self) -> Result<(), ObserverError> {
        let rows: Vec<AccountingRow> = self
            .totals
            .lock()
            .unwrap()
            .iter()
            .map(|(&node, &byte_hours)| AccountingRow { node, byte_hours })
            .collect();
        if rows.is_empty() {
            return Ok(());
        }
        self.sink
            .write_rollup(rows)
            .await
            .map_err(|e: CollabError| ObserverError::Finish(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::InMemoryCollaborators;
    use rangedloop_core::{Piece, RedundancyScheme};
    use std::sync::Arc;
    use uuid::Uuid;

    fn segment(nodes: &[NodeId]) -> Segment {
        Segment {
            stream_id: Uuid::new_v4(),
            position: 0,
            placement: 0,
            created_at: SystemTime::now(),
            expires_at: None,
            encrypted_size: 1000,
            plain_size: 1000,
            redundancy: RedundancyScheme {
                required_shares: 1,
                repair_shares: 1,
                optimal_shares: 1,
                total_shares: nodes.len() as u16,
                share_size: 1,
            },
            pieces: nodes
                .iter()
                .enumerate()
                .map(|(i, &node)| Piece {
                    node,
                    number: i as u16,
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn join_accumulates_across_ranges_and_finish_writes_a_row_per_node() {
        let collab = Arc::new(InMemoryCollaborators::new());
        let observer = NodeTallyObserver::new(collab.clone());
        let node = NodeId::new([3; 32]);
        let ctx = RangeContext {
            range_index: 0,
            range: rangedloop_core::UuidRange::full(),
            progress: Arc::new(rangedloop_core::ProgressCounter::new(1000)),
        };

        observer.start(SystemTime::now()).await.unwrap();
        for _ in 0..2 {
            let mut partition = observer.fork(&ctx).await.unwrap();
            observer
                .process(&ctx, &mut partition, &[segment(&[node])])
                .await
                .unwrap();
            observer.join(partition).await.unwrap();
        }
        observer.finish().await.unwrap();

        let rows = collab.accounting_rows.lock().unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].byte_hours > 0);
    }
}
