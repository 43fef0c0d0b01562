//! Collaborator interfaces consumed by the observer catalogue (spec.md §6).
//!
//! These are the write sinks and read-only caches the satellite's other
//! subsystems (verify queue, repair queue, accounting store, overlay
//! reliability cache, bloom filter object store) expose to observers. The
//! subsystems themselves are out of scope (spec.md §1); only the interface
//! an observer consumes lives here, plus an in-memory double of each for
//! tests, following the same "trait + recording double" shape the teacher
//! uses for `SpanExporter` + `TestExporter`.

use rangedloop_core::{NodeId, StreamId};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum CollabError {
    #[error("sink unavailable: {0}")]
    Unavailable(String),
}

/// One segment selected for the verify (audit) queue.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifyEntry {
    pub stream_id: StreamId,
    pub position: i64,
}

pub trait VerifyQueue: Send + Sync {
    fn enqueue(
        &self,
        entries: Vec<VerifyEntry>,
    ) -> impl Future<Output = Result<(), CollabError>> + Send;
}

/// One segment queued for repair, with the health fraction that triggered it.
#[derive(Debug, Clone, PartialEq)]
pub struct RepairEntry {
    pub stream_id: StreamId,
    pub position: i64,
    pub retrievable_pieces: u16,
    pub required_shares: u16,
}

pub trait RepairQueue: Send + Sync {
    fn enqueue(
        &self,
        entries: Vec<RepairEntry>,
    ) -> impl Future<Output = Result<(), CollabError>> + Send;
}

/// Read-only view of which nodes the overlay currently considers online.
/// No reverse dependency from the core (spec.md §6): observers query it,
/// it never calls back into the ranged loop.
pub trait ReliabilityCache: Send + Sync {
    fn is_online(&self, node: NodeId) -> bool;
}

/// One node's byte-hour accounting row for one cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct AccountingRow {
    pub node: NodeId,
    pub byte_hours: i64,
}

pub trait AccountingSink: Send + Sync {
    fn write_rollup(
        &self,
        rows: Vec<AccountingRow>,
    ) -> impl Future<Output = Result<(), CollabError>> + Send;
}

pub trait BloomFilterStore: Send + Sync {
    fn upload(
        &self,
        node: NodeId,
        filter: Vec<u8>,
    ) -> impl Future<Output = Result<(), CollabError>> + Send;
}

pub trait PieceStore: Send + Sync {
    fn persist(
        &self,
        tallies: HashMap<NodeId, u64>,
    ) -> impl Future<Output = Result<(), CollabError>> + Send;
}

/// In-memory double for every collaborator trait above, used by this crate's
/// own tests and by the demo binary.
#[derive(Default)]
pub struct InMemoryCollaborators {
    pub verify_entries: Mutex<Vec<VerifyEntry>>,
    pub repair_entries: Mutex<Vec<RepairEntry>>,
    pub online_nodes: Mutex<std::collections::HashSet<NodeId>>,
    pub accounting_rows: Mutex<Vec<AccountingRow>>,
    pub bloom_uploads: Mutex<Vec<(NodeId, Vec<u8>)>>,
    pub piece_tallies: Mutex<HashMap<NodeId, u64>>,
}

impl InMemoryCollaborators {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_online_nodes(self, nodes: impl IntoIterator<Item = NodeId>) -> Self {
        self.online_nodes.lock().unwrap().extend(nodes);
        self
    }
}

impl VerifyQueue for InMemoryCollaborators {
    async fn enqueue(&self, entries: Vec<VerifyEntry>) -> Result<(), CollabError> {
        self.verify_entries.lock().unwrap().extend(entries);
        Ok(())
    }
}

impl RepairQueue for InMemoryCollaborators {
    async fn enqueue(&self, entries: Vec<RepairEntry>) -> Result<(), CollabError> {
        self.repair_entries.lock().unwrap().extend(entries);
        Ok(())
    }
}

impl ReliabilityCache for InMemoryCollaborators {
    fn is_online(&self, node: NodeId) -> bool {
        self.online_nodes.lock().unwrap().contains(&node)
    }
}

impl AccountingSink for InMemoryCollaborators {
    async fn write_rollup(&self, rows: Vec<AccountingRow>) -> Result<(), CollabError> {
        self.accounting_rows.lock().unwrap().extend(rows);
        Ok(())
    }
}

impl BloomFilterStore for InMemoryCollaborators {
    async fn upload(&self, node: NodeId, filter: Vec<u8>) -> Result<(), CollabError> {
        self.bloom_uploads.lock().unwrap().push((node, filter));
        Ok(())
    }
}

impl PieceStore for InMemoryCollaborators {
    async fn persist(&self, tallies: HashMap<NodeId, u64>) -> Result<(), CollabError> {
        let mut guard = self.piece_tallies.lock().unwrap();
        for (node, count) in tallies {
            *guard.entry(node).or_insert(0) += count;
        }
        Ok(())
    }
}

// Blanket impls so observers can hold `Arc<dyn ...>` or `Arc<ConcreteSink>`
// collaborators interchangeably, the same shape the teacher uses to let
// `Arc<dyn SpanExporter>` satisfy code written against `impl SpanExporter`.
impl<T: VerifyQueue + ?Sized> VerifyQueue for std::sync::Arc<T> {
    async fn enqueue(&self, entries: Vec<VerifyEntry>) -> Result<(), CollabError> {
        T::enqueue(self, entries).await
    }
}

impl<T: RepairQueue + ?Sized> RepairQueue for std::sync::Arc<T> {
    async fn enqueue(&self, entries: Vec<RepairEntry>) -> Result<(), CollabError> {
        T::enqueue(self, entries).await
    }
}

impl<T: ReliabilityCache + ?Sized> ReliabilityCache for std::sync::Arc<T> {
    fn is_online(&self, node: NodeId) -> bool {
        T::is_online(self, node)
    }
}

impl<T: AccountingSink + ?Sized> AccountingSink for std::sync::Arc<T> {
    async fn write_rollup(&self, rows: Vec<AccountingRow>) -> Result<(), CollabError> {
        T::write_rollup(self, rows).await
    }
}

impl<T: BloomFilterStore + ?Sized> BloomFilterStore for std::sync::Arc<T> {
    async fn upload(&self, node: NodeId, filter: Vec<u8>) -> Result<(), CollabError> {
        T::upload(self, node, filter).await
    }
}

impl<T: PieceStore + ?Sized> PieceStore for std::sync::Arc<T> {
    async fn persist(&self, tallies: HashMap<NodeId, u64>) -> Result<(), CollabError> {
        T::persist(self, tallies).await
    }
}
