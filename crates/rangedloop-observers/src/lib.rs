//! The built-in observer and the catalogue of storage-network observers that
//! plug into the ranged-loop sweep defined by `rangedloop-core`.

pub mod audit;
pub mod bloom;
pub mod collab;
pub mod durability;
pub mod gc_bloom_filter;
pub mod live_count;
pub mod metrics_observer;
pub mod node_tally;
pub mod piece_tracker;
pub mod repair_checker;
pub mod sequence;

pub use audit::AuditObserver;
pub use collab::{
    AccountingRow, AccountingSink, BloomFilterStore, CollabError, InMemoryCollaborators,
    PieceStore, RepairEntry, RepairQueue, ReliabilityCache, VerifyEntry, VerifyQueue,
};
pub use durability::{DurabilityObserver, NodeClassifier};
pub use gc_bloom_filter::GcBloomFilterObserver;
pub use live_count::LiveCountObserver;
pub use metrics_observer::{CycleMetricsSnapshot, MetricsObserver};
pub use node_tally::NodeTallyObserver;
pub use piece_tracker::PieceTrackerObserver;
pub use repair_checker::{HealthHistogram, RepairCheckerObserver};
pub use sequence::SequenceObserver;
