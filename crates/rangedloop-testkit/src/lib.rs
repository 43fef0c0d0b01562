//! In-memory `SegmentSource` and recording `Observer` test doubles shared by
//! `rangedloop-service` and `rangedloop-observers` test suites.

mod observer;
mod source;

pub use observer::{FaultPlan, RecordingObserver, RecordingPartition};
pub use source::{InMemorySource, ProviderFault};
