//! Data model and trait contracts for the satellite ranged-loop sweep.
//!
//! This crate has no opinions about scheduling, concurrency, or any concrete
//! observer — it only defines what a [`Segment`](segment::Segment) is, what a
//! [`SegmentSource`](source::SegmentSource) promises, and what an
//! [`Observer`](observer::Observer) looks like. `rangedloop-service` drives
//! the sweep; `rangedloop-observers` implements the catalogue of observers.

pub mod cycle;
pub mod error;
pub mod observer;
pub mod range;
pub mod segment;
pub mod source;

pub use cycle::{CycleReport, CycleStatus, ObserverReport, PartitionOutcome, ProgressCounter};
pub use error::{IterateError, ObserverError, ServiceError, SourceError, SplitError};
pub use observer::{DynObserver, Observer, RangeContext};
pub use range::{ranges_tile_keyspace, UuidRange};
pub use segment::{NodeId, Piece, RedundancyScheme, Segment, StreamId};
pub use source::{RangeProvider, RangeProviderBoxed, SegmentSource, SegmentSourceBoxed, YieldFn};
