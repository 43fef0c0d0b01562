//! The segment record yielded by a [`crate::source::SegmentSource`] scan.

use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use uuid::Uuid;

/// Opaque 128-bit stream identifier.
pub type StreamId = Uuid;

/// 256-bit storage node identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub [u8; 32]);

impl NodeId {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in &self.0[..4] {
            write!(f, "{byte:02x}")?;
        }
        write!(f, "..")
    }
}

/// A piece of a segment held on one storage node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Piece {
    pub node: NodeId,
    pub number: u16,
}

/// Redundancy parameters for a segment's erasure-coded stripe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedundancyScheme {
    pub required_shares: u16,
    pub repair_shares: u16,
    pub optimal_shares: u16,
    pub total_shares: u16,
    pub share_size: u32,
}

impl RedundancyScheme {
    /// `true` once fewer than `required_shares` pieces remain retrievable.
    #[must_use]
    pub fn is_unrecoverable(&self, retrievable_pieces: u16) -> bool {
        retrievable_pieces < self.required_shares
    }

    /// `true` once fewer than `repair_shares` pieces remain retrievable
    /// (the segment should be queued for repair before it becomes unrecoverable).
    #[must_use]
    pub fn needs_repair(&self, retrievable_pieces: u16) -> bool {
        retrievable_pieces < self.repair_shares
    }
}

/// One striped unit of an object, as seen by the ranged loop.
///
/// Segments are immutable from the sweep's viewpoint: nothing in this crate
/// or its callers ever mutates a `Segment` once a [`RangeProvider`](crate::source::RangeProvider)
/// has yielded it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub stream_id: StreamId,
    pub position: i64,
    pub placement: i16,
    pub created_at: SystemTime,
    pub expires_at: Option<SystemTime>,
    pub encrypted_size: i64,
    pub plain_size: i64,
    pub redundancy: RedundancyScheme,
    pub pieces: Vec<Piece>,
}

impl Segment {
    /// Sort key used to establish the ascending `(stream_id, position)` order
    /// the source is required to yield segments in.
    #[must_use]
    pub fn sort_key(&self) -> (StreamId, i64) {
        (self.stream_id, self.position)
    }

    #[must_use]
    pub fn is_inline(&self) -> bool {
        self.pieces.is_empty()
    }

    #[must_use]
    pub fn retrievable_pieces(&self, online: &dyn Fn(NodeId) -> bool) -> u16 {
        self.pieces
            .iter()
            .filter(|p| online(p.node))
            .count()
            .try_into()
            .unwrap_or(u16::MAX)
    }
}
