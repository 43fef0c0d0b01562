//! Default range splitter (spec.md §4.2).
//!
//! Used when a [`rangedloop_core::SegmentSource`] cannot split the keyspace
//! off its own index statistics and falls back to uniform division.

use rangedloop_core::{SplitError, UuidRange};
use uuid::Uuid;

/// Divides the 128-bit key space into `n` equal half-open intervals by
/// integer arithmetic. Remainder is distributed to the earliest ranges.
pub struct UniformSplitter;

impl UniformSplitter {
    /// # Errors
    /// Returns [`SplitError::ZeroRanges`] if `n == 0`.
    pub fn split(n: u32) -> Result<Vec<UuidRange>, SplitError> {
        if n == 0 {
            return Err(SplitError::ZeroRanges);
        }
        if n == 1 {
            return Ok(vec![UuidRange::full()]);
        }

        let n128 = u128::from(n);
        let base = u128::MAX / n128;
        let remainder = u128::MAX % n128;

        // boundaries[0] == 0, boundaries[n] == u128::MAX exactly, since
        // base * n + remainder == u128::MAX by the division identity.
        let mut boundaries = Vec::with_capacity(n as usize + 1);
        let mut cursor: u128 = 0;
        boundaries.push(cursor);
        for i in 0..n128 {
            let extra = u128::from(i < remainder);
            cursor += base + extra;
            boundaries.push(cursor);
        }

        let ranges = (0..n as usize)
            .map(|i| {
                let start = if i == 0 {
                    None
                } else {
                    Some(Uuid::from_u128(boundaries[i]))
                };
                let end = if i == n as usize - 1 {
                    None
                } else {
                    Some(Uuid::from_u128(boundaries[i + 1]))
                };
                UuidRange::new(start, end)
            })
            .collect();

        Ok(ranges)
    }
}
