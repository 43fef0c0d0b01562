//! A self-contained synthetic [`SegmentSource`], the demo's counterpart to
//! the teacher's `SimulatedBackendExporter`: a small in-file fake standing in
//! for the real metainfo database, with no shared state with the test doubles
//! in `rangedloop-testkit`.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rangedloop_core::{
    IterateError, NodeId, Piece, RangeProvider, RedundancyScheme, Segment, SegmentSource,
    SourceError, UuidRange,
};
use rangedloop_splitter::UniformSplitter;
use std::future::Future;
use std::time::{Duration, SystemTime};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const NODE_POOL_SIZE: u8 = 40;

/// A small, fixed pool of node ids, keyed by their first byte so
/// [`FirstByteClassifier`](crate::FirstByteClassifier) sees more than one
/// class in the demo run.
#[must_use]
pub fn demo_nodes() -> Vec<NodeId> {
    (0..NODE_POOL_SIZE)
        .map(|i| {
            let mut bytes = [0u8; 32];
            bytes[0] = i;
            NodeId::new(bytes)
        })
        .collect()
}

pub struct SyntheticSource {
    total: usize,
    seed: u64,
}

impl SyntheticSource {
    #[must_use]
    pub fn new(total: usize, seed: u64) -> Self {
        Self { total, seed }
    }
}

impl SegmentSource for SyntheticSource {
    fn create_ranges(
        &self,
        n_suggested: u32,
        _batch_size: usize,
    ) -> impl Future<
        Output = Result<(Vec<Box<dyn rangedloop_core::RangeProviderBoxed>>, i64), SourceError>,
    > + Send {
        let n = n_suggested.max(1);
        let total = self.total;
        let seed = self.seed;
        async move {
            let ranges = UniformSplitter::split(n)
                .map_err(|e| SourceError::Backend(e.to_string()))?;
            let nodes = demo_nodes();

            let mut rng = StdRng::seed_from_u64(seed);
            let mut segments: Vec<Segment> = (0..total)
                .map(|_| random_segment(&mut rng, &nodes))
                .collect();
            segments.sort_by_key(Segment::sort_key);

            let mut providers: Vec<Box<dyn rangedloop_core::RangeProviderBoxed>> =
                Vec::with_capacity(ranges.len());
            for range in ranges {
                let range_segments = segments
                    .iter()
                    .filter(|s| range.contains(s.stream_id))
                    .cloned()
                    .collect();
                providers.push(Box::new(SyntheticRangeProvider {
                    range,
                    segments: range_segments,
                }));
            }

            Ok((providers, total as i64))
        }
    }
}

struct SyntheticRangeProvider {
    range: UuidRange,
    segments: Vec<Segment>,
}

impl RangeProvider for SyntheticRangeProvider {
    fn range(&self) -> UuidRange {
        self.range
    }

    fn iterate(
        &self,
        cancel: &CancellationToken,
        batch_size: usize,
        yield_fn: &mut rangedloop_core::YieldFn<'_>,
    ) -> impl Future<Output = Result<(), IterateError>> + Send {
        async move {
            for chunk in self.segments.chunks(batch_size.max(1)) {
                if cancel.is_cancelled() {
                    return Ok(());
                }
                yield_fn(chunk.to_vec())
                    .await
                    .map_err(IterateError::YieldRejected)?;
            }
            Ok(())
        }
    }
}

fn random_segment(rng: &mut StdRng, nodes: &[NodeId]) -> Segment {
    let redundancy = RedundancyScheme {
        required_shares: 4,
        repair_shares: 6,
        optimal_shares: 8,
        total_shares: 10,
        share_size: 256 * 1024,
    };

    let mut chosen: Vec<NodeId> = Vec::with_capacity(redundancy.total_shares as usize);
    while chosen.len() < redundancy.total_shares as usize {
        let candidate = nodes[rng.gen_range(0..nodes.len())];
        if !chosen.contains(&candidate) {
            chosen.push(candidate);
        }
    }
    let pieces = chosen
        .into_iter()
        .enumerate()
        .map(|(number, node)| Piece {
            node,
            number: number as u16,
        })
        .collect();

    Segment {
        stream_id: Uuid::from_u128(rng.gen::<u128>()),
        position: rng.gen_range(0..16),
        placement: rng.gen_range(0..500),
        created_at: SystemTime::now(),
        expires_at: Some(SystemTime::now() + Duration::from_secs(rng.gen_range(3600..86_400))),
        encrypted_size: rng.gen_range(1_024..4_194_304),
        plain_size: rng.gen_range(1_024..4_194_304),
        redundancy,
        pieces,
    }
}
