use crate::{Scalar, Vec2};
use itertools::iproduct;
use smallvec::SmallVec;
use std::collections::HashMap;

/// Represents a single bucket. A bucket contains a list of the indices of the bodies within it.
///
/// A `SmallVec` is used to prevent unnecessary allocation.
type Bucket = SmallVec<[usize; 4]>;

/// A bucket coordinate packed into one key, `x` in the high half and `y` in the low half.
pub type BucketKey = u64;

pub fn pack_key(x: i32, y: i32) -> BucketKey {
    ((x as u32 as u64) << 32) | (y as u32 as u64)
}

pub fn unpack_key(key: BucketKey) -> (i32, i32) {
    ((key >> 32) as u32 as i32, key as u32 as i32)
}

/// Uniform spatial hash used to speed up neighbor finding for droplets and leaves.
///
/// Unlike a dense grid this doesn't need bounds, so bodies that leave the window still land
/// in a bucket.
#[derive(Debug, Clone)]
pub struct SpatialHash {
    buckets: HashMap<BucketKey, Bucket>,
    bucket_size: Scalar,
    one_over_bucket_size: Scalar,
}

impl SpatialHash {
    pub fn new(bucket_size: Scalar) -> Self {
        SpatialHash {
            buckets: HashMap::new(),
            bucket_size,
            one_over_bucket_size: 1. / bucket_size,
        }
    }

    pub fn bucket_size(&self) -> Scalar {
        self.bucket_size
    }

    pub fn bucket_coord(&self, position: Vec2) -> (i32, i32) {
        (
            (position.x * self.one_over_bucket_size).floor() as i32,
            (position.y * self.one_over_bucket_size).floor() as i32,
        )
    }

    /// Clears the hash and inserts every position, keyed by its index in the slice.
    pub fn rebuild(&mut self, positions: impl IntoIterator<Item = Vec2>) {
        // keep the allocations of buckets that stay occupied from frame to frame
        self.buckets.values_mut().for_each(|bucket| bucket.clear());
        for (index, position) in positions.into_iter().enumerate() {
            self.insert(position, index);
        }
        self.buckets.retain(|_, bucket| !bucket.is_empty());
    }

    pub fn insert(&mut self, position: Vec2, index: usize) {
        let (x, y) = self.bucket_coord(position);
        self.buckets.entry(pack_key(x, y)).or_default().push(index);
    }

    /// All indices in the 3x3 block of buckets around `position`.
    pub fn get_neighbors(&self, position: Vec2) -> impl Iterator<Item = usize> + Clone + '_ {
        self.get_neighbors_within(position, 1)
    }

    /// All indices in the `(2 * reach + 1)²` block of buckets around `position`.
    pub fn get_neighbors_within(
        &self,
        position: Vec2,
        reach: i32,
    ) -> impl Iterator<Item = usize> + Clone + '_ {
        let (cx, cy) = self.bucket_coord(position);
        iproduct!(cy - reach..=cy + reach, cx - reach..=cx + reach)
            .filter_map(move |(y, x)| self.buckets.get(&pack_key(x, y)))
            .flat_map(|bucket| bucket.iter().copied())
    }

    /// Number of buckets needed on each side to cover every point within `radius`.
    pub fn reach_for(&self, radius: Scalar) -> i32 {
        ((radius * self.one_over_bucket_size).ceil() as i32).max(1)
    }

    pub fn len(&self) -> usize {
        self.buckets.values().map(|bucket| bucket.len()).sum()
    }
}
