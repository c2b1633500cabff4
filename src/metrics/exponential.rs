//! Streaming base-2 exponential histogram.
//!
//! Bucket index `i` at scale `s` covers `(2^(i/2^s), 2^((i+1)/2^s)]`. The
//! scale starts high for maximum resolution and drops by pairwise bucket
//! merges whenever a new observation would stretch a half past the bucket
//! cap, so memory stays bounded no matter the value range. The merge layout
//! is internal; `count`, `sum`, `min`, `max` and `zero_count` are exact.

use std::collections::VecDeque;

/// Maximum buckets kept per half before downscaling.
pub const MAX_BUCKETS: usize = 160;

/// Highest (starting) scale.
pub const MAX_SCALE: i32 = 20;

/// One sign half: a contiguous run of bucket counts starting at `index_start`.
#[derive(Debug, Clone, Default)]
pub struct Buckets {
    counts: VecDeque<u64>,
    index_start: i64,
}

impl Buckets {
    /// The proto `offset` of the first bucket.
    pub fn offset(&self) -> i64 {
        self.index_start
    }

    /// Bucket counts in index order.
    pub fn counts(&self) -> impl Iterator<Item = u64> + '_ {
        self.counts.iter().copied()
    }

    /// Number of buckets currently held.
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    /// Whether this half has no buckets.
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// How many scale reductions are needed before `index` fits within
    /// `max` buckets of the existing run.
    fn shift_needed(&self, index: i64, max: usize) -> i32 {
        if self.counts.is_empty() {
            return 0;
        }
        let mut low = self.index_start.min(index);
        let mut high = (self.index_start + self.counts.len() as i64 - 1).max(index);
        let mut shift = 0;
        while (high - low + 1) as usize > max {
            low >>= 1;
            high >>= 1;
            shift += 1;
        }
        shift
    }

    /// Merges bucket pairs `shift` times: index `i` folds into `i >> shift`.
    fn downscale(&mut self, shift: i32) {
        if shift <= 0 || self.counts.is_empty() {
            return;
        }
        let old_start = self.index_start;
        let old_end = old_start + self.counts.len() as i64 - 1;
        let new_start = old_start >> shift;
        let new_len = ((old_end >> shift) - new_start + 1) as usize;
        let mut merged = vec![0u64; new_len];
        for (i, count) in self.counts.drain(..).enumerate() {
            let new_index = (old_start + i as i64) >> shift;
            merged[(new_index - new_start) as usize] += count;
        }
        self.counts = merged.into();
        self.index_start = new_start;
    }

    fn increment(&mut self, index: i64) {
        if self.counts.is_empty() {
            self.index_start = index;
            self.counts.push_back(0);
        } else if index < self.index_start {
            for _ in index..self.index_start {
                self.counts.push_front(0);
            }
            self.index_start = index;
        } else {
            let end = self.index_start + self.counts.len() as i64 - 1;
            for _ in end..index {
                self.counts.push_back(0);
            }
        }
        self.counts[(index - self.index_start) as usize] += 1;
    }
}

/// Scale-adjusting exponential histogram state for one metric key.
#[derive(Debug, Clone)]
pub struct ExponentialHistogram {
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
    zero_count: u64,
    scale: i32,
    positive: Buckets,
    negative: Buckets,
}

impl Default for ExponentialHistogram {
    fn default() -> Self {
        Self::new()
    }
}

impl ExponentialHistogram {
    /// An empty histogram at the starting scale.
    pub fn new() -> Self {
        Self {
            count: 0,
            sum: 0.0,
            min: 0.0,
            max: 0.0,
            zero_count: 0,
            scale: MAX_SCALE,
            positive: Buckets::default(),
            negative: Buckets::default(),
        }
    }

    /// Records one observation without re-scanning history. Zero values only
    /// increment the zero count; nonzero values land in a base-2 bucket of
    /// the matching sign, downscaling both halves first if the bucket span
    /// would exceed the cap.
    pub fn observe(&mut self, value: f64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.count += 1;
        self.sum += value;

        if value == 0.0 {
            self.zero_count += 1;
            return;
        }

        let positive = value > 0.0;
        let magnitude = value.abs();
        let mut index = map_index(magnitude, self.scale);

        let half = if positive { &self.positive } else { &self.negative };
        let shift = half.shift_needed(index, MAX_BUCKETS);
        if shift > 0 {
            // The scale is shared, so both halves merge together.
            self.scale -= shift;
            self.positive.downscale(shift);
            self.negative.downscale(shift);
            index >>= shift;
        }

        if positive {
            self.positive.increment(index);
        } else {
            self.negative.increment(index);
        }
    }

    /// Total number of observations.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Sum of all observed values.
    pub fn sum(&self) -> f64 {
        self.sum
    }

    /// Smallest observed value. Meaningful only when `count > 0`.
    pub fn min(&self) -> f64 {
        self.min
    }

    /// Largest observed value. Meaningful only when `count > 0`.
    pub fn max(&self) -> f64 {
        self.max
    }

    /// Number of exactly-zero observations.
    pub fn zero_count(&self) -> u64 {
        self.zero_count
    }

    /// Current scale factor.
    pub fn scale(&self) -> i32 {
        self.scale
    }

    /// The positive-value bucket half.
    pub fn positive(&self) -> &Buckets {
        &self.positive
    }

    /// The negative-value bucket half.
    pub fn negative(&self) -> &Buckets {
        &self.negative
    }
}

/// Maps a magnitude to its bucket index at the given scale: the unique `i`
/// with `2^(i/2^s) < magnitude <= 2^((i+1)/2^s)`.
fn map_index(magnitude: f64, scale: i32) -> i64 {
    (magnitude.log2() * f64::exp2(f64::from(scale))).ceil() as i64 - 1
}
