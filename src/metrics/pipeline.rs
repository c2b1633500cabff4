//! One accumulation pipeline: a dimension list, a bounded dimension cache
//! and an accumulator map with a shared lifecycle.
//!
//! The aggregator instantiates five of these (latency, exponential latency,
//! calls, external calls, db calls); each resets, evicts and prunes
//! independently of the others.

use crate::core::{Error, Result};
use crate::metrics::cache::EvictionCache;
use crate::metrics::dimensions::{AttributeMap, Dimension};
use crate::metrics::keys::MetricKey;
use rustc_hash::FxHashMap;

/// A metric pipeline parameterized by its accumulator type.
#[derive(Debug)]
pub struct Pipeline<A> {
    name: &'static str,
    dimensions: Vec<Dimension>,
    cache: EvictionCache<MetricKey, AttributeMap>,
    accumulators: FxHashMap<MetricKey, A>,
}

impl<A> Pipeline<A> {
    /// Creates a pipeline with its own dimension cache.
    pub fn new(name: &'static str, dimensions: Vec<Dimension>, cache_size: usize) -> Result<Self> {
        Ok(Self {
            name,
            dimensions,
            cache: EvictionCache::new(cache_size)?,
            accumulators: FxHashMap::default(),
        })
    }

    /// The pipeline's metric name (used in consistency errors).
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The dimension list this pipeline resolves per span.
    pub fn dimensions(&self) -> &[Dimension] {
        &self.dimensions
    }

    /// Caches the dimension snapshot for `key` on first sight. The lookup
    /// doubles as a recency touch (and revival) for keys already cached;
    /// first-seen-wins, so later spans never rewrite the snapshot.
    pub fn cache_attributes_with(
        &mut self,
        key: &MetricKey,
        build: impl FnOnce(&[Dimension]) -> AttributeMap,
    ) {
        if self.cache.get(key).is_none() {
            let attrs = build(&self.dimensions);
            self.cache.add(key.clone(), attrs);
        }
    }

    /// The accumulator for `key`, lazily created.
    pub fn accumulator(&mut self, key: &MetricKey, init: impl FnOnce() -> A) -> &mut A {
        self.accumulators.entry(key.clone()).or_insert_with(init)
    }

    /// Maps every accumulator with its cached dimension snapshot into an
    /// output value. A key with no snapshot is an internal-consistency
    /// error; the caller aborts the whole batch build and leaves state
    /// untouched so the next cycle can retry.
    pub fn collect<T>(
        &mut self,
        mut point: impl FnMut(&MetricKey, &A, &AttributeMap) -> T,
    ) -> Result<Vec<T>> {
        let Self {
            name,
            cache,
            accumulators,
            ..
        } = self;
        let mut out = Vec::with_capacity(accumulators.len());
        for (key, accumulator) in accumulators.iter() {
            let attrs = cache.get(key).ok_or_else(|| Error::DimensionsNotCached {
                metric: name,
                key: key.as_str().to_string(),
            })?;
            out.push(point(key, accumulator, attrs));
        }
        Ok(out)
    }

    /// Post-export reconciliation: drop the evicted-items tier, then prune
    /// every accumulator whose dimension identity is gone from the primary
    /// cache and was not revived this cycle.
    pub fn reconcile(&mut self) {
        self.cache.remove_evicted_items();
        let cache = &self.cache;
        self.accumulators.retain(|key, _| cache.contains(key));
    }

    /// Delta-temporality reset: empty the accumulator map and purge both
    /// cache tiers.
    pub fn reset(&mut self) {
        self.accumulators.clear();
        self.cache.purge();
    }

    /// Mutable pass over every accumulator (exemplar clearing).
    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut A> {
        self.accumulators.values_mut()
    }

    /// Whether an accumulator exists for `key`.
    pub fn contains_key(&self, key: &MetricKey) -> bool {
        self.accumulators.contains_key(key)
    }

    /// Number of live accumulators.
    pub fn len(&self) -> usize {
        self.accumulators.len()
    }

    /// Whether the pipeline holds no accumulators.
    pub fn is_empty(&self) -> bool {
        self.accumulators.is_empty()
    }
}
