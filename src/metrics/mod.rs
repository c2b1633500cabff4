//! Span-to-metrics aggregation.
//!
//! Everything between an incoming trace batch and an outgoing metrics batch
//! lives here: span field extraction, dimension resolution, metric keys,
//! the dimension caches, the two histogram forms and the five accumulation
//! pipelines the [`aggregator::SpanAggregator`] drives.

pub mod aggregator;
pub mod cache;
pub mod dimensions;
pub mod exponential;
pub mod filter;
pub mod histogram;
pub mod keys;
pub mod output;
pub mod pipeline;
pub mod remote;
pub mod span;

pub use aggregator::SpanAggregator;
pub use cache::EvictionCache;
pub use dimensions::{AttributeMap, Dimension};
pub use exponential::ExponentialHistogram;
pub use filter::ExcludeFilter;
pub use histogram::{Exemplar, HistogramData};
pub use keys::MetricKey;
