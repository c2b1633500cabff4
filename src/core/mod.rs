//! Core configuration and error types for the span-to-metrics processor.

#![warn(missing_docs)]

pub mod config;
pub mod error;

// Re-export commonly used types
pub use config::{
    Config, DimensionSpec, ExcludePattern, Temporality, DEFAULT_DIMENSIONS_CACHE_SIZE,
    DEFAULT_LATENCY_BUCKETS_MS,
};
pub use error::{Error, Result};
