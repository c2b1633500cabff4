//! Spanbridge - derive RED metrics from OpenTelemetry trace batches.
//!
//! Spanbridge sits inline in a trace pipeline: every batch is aggregated
//! into request, error and duration metrics and then forwarded unmodified
//! to the next consumer. Accumulated metrics are flushed to a metrics
//! consumer on a fixed interval.
//!
//! # Derived metrics
//!
//! - `calls_total`: call count per service/operation/kind/status
//! - `latency`: fixed-bucket latency histogram, optionally also exported
//!   as an exponential histogram
//! - `external_call_latency_sum`/`_count`: client calls by remote address
//! - `db_latency_sum`/`_count`: database calls by system and name
//!
//! # Architecture
//!
//! - `core`: configuration and error types
//! - `metrics`: the synchronous aggregation engine
//! - `processor`: consumer seams, locking and the periodic flush task
//!
//! # Example
//!
//! ```no_run
//! use spanbridge::core::Config;
//! use spanbridge::processor::{NoopTraceConsumer, SpanMetricsProcessor};
//! use std::sync::Arc;
//! # use async_trait::async_trait;
//! # struct StdoutMetrics;
//! # #[async_trait]
//! # impl spanbridge::processor::MetricsConsumer for StdoutMetrics {
//! #     async fn consume_metrics(
//! #         &self,
//! #         _: opentelemetry_proto::tonic::collector::metrics::v1::ExportMetricsServiceRequest,
//! #     ) -> spanbridge::core::Result<()> { Ok(()) }
//! # }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let processor = SpanMetricsProcessor::new(
//!         &config,
//!         Arc::new(StdoutMetrics),
//!         Arc::new(NoopTraceConsumer),
//!     )?;
//!     processor.start();
//!     // feed processor.consume_traces(..) from a receiver
//!     processor.shutdown().await;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod core;
pub mod metrics;
pub mod processor;

// Re-export core types for convenience
pub use crate::core::{Config, Error, Result};
pub use crate::metrics::SpanAggregator;
pub use crate::processor::{MetricsConsumer, SpanMetricsProcessor, TraceConsumer};
