//! Per-span metric aggregation and flush-time batch assembly.
//!
//! One aggregator owns the five accumulation pipelines and everything they
//! share: the latency bounds, the exclude filter, the reusable key buffer
//! and the cardinality tracker. The processor wraps it in a single mutex;
//! nothing here performs I/O.

use crate::core::{Config, Result, Temporality};
use crate::metrics::dimensions::{
    self, build_custom_attrs, build_standard_attrs, CardinalityTracker, Dimension, DB_NAME_KEY,
    DB_SYSTEM_KEY, HTTP_STATUS_CODE_KEY,
};
use crate::metrics::exponential::ExponentialHistogram;
use crate::metrics::filter::ExcludeFilter;
use crate::metrics::histogram::HistogramData;
use crate::metrics::keys::{build_custom_key, build_standard_key};
use crate::metrics::output;
use crate::metrics::pipeline::Pipeline;
use crate::metrics::{remote, span as span_ext};
use opentelemetry_proto::tonic::collector::metrics::v1::ExportMetricsServiceRequest;
use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use opentelemetry_proto::tonic::common::v1::KeyValue;
use opentelemetry_proto::tonic::metrics::v1::NumberDataPoint;
use opentelemetry_proto::tonic::trace::v1::{span::SpanKind, Span};

/// Call count metric name.
pub const CALLS_METRIC: &str = "calls_total";
/// Latency metric name, shared by the fixed-bucket and exponential forms.
pub const LATENCY_METRIC: &str = "latency";
/// External-call latency sum metric name.
pub const EXTERNAL_SUM_METRIC: &str = "external_call_latency_sum";
/// External-call count metric name.
pub const EXTERNAL_COUNT_METRIC: &str = "external_call_latency_count";
/// Database-call latency sum metric name.
pub const DB_SUM_METRIC: &str = "db_latency_sum";
/// Database-call count metric name.
pub const DB_COUNT_METRIC: &str = "db_latency_count";

/// The in-process aggregation engine.
pub struct SpanAggregator {
    temporality: Temporality,
    skip_sanitize_label: bool,
    enable_exp_histogram: bool,
    bounds: Vec<f64>,
    filter: ExcludeFilter,
    start_timestamp: u64,

    latency: Pipeline<HistogramData>,
    exponential: Pipeline<ExponentialHistogram>,
    calls: Pipeline<HistogramData>,
    external: Pipeline<HistogramData>,
    db: Pipeline<HistogramData>,

    key_buf: String,
    cardinality: CardinalityTracker,
}

impl SpanAggregator {
    /// Builds the aggregator from a configuration, validating it first. All
    /// failure modes here are fatal configuration errors.
    pub fn new(config: &Config, start_timestamp: u64) -> Result<Self> {
        config.validate()?;

        let configured = dimensions::from_specs(&config.dimensions);
        let with_prefix = |prefix: &[Dimension]| -> Vec<Dimension> {
            prefix.iter().cloned().chain(configured.iter().cloned()).collect()
        };

        let call_dimensions = with_prefix(&[Dimension::named(HTTP_STATUS_CODE_KEY)]);
        let external_dimensions = with_prefix(&[Dimension::named(HTTP_STATUS_CODE_KEY)]);
        let db_dimensions = with_prefix(&[
            Dimension::named(DB_SYSTEM_KEY),
            Dimension::named(DB_NAME_KEY),
        ]);

        let cache_size = config.dimensions_cache_size;
        Ok(Self {
            temporality: config.aggregation_temporality,
            skip_sanitize_label: config.skip_sanitize_label,
            enable_exp_histogram: config.enable_exp_histogram,
            bounds: config.resolved_latency_bounds(),
            filter: ExcludeFilter::new(&config.exclude_patterns)?,
            start_timestamp,
            latency: Pipeline::new(LATENCY_METRIC, configured.clone(), cache_size)?,
            exponential: Pipeline::new(LATENCY_METRIC, configured, cache_size)?,
            calls: Pipeline::new(CALLS_METRIC, call_dimensions, cache_size)?,
            external: Pipeline::new(EXTERNAL_SUM_METRIC, external_dimensions, cache_size)?,
            db: Pipeline::new(DB_SUM_METRIC, db_dimensions, cache_size)?,
            key_buf: String::with_capacity(1024),
            cardinality: CardinalityTracker::default(),
        })
    }

    /// Aggregates every span in the batch. Resource-span groups without a
    /// `service.name` resource attribute carry no usable identity and are
    /// skipped.
    pub fn aggregate(&mut self, request: &ExportTraceServiceRequest) {
        for resource_spans in &request.resource_spans {
            let resource_attrs = resource_spans
                .resource
                .as_ref()
                .map(|r| r.attributes.as_slice())
                .unwrap_or_default();
            let Some(service_name) = span_ext::service_name(resource_attrs) else {
                continue;
            };
            for scope_spans in &resource_spans.scope_spans {
                for span in &scope_spans.spans {
                    self.aggregate_span(service_name, span, resource_attrs);
                }
            }
        }
    }

    fn aggregate_span(&mut self, service_name: &str, span: &Span, resource_attrs: &[KeyValue]) {
        if self.filter.should_skip(service_name, span, resource_attrs) {
            tracing::debug!(span = %span.name, service = %service_name, "skipping excluded span");
            return;
        }

        let latency_ms = span_ext::latency_ms(span);
        let bound_count = self.bounds.len();

        let key = build_standard_key(
            &mut self.key_buf,
            service_name,
            span,
            self.latency.dimensions(),
            resource_attrs,
        );
        self.latency.cache_attributes_with(&key, |dims| {
            build_standard_attrs(service_name, span, dims, resource_attrs, &mut self.cardinality)
        });
        self.latency
            .accumulator(&key, || HistogramData::new(bound_count))
            .observe(&self.bounds, latency_ms, &span.trace_id, &span.span_id);

        if self.enable_exp_histogram {
            let key = build_standard_key(
                &mut self.key_buf,
                service_name,
                span,
                self.exponential.dimensions(),
                resource_attrs,
            );
            self.exponential.cache_attributes_with(&key, |dims| {
                build_standard_attrs(service_name, span, dims, resource_attrs, &mut self.cardinality)
            });
            self.exponential
                .accumulator(&key, ExponentialHistogram::new)
                .observe(latency_ms);
        }

        let key = build_standard_key(
            &mut self.key_buf,
            service_name,
            span,
            self.calls.dimensions(),
            resource_attrs,
        );
        self.calls.cache_attributes_with(&key, |dims| {
            build_standard_attrs(service_name, span, dims, resource_attrs, &mut self.cardinality)
        });
        self.calls
            .accumulator(&key, || HistogramData::new(bound_count))
            .observe(&self.bounds, latency_ms, &span.trace_id, &span.span_id);

        if span_ext::span_kind(span) == SpanKind::Client {
            if let Some(address) = remote::remote_address(span) {
                let key = build_custom_key(
                    &mut self.key_buf,
                    service_name,
                    span,
                    self.external.dimensions(),
                    resource_attrs,
                    &[&address],
                );
                self.external.cache_attributes_with(&key, |dims| {
                    build_custom_attrs(
                        service_name,
                        span,
                        dims,
                        resource_attrs,
                        &[("address", dimensions::string_value(address.as_str()))],
                        &mut self.cardinality,
                    )
                });
                self.external
                    .accumulator(&key, || HistogramData::new(bound_count))
                    .observe(&self.bounds, latency_ms, &span.trace_id, &span.span_id);
            }
        }

        // Server-side spans of a db service describe handling, not calling.
        if span_ext::find_attribute(&span.attributes, DB_SYSTEM_KEY).is_some()
            && span_ext::span_kind(span) != SpanKind::Server
        {
            let key = build_custom_key(
                &mut self.key_buf,
                service_name,
                span,
                self.db.dimensions(),
                resource_attrs,
                &[],
            );
            self.db.cache_attributes_with(&key, |dims| {
                build_custom_attrs(
                    service_name,
                    span,
                    dims,
                    resource_attrs,
                    &[],
                    &mut self.cardinality,
                )
            });
            self.db
                .accumulator(&key, || HistogramData::new(bound_count))
                .observe(&self.bounds, latency_ms, &span.trace_id, &span.span_id);
        }
    }

    /// Builds the flush batch: calls, latency, external sum and count, db
    /// sum and count, and (when enabled) the exponential latency metric.
    ///
    /// A key missing from its dimension cache aborts the whole build with
    /// every accumulator untouched so the next cycle can retry. On success
    /// the caches reconcile, stale accumulators are pruned, and delta
    /// temporality resets all state.
    pub fn build_metrics(&mut self, timestamp: u64) -> Result<ExportMetricsServiceRequest> {
        let temporality = self.temporality;
        let skip = self.skip_sanitize_label;
        let start = self.start_timestamp;

        let call_points = self.calls.collect(|_, hist, attrs| {
            output::int_point(
                output::to_key_values(attrs, skip),
                start,
                timestamp,
                hist.count as i64,
            )
        })?;

        let bounds = &self.bounds;
        let latency_points = self.latency.collect(|_, hist, attrs| {
            output::histogram_point(
                hist,
                bounds,
                output::to_key_values(attrs, skip),
                start,
                timestamp,
            )
        })?;

        let external_points: Vec<(NumberDataPoint, NumberDataPoint)> =
            self.external.collect(|_, hist, attrs| {
                let attributes = output::to_key_values(attrs, skip);
                (
                    output::double_point(attributes.clone(), start, timestamp, hist.sum),
                    output::int_point(attributes, start, timestamp, hist.count as i64),
                )
            })?;
        let (external_sums, external_counts): (Vec<_>, Vec<_>) =
            external_points.into_iter().unzip();

        let db_points: Vec<(NumberDataPoint, NumberDataPoint)> =
            self.db.collect(|_, hist, attrs| {
                let attributes = output::to_key_values(attrs, skip);
                (
                    output::double_point(attributes.clone(), start, timestamp, hist.sum),
                    output::int_point(attributes, start, timestamp, hist.count as i64),
                )
            })?;
        let (db_sums, db_counts): (Vec<_>, Vec<_>) = db_points.into_iter().unzip();

        let exp_points = if self.enable_exp_histogram {
            Some(self.exponential.collect(|_, hist, attrs| {
                output::exponential_point(hist, output::to_key_values(attrs, skip), start, timestamp)
            })?)
        } else {
            None
        };

        let mut metrics = vec![
            output::sum_metric(CALLS_METRIC, "", temporality, call_points),
            output::histogram_metric(LATENCY_METRIC, "ms", temporality, latency_points),
            output::sum_metric(EXTERNAL_SUM_METRIC, "1", temporality, external_sums),
            output::sum_metric(EXTERNAL_COUNT_METRIC, "1", temporality, external_counts),
            output::sum_metric(DB_SUM_METRIC, "1", temporality, db_sums),
            output::sum_metric(DB_COUNT_METRIC, "1", temporality, db_counts),
        ];
        if let Some(points) = exp_points {
            metrics.push(output::exponential_metric(LATENCY_METRIC, "ms", temporality, points));
        }

        // The snapshot is complete; entries revived during this cycle have
        // already been pulled back into the primary tier.
        self.latency.reconcile();
        self.exponential.reconcile();
        self.calls.reconcile();
        self.external.reconcile();
        self.db.reconcile();

        if temporality == Temporality::Delta {
            self.reset();
        }

        Ok(output::wrap_request(metrics))
    }

    /// Clears every fixed-bucket histogram's exemplars. Called once per
    /// flush cycle whether or not the batch build succeeded.
    pub fn clear_exemplars(&mut self) {
        for pipeline in [&mut self.latency, &mut self.calls, &mut self.external, &mut self.db] {
            for hist in pipeline.values_mut() {
                hist.clear_exemplars();
            }
        }
    }

    /// Wholesale reset of every pipeline.
    pub fn reset(&mut self) {
        self.latency.reset();
        self.exponential.reset();
        self.calls.reset();
        self.external.reset();
        self.db.reset();
    }

    /// Logs the per-attribute cardinality report. Used when a batch build
    /// fails, to make runaway label cardinality visible.
    pub fn log_cardinality(&self) {
        self.cardinality.log_report();
    }

    /// Whether any pipeline currently holds accumulated state.
    pub fn has_accumulated_state(&self) -> bool {
        !(self.latency.is_empty()
            && self.exponential.is_empty()
            && self.calls.is_empty()
            && self.external.is_empty()
            && self.db.is_empty())
    }
}
