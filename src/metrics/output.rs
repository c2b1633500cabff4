//! Assembly of accumulated state into OTLP metric protos.
//!
//! Label names are sanitized here, at the exported edge only; keys and
//! cached snapshots keep the raw names so metric identity is unaffected.

use crate::core::Temporality;
use crate::metrics::dimensions::{sanitize_label, AttributeMap};
use crate::metrics::exponential::ExponentialHistogram;
use crate::metrics::histogram::{Exemplar, HistogramData};
use opentelemetry_proto::tonic::collector::metrics::v1::ExportMetricsServiceRequest;
use opentelemetry_proto::tonic::common::v1::{InstrumentationScope, KeyValue};
use opentelemetry_proto::tonic::metrics::v1::{
    exponential_histogram_data_point, metric, number_data_point, AggregationTemporality,
    Exemplar as ProtoExemplar, ExponentialHistogram as ProtoExponentialHistogram,
    ExponentialHistogramDataPoint, Histogram, HistogramDataPoint, Metric, NumberDataPoint,
    ResourceMetrics, ScopeMetrics, Sum,
};

/// Instrumentation scope name stamped on every flush batch.
pub const SCOPE_NAME: &str = "spanbridge";

pub(crate) fn to_temporality(temporality: Temporality) -> i32 {
    match temporality {
        Temporality::Delta => AggregationTemporality::Delta as i32,
        Temporality::Cumulative => AggregationTemporality::Cumulative as i32,
    }
}

/// Converts a dimension snapshot into exported attributes, sanitizing names.
pub(crate) fn to_key_values(attrs: &AttributeMap, skip_sanitize_label: bool) -> Vec<KeyValue> {
    attrs
        .iter()
        .map(|(name, value)| KeyValue {
            key: sanitize_label(name, skip_sanitize_label),
            value: Some(value.clone()),
        })
        .collect()
}

/// Converts batch-scoped exemplars, dropping those with an all-zero trace id.
pub(crate) fn to_exemplars(exemplars: &[Exemplar], timestamp: u64) -> Vec<ProtoExemplar> {
    exemplars
        .iter()
        .filter(|e| !e.is_empty())
        .map(|e| ProtoExemplar {
            time_unix_nano: timestamp,
            trace_id: e.trace_id.clone(),
            span_id: e.span_id.clone(),
            value: Some(opentelemetry_proto::tonic::metrics::v1::exemplar::Value::AsDouble(e.value)),
            ..ProtoExemplar::default()
        })
        .collect()
}

pub(crate) fn int_point(
    attributes: Vec<KeyValue>,
    start_timestamp: u64,
    timestamp: u64,
    value: i64,
) -> NumberDataPoint {
    NumberDataPoint {
        attributes,
        start_time_unix_nano: start_timestamp,
        time_unix_nano: timestamp,
        value: Some(number_data_point::Value::AsInt(value)),
        ..NumberDataPoint::default()
    }
}

pub(crate) fn double_point(
    attributes: Vec<KeyValue>,
    start_timestamp: u64,
    timestamp: u64,
    value: f64,
) -> NumberDataPoint {
    NumberDataPoint {
        attributes,
        start_time_unix_nano: start_timestamp,
        time_unix_nano: timestamp,
        value: Some(number_data_point::Value::AsDouble(value)),
        ..NumberDataPoint::default()
    }
}

pub(crate) fn histogram_point(
    hist: &HistogramData,
    bounds: &[f64],
    attributes: Vec<KeyValue>,
    start_timestamp: u64,
    timestamp: u64,
) -> HistogramDataPoint {
    HistogramDataPoint {
        attributes,
        start_time_unix_nano: start_timestamp,
        time_unix_nano: timestamp,
        count: hist.count,
        sum: Some(hist.sum),
        bucket_counts: hist.bucket_counts.clone(),
        explicit_bounds: bounds.to_vec(),
        exemplars: to_exemplars(&hist.exemplars, timestamp),
        ..HistogramDataPoint::default()
    }
}

pub(crate) fn exponential_point(
    hist: &ExponentialHistogram,
    attributes: Vec<KeyValue>,
    start_timestamp: u64,
    timestamp: u64,
) -> ExponentialHistogramDataPoint {
    let buckets = |half: &crate::metrics::exponential::Buckets| {
        exponential_histogram_data_point::Buckets {
            offset: half.offset() as i32,
            bucket_counts: half.counts().collect(),
        }
    };
    ExponentialHistogramDataPoint {
        attributes,
        start_time_unix_nano: start_timestamp,
        time_unix_nano: timestamp,
        count: hist.count(),
        sum: Some(hist.sum()),
        scale: hist.scale(),
        zero_count: hist.zero_count(),
        positive: Some(buckets(hist.positive())),
        negative: Some(buckets(hist.negative())),
        min: (hist.count() > 0).then(|| hist.min()),
        max: (hist.count() > 0).then(|| hist.max()),
        ..ExponentialHistogramDataPoint::default()
    }
}

/// A monotonic sum metric.
pub(crate) fn sum_metric(
    name: &str,
    unit: &str,
    temporality: Temporality,
    data_points: Vec<NumberDataPoint>,
) -> Metric {
    Metric {
        name: name.to_string(),
        unit: unit.to_string(),
        data: Some(metric::Data::Sum(Sum {
            data_points,
            aggregation_temporality: to_temporality(temporality),
            is_monotonic: true,
        })),
        ..Metric::default()
    }
}

/// An explicit-bounds histogram metric.
pub(crate) fn histogram_metric(
    name: &str,
    unit: &str,
    temporality: Temporality,
    data_points: Vec<HistogramDataPoint>,
) -> Metric {
    Metric {
        name: name.to_string(),
        unit: unit.to_string(),
        data: Some(metric::Data::Histogram(Histogram {
            data_points,
            aggregation_temporality: to_temporality(temporality),
        })),
        ..Metric::default()
    }
}

/// An exponential histogram metric.
pub(crate) fn exponential_metric(
    name: &str,
    unit: &str,
    temporality: Temporality,
    data_points: Vec<ExponentialHistogramDataPoint>,
) -> Metric {
    Metric {
        name: name.to_string(),
        unit: unit.to_string(),
        data: Some(metric::Data::ExponentialHistogram(ProtoExponentialHistogram {
            data_points,
            aggregation_temporality: to_temporality(temporality),
        })),
        ..Metric::default()
    }
}

/// Wraps the flush batch into one resource/scope envelope.
pub(crate) fn wrap_request(metrics: Vec<Metric>) -> ExportMetricsServiceRequest {
    ExportMetricsServiceRequest {
        resource_metrics: vec![ResourceMetrics {
            scope_metrics: vec![ScopeMetrics {
                scope: Some(InstrumentationScope {
                    name: SCOPE_NAME.to_string(),
                    ..InstrumentationScope::default()
                }),
                metrics,
                ..ScopeMetrics::default()
            }],
            ..ResourceMetrics::default()
        }],
    }
}
