//! Metric key construction.
//!
//! A key is the exact concatenation of resolved dimension values separated
//! by the NUL byte, so identical dimension tuples always yield byte-identical
//! keys and there is no hash collision to reason about. Builders write into
//! a caller-owned buffer that the aggregator reuses across spans.

use crate::metrics::dimensions::{self, Dimension, RESOURCE_PREFIX};
use crate::metrics::span::{render_value, span_kind, status_code};
use opentelemetry_proto::tonic::common::v1::KeyValue;
use opentelemetry_proto::tonic::trace::v1::Span;
use std::fmt;
use std::sync::Arc;

/// Separator between dimension values. NUL is vanishingly unlikely inside a
/// real attribute value.
pub const KEY_SEPARATOR: char = '\0';

/// Opaque identity of one distinct dimension combination. Cheap to clone.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetricKey(Arc<str>);

impl MetricKey {
    /// The raw key bytes as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for MetricKey {
    fn from(s: &str) -> Self {
        Self(Arc::from(s))
    }
}

impl fmt::Display for MetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.replace(KEY_SEPARATOR, "\u{2400}").as_str())
    }
}

fn push_separated(buf: &mut String, value: &str) {
    buf.push(KEY_SEPARATOR);
    buf.push_str(value);
}

/// Builds the standard key: service, operation, kind, status, then each
/// resolved optional dimension. Used by the latency, exponential and calls
/// pipelines.
pub fn build_standard_key(
    buf: &mut String,
    service_name: &str,
    span: &Span,
    dimensions: &[Dimension],
    resource_attrs: &[KeyValue],
) -> MetricKey {
    buf.clear();
    buf.push_str(service_name);
    push_separated(buf, &span.name);
    push_separated(buf, span_kind(span).as_str_name());
    push_separated(buf, status_code(span).as_str_name());

    for dimension in dimensions {
        if let Some(value) = dimensions::resolve(dimension, &span.attributes, resource_attrs) {
            push_separated(buf, &render_value(value));
        }
    }

    MetricKey::from(buf.as_str())
}

/// Builds the custom key: service, status, caller-supplied extra values,
/// then each resolved optional dimension, with a `resource_`-prefixed copy
/// appended for dimensions found at both levels. Operation and kind are not
/// part of identity here. Used by the external-call and db-call pipelines.
pub fn build_custom_key(
    buf: &mut String,
    service_name: &str,
    span: &Span,
    dimensions: &[Dimension],
    resource_attrs: &[KeyValue],
    extra_values: &[&str],
) -> MetricKey {
    buf.clear();
    buf.push_str(service_name);
    push_separated(buf, status_code(span).as_str_name());
    for value in extra_values {
        push_separated(buf, value);
    }

    for dimension in dimensions {
        let (value, in_resource) =
            dimensions::resolve_with_resource(dimension, &span.attributes, resource_attrs);
        if let Some(value) = value {
            let rendered = render_value(value);
            push_separated(buf, &rendered);
            if in_resource {
                push_separated(buf, &format!("{}{}", RESOURCE_PREFIX, rendered));
            }
        }
    }

    MetricKey::from(buf.as_str())
}
