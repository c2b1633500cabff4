//! Read-only helpers over OTLP proto spans.
//!
//! The aggregator never mutates its input, so everything here borrows. Value
//! rendering follows the OTLP canonical string form so keys and cardinality
//! tracking see one representation per value.

use opentelemetry_proto::tonic::common::v1::{any_value::Value, AnyValue, KeyValue};
use opentelemetry_proto::tonic::trace::v1::{span::SpanKind, status::StatusCode, Span};

const NANOS_PER_MILLI: f64 = 1_000_000.0;

/// Looks up an attribute by exact name.
pub fn find_attribute<'a>(attributes: &'a [KeyValue], name: &str) -> Option<&'a AnyValue> {
    attributes
        .iter()
        .find(|kv| kv.key == name)
        .and_then(|kv| kv.value.as_ref())
}

/// Extracts the `service.name` string from resource attributes.
///
/// Resource-span groups without it carry no usable identity and are skipped
/// by the aggregator.
pub fn service_name(resource_attrs: &[KeyValue]) -> Option<&str> {
    match find_attribute(resource_attrs, super::dimensions::SERVICE_NAME_KEY) {
        Some(AnyValue {
            value: Some(Value::StringValue(name)),
        }) => Some(name.as_str()),
        _ => None,
    }
}

/// Span latency in fractional milliseconds.
///
/// End timestamps at or before the start are treated as zero duration, not
/// as an error.
pub fn latency_ms(span: &Span) -> f64 {
    if span.end_time_unix_nano > span.start_time_unix_nano {
        (span.end_time_unix_nano - span.start_time_unix_nano) as f64 / NANOS_PER_MILLI
    } else {
        0.0
    }
}

/// Span kind, defaulting unknown wire values to unspecified.
pub fn span_kind(span: &Span) -> SpanKind {
    span.kind()
}

/// Status code, defaulting a missing status to unset.
pub fn status_code(span: &Span) -> StatusCode {
    span.status.as_ref().map(|s| s.code()).unwrap_or(StatusCode::Unset)
}

/// Short kind rendering used by the exclude filter (`Server`, `Client`, ...).
///
/// Keys and labels use the wire-enum `SPAN_KIND_*` names instead.
pub fn span_kind_short(kind: SpanKind) -> &'static str {
    match kind {
        SpanKind::Unspecified => "Unspecified",
        SpanKind::Internal => "Internal",
        SpanKind::Server => "Server",
        SpanKind::Client => "Client",
        SpanKind::Producer => "Producer",
        SpanKind::Consumer => "Consumer",
    }
}

/// Short status rendering used by the exclude filter (`Ok`, `Error`, `Unset`).
pub fn status_code_short(code: StatusCode) -> &'static str {
    match code {
        StatusCode::Unset => "Unset",
        StatusCode::Ok => "Ok",
        StatusCode::Error => "Error",
    }
}

/// Canonical string rendering of an attribute value.
pub fn render_value(value: &AnyValue) -> String {
    match &value.value {
        Some(Value::StringValue(s)) => s.clone(),
        Some(Value::BoolValue(b)) => b.to_string(),
        Some(Value::IntValue(i)) => i.to_string(),
        Some(Value::DoubleValue(d)) => d.to_string(),
        Some(Value::ArrayValue(arr)) => {
            let values: Vec<String> = arr.values.iter().map(render_value).collect();
            format!("[{}]", values.join(", "))
        },
        Some(Value::KvlistValue(kv)) => {
            let pairs: Vec<String> = kv
                .values
                .iter()
                .map(|kv| {
                    let value = kv.value.as_ref().map(render_value).unwrap_or_default();
                    format!("{}={}", kv.key, value)
                })
                .collect();
            format!("{{{}}}", pairs.join(", "))
        },
        Some(Value::BytesValue(bytes)) => hex::encode(bytes),
        None => String::new(),
    }
}
