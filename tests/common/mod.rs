//! Common test utilities and fixtures.

use async_trait::async_trait;
use opentelemetry_proto::tonic::collector::metrics::v1::ExportMetricsServiceRequest;
use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use opentelemetry_proto::tonic::common::v1::{any_value::Value, AnyValue, KeyValue};
use opentelemetry_proto::tonic::metrics::v1::Metric;
use opentelemetry_proto::tonic::resource::v1::Resource;
use opentelemetry_proto::tonic::trace::v1::{
    span::SpanKind, status::StatusCode, ResourceSpans, ScopeSpans, Span, Status,
};
use parking_lot::Mutex;
use spanbridge::core::Result;
use spanbridge::processor::{MetricsConsumer, TraceConsumer};

/// Wraps a string into a proto attribute value.
pub fn string_value(s: &str) -> AnyValue {
    AnyValue {
        value: Some(Value::StringValue(s.to_string())),
    }
}

/// A string-valued proto attribute.
pub fn kv(key: &str, value: &str) -> KeyValue {
    KeyValue {
        key: key.to_string(),
        value: Some(string_value(value)),
    }
}

/// Test fixture builder for creating OTLP spans with sensible defaults.
pub struct TestSpanBuilder {
    name: String,
    kind: SpanKind,
    status: StatusCode,
    duration_ms: u64,
    trace_num: u8,
    attributes: Vec<KeyValue>,
}

impl TestSpanBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: SpanKind::Server,
            status: StatusCode::Ok,
            duration_ms: 11,
            trace_num: 1,
            attributes: Vec::new(),
        }
    }

    pub fn kind(mut self, kind: SpanKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_error(mut self) -> Self {
        self.status = StatusCode::Error;
        self
    }

    pub fn duration_ms(mut self, ms: u64) -> Self {
        self.duration_ms = ms;
        self
    }

    pub fn attribute(mut self, key: &str, value: &str) -> Self {
        self.attributes.push(kv(key, value));
        self
    }

    pub fn build(self) -> Span {
        Span {
            trace_id: vec![self.trace_num; 16],
            span_id: vec![self.trace_num.wrapping_add(1); 8],
            name: self.name,
            kind: self.kind as i32,
            start_time_unix_nano: 1_000_000_000,
            end_time_unix_nano: 1_000_000_000 + self.duration_ms * 1_000_000,
            status: Some(Status {
                code: self.status as i32,
                ..Status::default()
            }),
            attributes: self.attributes,
            ..Span::default()
        }
    }
}

/// One resource-span group for `service` holding the given spans.
pub fn resource_spans(service: &str, spans: Vec<Span>) -> ResourceSpans {
    resource_spans_with(vec![kv("service.name", service)], spans)
}

/// Like [`resource_spans`] but with arbitrary resource attributes.
pub fn resource_spans_with(resource_attrs: Vec<KeyValue>, spans: Vec<Span>) -> ResourceSpans {
    ResourceSpans {
        resource: Some(Resource {
            attributes: resource_attrs,
            ..Resource::default()
        }),
        scope_spans: vec![ScopeSpans {
            spans,
            ..ScopeSpans::default()
        }],
        ..ResourceSpans::default()
    }
}

/// A single-service trace export request.
pub fn trace_request(service: &str, spans: Vec<Span>) -> ExportTraceServiceRequest {
    ExportTraceServiceRequest {
        resource_spans: vec![resource_spans(service, spans)],
    }
}

/// Metrics consumer that records every flushed batch.
#[derive(Default)]
pub struct CapturingMetricsConsumer {
    batches: Mutex<Vec<ExportMetricsServiceRequest>>,
}

impl CapturingMetricsConsumer {
    pub fn batches(&self) -> Vec<ExportMetricsServiceRequest> {
        self.batches.lock().clone()
    }
}

#[async_trait]
impl MetricsConsumer for CapturingMetricsConsumer {
    async fn consume_metrics(&self, request: ExportMetricsServiceRequest) -> Result<()> {
        self.batches.lock().push(request);
        Ok(())
    }
}

/// Trace consumer that records every forwarded batch.
#[derive(Default)]
pub struct CapturingTraceConsumer {
    batches: Mutex<Vec<ExportTraceServiceRequest>>,
}

impl CapturingTraceConsumer {
    pub fn batches(&self) -> Vec<ExportTraceServiceRequest> {
        self.batches.lock().clone()
    }
}

#[async_trait]
impl TraceConsumer for CapturingTraceConsumer {
    async fn consume_traces(&self, request: ExportTraceServiceRequest) -> Result<()> {
        self.batches.lock().push(request);
        Ok(())
    }
}

/// Finds a metric by name in the first scope of a flushed batch.
pub fn metric_by_name<'a>(batch: &'a ExportMetricsServiceRequest, name: &str) -> &'a Metric {
    batch.resource_metrics[0].scope_metrics[0]
        .metrics
        .iter()
        .find(|m| m.name == name)
        .unwrap_or_else(|| panic!("metric {} not found", name))
}

/// Renders a data-point attribute to a string, panicking when absent.
pub fn attribute_value(attributes: &[KeyValue], key: &str) -> String {
    let value = attributes
        .iter()
        .find(|kv| kv.key == key)
        .and_then(|kv| kv.value.as_ref())
        .unwrap_or_else(|| panic!("attribute {} not found", key));
    match &value.value {
        Some(Value::StringValue(s)) => s.clone(),
        Some(Value::IntValue(i)) => i.to_string(),
        other => format!("{:?}", other),
    }
}
