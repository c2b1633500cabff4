//! Dimension resolution, snapshot maps and label sanitization.
//!
//! A dimension resolves by precedence: span attribute, then (for the HTTP
//! status code only) its stable alternate name, then resource attribute,
//! then the configured default. Resolution also reports whether the name
//! exists at the resource level so both the key and the labels can carry a
//! `resource_`-prefixed copy instead of silently colliding.

use crate::core::DimensionSpec;
use crate::metrics::span::render_value;
use opentelemetry_proto::tonic::common::v1::{any_value::Value, AnyValue, KeyValue};
use opentelemetry_proto::tonic::trace::v1::Span;
use rustc_hash::{FxHashMap, FxHashSet};

/// Reserved identity label: originating service.
pub const SERVICE_NAME_KEY: &str = "service.name";
/// Reserved identity label: span name.
pub const OPERATION_KEY: &str = "operation";
/// Reserved identity label: span kind.
pub const SPAN_KIND_KEY: &str = "span.kind";
/// Reserved identity label: status code.
pub const STATUS_CODE_KEY: &str = "status.code";
/// HTTP status dimension prepended to the calls and external-call pipelines.
pub const HTTP_STATUS_CODE_KEY: &str = "http.status_code";
/// Stable-convention alternate for [`HTTP_STATUS_CODE_KEY`].
pub const HTTP_STATUS_CODE_STABLE_KEY: &str = "http.response.status_code";
/// Database system dimension prepended to the db-call pipeline.
pub const DB_SYSTEM_KEY: &str = "db.system";
/// Database name dimension prepended to the db-call pipeline.
pub const DB_NAME_KEY: &str = "db.name";
/// Prefix marking the resource-level copy of a duplicated dimension.
pub const RESOURCE_PREFIX: &str = "resource_";

/// A configured dimension with its materialized default value.
#[derive(Debug, Clone)]
pub struct Dimension {
    /// Attribute name looked up in span then resource attributes.
    pub name: String,
    /// Value used when the attribute is absent from both levels.
    pub default: Option<AnyValue>,
}

impl Dimension {
    /// A dimension with no default.
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            default: None,
        }
    }
}

/// Materializes configured dimension specs, turning defaults into values.
pub fn from_specs(specs: &[DimensionSpec]) -> Vec<Dimension> {
    specs
        .iter()
        .map(|spec| Dimension {
            name: spec.name.clone(),
            default: spec.default.as_ref().map(|d| string_value(d.clone())),
        })
        .collect()
}

/// Wraps a string into a proto attribute value.
pub fn string_value(s: impl Into<String>) -> AnyValue {
    AnyValue {
        value: Some(Value::StringValue(s.into())),
    }
}

fn get<'a>(attributes: &'a [KeyValue], name: &str) -> Option<&'a AnyValue> {
    crate::metrics::span::find_attribute(attributes, name)
}

/// Resolves a dimension value by precedence. `None` means the dimension is
/// absent and contributes nothing to the key or labels.
pub fn resolve<'a>(
    dimension: &'a Dimension,
    span_attrs: &'a [KeyValue],
    resource_attrs: &'a [KeyValue],
) -> Option<&'a AnyValue> {
    if let Some(value) = get(span_attrs, &dimension.name) {
        return Some(value);
    }
    if dimension.name == HTTP_STATUS_CODE_KEY {
        if let Some(value) = get(span_attrs, HTTP_STATUS_CODE_STABLE_KEY) {
            return Some(value);
        }
    }
    if let Some(value) = get(resource_attrs, &dimension.name) {
        return Some(value);
    }
    dimension.default.as_ref()
}

/// Like [`resolve`], additionally reporting whether the name exists in the
/// resource attributes (true even when the span value takes precedence).
pub fn resolve_with_resource<'a>(
    dimension: &'a Dimension,
    span_attrs: &'a [KeyValue],
    resource_attrs: &'a [KeyValue],
) -> (Option<&'a AnyValue>, bool) {
    if let Some(value) = get(span_attrs, &dimension.name) {
        let in_resource = get(resource_attrs, &dimension.name).is_some();
        return (Some(value), in_resource);
    }
    if dimension.name == HTTP_STATUS_CODE_KEY {
        if let Some(value) = get(span_attrs, HTTP_STATUS_CODE_STABLE_KEY) {
            return (Some(value), false);
        }
    }
    if let Some(value) = get(resource_attrs, &dimension.name) {
        return (Some(value), true);
    }
    (dimension.default.as_ref(), false)
}

/// Insertion-ordered attribute map with upsert semantics, cached per metric
/// key as the dimension snapshot.
#[derive(Debug, Clone, Default)]
pub struct AttributeMap {
    entries: Vec<(String, AnyValue)>,
}

impl AttributeMap {
    /// An empty map with room for `capacity` entries.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    /// Inserts or replaces an entry, keeping first-insertion order.
    pub fn insert(&mut self, key: impl Into<String>, value: AnyValue) {
        let key = key.into();
        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            entry.1 = value;
        } else {
            self.entries.push((key, value));
        }
    }

    /// Looks up an entry by name.
    pub fn get(&self, key: &str) -> Option<&AnyValue> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// Iterates entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &(String, AnyValue)> {
        self.entries.iter()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Per-attribute distinct-value tracking, reported when a flush build fails
/// so runaway cardinality is visible. Best-effort; never blocks aggregation.
#[derive(Debug, Default)]
pub struct CardinalityTracker {
    observed: FxHashMap<String, FxHashSet<String>>,
}

impl CardinalityTracker {
    fn record_map(&mut self, attrs: &AttributeMap) {
        for (name, value) in attrs.iter() {
            self.observed
                .entry(name.clone())
                .or_default()
                .insert(render_value(value));
        }
    }

    /// Logs one line per attribute name with its distinct-value count.
    pub fn log_report(&self) {
        for (name, values) in &self.observed {
            tracing::info!(attribute = %name, cardinality = values.len(), "attribute cardinality");
            tracing::debug!(attribute = %name, values = ?values, "attribute values");
        }
    }
}

/// Builds the standard-key dimension snapshot: the four identity labels plus
/// resolved configured dimensions, with `resource_`-prefixed copies for
/// dimensions present at both levels.
pub fn build_standard_attrs(
    service_name: &str,
    span: &Span,
    dimensions: &[Dimension],
    resource_attrs: &[KeyValue],
    cardinality: &mut CardinalityTracker,
) -> AttributeMap {
    let mut attrs = AttributeMap::with_capacity(4 + dimensions.len());
    attrs.insert(SERVICE_NAME_KEY, string_value(service_name));
    attrs.insert(OPERATION_KEY, string_value(span.name.clone()));
    attrs.insert(
        SPAN_KIND_KEY,
        string_value(crate::metrics::span::span_kind(span).as_str_name()),
    );
    attrs.insert(
        STATUS_CODE_KEY,
        string_value(crate::metrics::span::status_code(span).as_str_name()),
    );
    append_resolved(&mut attrs, span, dimensions, resource_attrs);
    cardinality.record_map(&attrs);
    attrs
}

/// Builds the custom-key dimension snapshot used by the external-call and
/// db-call pipelines: service and status identity, caller-supplied extras,
/// then resolved configured dimensions.
pub fn build_custom_attrs(
    service_name: &str,
    span: &Span,
    dimensions: &[Dimension],
    resource_attrs: &[KeyValue],
    extras: &[(&str, AnyValue)],
    cardinality: &mut CardinalityTracker,
) -> AttributeMap {
    let mut attrs = AttributeMap::with_capacity(2 + extras.len() + dimensions.len());
    attrs.insert(SERVICE_NAME_KEY, string_value(service_name));
    for (name, value) in extras {
        attrs.insert(*name, value.clone());
    }
    attrs.insert(
        STATUS_CODE_KEY,
        string_value(crate::metrics::span::status_code(span).as_str_name()),
    );
    append_resolved(&mut attrs, span, dimensions, resource_attrs);
    cardinality.record_map(&attrs);
    attrs
}

fn append_resolved(
    attrs: &mut AttributeMap,
    span: &Span,
    dimensions: &[Dimension],
    resource_attrs: &[KeyValue],
) {
    for dimension in dimensions {
        let (value, in_resource) =
            resolve_with_resource(dimension, &span.attributes, resource_attrs);
        if let Some(value) = value {
            attrs.insert(dimension.name.as_str(), value.clone());
            if in_resource {
                attrs.insert(
                    format!("{}{}", RESOURCE_PREFIX, dimension.name),
                    value.clone(),
                );
            }
        }
    }
}

/// Sanitizes an exported label name Prometheus-style.
///
/// Non-alphanumeric characters become `_`; a leading digit gets a `key_`
/// prefix; a leading underscore gets a `key` prefix unless the skip toggle
/// is set; a leading double underscore always gets the `key` prefix since
/// those names are reserved downstream.
pub fn sanitize_label(name: &str, skip_sanitize_label: bool) -> String {
    if name.is_empty() {
        return String::new();
    }
    let mut sanitized: String = name
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect();
    if sanitized.starts_with(|c: char| c.is_ascii_digit()) {
        sanitized.insert_str(0, "key_");
    }
    if !skip_sanitize_label && sanitized.starts_with('_') {
        sanitized.insert_str(0, "key");
    }
    if sanitized.starts_with("__") {
        sanitized.insert_str(0, "key");
    }
    sanitized
}
