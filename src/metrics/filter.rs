//! Exclude filter: named regex patterns that drop spans before aggregation.

use crate::core::{Error, ExcludePattern, Result};
use crate::metrics::span::{render_value, span_kind, span_kind_short, status_code, status_code_short};
use crate::metrics::dimensions::{OPERATION_KEY, SERVICE_NAME_KEY, SPAN_KIND_KEY, STATUS_CODE_KEY};
use opentelemetry_proto::tonic::common::v1::KeyValue;
use opentelemetry_proto::tonic::trace::v1::Span;
use regex::Regex;

/// Pre-compiled exclude patterns. Compilation failures are fatal at
/// construction; matching never fails at runtime.
#[derive(Debug, Default)]
pub struct ExcludeFilter {
    patterns: Vec<(String, Regex)>,
}

impl ExcludeFilter {
    /// Compiles the configured patterns.
    pub fn new(patterns: &[ExcludePattern]) -> Result<Self> {
        let mut compiled = Vec::with_capacity(patterns.len());
        for pattern in patterns {
            let regex = Regex::new(&pattern.pattern).map_err(|source| {
                Error::InvalidExcludePattern {
                    name: pattern.name.clone(),
                    source,
                }
            })?;
            compiled.push((pattern.name.clone(), regex));
        }
        Ok(Self { patterns: compiled })
    }

    /// Returns true when any pattern matches its named field: one of the
    /// identity fields (kind and status matched against their short
    /// renderings), or any span/resource attribute whose key equals the
    /// pattern name. First match wins; a skipped span leaves no side
    /// effects anywhere in the aggregator.
    pub fn should_skip(
        &self,
        service_name: &str,
        span: &Span,
        resource_attrs: &[KeyValue],
    ) -> bool {
        for (name, regex) in &self.patterns {
            let field_match = match name.as_str() {
                SERVICE_NAME_KEY => regex.is_match(service_name),
                OPERATION_KEY => regex.is_match(&span.name),
                SPAN_KIND_KEY => regex.is_match(span_kind_short(span_kind(span))),
                STATUS_CODE_KEY => regex.is_match(status_code_short(status_code(span))),
                _ => false,
            };
            if field_match {
                return true;
            }

            let attr_match = span
                .attributes
                .iter()
                .chain(resource_attrs.iter())
                .any(|kv| {
                    kv.key == *name
                        && kv
                            .value
                            .as_ref()
                            .is_some_and(|v| regex.is_match(&render_value(v)))
                });
            if attr_match {
                return true;
            }
        }
        false
    }

    /// Number of configured patterns.
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// Whether no patterns are configured.
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}
