//! Processor configuration.
//!
//! Covers the full surface consumed by the span-to-metrics stage: bucket
//! bounds, additional dimensions, exclude rules, cache sizing, aggregation
//! temporality and the flush interval. All fields have serde defaults so a
//! partial YAML document works.

use crate::core::{Error, Result};
use crate::metrics::dimensions::{
    sanitize_label, OPERATION_KEY, SERVICE_NAME_KEY, SPAN_KIND_KEY, STATUS_CODE_KEY,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// Default capacity of each per-pipeline dimensions cache.
pub const DEFAULT_DIMENSIONS_CACHE_SIZE: usize = 1000;

/// Default latency bucket boundaries in milliseconds.
pub const DEFAULT_LATENCY_BUCKETS_MS: [f64; 16] = [
    2.0, 4.0, 6.0, 8.0, 10.0, 50.0, 100.0, 200.0, 400.0, 800.0, 1000.0, 1400.0, 2000.0, 5000.0,
    10_000.0, 15_000.0,
];

/// Complete configuration for the span-to-metrics processor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Name of the downstream metrics exporter. Informational only; the
    /// consumer itself is injected at construction.
    pub metrics_exporter: String,
    /// Interval between metric flushes.
    #[serde(with = "humantime_serde")]
    pub flush_interval: Duration,
    /// Latency bucket boundaries in milliseconds, ascending. Unset selects
    /// [`DEFAULT_LATENCY_BUCKETS_MS`].
    pub latency_histogram_buckets: Option<Vec<f64>>,
    /// Additional dimensions to project into metric labels and keys.
    pub dimensions: Vec<DimensionSpec>,
    /// Spans matching any of these patterns are excluded from aggregation.
    pub exclude_patterns: Vec<ExcludePattern>,
    /// Capacity of each per-pipeline dimensions cache. Must be positive.
    pub dimensions_cache_size: usize,
    /// Whether exported values reset per interval or accumulate since start.
    pub aggregation_temporality: Temporality,
    /// Disables the leading-underscore label rewrite during sanitization.
    pub skip_sanitize_label: bool,
    /// Also aggregate latency into an exponential histogram.
    pub enable_exp_histogram: bool,
}

/// An additional dimension: attribute name plus an optional default used
/// when the attribute is absent from both span and resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DimensionSpec {
    /// Attribute name looked up in span then resource attributes.
    pub name: String,
    /// Value to use when the attribute is missing. `None` drops the
    /// dimension from the key and labels instead.
    #[serde(default)]
    pub default: Option<String>,
}

/// A field-name/regex pair; matching spans are skipped entirely.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExcludePattern {
    /// `service.name`, `operation`, `span.kind`, `status.code`, or any
    /// span/resource attribute key.
    pub name: String,
    /// Regular expression matched against the field's rendered value.
    pub pattern: String,
}

/// Aggregation temporality of the exported metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Temporality {
    /// Values reset after every flush.
    Delta,
    /// Values accumulate from processor start.
    Cumulative,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            metrics_exporter: String::new(),
            flush_interval: Duration::from_secs(60),
            latency_histogram_buckets: None,
            dimensions: Vec::new(),
            exclude_patterns: Vec::new(),
            dimensions_cache_size: DEFAULT_DIMENSIONS_CACHE_SIZE,
            aggregation_temporality: Temporality::Cumulative,
            skip_sanitize_label: false,
            enable_exp_histogram: false,
        }
    }
}

impl Default for Temporality {
    fn default() -> Self {
        Temporality::Cumulative
    }
}

impl Config {
    /// Parse a YAML document and validate it.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)
            .map_err(|err| Error::config(format!("failed to parse YAML config: {}", err)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration. All failures here are fatal; nothing in
    /// this crate errors on configuration after construction.
    pub fn validate(&self) -> Result<()> {
        if self.dimensions_cache_size == 0 {
            return Err(Error::InvalidCacheSize {
                size: self.dimensions_cache_size,
            });
        }

        for pattern in &self.exclude_patterns {
            if let Err(source) = Regex::new(&pattern.pattern) {
                return Err(Error::InvalidExcludePattern {
                    name: pattern.name.clone(),
                    source,
                });
            }
        }

        validate_dimensions(&self.dimensions, self.skip_sanitize_label)
    }

    /// Bucket bounds in effect, sorted ascending.
    pub fn resolved_latency_bounds(&self) -> Vec<f64> {
        let mut bounds = match &self.latency_histogram_buckets {
            Some(buckets) => buckets.clone(),
            None => DEFAULT_LATENCY_BUCKETS_MS.to_vec(),
        };
        bounds.sort_by(|a, b| a.total_cmp(b));
        bounds
    }
}

/// Checks configured dimensions against the reserved identity labels and
/// against each other, both before and after sanitization. Prometheus-style
/// exporters downstream see sanitized names, so a post-sanitize collision is
/// just as fatal as a raw one.
fn validate_dimensions(dimensions: &[DimensionSpec], skip_sanitize_label: bool) -> Result<()> {
    let mut label_names: HashSet<String> = HashSet::new();
    for key in [SERVICE_NAME_KEY, SPAN_KIND_KEY, STATUS_CODE_KEY] {
        label_names.insert(key.to_string());
        label_names.insert(sanitize_label(key, skip_sanitize_label));
    }
    label_names.insert(OPERATION_KEY.to_string());

    for dim in dimensions {
        if label_names.contains(&dim.name) {
            return Err(Error::DuplicateDimension {
                name: dim.name.clone(),
            });
        }
        label_names.insert(dim.name.clone());

        let sanitized = sanitize_label(&dim.name, skip_sanitize_label);
        if sanitized == dim.name {
            continue;
        }
        if label_names.contains(&sanitized) {
            return Err(Error::DuplicateSanitizedDimension { name: sanitized });
        }
        label_names.insert(sanitized);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.flush_interval, Duration::from_secs(60));
        assert_eq!(config.dimensions_cache_size, 1000);
        assert_eq!(config.aggregation_temporality, Temporality::Cumulative);
        assert!(!config.enable_exp_histogram);
        assert_eq!(config.resolved_latency_bounds().len(), 16);
    }

    #[test]
    fn test_yaml_config() {
        let yaml = r#"
metrics_exporter: clickhousemetricswrite
flush_interval: 30s
latency_histogram_buckets: [100.0, 250.0, 500.0]
dimensions:
  - name: http.method
    default: GET
  - name: region
exclude_patterns:
  - name: operation
    pattern: "^/health"
aggregation_temporality: delta
enable_exp_histogram: true
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.metrics_exporter, "clickhousemetricswrite");
        assert_eq!(config.flush_interval, Duration::from_secs(30));
        assert_eq!(config.aggregation_temporality, Temporality::Delta);
        assert!(config.enable_exp_histogram);
        assert_eq!(config.dimensions.len(), 2);
        assert_eq!(config.dimensions[0].default.as_deref(), Some("GET"));
        assert_eq!(config.dimensions[1].default, None);
        assert_eq!(config.resolved_latency_bounds(), vec![100.0, 250.0, 500.0]);
    }

    #[test]
    fn test_invalid_yaml() {
        assert!(Config::from_yaml("flush_interval: [oops").is_err());
        assert!(Config::from_yaml("flush_interval: not_a_duration").is_err());
    }

    #[test]
    fn test_zero_cache_size_rejected() {
        let config = Config {
            dimensions_cache_size: 0,
            ..Config::default()
        };
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidCacheSize { size: 0 })
        ));
    }

    #[test]
    fn test_invalid_exclude_pattern_rejected() {
        let config = Config {
            exclude_patterns: vec![ExcludePattern {
                name: "operation".to_string(),
                pattern: "[unclosed".to_string(),
            }],
            ..Config::default()
        };
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidExcludePattern { .. })
        ));
    }

    #[test]
    fn test_reserved_dimension_rejected() {
        for reserved in ["service.name", "operation", "span.kind", "status.code"] {
            let config = Config {
                dimensions: vec![DimensionSpec {
                    name: reserved.to_string(),
                    default: None,
                }],
                ..Config::default()
            };
            assert!(config.validate().is_err(), "{} should be rejected", reserved);
        }
    }

    #[test]
    fn test_sanitized_reserved_dimension_rejected() {
        // span.kind sanitizes to span_kind, which is also reserved.
        let config = Config {
            dimensions: vec![DimensionSpec {
                name: "span_kind".to_string(),
                default: None,
            }],
            ..Config::default()
        };
        assert!(matches!(
            config.validate(),
            Err(Error::DuplicateDimension { .. })
        ));
    }

    #[test]
    fn test_sanitized_dimension_collision_rejected() {
        let config = Config {
            dimensions: vec![
                DimensionSpec {
                    name: "foo_bar".to_string(),
                    default: None,
                },
                DimensionSpec {
                    name: "foo.bar".to_string(),
                    default: None,
                },
            ],
            ..Config::default()
        };
        assert!(matches!(
            config.validate(),
            Err(Error::DuplicateSanitizedDimension { .. })
        ));
    }

    #[test]
    fn test_bounds_sorted_at_resolution() {
        let config = Config {
            latency_histogram_buckets: Some(vec![500.0, 100.0, 250.0]),
            ..Config::default()
        };
        assert_eq!(config.resolved_latency_bounds(), vec![100.0, 250.0, 500.0]);
    }
}
