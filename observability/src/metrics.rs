use opentelemetry::metrics::{Counter, Histogram};
use opentelemetry::{global, KeyValue};
use std::borrow::Cow;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::metrics_names::{TAG_ERROR, TAG_OPERATION};

#[derive(Debug, Error)]
pub enum MetricError {
    #[error("Invalid tag: {0}")]
    InvalidTag(String),
}

/// Type-safe wrapper for metric tags
#[derive(Debug, Clone)]
pub struct MetricTag {
    key: &'static str,
    value: String,
}

impl MetricTag {
    pub fn new(key: &'static str, value: impl Into<String>) -> Result<Self, MetricError> {
        let value = value.into();
        if key.is_empty() {
            return Err(MetricError::InvalidTag("Tag key cannot be empty".into()));
        }
        if value.is_empty() {
            return Err(MetricError::InvalidTag("Tag value cannot be empty".into()));
        }
        Ok(Self { key, value })
    }

    fn into_key_value(self) -> KeyValue {
        KeyValue::new(self.key, self.value)
    }
}

/// Tagged metric wrapper that automatically handles labels
#[derive(Debug, Clone)]
pub struct TaggedMetric<T> {
    metric: T,
    default_tags: Vec<MetricTag>,
}

impl<T> TaggedMetric<T> {
    fn new(metric: T, name: &'static str) -> Self {
        Self {
            metric,
            default_tags: vec![MetricTag {
                key: "name",
                value: name.to_string(),
            }],
        }
    }

    fn with_tags(&self, tags: &[MetricTag]) -> Vec<KeyValue> {
        self.default_tags
            .iter()
            .cloned()
            .chain(tags.iter().cloned())
            .map(|tag| tag.into_key_value())
            .collect()
    }
}

/// Metrics of the provisioning client: operation and error counts,
/// operation durations and payload sizes.
#[derive(Debug, Clone)]
pub struct ClientMetrics {
    request_counter: TaggedMetric<Counter<u64>>,
    error_counter: TaggedMetric<Counter<u64>>,
    duration_histogram: TaggedMetric<Histogram<f64>>,
    size_histogram: TaggedMetric<Histogram<f64>>,
}

impl ClientMetrics {
    pub fn new() -> Self {
        Self::with_config(MetricsConfig::default())
    }

    pub fn with_config(config: MetricsConfig) -> Self {
        let meter = global::meter("keyprov");

        let operations: Cow<'static, str> = format!("{}_operations", config.prefix).into();
        let operation_errors: Cow<'static, str> =
            format!("{}_operation_errors", config.prefix).into();
        let duration_metric: Cow<'static, str> =
            format!("{}_operation_duration_ms", config.prefix).into();
        let size_metric: Cow<'static, str> = format!("{}_payload_size_bytes", config.prefix).into();

        let request_counter = meter
            .u64_counter(operations)
            .with_description("Total number of operations processed")
            .with_unit("operations")
            .build();
        //Increment by 0 just to make sure the counter is exported
        request_counter.add(0, &[]);

        let error_counter = meter
            .u64_counter(operation_errors)
            .with_description("Total number of operation errors")
            .with_unit("errors")
            .build();
        error_counter.add(0, &[]);

        let duration_histogram = meter
            .f64_histogram(duration_metric)
            .with_description("Duration of provisioning operations")
            .with_unit("milliseconds")
            .build();

        let size_histogram = meter
            .f64_histogram(size_metric)
            .with_description("Size of provisioning payloads")
            .with_unit("bytes")
            .build();

        Self {
            request_counter: TaggedMetric::new(request_counter, "operations"),
            error_counter: TaggedMetric::new(error_counter, "errors"),
            duration_histogram: TaggedMetric::new(duration_histogram, "duration"),
            size_histogram: TaggedMetric::new(size_histogram, "size"),
        }
    }

    fn create_operation_tag(operation: impl Into<String>) -> Result<MetricTag, MetricError> {
        MetricTag::new(TAG_OPERATION, operation)
    }

    pub fn increment_request_counter(
        &self,
        operation: impl Into<String>,
    ) -> Result<(), MetricError> {
        let tags = vec![Self::create_operation_tag(operation)?];
        self.request_counter
            .metric
            .add(1, &self.request_counter.with_tags(&tags));
        Ok(())
    }

    pub fn increment_error_counter(
        &self,
        operation: impl Into<String>,
        error: impl Into<String>,
    ) -> Result<(), MetricError> {
        let tags = vec![
            Self::create_operation_tag(operation)?,
            MetricTag::new(TAG_ERROR, error)?,
        ];
        self.error_counter
            .metric
            .add(1, &self.error_counter.with_tags(&tags));
        Ok(())
    }

    fn record_duration_with_tags(
        &self,
        operation: impl AsRef<str>,
        duration: Duration,
        extra_tags: &[(&'static str, String)],
    ) -> Result<(), MetricError> {
        let mut tags = vec![Self::create_operation_tag(operation.as_ref())?];
        for (key, value) in extra_tags {
            tags.push(MetricTag::new(key, value)?);
        }

        self.duration_histogram.metric.record(
            duration.as_millis() as f64,
            &self.duration_histogram.with_tags(&tags),
        );
        Ok(())
    }

    pub fn observe_size(&self, operation: impl Into<String>, size: f64) -> Result<(), MetricError> {
        let tags = vec![Self::create_operation_tag(operation)?];
        self.size_histogram
            .metric
            .record(size, &self.size_histogram.with_tags(&tags));
        Ok(())
    }

    /// Start building a duration guard for timing an operation
    pub fn time_operation(
        &self,
        operation: impl Into<String>,
    ) -> Result<DurationGuardBuilder<'_>, MetricError> {
        let operation = operation.into();
        MetricTag::new(TAG_OPERATION, operation.clone())?;
        Ok(DurationGuardBuilder {
            metrics: self,
            operation,
            tags: Vec::new(),
        })
    }
}

impl Default for ClientMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for DurationGuard to ensure proper initialization
#[derive(Debug)]
pub struct DurationGuardBuilder<'a> {
    metrics: &'a ClientMetrics,
    operation: String,
    tags: Vec<(&'static str, String)>,
}

impl<'a> DurationGuardBuilder<'a> {
    pub fn tag(mut self, key: &'static str, value: impl Into<String>) -> Result<Self, MetricError> {
        let value = value.into();
        MetricTag::new(key, value.clone())?;
        self.tags.push((key, value));
        Ok(self)
    }

    /// Start timing the operation
    pub fn start(self) -> DurationGuard<'a> {
        DurationGuard {
            metrics: self.metrics,
            operation: self.operation,
            tags: self.tags,
            start: Instant::now(),
            record_on_drop: true,
        }
    }
}

/// RAII guard that records operation duration when dropped
#[derive(Debug)]
pub struct DurationGuard<'a> {
    metrics: &'a ClientMetrics,
    operation: String,
    tags: Vec<(&'static str, String)>,
    start: Instant,
    record_on_drop: bool,
}

impl DurationGuard<'_> {
    /// Force recording of the current duration and consume the guard
    pub fn record_now(mut self) -> Duration {
        let duration = self.start.elapsed();
        self.record(duration);
        self.record_on_drop = false;
        duration
    }

    pub fn tag(&mut self, key: &'static str, value: impl Into<String>) -> Result<(), MetricError> {
        let value = value.into();
        MetricTag::new(key, value.clone())?;
        self.tags.push((key, value));
        Ok(())
    }

    fn record(&self, duration: Duration) {
        // tags were validated when added
        if let Err(e) =
            self.metrics
                .record_duration_with_tags(&self.operation, duration, &self.tags)
        {
            tracing::warn!("Failed to record duration of {}: {e}", self.operation);
        }
    }
}

impl Drop for DurationGuard<'_> {
    fn drop(&mut self) {
        if self.record_on_drop {
            self.record(self.start.elapsed());
        }
    }
}

// Global metrics instance
lazy_static::lazy_static! {
    pub static ref METRICS: ClientMetrics = ClientMetrics::new();
}

/// Configuration for metrics initialization
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    pub prefix: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            prefix: "keyprov".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics_names::{ERR_NETWORK, OP_REGISTER, TAG_STATUS};

    #[test]
    fn test_tag_validation() {
        assert!(MetricTag::new("operation", "register").is_ok());
        assert!(MetricTag::new("", "register").is_err());
        assert!(MetricTag::new("operation", "").is_err());
    }

    #[test]
    fn test_recording_without_provider() {
        // without an installed provider every instrument is a no-op
        let metrics = ClientMetrics::new();
        metrics.increment_request_counter(OP_REGISTER).unwrap();
        metrics
            .increment_error_counter(OP_REGISTER, ERR_NETWORK)
            .unwrap();
        metrics.observe_size(OP_REGISTER, 1024.0).unwrap();
        assert!(metrics.increment_error_counter(OP_REGISTER, "").is_err());

        let mut guard = metrics.time_operation(OP_REGISTER).unwrap().start();
        guard.tag(TAG_STATUS, "200").unwrap();
        assert!(guard.tag(TAG_STATUS, "").is_err());
        let elapsed = guard.record_now();
        assert!(elapsed < Duration::from_secs(60));

        assert!(metrics.time_operation("").is_err());
    }
}
