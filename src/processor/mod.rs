//! The processor shell: consumer seams, the shared-aggregator lock and the
//! periodic flush task.
//!
//! The aggregator itself is synchronous; this module is the only place that
//! spawns, locks or awaits. Batches are aggregated under a single mutex and
//! forwarded unmodified, and a background task drains the accumulated state
//! on a fixed interval. Export always happens outside the lock.

use crate::core::{Config, Result};
use crate::metrics::SpanAggregator;
use async_trait::async_trait;
use opentelemetry_proto::tonic::collector::metrics::v1::ExportMetricsServiceRequest;
use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Downstream consumer of trace batches.
#[async_trait]
pub trait TraceConsumer: Send + Sync {
    /// Consumes one trace export batch.
    async fn consume_traces(&self, request: ExportTraceServiceRequest) -> Result<()>;
}

/// Downstream consumer of metric batches.
#[async_trait]
pub trait MetricsConsumer: Send + Sync {
    /// Consumes one metrics export batch.
    async fn consume_metrics(&self, request: ExportMetricsServiceRequest) -> Result<()>;
}

/// A trace consumer that drops everything. Terminates a pipeline in tests
/// and in deployments that only want the derived metrics.
#[derive(Debug, Default)]
pub struct NoopTraceConsumer;

#[async_trait]
impl TraceConsumer for NoopTraceConsumer {
    async fn consume_traces(&self, _request: ExportTraceServiceRequest) -> Result<()> {
        Ok(())
    }
}

/// Aggregates spans into metrics, forwards traces unmodified, and flushes
/// the metrics downstream on a fixed interval.
pub struct SpanMetricsProcessor {
    aggregator: Arc<Mutex<SpanAggregator>>,
    metrics_consumer: Arc<dyn MetricsConsumer>,
    next_consumer: Arc<dyn TraceConsumer>,
    flush_interval: Duration,
    exporter_name: String,
    started: AtomicBool,
    shutdown: AtomicBool,
    stop: Arc<Notify>,
    flush_task: Mutex<Option<JoinHandle<()>>>,
}

fn now_unix_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}

impl SpanMetricsProcessor {
    /// Builds the processor. The configuration is validated here; the
    /// processor never fails on configuration afterwards.
    pub fn new(
        config: &Config,
        metrics_consumer: Arc<dyn MetricsConsumer>,
        next_consumer: Arc<dyn TraceConsumer>,
    ) -> Result<Self> {
        let aggregator = SpanAggregator::new(config, now_unix_nanos())?;
        Ok(Self {
            aggregator: Arc::new(Mutex::new(aggregator)),
            metrics_consumer,
            next_consumer,
            flush_interval: config.flush_interval,
            exporter_name: config.metrics_exporter.clone(),
            started: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            stop: Arc::new(Notify::new()),
            flush_task: Mutex::new(None),
        })
    }

    /// Starts the periodic flush task. Idempotent; the second and later
    /// calls are no-ops.
    pub fn start(&self) {
        if self
            .started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        tracing::info!(
            exporter = %self.exporter_name,
            interval = ?self.flush_interval,
            "starting span metrics flush task"
        );

        let aggregator = Arc::clone(&self.aggregator);
        let consumer = Arc::clone(&self.metrics_consumer);
        let stop = Arc::clone(&self.stop);
        let interval = self.flush_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + interval, interval);
            // Ticks missed behind a slow export are dropped, not replayed.
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        flush_once(&aggregator, consumer.as_ref()).await;
                    },
                    _ = stop.notified() => break,
                }
            }
            tracing::debug!("span metrics flush task stopped");
        });
        *self.flush_task.lock() = Some(handle);
    }

    /// Drains accumulated state to the metrics consumer immediately.
    pub async fn flush(&self) {
        flush_once(&self.aggregator, self.metrics_consumer.as_ref()).await;
    }

    /// Stops the flush task after one final flush. Idempotent.
    pub async fn shutdown(&self) {
        if self
            .shutdown
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        self.flush().await;
        // notify_one stores a permit, so the signal survives even when the
        // loop is mid-tick and not yet parked on notified().
        self.stop.notify_one();
        let handle = self.flush_task.lock().take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                tracing::warn!(error = %err, "flush task did not stop cleanly");
            }
        }
        tracing::info!("span metrics processor shut down");
    }
}

/// One flush cycle: build the batch under the lock, export outside it.
///
/// Exemplars are cleared whether or not the build succeeded; a failed build
/// additionally logs the cardinality report and keeps all accumulated state
/// for the next cycle. Consumer errors are logged and swallowed so one bad
/// export never stalls aggregation.
async fn flush_once(aggregator: &Mutex<SpanAggregator>, consumer: &dyn MetricsConsumer) {
    let built = {
        let mut aggregator = aggregator.lock();
        let built = aggregator.build_metrics(now_unix_nanos());
        aggregator.clear_exemplars();
        if built.is_err() {
            aggregator.log_cardinality();
        }
        built
    };
    match built {
        Ok(batch) => {
            if let Err(err) = consumer.consume_metrics(batch).await {
                tracing::error!(error = %err, "failed to export span metrics");
            }
        },
        Err(err) => {
            tracing::error!(error = %err, "failed to build span metrics batch");
        },
    }
}

#[async_trait]
impl TraceConsumer for SpanMetricsProcessor {
    /// Aggregates the batch under the lock, then forwards it unmodified.
    /// The only error surfaced is the downstream consumer's own.
    async fn consume_traces(&self, request: ExportTraceServiceRequest) -> Result<()> {
        self.aggregator.lock().aggregate(&request);
        self.next_consumer.consume_traces(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Error;
    use crate::metrics::dimensions::string_value;
    use opentelemetry_proto::tonic::common::v1::KeyValue;
    use opentelemetry_proto::tonic::resource::v1::Resource;
    use opentelemetry_proto::tonic::trace::v1::{
        span::SpanKind, status::StatusCode, ResourceSpans, ScopeSpans, Span, Status,
    };

    #[derive(Default)]
    struct CapturingMetricsConsumer {
        batches: Mutex<Vec<ExportMetricsServiceRequest>>,
    }

    #[async_trait]
    impl MetricsConsumer for CapturingMetricsConsumer {
        async fn consume_metrics(&self, request: ExportMetricsServiceRequest) -> Result<()> {
            self.batches.lock().push(request);
            Ok(())
        }
    }

    #[derive(Default)]
    struct CapturingTraceConsumer {
        batches: Mutex<Vec<ExportTraceServiceRequest>>,
    }

    #[async_trait]
    impl TraceConsumer for CapturingTraceConsumer {
        async fn consume_traces(&self, request: ExportTraceServiceRequest) -> Result<()> {
            self.batches.lock().push(request);
            Ok(())
        }
    }

    fn trace_request() -> ExportTraceServiceRequest {
        ExportTraceServiceRequest {
            resource_spans: vec![ResourceSpans {
                resource: Some(Resource {
                    attributes: vec![KeyValue {
                        key: "service.name".to_string(),
                        value: Some(string_value("svc")),
                    }],
                    ..Resource::default()
                }),
                scope_spans: vec![ScopeSpans {
                    spans: vec![Span {
                        trace_id: vec![1; 16],
                        span_id: vec![2; 8],
                        name: "/ping".to_string(),
                        kind: SpanKind::Server as i32,
                        start_time_unix_nano: 1_000_000_000,
                        end_time_unix_nano: 1_011_000_000,
                        status: Some(Status {
                            code: StatusCode::Ok as i32,
                            ..Status::default()
                        }),
                        ..Span::default()
                    }],
                    ..ScopeSpans::default()
                }],
                ..ResourceSpans::default()
            }],
        }
    }

    fn processor_with(
        config: &Config,
    ) -> (
        SpanMetricsProcessor,
        Arc<CapturingMetricsConsumer>,
        Arc<CapturingTraceConsumer>,
    ) {
        let metrics = Arc::new(CapturingMetricsConsumer::default());
        let traces = Arc::new(CapturingTraceConsumer::default());
        let processor = SpanMetricsProcessor::new(
            config,
            Arc::clone(&metrics) as Arc<dyn MetricsConsumer>,
            Arc::clone(&traces) as Arc<dyn TraceConsumer>,
        )
        .unwrap();
        (processor, metrics, traces)
    }

    #[tokio::test]
    async fn test_traces_forwarded_unmodified() {
        let (processor, _, traces) = processor_with(&Config::default());
        let request = trace_request();
        processor.consume_traces(request.clone()).await.unwrap();
        let forwarded = traces.batches.lock();
        assert_eq!(forwarded.len(), 1);
        assert_eq!(forwarded[0], request);
    }

    #[tokio::test]
    async fn test_manual_flush_exports_batch() {
        let (processor, metrics, _) = processor_with(&Config::default());
        processor.consume_traces(trace_request()).await.unwrap();
        processor.flush().await;

        let batches = metrics.batches.lock();
        assert_eq!(batches.len(), 1);
        let names: Vec<&str> = batches[0].resource_metrics[0].scope_metrics[0]
            .metrics
            .iter()
            .map(|m| m.name.as_str())
            .collect();
        assert_eq!(
            names,
            vec![
                "calls_total",
                "latency",
                "external_call_latency_sum",
                "external_call_latency_count",
                "db_latency_sum",
                "db_latency_count",
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_flush() {
        let config = Config {
            flush_interval: Duration::from_secs(5),
            ..Config::default()
        };
        let (processor, metrics, _) = processor_with(&config);
        processor.start();
        processor.consume_traces(trace_request()).await.unwrap();

        // Paused time auto-advances once every task is idle, so this sleep
        // carries the ticker past its first deadline.
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(metrics.batches.lock().len(), 1);

        processor.shutdown().await;
    }

    #[tokio::test]
    async fn test_lifecycle_is_idempotent() {
        let (processor, metrics, _) = processor_with(&Config::default());
        processor.start();
        processor.start();
        processor.consume_traces(trace_request()).await.unwrap();
        processor.shutdown().await;
        processor.shutdown().await;
        // The shutdown flush exported exactly once despite the double calls.
        assert_eq!(metrics.batches.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_completes_while_flush_is_mid_tick() {
        struct SlowMetricsConsumer;

        #[async_trait]
        impl MetricsConsumer for SlowMetricsConsumer {
            async fn consume_metrics(&self, _: ExportMetricsServiceRequest) -> Result<()> {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            }
        }

        let config = Config {
            flush_interval: Duration::from_secs(1),
            ..Config::default()
        };
        let processor = SpanMetricsProcessor::new(
            &config,
            Arc::new(SlowMetricsConsumer),
            Arc::new(NoopTraceConsumer),
        )
        .unwrap();
        processor.start();
        processor.consume_traces(trace_request()).await.unwrap();

        // Land the ticker inside the slow export before asking to stop; the
        // stop signal must survive until the loop parks on it again.
        tokio::time::sleep(Duration::from_secs(2)).await;
        tokio::time::timeout(Duration::from_secs(20_000), processor.shutdown())
            .await
            .expect("shutdown must finish once the in-flight flush completes");
    }

    #[tokio::test(start_paused = true)]
    async fn test_missed_ticks_are_skipped_not_replayed() {
        #[derive(Default)]
        struct StallingMetricsConsumer {
            calls: std::sync::atomic::AtomicUsize,
        }

        #[async_trait]
        impl MetricsConsumer for StallingMetricsConsumer {
            async fn consume_metrics(&self, _: ExportMetricsServiceRequest) -> Result<()> {
                if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                }
                Ok(())
            }
        }

        let consumer = Arc::new(StallingMetricsConsumer::default());
        let config = Config {
            flush_interval: Duration::from_secs(1),
            ..Config::default()
        };
        let processor = SpanMetricsProcessor::new(
            &config,
            Arc::clone(&consumer) as Arc<dyn MetricsConsumer>,
            Arc::new(NoopTraceConsumer),
        )
        .unwrap();
        processor.start();

        tokio::time::sleep(Duration::from_secs(35)).await;
        let flushes = consumer.calls.load(Ordering::SeqCst);
        // One 30s stall plus the post-stall ticks; replaying the thirty
        // missed intervals would push this past thirty.
        assert!(flushes <= 6, "expected skipped ticks, saw {} flushes", flushes);
        processor.shutdown().await;
    }

    #[tokio::test]
    async fn test_downstream_error_propagates_unwrapped() {
        struct RejectingTraceConsumer;

        #[async_trait]
        impl TraceConsumer for RejectingTraceConsumer {
            async fn consume_traces(&self, _: ExportTraceServiceRequest) -> Result<()> {
                Err(Error::export("sink full"))
            }
        }

        let processor = SpanMetricsProcessor::new(
            &Config::default(),
            Arc::new(CapturingMetricsConsumer::default()),
            Arc::new(RejectingTraceConsumer),
        )
        .unwrap();
        let err = processor.consume_traces(trace_request()).await.unwrap_err();
        assert!(matches!(err, Error::Export(_)));
    }

    #[tokio::test]
    async fn test_consumer_error_does_not_stall_aggregation() {
        struct FailingMetricsConsumer;

        #[async_trait]
        impl MetricsConsumer for FailingMetricsConsumer {
            async fn consume_metrics(&self, _: ExportMetricsServiceRequest) -> Result<()> {
                Err(Error::export("downstream unavailable"))
            }
        }

        let traces = Arc::new(CapturingTraceConsumer::default());
        let processor = SpanMetricsProcessor::new(
            &Config::default(),
            Arc::new(FailingMetricsConsumer),
            Arc::clone(&traces) as Arc<dyn TraceConsumer>,
        )
        .unwrap();

        processor.consume_traces(trace_request()).await.unwrap();
        processor.flush().await;
        // The export failed but the next batch still aggregates and flushes.
        processor.consume_traces(trace_request()).await.unwrap();
        processor.flush().await;
    }
}
