//! Pipeline facade: the one entry point application code talks to.
//!
//! ```no_run
//! # async fn demo() -> Result<(), ollystack_otel_pipeline::PipelineError> {
//! use ollystack_otel_pipeline::{Config, KeyValue, Pipeline};
//! use std::time::Duration;
//!
//! let pipeline = Pipeline::builder(Config::default()).start().await?;
//! let mut span = pipeline.start_span("GET /fortune", vec![KeyValue::new("http.method", "GET")]);
//! span.add_event("fortune.selected", vec![]);
//! span.end();
//! pipeline.record_metric("fortune.latency_ms", 12.5, vec![]);
//! pipeline.shutdown(Duration::from_secs(10)).await?;
//! # Ok(())
//! # }
//! ```

mod span;

pub use span::SpanHandle;

use arc_swap::ArcSwap;
use opentelemetry::trace::SpanId;
use opentelemetry_sdk::trace::{IdGenerator, RandomIdGenerator};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{Config, FallbackMode, Protocol, TransportConfig};
use crate::error::{ErrorClass, PipelineError};
use crate::exporters::{build_transport, FallbackSink, Transport};
use crate::health::{HealthMonitor, HealthState};
use crate::processor::{ActiveTransport, BatchProcessor, Dispatcher};
use crate::record::{KeyValue, MetricKind, MetricPoint, Record, RecordKind, Resource};
use crate::stats::{PipelineStats, StatsSnapshot};

/// Introspection view of a running pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineStatus {
    pub state: HealthState,
    pub protocol: Protocol,
    pub endpoint: String,
    pub last_error: Option<ErrorClass>,
    pub buffered_spans: usize,
    pub buffered_metrics: usize,
    #[serde(flatten)]
    pub stats: StatsSnapshot,
}

struct Tasks {
    workers: Vec<JoinHandle<()>>,
    probe: JoinHandle<()>,
}

struct Inner {
    resource: Arc<Resource>,
    processor: BatchProcessor,
    health: Arc<HealthMonitor>,
    active: Arc<ArcSwap<ActiveTransport>>,
    stats: Arc<PipelineStats>,
    ids: RandomIdGenerator,
    cancel: CancellationToken,
    tasks: Mutex<Option<Tasks>>,
    /// Runtime the pipeline was started on; transports built later spawn
    /// their connection tasks here.
    runtime: Handle,
}

impl Drop for Inner {
    // Lets the workers drain and exit when the last handle goes away
    // without an explicit shutdown.
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Handle to a running export pipeline. Cheap to clone.
#[derive(Clone)]
pub struct Pipeline {
    inner: Arc<Inner>,
}

pub struct PipelineBuilder {
    config: Config,
    transport: Option<Arc<dyn Transport>>,
    fallback: Option<Arc<dyn Transport>>,
}

impl PipelineBuilder {
    /// Use `transport` instead of building one from `config.collector`.
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Replace the local-log fallback sink.
    pub fn with_fallback(mut self, fallback: Arc<dyn Transport>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Validate the configuration and spawn the background tasks.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn start(self) -> Result<Pipeline, PipelineError> {
        let config = self.config;
        config.validate()?;

        let transport_config = config.collector.resolve()?;
        let transport = match self.transport {
            Some(transport) => transport,
            None => build_transport(&transport_config)?,
        };
        let fallback = self
            .fallback
            .unwrap_or_else(|| Arc::new(FallbackSink::new()) as Arc<dyn Transport>);

        info!(
            endpoint = %transport_config.endpoint,
            protocol = transport_config.protocol.as_str(),
            transport = transport.name(),
            fallback = ?config.health.fallback,
            "Starting telemetry pipeline"
        );

        let resource = Arc::new(Resource::from_config(&config.resource));
        let stats = Arc::new(PipelineStats::new());
        let active = Arc::new(ArcSwap::from_pointee(ActiveTransport::new(
            transport_config,
            transport,
        )));
        let health = Arc::new(HealthMonitor::new(
            active.clone(),
            stats.clone(),
            config.health.probe_interval(),
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            active.clone(),
            fallback,
            config.health.fallback,
            health.clone(),
            stats.clone(),
        ));

        let cancel = CancellationToken::new();
        let (processor, workers) = BatchProcessor::spawn(
            &config.batch,
            resource.clone(),
            dispatcher,
            stats.clone(),
            cancel.clone(),
        );
        let probe = tokio::spawn(health.clone().run(cancel.clone()));

        if config.health.fallback == FallbackMode::Disabled {
            debug!("Fallback disabled, batches are dropped while the collector is unreachable");
        }

        Ok(Pipeline {
            inner: Arc::new(Inner {
                resource,
                processor,
                health,
                active,
                stats,
                ids: RandomIdGenerator::default(),
                cancel,
                tasks: Mutex::new(Some(Tasks { workers, probe })),
                runtime: Handle::current(),
            }),
        })
    }
}

impl Pipeline {
    pub fn builder(config: Config) -> PipelineBuilder {
        PipelineBuilder {
            config,
            transport: None,
            fallback: None,
        }
    }

    /// Start a pipeline with the transport and fallback selected by `config`.
    pub async fn start(config: Config) -> Result<Self, PipelineError> {
        Self::builder(config).start().await
    }

    /// Open a new root span.
    pub fn start_span(&self, name: impl Into<String>, attributes: Vec<KeyValue>) -> SpanHandle {
        let trace_id = self.inner.ids.new_trace_id();
        SpanHandle::new(self.clone(), name.into(), attributes, trace_id, None)
    }

    /// Submit a gauge data point.
    pub fn record_metric(&self, name: impl Into<String>, value: f64, attributes: Vec<KeyValue>) {
        self.submit_point(name.into(), value, MetricKind::Gauge, attributes);
    }

    /// Submit a monotonic counter increment.
    pub fn record_counter(&self, name: impl Into<String>, value: f64, attributes: Vec<KeyValue>) {
        self.submit_point(name.into(), value, MetricKind::Counter, attributes);
    }

    fn submit_point(&self, name: String, value: f64, kind: MetricKind, attributes: Vec<KeyValue>) {
        let point = MetricPoint {
            name,
            value,
            kind,
            time: SystemTime::now(),
            attributes,
        };
        self.submit(Record::metric(self.resource(), point));
    }

    pub(crate) fn submit(&self, record: Record) {
        self.inner.processor.submit(record);
    }

    pub(crate) fn resource(&self) -> Arc<Resource> {
        self.inner.resource.clone()
    }

    pub(crate) fn new_span_id(&self) -> SpanId {
        self.inner.ids.new_span_id()
    }

    /// Flush all buffered records and wait for the resulting sends.
    pub async fn force_flush(&self) {
        self.inner.processor.force_flush().await;
    }

    pub fn health(&self) -> HealthState {
        self.inner.health.state()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    pub fn status(&self) -> PipelineStatus {
        let active = self.inner.active.load();
        PipelineStatus {
            state: self.inner.health.state(),
            protocol: active.config.protocol,
            endpoint: active.config.endpoint.clone(),
            last_error: self.inner.stats.last_error(),
            buffered_spans: self.inner.processor.buffered(RecordKind::Span),
            buffered_metrics: self.inner.processor.buffered(RecordKind::Metric),
            stats: self.inner.stats.snapshot(),
        }
    }

    /// Build a transport for `config` and make it the active one.
    ///
    /// Safe to call from threads outside the runtime.
    pub fn reconfigure(&self, config: TransportConfig) -> Result<(), PipelineError> {
        let transport = {
            let _runtime = self.inner.runtime.enter();
            build_transport(&config)?
        };
        self.replace_transport(config, transport);
        Ok(())
    }

    /// Atomically swap the active transport and reset health to Healthy.
    ///
    /// Sends already in flight finish against the previous transport.
    pub fn replace_transport(&self, config: TransportConfig, transport: Arc<dyn Transport>) {
        info!(
            endpoint = %config.endpoint,
            protocol = config.protocol.as_str(),
            transport = transport.name(),
            "Switching collector transport"
        );
        self.inner
            .active
            .store(Arc::new(ActiveTransport::new(config, transport)));
        self.inner.health.reset();
    }

    /// Stop the pipeline: reject new records, flush what is buffered and
    /// wait up to `timeout` for the sends to finish.
    ///
    /// Sends still running at the deadline are aborted and
    /// [`PipelineError::ShutdownTimeout`] is returned. Calling this again
    /// after the first call returns `Ok(())` immediately.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), PipelineError> {
        let Some(tasks) = self.inner.tasks.lock().take() else {
            debug!("Pipeline already shut down");
            return Ok(());
        };

        info!(timeout_ms = timeout.as_millis() as u64, "Shutting down telemetry pipeline");
        self.inner.processor.close();
        self.inner.cancel.cancel();
        tasks.probe.abort();
        // Wait for the abort to land so an interrupted probe cannot leave
        // the state stuck in Probing.
        let _ = tasks.probe.await;
        self.inner.health.abandon_probe();

        let deadline = tokio::time::Instant::now() + timeout;
        let mut pending = 0;
        for mut worker in tasks.workers {
            match tokio::time::timeout_at(deadline, &mut worker).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "Batch worker failed during shutdown"),
                Err(_) => {
                    worker.abort();
                    pending += 1;
                }
            }
        }

        let stats = self.inner.stats.snapshot();
        if pending > 0 {
            self.inner.stats.record_error(ErrorClass::ShutdownTimeout);
            warn!(
                pending,
                records_exported = stats.records_exported,
                "Shutdown deadline reached, aborting outstanding exports"
            );
            return Err(PipelineError::ShutdownTimeout { pending });
        }

        info!(
            records_exported = stats.records_exported,
            records_dropped = stats.records_dropped,
            batches_fallback = stats.batches_fallback,
            "Telemetry pipeline stopped"
        );
        Ok(())
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("state", &self.inner.health.state())
            .finish_non_exhaustive()
    }
}
