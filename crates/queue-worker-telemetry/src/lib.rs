//! Metrics and tracing pipeline for the worker.
//!
//! [`TelemetryHandles::build`] assembles the pipeline without touching the network.
//! [`init`] additionally installs it as process-wide state; that may happen at most
//! once per process and is never torn down. Export only begins at
//! [`TelemetryHandles::start`], which may also be called only once.

mod exporter;
mod interceptor;
mod metrics;
mod resource;
mod server;
mod sink;
mod view;

pub use exporter::{FinishedSpan, LogSpanSink, SpanSink, SpanStatus, TraceExporter};
pub use interceptor::{TelemetryActivityInterceptor, TELEMETRY_INTERCEPTOR};
pub use metrics::WorkerMetrics;
pub use resource::Resource;
pub use sink::{make_workflow_exporter, WorkflowExporterSink, EXPORTER_SINK};
pub use view::{
    workspace_compute_latency_view, Aggregation, InstrumentKind, MetricView,
    WORKSPACE_COMPUTE_LATENCY_BUCKETS_MS,
};

use once_cell::sync::OnceCell;
use queue_worker_core::WORKSPACE_COMPUTE_LATENCY_METRIC;
use server::serve_metrics;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Telemetry already installed for this process")]
    AlreadyInitialized,

    #[error("Telemetry export already started")]
    AlreadyStarted,

    #[error("Invalid view for {instrument}: {reason}")]
    InvalidView { instrument: String, reason: String },

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("Span export failed: {0}")]
    Export(String),
}

/// Spans buffered before export starts or while the sink lags
pub const DEFAULT_SPAN_BUFFER: usize = 2048;

#[derive(Clone)]
pub struct TelemetryConfig {
    pub service_name: String,
    views: Vec<MetricView>,
    pub metrics_address: Option<String>,
    pub span_buffer: usize,
    pub span_sink: Arc<dyn SpanSink>,
}

impl TelemetryConfig {
    /// Starts with the workspace compute latency view already in place.
    pub fn new(service_name: impl Into<String>) -> Self {
        TelemetryConfig {
            service_name: service_name.into(),
            views: vec![workspace_compute_latency_view()],
            metrics_address: None,
            span_buffer: DEFAULT_SPAN_BUFFER,
            span_sink: Arc::new(LogSpanSink),
        }
    }

    /// Add a view. Views for the workspace compute latency instrument are fixed and
    /// cannot be replaced.
    pub fn with_view(mut self, view: MetricView) -> Self {
        if view.instrument_name == WORKSPACE_COMPUTE_LATENCY_METRIC {
            warn!(
                "Ignoring view override for {}; its buckets are fixed",
                WORKSPACE_COMPUTE_LATENCY_METRIC
            );
            return self;
        }
        self.views.push(view);
        self
    }

    pub fn with_views(self, views: impl IntoIterator<Item = MetricView>) -> Self {
        views.into_iter().fold(self, |config, view| config.with_view(view))
    }

    pub fn with_metrics_address(mut self, addr: Option<String>) -> Self {
        self.metrics_address = addr;
        self
    }

    pub fn views(&self) -> &[MetricView] {
        &self.views
    }
}

struct Inner {
    resource: Arc<Resource>,
    metrics: Arc<WorkerMetrics>,
    trace_exporter: TraceExporter,
    span_sink: Arc<dyn SpanSink>,
    metrics_address: Option<String>,
    started: AtomicBool,
    start_calls: AtomicUsize,
}

/// Trace exporter, resource descriptor and the `start` switch for export
#[derive(Clone)]
pub struct TelemetryHandles {
    inner: Arc<Inner>,
}

impl TelemetryHandles {
    /// Build the pipeline. Nothing is exported until [`TelemetryHandles::start`].
    pub fn build(config: TelemetryConfig) -> Result<Self, TelemetryError> {
        let metrics = Arc::new(WorkerMetrics::new(&config.service_name, &config.views)?);
        let trace_exporter =
            TraceExporter::new(config.span_buffer, metrics.spans_dropped_total.clone());

        Ok(TelemetryHandles {
            inner: Arc::new(Inner {
                resource: Arc::new(Resource::detect(config.service_name)),
                metrics,
                trace_exporter,
                span_sink: config.span_sink,
                metrics_address: config.metrics_address,
                started: AtomicBool::new(false),
                start_calls: AtomicUsize::new(0),
            }),
        })
    }

    pub fn resource(&self) -> Arc<Resource> {
        self.inner.resource.clone()
    }

    pub fn trace_exporter(&self) -> TraceExporter {
        self.inner.trace_exporter.clone()
    }

    pub fn metrics(&self) -> Arc<WorkerMetrics> {
        self.inner.metrics.clone()
    }

    /// Begin exporting: spawns the span export loop and, if configured, the
    /// `/metrics` endpoint. Must run inside a tokio runtime. A second call fails.
    pub fn start(&self) -> Result<(), TelemetryError> {
        self.inner.start_calls.fetch_add(1, Ordering::SeqCst);
        if self
            .inner
            .started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(TelemetryError::AlreadyStarted);
        }

        if let Some(rx) = self.inner.trace_exporter.take_receiver() {
            tokio::spawn(exporter::export_loop(rx, self.inner.span_sink.clone()));
        }

        if let Some(addr) = self.inner.metrics_address.clone() {
            let metrics = self.inner.metrics.clone();
            tokio::spawn(async move {
                if let Err(e) = serve_metrics(metrics, addr.clone()).await {
                    error!("Metrics server on {} failed: {}", addr, e);
                }
            });
        }

        info!(
            service = %self.inner.resource.service_name,
            "Telemetry export started"
        );
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.inner.started.load(Ordering::SeqCst)
    }

    /// How many times `start` was called, including rejected calls
    pub fn start_calls(&self) -> usize {
        self.inner.start_calls.load(Ordering::SeqCst)
    }
}

static GLOBAL: OnceCell<TelemetryHandles> = OnceCell::new();

/// Build the pipeline and install it as the process-wide telemetry state.
pub fn init(config: TelemetryConfig) -> Result<TelemetryHandles, TelemetryError> {
    if GLOBAL.get().is_some() {
        return Err(TelemetryError::AlreadyInitialized);
    }
    let handles = TelemetryHandles::build(config)?;
    GLOBAL
        .set(handles.clone())
        .map_err(|_| TelemetryError::AlreadyInitialized)?;
    Ok(handles)
}
