use crate::view::{histogram_buckets, MetricView};
use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
};
use queue_worker_core::WORKSPACE_COMPUTE_LATENCY_METRIC;
use std::collections::HashMap;

/// Prometheus metrics for the worker
pub struct WorkerMetrics {
    pub registry: Registry,

    // Activity counters
    pub activity_tasks_total: IntCounterVec,
    pub activity_tasks_in_progress: IntGauge,
    pub activity_execution_duration: HistogramVec,

    // Workflow counters
    pub workflow_tasks_total: IntCounterVec,
    pub workflow_cache_size: IntGauge,

    // Span export
    pub spans_dropped_total: IntCounter,

    pub workspace_compute_latency: Histogram,
}

fn histogram_opts(name: &str, help: &str, views: &[MetricView]) -> HistogramOpts {
    let opts = HistogramOpts::new(name, help);
    match histogram_buckets(views, name) {
        Some(buckets) => opts.buckets(buckets),
        None => opts,
    }
}

impl WorkerMetrics {
    pub fn new(service_name: &str, views: &[MetricView]) -> prometheus::Result<Self> {
        let mut labels = HashMap::new();
        labels.insert("service".to_string(), service_name.to_string());
        let registry = Registry::new_custom(None, Some(labels))?;

        let activity_tasks_total = IntCounterVec::new(
            Opts::new(
                "activity_tasks_total",
                "Activity executions by outcome and activity type",
            ),
            &["status", "activity_type"],
        )?;
        registry.register(Box::new(activity_tasks_total.clone()))?;

        let activity_tasks_in_progress =
            IntGauge::new("activity_tasks_in_progress", "Activities currently executing")?;
        registry.register(Box::new(activity_tasks_in_progress.clone()))?;

        let activity_execution_duration = HistogramVec::new(
            histogram_opts(
                "activity_execution_duration_ms",
                "Activity execution duration in milliseconds",
                views,
            ),
            &["activity_type"],
        )?;
        registry.register(Box::new(activity_execution_duration.clone()))?;

        let workflow_tasks_total = IntCounterVec::new(
            Opts::new("workflow_tasks_total", "Workflow tasks by outcome"),
            &["status"],
        )?;
        registry.register(Box::new(workflow_tasks_total.clone()))?;

        let workflow_cache_size =
            IntGauge::new("workflow_cache_size", "Workflow runs held in the sticky cache")?;
        registry.register(Box::new(workflow_cache_size.clone()))?;

        let spans_dropped_total = IntCounter::new(
            "spans_dropped_total",
            "Spans dropped because the export buffer was full",
        )?;
        registry.register(Box::new(spans_dropped_total.clone()))?;

        let workspace_compute_latency = Histogram::with_opts(histogram_opts(
            WORKSPACE_COMPUTE_LATENCY_METRIC,
            "Latency of workspace computations in milliseconds",
            views,
        ))?;
        registry.register(Box::new(workspace_compute_latency.clone()))?;

        Ok(WorkerMetrics {
            registry,
            activity_tasks_total,
            activity_tasks_in_progress,
            activity_execution_duration,
            workflow_tasks_total,
            workflow_cache_size,
            spans_dropped_total,
            workspace_compute_latency,
        })
    }

    pub fn inc_activity_total(&self, status: &str, activity_type: &str) {
        self.activity_tasks_total
            .with_label_values(&[status, activity_type])
            .inc();
    }

    pub fn observe_activity_duration(&self, activity_type: &str, duration_ms: f64) {
        self.activity_execution_duration
            .with_label_values(&[activity_type])
            .observe(duration_ms);
    }

    pub fn inc_workflow_total(&self, status: &str) {
        self.workflow_tasks_total.with_label_values(&[status]).inc();
    }

    /// Record one workspace computation, in milliseconds
    pub fn observe_workspace_compute(&self, duration_ms: f64) {
        self.workspace_compute_latency.observe(duration_ms);
    }

    /// Text exposition of every registered metric
    pub fn encode_text(&self) -> Result<String, prometheus::Error> {
        use prometheus::{Encoder, TextEncoder};

        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
