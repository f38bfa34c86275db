//! Span buffering and export.
//!
//! Spans are queued in a bounded channel from the moment the exporter exists, so
//! spans recorded during startup survive until [`crate::TelemetryHandles::start`]
//! spawns the export loop. When the buffer is full new spans are dropped and counted.

use crate::resource::Resource;
use crate::TelemetryError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use prometheus::IntCounter;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Maximum spans handed to the sink in one call
const MAX_BATCH_SIZE: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpanStatus {
    Ok,
    Error(String),
}

#[derive(Debug, Clone)]
pub struct FinishedSpan {
    pub trace_id: Uuid,
    pub span_id: Uuid,
    pub name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub attributes: BTreeMap<String, String>,
    pub status: SpanStatus,
    pub resource: Arc<Resource>,
}

impl FinishedSpan {
    pub fn new(
        name: impl Into<String>,
        resource: Arc<Resource>,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> Self {
        FinishedSpan {
            trace_id: Uuid::new_v4(),
            span_id: Uuid::new_v4(),
            name: name.into(),
            start_time,
            end_time,
            attributes: BTreeMap::new(),
            status: SpanStatus::Ok,
            resource,
        }
    }

    pub fn with_attribute(mut self, key: &str, value: impl Into<String>) -> Self {
        self.attributes.insert(key.to_string(), value.into());
        self
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.status = SpanStatus::Error(message.into());
        self
    }

    pub fn duration_ms(&self) -> i64 {
        (self.end_time - self.start_time).num_milliseconds()
    }
}

/// Destination for finished spans
#[async_trait]
pub trait SpanSink: Send + Sync {
    async fn export(&self, batch: Vec<FinishedSpan>) -> Result<(), TelemetryError>;
}

/// Writes each span as a structured log line
pub struct LogSpanSink;

#[async_trait]
impl SpanSink for LogSpanSink {
    async fn export(&self, batch: Vec<FinishedSpan>) -> Result<(), TelemetryError> {
        for span in batch {
            let attributes = serde_json::to_string(&span.attributes)
                .map_err(|e| TelemetryError::Export(e.to_string()))?;
            let resource = serde_json::to_string(&span.resource.attributes())
                .map_err(|e| TelemetryError::Export(e.to_string()))?;
            info!(
                target: "queue_worker::spans",
                trace_id = %span.trace_id,
                span_id = %span.span_id,
                resource = %resource,
                duration_ms = span.duration_ms(),
                status = ?span.status,
                attributes = %attributes,
                "{}",
                span.name
            );
        }
        Ok(())
    }
}

/// Cloneable handle that queues spans for export
#[derive(Clone)]
pub struct TraceExporter {
    tx: mpsc::Sender<FinishedSpan>,
    rx: Arc<Mutex<Option<mpsc::Receiver<FinishedSpan>>>>,
    dropped: IntCounter,
}

impl TraceExporter {
    pub fn new(capacity: usize, dropped: IntCounter) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        TraceExporter {
            tx,
            rx: Arc::new(Mutex::new(Some(rx))),
            dropped,
        }
    }

    /// Queue a span; never blocks
    pub fn export(&self, span: FinishedSpan) {
        match self.tx.try_send(span) {
            Ok(()) => {}
            Err(TrySendError::Full(span)) => {
                self.dropped.inc();
                debug!("Span buffer full, dropping span {}", span.name);
            }
            Err(TrySendError::Closed(span)) => {
                self.dropped.inc();
                debug!("Span export stopped, dropping span {}", span.name);
            }
        }
    }

    /// Spans waiting to be exported
    pub fn buffered(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.get()
    }

    pub(crate) fn take_receiver(&self) -> Option<mpsc::Receiver<FinishedSpan>> {
        self.rx.lock().take()
    }
}

/// Drain the buffer into `sink` until every exporter handle is gone
pub(crate) async fn export_loop(mut rx: mpsc::Receiver<FinishedSpan>, sink: Arc<dyn SpanSink>) {
    let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
    while rx.recv_many(&mut batch, MAX_BATCH_SIZE).await > 0 {
        let spans = std::mem::replace(&mut batch, Vec::with_capacity(MAX_BATCH_SIZE));
        let count = spans.len();
        if let Err(e) = sink.export(spans).await {
            warn!("Dropping {} spans, export failed: {}", count, e);
        }
    }
    debug!("Span export loop finished");
}
