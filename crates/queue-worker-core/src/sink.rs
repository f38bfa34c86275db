//! Sinks receive signals produced while running workflow tasks.

use crate::workflow::LogLevel;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub enum SinkEvent {
    WorkflowLog {
        workflow_id: String,
        run_id: String,
        workflow_type: String,
        level: LogLevel,
        message: String,
    },
    WorkflowFinished {
        workflow_id: String,
        run_id: String,
        workflow_type: String,
        task_queue: String,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        error: Option<String>,
    },
}

pub trait Sink: Send + Sync {
    fn emit(&self, event: &SinkEvent);
}

/// Named sinks; every event goes to all of them
#[derive(Clone, Default)]
pub struct SinkRegistry {
    sinks: BTreeMap<String, Arc<dyn Sink>>,
}

impl SinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, name: impl Into<String>, sink: Arc<dyn Sink>) -> Self {
        self.sinks.insert(name.into(), sink);
        self
    }

    pub fn names(&self) -> Vec<&str> {
        self.sinks.keys().map(String::as_str).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.sinks.contains_key(name)
    }

    pub fn emit(&self, event: &SinkEvent) {
        for sink in self.sinks.values() {
            sink.emit(event);
        }
    }
}

impl fmt::Debug for SinkRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

/// Forwards workflow logs to the process logger
pub struct LoggerSink;

impl Sink for LoggerSink {
    fn emit(&self, event: &SinkEvent) {
        if let SinkEvent::WorkflowLog {
            workflow_id,
            run_id,
            workflow_type,
            level,
            message,
        } = event
        {
            match level {
                LogLevel::Debug => debug!(%workflow_id, %run_id, %workflow_type, "{}", message),
                LogLevel::Info => info!(%workflow_id, %run_id, %workflow_type, "{}", message),
                LogLevel::Warn => warn!(%workflow_id, %run_id, %workflow_type, "{}", message),
                LogLevel::Error => error!(%workflow_id, %run_id, %workflow_type, "{}", message),
            }
        }
    }
}

pub const LOGGER_SINK: &str = "logger";

pub fn default_sinks() -> SinkRegistry {
    SinkRegistry::new().with_sink(LOGGER_SINK, Arc::new(LoggerSink))
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct Collect(Mutex<Vec<String>>);

    impl Sink for Collect {
        fn emit(&self, event: &SinkEvent) {
            if let SinkEvent::WorkflowLog { message, .. } = event {
                self.0.lock().push(message.clone());
            }
        }
    }

    #[test]
    fn test_default_sinks_include_logger() {
        let sinks = default_sinks();
        assert_eq!(sinks.names(), vec![LOGGER_SINK]);
    }

    #[test]
    fn test_emit_reaches_every_sink() {
        let collect = Arc::new(Collect(Mutex::new(Vec::new())));
        let sinks = default_sinks().with_sink("collect", collect.clone());

        sinks.emit(&SinkEvent::WorkflowLog {
            workflow_id: "wf".to_string(),
            run_id: "run".to_string(),
            workflow_type: "greet".to_string(),
            level: LogLevel::Info,
            message: "hi".to_string(),
        });

        assert_eq!(*collect.0.lock(), vec!["hi".to_string()]);
        assert!(sinks.contains("collect"));
    }
}
