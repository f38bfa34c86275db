use crate::exporter::{FinishedSpan, TraceExporter};
use crate::resource::Resource;
use queue_worker_core::{Sink, SinkEvent};
use std::sync::Arc;

pub const EXPORTER_SINK: &str = "exporter";

/// Turns finished workflow runs into `RunWorkflow` spans stamped with the worker resource.
pub struct WorkflowExporterSink {
    exporter: TraceExporter,
    resource: Arc<Resource>,
}

pub fn make_workflow_exporter(
    exporter: TraceExporter,
    resource: Arc<Resource>,
) -> WorkflowExporterSink {
    WorkflowExporterSink { exporter, resource }
}

impl Sink for WorkflowExporterSink {
    fn emit(&self, event: &SinkEvent) {
        if let SinkEvent::WorkflowFinished {
            workflow_id,
            run_id,
            workflow_type,
            task_queue,
            started_at,
            finished_at,
            error,
        } = event
        {
            let mut span = FinishedSpan::new(
                format!("RunWorkflow:{}", workflow_type),
                self.resource.clone(),
                *started_at,
                *finished_at,
            )
            .with_attribute("workflow_id", workflow_id.clone())
            .with_attribute("run_id", run_id.clone())
            .with_attribute("task_queue", task_queue.clone());
            if let Some(error) = error {
                span = span.with_error(error.clone());
            }
            self.exporter.export(span);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use prometheus::IntCounter;
    use queue_worker_core::LogLevel;

    #[test]
    fn test_only_finished_workflows_are_exported() {
        let exporter = TraceExporter::new(8, IntCounter::new("d", "d").unwrap());
        let sink = make_workflow_exporter(exporter.clone(), Arc::new(Resource::detect("test")));

        sink.emit(&SinkEvent::WorkflowLog {
            workflow_id: "wf".to_string(),
            run_id: "run".to_string(),
            workflow_type: "greet".to_string(),
            level: LogLevel::Info,
            message: "hello".to_string(),
        });
        assert_eq!(exporter.buffered(), 0);

        sink.emit(&SinkEvent::WorkflowFinished {
            workflow_id: "wf".to_string(),
            run_id: "run".to_string(),
            workflow_type: "greet".to_string(),
            task_queue: "emails".to_string(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            error: None,
        });
        assert_eq!(exporter.buffered(), 1);
    }
}
