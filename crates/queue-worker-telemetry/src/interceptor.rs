use crate::exporter::FinishedSpan;
use crate::TelemetryHandles;
use async_trait::async_trait;
use chrono::Utc;
use prometheus::IntGauge;
use queue_worker_core::{
    ActivityContext, ActivityInboundInterceptor, ActivityInput, ActivityResult, Next,
};
use std::time::Instant;

pub const TELEMETRY_INTERCEPTOR: &str = "telemetry";

/// Holds one unit of an in-progress gauge until dropped
struct InProgress(IntGauge);

impl InProgress {
    fn enter(gauge: &IntGauge) -> Self {
        gauge.inc();
        InProgress(gauge.clone())
    }
}

impl Drop for InProgress {
    fn drop(&mut self) {
        self.0.dec();
    }
}

/// Records metrics and a `RunActivity` span around each activity invocation.
pub struct TelemetryActivityInterceptor {
    context: ActivityContext,
    telemetry: TelemetryHandles,
}

impl TelemetryActivityInterceptor {
    pub fn new(context: &ActivityContext, telemetry: TelemetryHandles) -> Self {
        TelemetryActivityInterceptor {
            context: context.clone(),
            telemetry,
        }
    }
}

#[async_trait]
impl ActivityInboundInterceptor for TelemetryActivityInterceptor {
    async fn execute(&self, input: ActivityInput, next: Next<'_>) -> ActivityResult {
        let metrics = self.telemetry.metrics();
        let activity_type = self.context.activity_type.as_str();
        let started_at = Utc::now();
        let started = Instant::now();

        let in_progress = InProgress::enter(&metrics.activity_tasks_in_progress);
        let result = next.run(input).await;
        drop(in_progress);

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        metrics.observe_activity_duration(activity_type, elapsed_ms);
        let status = if result.is_ok() { "completed" } else { "failed" };
        metrics.inc_activity_total(status, activity_type);

        let mut span = FinishedSpan::new(
            format!("RunActivity:{}", activity_type),
            self.telemetry.resource(),
            started_at,
            Utc::now(),
        )
        .with_attribute("task_id", self.context.task_id.to_string())
        .with_attribute("task_queue", self.context.task_queue.clone())
        .with_attribute("attempt", self.context.attempt.to_string());
        if let Some(workflow_id) = &self.context.workflow_id {
            span = span.with_attribute("workflow_id", workflow_id.clone());
        }
        if let Err(e) = &result {
            span = span.with_error(e.clone());
        }
        self.telemetry.trace_exporter().export(span);

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TelemetryConfig;
    use queue_worker_core::{ActivityHandler, EchoActivity, Interceptors};
    use std::time::Duration;
    use uuid::Uuid;

    struct Stalls;

    #[async_trait]
    impl ActivityHandler for Stalls {
        async fn execute(&self, _input: ActivityInput) -> ActivityResult {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(Vec::new())
        }
    }

    fn context() -> ActivityContext {
        ActivityContext {
            task_id: Uuid::new_v4(),
            activity_type: "echo".to_string(),
            task_queue: "emails".to_string(),
            workflow_id: Some("wf-1".to_string()),
            attempt: 1,
        }
    }

    fn chain(telemetry: &TelemetryHandles) -> Interceptors {
        let t = telemetry.clone();
        Interceptors::new().activity_inbound(TELEMETRY_INTERCEPTOR, move |ctx| {
            Box::new(TelemetryActivityInterceptor::new(ctx, t.clone()))
        })
    }

    #[tokio::test]
    async fn test_records_metrics_and_span() {
        let telemetry = TelemetryHandles::build(TelemetryConfig::new("test")).unwrap();
        let result = chain(&telemetry)
            .execute_activity(&EchoActivity, ActivityInput::new(context(), b"x".to_vec()))
            .await;

        assert!(result.is_ok());
        let metrics = telemetry.metrics();
        assert_eq!(
            metrics
                .activity_tasks_total
                .with_label_values(&["completed", "echo"])
                .get(),
            1
        );
        assert_eq!(metrics.activity_tasks_in_progress.get(), 0);
        assert_eq!(telemetry.trace_exporter().buffered(), 1);
    }

    #[tokio::test]
    async fn test_abandoned_invocation_releases_in_progress() {
        let telemetry = TelemetryHandles::build(TelemetryConfig::new("test")).unwrap();
        let interceptors = chain(&telemetry);

        let run = interceptors.execute_activity(&Stalls, ActivityInput::new(context(), Vec::new()));
        assert!(tokio::time::timeout(Duration::from_millis(50), run).await.is_err());

        assert_eq!(telemetry.metrics().activity_tasks_in_progress.get(), 0);
    }
}
