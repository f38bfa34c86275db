//! Worker assembly.
//!
//! [`assemble`] turns the resolved configuration, both connection legs, the activity
//! registry and the telemetry handles into an [`ExecutionPolicy`]. The policy keeps
//! configuration overrides sparse; the runtime merges them over its own defaults with
//! [`ExecutionPolicy::runtime_options`].

use crate::connection::Connection;
use crate::establish::Connections;
use crate::interceptor::{CustomActivityInboundInterceptor, CUSTOM_INTERCEPTOR};
use queue_worker_core::{
    append_default_interceptors, default_sinks, ActivityRegistry, ControlPlane, Interceptors,
    RuntimeOptions, SinkRegistry, WorkerConfig, WorkerOverrides, WorkflowModuleRef,
};
use queue_worker_telemetry::{
    make_workflow_exporter, TelemetryActivityInterceptor, TelemetryHandles, EXPORTER_SINK,
    TELEMETRY_INTERCEPTOR,
};
use std::fmt;
use std::sync::Arc;

/// Everything a worker runtime needs to start polling one task queue
#[derive(Clone)]
pub struct ExecutionPolicy {
    pub connection: Connection,
    pub namespace: String,
    pub task_queue: String,
    pub workflows_module: WorkflowModuleRef,
    pub activities: ActivityRegistry,
    pub sinks: SinkRegistry,
    pub interceptors: Interceptors,
    pub enable_sdk_tracing: bool,
    /// Only the fields configuration set; everything else keeps the runtime default
    pub overrides: WorkerOverrides,
    pub telemetry: TelemetryHandles,
}

impl ExecutionPolicy {
    /// `defaults` with this policy's overrides applied
    pub fn runtime_options(&self, defaults: RuntimeOptions) -> RuntimeOptions {
        defaults.overlay(&self.overrides)
    }
}

impl fmt::Debug for ExecutionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionPolicy")
            .field("connection", &self.connection)
            .field("namespace", &self.namespace)
            .field("task_queue", &self.task_queue)
            .field("workflows_module", &self.workflows_module)
            .field("activities", &self.activities)
            .field("sinks", &self.sinks)
            .field("interceptors", &self.interceptors)
            .field("enable_sdk_tracing", &self.enable_sdk_tracing)
            .field("overrides", &self.overrides)
            .finish()
    }
}

/// Interceptor chain, outermost first: custom, telemetry, then platform defaults.
pub fn build_interceptors(
    control_plane: Arc<dyn ControlPlane>,
    telemetry: TelemetryHandles,
) -> Interceptors {
    let interceptors = Interceptors::new()
        .activity_inbound(CUSTOM_INTERCEPTOR, move |ctx| {
            Box::new(CustomActivityInboundInterceptor::new(ctx, control_plane.clone()))
        })
        .activity_inbound(TELEMETRY_INTERCEPTOR, move |ctx| {
            Box::new(TelemetryActivityInterceptor::new(ctx, telemetry.clone()))
        });
    append_default_interceptors(interceptors)
}

/// Default sinks plus the workflow exporter sink
pub fn build_sinks(telemetry: &TelemetryHandles) -> SinkRegistry {
    default_sinks().with_sink(
        EXPORTER_SINK,
        Arc::new(make_workflow_exporter(
            telemetry.trace_exporter(),
            telemetry.resource(),
        )),
    )
}

pub fn assemble(
    config: &WorkerConfig,
    connections: Connections,
    activities: ActivityRegistry,
    telemetry: &TelemetryHandles,
) -> ExecutionPolicy {
    let Connections {
        connection,
        control_plane,
    } = connections;

    ExecutionPolicy {
        connection,
        namespace: config.namespace.clone(),
        task_queue: config.task_queue.clone(),
        workflows_module: WorkflowModuleRef::new(config.workflows_module.clone()),
        activities,
        sinks: build_sinks(telemetry),
        interceptors: build_interceptors(Arc::new(control_plane), telemetry.clone()),
        enable_sdk_tracing: true,
        overrides: config.overrides.normalized(),
        telemetry: telemetry.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::establish::establish;
    use crate::testing::{test_config, FakeBroker};
    use proptest::prelude::*;
    use queue_worker_core::EchoActivity;
    use queue_worker_telemetry::TelemetryConfig;

    async fn policy_for(config: &WorkerConfig) -> ExecutionPolicy {
        let broker = FakeBroker::spawn().await;
        let connections = establish(&test_config(&broker.address)).await.unwrap();
        let telemetry = TelemetryHandles::build(TelemetryConfig::new("test")).unwrap();
        let activities = ActivityRegistry::new();
        activities.register("echo", EchoActivity);
        assemble(config, connections, activities, &telemetry)
    }

    #[tokio::test]
    async fn test_no_overrides_keeps_runtime_defaults() {
        let config = test_config("127.0.0.1:7233");
        let policy = policy_for(&config).await;

        assert_eq!(policy.task_queue, "emails");
        assert_eq!(policy.overrides, WorkerOverrides::default());
        assert_eq!(
            policy.runtime_options(RuntimeOptions::DEFAULT),
            RuntimeOptions::DEFAULT
        );
    }

    #[tokio::test]
    async fn test_cache_override_only() {
        let mut config = test_config("127.0.0.1:7233");
        config.overrides.max_cached_workflows = Some(50);
        let policy = policy_for(&config).await;

        assert_eq!(policy.overrides.max_cached_workflows, Some(50));
        assert_eq!(
            policy.overrides,
            WorkerOverrides {
                max_cached_workflows: Some(50),
                ..WorkerOverrides::default()
            }
        );
        let options = policy.runtime_options(RuntimeOptions::DEFAULT);
        assert_eq!(options.max_cached_workflows, 50);
        assert_eq!(
            options.max_concurrent_workflow_task_polls,
            RuntimeOptions::DEFAULT.max_concurrent_workflow_task_polls
        );
    }

    #[tokio::test]
    async fn test_always_set_fields() {
        let policy = policy_for(&test_config("127.0.0.1:7233")).await;

        assert!(policy.enable_sdk_tracing);
        assert_eq!(policy.namespace, "default");
        assert_eq!(policy.workflows_module.as_str(), "workflows");
        assert!(policy.activities.has_handler("echo"));
        assert_eq!(policy.sinks.names(), vec![EXPORTER_SINK, "logger"]);
    }

    #[tokio::test]
    async fn test_custom_interceptor_wraps_telemetry() {
        let policy = policy_for(&test_config("127.0.0.1:7233")).await;
        assert_eq!(
            policy.interceptors.activity_inbound_names(),
            vec![CUSTOM_INTERCEPTOR, TELEMETRY_INTERCEPTOR, "logging"]
        );
    }

    struct Unused;

    #[async_trait::async_trait]
    impl ControlPlane for Unused {
        async fn signal_workflow(
            &self,
            _: &str,
            _: &str,
            _: Vec<u8>,
        ) -> Result<(), queue_worker_core::ConnectionError> {
            Ok(())
        }

        async fn query_workflow(
            &self,
            _: &str,
            _: &str,
            _: Vec<u8>,
        ) -> Result<Vec<u8>, queue_worker_core::ConnectionError> {
            Ok(Vec::new())
        }
    }

    proptest! {
        #[test]
        fn prop_custom_precedes_telemetry(extra in 0usize..4) {
            let telemetry = TelemetryHandles::build(TelemetryConfig::new("prop")).unwrap();
            let mut interceptors = build_interceptors(Arc::new(Unused), telemetry);
            for _ in 0..extra {
                interceptors = append_default_interceptors(interceptors);
            }

            let names = interceptors.activity_inbound_names();
            let custom = names.iter().position(|n| *n == CUSTOM_INTERCEPTOR).unwrap();
            let telemetry = names.iter().position(|n| *n == TELEMETRY_INTERCEPTOR).unwrap();
            prop_assert_eq!(custom, 0);
            prop_assert_eq!(telemetry, 1);
            prop_assert_eq!(names.len(), 3 + extra);
        }
    }
}
