//! Startup sequence and lifecycle of one worker process.
//!
//! ```text
//! Idle -> Connecting -> Assembling -> Starting -> Polling -> ShuttingDown -> Stopped
//!   \__________\____________\____________\__________\_____________\-> Failed
//! ```
//!
//! Telemetry export is started after the runtime has built its worker and before the
//! first poll, so no task runs with telemetry inactive.

use crate::establish::establish;
use crate::policy::assemble;
use crate::runtime::{RunnableWorker, WorkerRuntime};
use queue_worker_core::{
    ActivityRegistry, ConfigResolver, Result, RuntimeError, RuntimeOptions, WorkerConfig,
    WorkerError,
};
use queue_worker_telemetry::{TelemetryConfig, TelemetryError, TelemetryHandles};
use std::fmt;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    Idle,
    Connecting,
    Assembling,
    Starting,
    Polling,
    ShuttingDown,
    Stopped,
    Failed,
}

impl RunnerState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunnerState::Stopped | RunnerState::Failed)
    }

    pub fn can_transition_to(self, next: RunnerState) -> bool {
        use RunnerState::*;

        match (self, next) {
            (from, Failed) => !from.is_terminal(),
            (Idle, Connecting)
            | (Connecting, Assembling)
            | (Assembling, Starting)
            | (Starting, Polling)
            | (Polling, ShuttingDown)
            | (ShuttingDown, Stopped) => true,
            _ => false,
        }
    }
}

impl fmt::Display for RunnerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

fn telemetry_error(e: TelemetryError) -> WorkerError {
    RuntimeError::Telemetry(e.to_string()).into()
}

/// Drives a [`WorkerRuntime`] through startup, polling and shutdown.
pub struct Runner<R: WorkerRuntime> {
    runtime: R,
    activities: ActivityRegistry,
    state: RunnerState,
    telemetry: Option<TelemetryHandles>,
}

impl<R: WorkerRuntime> Runner<R> {
    pub fn new(runtime: R, activities: ActivityRegistry) -> Self {
        Runner {
            runtime,
            activities,
            state: RunnerState::Idle,
            telemetry: None,
        }
    }

    pub fn state(&self) -> RunnerState {
        self.state
    }

    /// Telemetry handles, once initialized
    pub fn telemetry(&self) -> Option<&TelemetryHandles> {
        self.telemetry.as_ref()
    }

    fn transition(&mut self, next: RunnerState) -> std::result::Result<(), RuntimeError> {
        if !self.state.can_transition_to(next) {
            return Err(RuntimeError::IllegalTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        info!("Worker state: {} -> {}", self.state, next);
        self.state = next;
        Ok(())
    }

    /// Run until `shutdown` fires (`Ok`) or anything fails (`Err`, state `Failed`).
    ///
    /// `init_telemetry` is called once with the service name and metric views;
    /// pass [`queue_worker_telemetry::init`] to install process-wide telemetry.
    pub async fn run<F>(
        &mut self,
        resolver: &ConfigResolver,
        init_telemetry: F,
        shutdown: CancellationToken,
    ) -> Result<()>
    where
        F: FnOnce(TelemetryConfig) -> std::result::Result<TelemetryHandles, TelemetryError>,
    {
        match self.drive(resolver, init_telemetry, shutdown).await {
            Ok(()) => Ok(()),
            Err(e) => {
                error!("Worker failed in state {}: {}", self.state, e);
                if !self.state.is_terminal() {
                    self.state = RunnerState::Failed;
                }
                Err(e)
            }
        }
    }

    async fn drive<F>(
        &mut self,
        resolver: &ConfigResolver,
        init_telemetry: F,
        shutdown: CancellationToken,
    ) -> Result<()>
    where
        F: FnOnce(TelemetryConfig) -> std::result::Result<TelemetryHandles, TelemetryError>,
    {
        self.transition(RunnerState::Connecting)?;
        let config = resolver.resolve()?;
        let telemetry = init_telemetry(
            TelemetryConfig::new(config.service_name.clone())
                .with_metrics_address(config.metrics_address.clone()),
        )
        .map_err(telemetry_error)?;
        self.telemetry = Some(telemetry.clone());
        let connections = establish(config).await?;

        self.transition(RunnerState::Assembling)?;
        let policy = assemble(config, connections, self.activities.clone(), &telemetry);
        let options = policy.runtime_options(self.runtime.default_options());
        let mut worker = self.runtime.create(policy)?;

        self.transition(RunnerState::Starting)?;
        telemetry.start().map_err(telemetry_error)?;
        log_effective_config(config, &options);

        self.transition(RunnerState::Polling)?;
        worker.run(shutdown).await?;

        self.transition(RunnerState::ShuttingDown)?;
        worker.drain().await?;

        self.transition(RunnerState::Stopped)?;
        info!("Worker stopped");
        Ok(())
    }
}

fn log_effective_config(config: &WorkerConfig, options: &RuntimeOptions) {
    info!(
        service = %config.service_name,
        task_queue = %config.task_queue,
        namespace = %config.namespace,
        address = %config.service_address,
        "Effective worker configuration"
    );
    if config.log_config {
        let effective = serde_json::json!({ "config": config, "runtime": options });
        info!("Effective configuration: {}", effective);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::ExecutionPolicy;
    use crate::testing::{closed_address, FakeBroker};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use queue_worker_core::{AssemblyError, ConfigurationError, SettingsSource};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Clone, Copy)]
    enum Script {
        Ok,
        FailRun,
        Reject,
    }

    /// Records what the runner asked of it
    #[derive(Default)]
    struct Calls {
        creates: AtomicUsize,
        telemetry_started_at_run: Mutex<Option<bool>>,
        policy: Mutex<Option<ExecutionPolicy>>,
    }

    struct FakeRuntime {
        script: Script,
        calls: Arc<Calls>,
    }

    struct FakeWorker {
        script: Script,
        policy: ExecutionPolicy,
        calls: Arc<Calls>,
    }

    impl WorkerRuntime for FakeRuntime {
        type Worker = FakeWorker;

        fn create(
            &self,
            policy: ExecutionPolicy,
        ) -> std::result::Result<FakeWorker, AssemblyError> {
            self.calls.creates.fetch_add(1, Ordering::SeqCst);
            *self.calls.policy.lock() = Some(policy.clone());
            match self.script {
                Script::Reject => Err(AssemblyError::UnresolvedModule("workflows".to_string())),
                script => Ok(FakeWorker {
                    script,
                    policy,
                    calls: self.calls.clone(),
                }),
            }
        }
    }

    #[async_trait]
    impl RunnableWorker for FakeWorker {
        async fn run(
            &mut self,
            shutdown: CancellationToken,
        ) -> std::result::Result<(), RuntimeError> {
            *self.calls.telemetry_started_at_run.lock() = Some(self.policy.telemetry.is_started());
            match self.script {
                Script::FailRun => Err(RuntimeError::Other("poll loop crashed".to_string())),
                _ => {
                    shutdown.cancelled().await;
                    Ok(())
                }
            }
        }

        async fn drain(&mut self) -> std::result::Result<(), RuntimeError> {
            Ok(())
        }
    }

    fn runner(script: Script) -> (Runner<FakeRuntime>, Arc<Calls>) {
        let calls = Arc::new(Calls::default());
        let runtime = FakeRuntime {
            script,
            calls: calls.clone(),
        };
        (Runner::new(runtime, ActivityRegistry::new()), calls)
    }

    fn resolver(address: &str) -> ConfigResolver {
        ConfigResolver::new(SettingsSource::empty().with_yaml(format!(
            "backend:\n  service_address: \"{}\"\n  namespace: \"default\"\n  log_config: true\nworker:\n  task_queue: \"emails\"\n",
            address
        )))
    }

    #[test]
    fn test_transitions() {
        use RunnerState::*;

        let path = [Idle, Connecting, Assembling, Starting, Polling, ShuttingDown, Stopped];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
        for state in &path[..6] {
            assert!(state.can_transition_to(Failed));
        }

        assert!(!Idle.can_transition_to(Polling));
        assert!(!Polling.can_transition_to(Connecting));
        assert!(!Stopped.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Idle));
    }

    #[test]
    fn test_illegal_transition_rejected() {
        let (mut runner, _) = runner(Script::Ok);
        let err = runner.transition(RunnerState::Polling).unwrap_err();
        assert!(matches!(err, RuntimeError::IllegalTransition { .. }));
        assert_eq!(runner.state(), RunnerState::Idle);
    }

    #[tokio::test]
    async fn test_graceful_stop() {
        let broker = FakeBroker::spawn().await;
        let (mut runner, calls) = runner(Script::Ok);
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        runner
            .run(&resolver(&broker.address), TelemetryHandles::build, shutdown)
            .await
            .unwrap();

        assert_eq!(runner.state(), RunnerState::Stopped);
        assert_eq!(*calls.telemetry_started_at_run.lock(), Some(true));
        assert_eq!(runner.telemetry().unwrap().start_calls(), 1);
    }

    #[tokio::test]
    async fn test_connection_failure_creates_no_runtime() {
        let (mut runner, calls) = runner(Script::Ok);
        let address = closed_address().await;

        let err = runner
            .run(&resolver(&address), TelemetryHandles::build, CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, WorkerError::Connection(_)));
        assert_eq!(runner.state(), RunnerState::Failed);
        assert_eq!(calls.creates.load(Ordering::SeqCst), 0);
        assert_eq!(runner.telemetry().unwrap().start_calls(), 0);
    }

    #[tokio::test]
    async fn test_run_failure_after_telemetry_start() {
        let broker = FakeBroker::spawn().await;
        let (mut runner, calls) = runner(Script::FailRun);

        let err = runner
            .run(&resolver(&broker.address), TelemetryHandles::build, CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, WorkerError::Runtime(RuntimeError::Other(_))));
        assert_eq!(runner.state(), RunnerState::Failed);
        assert_eq!(calls.creates.load(Ordering::SeqCst), 1);
        assert_eq!(*calls.telemetry_started_at_run.lock(), Some(true));
        assert_eq!(runner.telemetry().unwrap().start_calls(), 1);
    }

    #[tokio::test]
    async fn test_rejected_policy_fails_before_telemetry_start() {
        let broker = FakeBroker::spawn().await;
        let (mut runner, _) = runner(Script::Reject);

        let err = runner
            .run(&resolver(&broker.address), TelemetryHandles::build, CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, WorkerError::Assembly(AssemblyError::UnresolvedModule(_))));
        assert!(!runner.telemetry().unwrap().is_started());
    }

    #[tokio::test]
    async fn test_missing_config_fails_before_network() {
        let broker = FakeBroker::spawn().await;
        let (mut runner, calls) = runner(Script::Ok);
        let resolver = ConfigResolver::new(SettingsSource::empty().with_yaml(format!(
            "backend:\n  service_address: \"{}\"\n  namespace: \"default\"\n",
            broker.address
        )));

        let err = runner
            .run(&resolver, TelemetryHandles::build, CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            WorkerError::Configuration(ConfigurationError::Missing("worker.task_queue"))
        ));
        assert_eq!(broker.connections(), 0);
        assert_eq!(calls.creates.load(Ordering::SeqCst), 0);
        assert!(runner.telemetry().is_none());
    }

    #[tokio::test]
    async fn test_assembled_policy_reaches_runtime() {
        let broker = FakeBroker::spawn().await;
        let (mut runner, calls) = runner(Script::Ok);
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        runner
            .run(&resolver(&broker.address), TelemetryHandles::build, shutdown)
            .await
            .unwrap();

        let policy = calls.policy.lock().clone().unwrap();
        assert_eq!(policy.task_queue, "emails");
        assert!(policy.overrides.is_empty());
        assert!(policy.enable_sdk_tracing);
    }
}
