//! Worker runtime.
//!
//! [`WorkerRuntime`] is the seam the runner drives: `create` validates an assembled
//! [`ExecutionPolicy`] and returns a worker; the worker's `run` polls until shutdown or
//! a fatal error, and `drain` waits for in-flight tasks.
//!
//! [`BrokerRuntime`] is the default implementation. It claims tasks over the framed
//! broker protocol with a fixed number of pollers per task kind. Every poll first takes
//! an execution slot, so concurrent executions never exceed the configured bounds.

use crate::cache::{CachedRun, WorkflowCache};
use crate::connection::Connection;
use crate::policy::ExecutionPolicy;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use queue_worker_core::{
    ActivityContext, ActivityHandler, ActivityInput, ActivityRegistry, ActivityResult,
    AssemblyError, ConnectionError, Interceptors, RuntimeError, RuntimeOptions, SinkEvent,
    SinkRegistry, WorkflowActivation, WorkflowHandler, WorkflowRegistry,
};
use queue_worker_protocol::{
    HeartbeatRequest, Message, PollTaskRequest, TaskEnvelope, TaskKind, TaskResultRequest,
};
use queue_worker_telemetry::WorkerMetrics;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};
use uuid::Uuid;

/// Idle pause between polls that returned no task
const POLL_INTERVAL: Duration = Duration::from_millis(100);

pub trait WorkerRuntime: Send + Sync {
    type Worker: RunnableWorker;

    /// Options used for every field the policy does not override
    fn default_options(&self) -> RuntimeOptions {
        RuntimeOptions::DEFAULT
    }

    /// Validate `policy` and build a worker. Nothing is polled yet.
    fn create(&self, policy: ExecutionPolicy) -> Result<Self::Worker, AssemblyError>;
}

#[async_trait]
pub trait RunnableWorker: Send {
    /// Poll and execute tasks until `shutdown` fires or a fatal error occurs.
    async fn run(&mut self, shutdown: CancellationToken) -> Result<(), RuntimeError>;

    /// Wait for in-flight tasks, bounded by the runtime's shutdown grace time.
    async fn drain(&mut self) -> Result<(), RuntimeError>;
}

/// Runtime speaking the broker protocol
#[derive(Clone)]
pub struct BrokerRuntime {
    defaults: RuntimeOptions,
    modules: HashMap<String, WorkflowRegistry>,
}

impl BrokerRuntime {
    pub fn new() -> Self {
        BrokerRuntime {
            defaults: RuntimeOptions::DEFAULT,
            modules: HashMap::new(),
        }
    }

    pub fn with_defaults(mut self, defaults: RuntimeOptions) -> Self {
        self.defaults = defaults;
        self
    }

    /// Make `registry` loadable under the module name `name`.
    pub fn with_workflow_module(
        mut self,
        name: impl Into<String>,
        registry: WorkflowRegistry,
    ) -> Self {
        self.modules.insert(name.into(), registry);
        self
    }
}

impl Default for BrokerRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerRuntime for BrokerRuntime {
    type Worker = BrokerWorker;

    fn default_options(&self) -> RuntimeOptions {
        self.defaults
    }

    fn create(&self, policy: ExecutionPolicy) -> Result<BrokerWorker, AssemblyError> {
        if policy.task_queue.trim().is_empty() {
            return Err(AssemblyError::EmptyTaskQueue);
        }

        let options = policy.runtime_options(self.defaults);
        options.validate()?;

        let workflows = self
            .modules
            .get(policy.workflows_module.as_str())
            .cloned()
            .ok_or_else(|| AssemblyError::UnresolvedModule(policy.workflows_module.to_string()))?;

        info!(
            "Created worker for task queue {} (activities: {:?}, workflows: {:?})",
            policy.task_queue,
            policy.activities.activity_types(),
            workflows.workflow_types()
        );

        Ok(BrokerWorker::new(policy, options, workflows))
    }
}

struct Shared {
    worker_id: String,
    task_queue: String,
    connection: Connection,
    activities: ActivityRegistry,
    workflows: WorkflowRegistry,
    interceptors: Interceptors,
    sinks: SinkRegistry,
    metrics: Arc<WorkerMetrics>,
    options: RuntimeOptions,
    enable_sdk_tracing: bool,
    cache: Mutex<WorkflowCache>,
    // One handler per workflow type when `reuse_context` is on
    reused: Mutex<HashMap<String, Arc<dyn WorkflowHandler>>>,
    active_activities: AtomicUsize,
    active_workflows: AtomicUsize,
}

/// Worker created by [`BrokerRuntime`]
pub struct BrokerWorker {
    shared: Arc<Shared>,
    in_flight: TaskTracker,
}

impl BrokerWorker {
    fn new(policy: ExecutionPolicy, options: RuntimeOptions, workflows: WorkflowRegistry) -> Self {
        let shared = Shared {
            worker_id: policy.connection.identity().to_string(),
            task_queue: policy.task_queue,
            connection: policy.connection,
            activities: policy.activities,
            workflows,
            interceptors: policy.interceptors,
            sinks: policy.sinks,
            metrics: policy.telemetry.metrics(),
            options,
            enable_sdk_tracing: policy.enable_sdk_tracing,
            cache: Mutex::new(WorkflowCache::new(options.max_cached_workflows)),
            reused: Mutex::new(HashMap::new()),
            active_activities: AtomicUsize::new(0),
            active_workflows: AtomicUsize::new(0),
        };

        BrokerWorker {
            shared: Arc::new(shared),
            in_flight: TaskTracker::new(),
        }
    }

    pub fn options(&self) -> &RuntimeOptions {
        &self.shared.options
    }
}

#[async_trait]
impl RunnableWorker for BrokerWorker {
    async fn run(&mut self, shutdown: CancellationToken) -> Result<(), RuntimeError> {
        let options = self.shared.options;
        info!(
            "Starting worker {} on task queue {} at {} (activity slots: {}, workflow slots: {})",
            self.shared.worker_id,
            self.shared.task_queue,
            self.shared.connection.address(),
            options.max_concurrent_activity_task_executions,
            options.max_concurrent_workflow_task_executions
        );

        let stop = shutdown.child_token();
        let activity_slots = Arc::new(Semaphore::new(
            options.max_concurrent_activity_task_executions,
        ));
        let workflow_slots = Arc::new(Semaphore::new(
            options.max_concurrent_workflow_task_executions,
        ));

        let mut pollers = JoinSet::new();
        for _ in 0..options.max_concurrent_activity_task_polls {
            pollers.spawn(poll_loop(
                self.shared.clone(),
                TaskKind::Activity,
                activity_slots.clone(),
                self.in_flight.clone(),
                stop.clone(),
            ));
        }
        for _ in 0..options.max_concurrent_workflow_task_polls {
            pollers.spawn(poll_loop(
                self.shared.clone(),
                TaskKind::Workflow,
                workflow_slots.clone(),
                self.in_flight.clone(),
                stop.clone(),
            ));
        }
        pollers.spawn(heartbeat_loop(self.shared.clone(), stop.clone()));

        let mut result = Ok(());
        while let Some(joined) = pollers.join_next().await {
            let outcome = joined.unwrap_or_else(|e| Err(RuntimeError::Panicked(e.to_string())));
            if let Err(e) = outcome {
                if result.is_ok() {
                    error!("Worker loop failed: {}", e);
                    stop.cancel();
                    result = Err(e);
                }
            }
        }

        if result.is_ok() {
            info!("Worker {} stopped polling", self.shared.worker_id);
        }
        result
    }

    async fn drain(&mut self) -> Result<(), RuntimeError> {
        self.in_flight.close();
        if self.in_flight.is_empty() {
            return Ok(());
        }

        info!("Waiting for {} in-flight tasks to complete...", self.in_flight.len());
        let grace = self.shared.options.shutdown_grace_time;
        match tokio::time::timeout(grace, self.in_flight.wait()).await {
            Ok(()) => info!("All tasks completed, shutting down"),
            Err(_) => warn!(
                "Shutdown deadline exceeded, {} tasks still active",
                self.in_flight.len()
            ),
        }
        Ok(())
    }
}

async fn poll_loop(
    shared: Arc<Shared>,
    kind: TaskKind,
    slots: Arc<Semaphore>,
    in_flight: TaskTracker,
    stop: CancellationToken,
) -> Result<(), RuntimeError> {
    loop {
        let permit = tokio::select! {
            _ = stop.cancelled() => return Ok(()),
            permit = slots.clone().acquire_owned() => {
                permit.map_err(|e| RuntimeError::Other(e.to_string()))?
            }
        };

        // Never abandon a request half-way: the reply must be read off the shared socket.
        let reply = shared
            .connection
            .request(Message::PollTask(PollTaskRequest {
                worker_id: shared.worker_id.clone(),
                task_queue: shared.task_queue.clone(),
                kind,
            }))
            .await;

        match reply {
            Ok(ack) => match ack.task {
                Some(task) => {
                    let shared = shared.clone();
                    in_flight.spawn(async move {
                        execute(shared, task).await;
                        drop(permit);
                    });
                    continue;
                }
                None => drop(permit),
            },
            Err(ConnectionError::Rejected(reason)) => {
                drop(permit);
                warn!("{} poll rejected: {}", kind.as_str(), reason);
            }
            Err(e) => return Err(e.into()),
        }

        tokio::select! {
            _ = stop.cancelled() => return Ok(()),
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
        }
    }
}

async fn heartbeat_loop(shared: Arc<Shared>, stop: CancellationToken) -> Result<(), RuntimeError> {
    let mut interval = tokio::time::interval(shared.options.heartbeat_interval);

    loop {
        tokio::select! {
            _ = stop.cancelled() => return Ok(()),
            _ = interval.tick() => {}
        }

        let heartbeat = Message::Heartbeat(HeartbeatRequest {
            worker_id: shared.worker_id.clone(),
            task_queue: shared.task_queue.clone(),
            active_activities: shared.active_activities.load(Ordering::SeqCst),
            active_workflows: shared.active_workflows.load(Ordering::SeqCst),
        });

        match shared.connection.request(heartbeat).await {
            Ok(_) => debug!("Heartbeat acknowledged"),
            Err(ConnectionError::Rejected(reason)) => warn!("Heartbeat rejected: {}", reason),
            Err(e) => return Err(e.into()),
        }
    }
}

async fn execute(shared: Arc<Shared>, task: TaskEnvelope) {
    let task_id = task.task_id;
    let kind = task.kind;
    let span = if shared.enable_sdk_tracing {
        info_span!(
            "task",
            %task_id,
            kind = kind.as_str(),
            task_type = %task.task_type
        )
    } else {
        Span::none()
    };

    let outcome = async {
        match kind {
            TaskKind::Activity => run_activity(&shared, task).await.map(Some),
            TaskKind::Workflow => run_workflow(&shared, task).await,
        }
    }
    .instrument(span)
    .await;

    report(&shared, task_id, kind, outcome).await;
}

/// Innermost link of the activity chain: runs the handler under its deadline, so
/// interceptors observe a timeout as an ordinary failure.
struct Deadline {
    handler: Arc<dyn ActivityHandler>,
    limit: Duration,
}

#[async_trait]
impl ActivityHandler for Deadline {
    async fn execute(&self, input: ActivityInput) -> ActivityResult {
        let task_id = input.context.task_id;
        match tokio::time::timeout(self.limit, self.handler.execute(input)).await {
            Ok(result) => result,
            Err(_) => {
                error!("Activity {} timed out after {:?}", task_id, self.limit);
                Err(format!("Activity execution timed out after {:?}", self.limit))
            }
        }
    }
}

async fn run_activity(shared: &Shared, task: TaskEnvelope) -> Result<Vec<u8>, String> {
    let handler = match shared.activities.get(&task.task_type) {
        Some(h) => h,
        None => {
            error!("No handler registered for activity type: {}", task.task_type);
            return Err(format!("No handler for activity type: {}", task.task_type));
        }
    };

    let limit = if task.timeout_seconds > 0 {
        Duration::from_secs(task.timeout_seconds as u64)
    } else {
        shared.options.default_activity_timeout
    };
    let context = ActivityContext {
        task_id: task.task_id,
        activity_type: task.task_type,
        task_queue: shared.task_queue.clone(),
        workflow_id: task.workflow_id,
        attempt: task.attempt,
    };
    let input = ActivityInput::new(context, task.payload);
    let handler = Deadline { handler, limit };

    shared.active_activities.fetch_add(1, Ordering::SeqCst);
    let result = shared.interceptors.execute_activity(&handler, input).await;
    shared.active_activities.fetch_sub(1, Ordering::SeqCst);
    result
}

impl Shared {
    /// Cached run for `run_id`, or a new one
    fn workflow_run(&self, workflow_type: &str, run_id: &str) -> Option<CachedRun> {
        let mut cache = self.cache.lock();
        if let Some(run) = cache.get(run_id) {
            return Some(run);
        }

        let handler = if self.options.reuse_context {
            let mut reused = self.reused.lock();
            match reused.get(workflow_type) {
                Some(handler) => handler.clone(),
                None => {
                    let handler = self.workflows.instantiate(workflow_type)?;
                    reused.insert(workflow_type.to_string(), handler.clone());
                    handler
                }
            }
        } else {
            self.workflows.instantiate(workflow_type)?
        };

        let run = CachedRun {
            handler,
            started_at: Utc::now(),
        };
        if let Some(evicted) = cache.insert(run_id.to_string(), run.clone()) {
            debug!("Evicted workflow run {} from cache", evicted);
        }
        self.metrics.workflow_cache_size.set(cache.len() as i64);
        Some(run)
    }

    fn finish_workflow(
        &self,
        activation: &WorkflowActivation,
        started_at: DateTime<Utc>,
        error: Option<String>,
    ) {
        {
            let mut cache = self.cache.lock();
            cache.remove(&activation.run_id);
            self.metrics.workflow_cache_size.set(cache.len() as i64);
        }

        self.sinks.emit(&SinkEvent::WorkflowFinished {
            workflow_id: activation.workflow_id.clone(),
            run_id: activation.run_id.clone(),
            workflow_type: activation.workflow_type.clone(),
            task_queue: activation.task_queue.clone(),
            started_at,
            finished_at: Utc::now(),
            error,
        });
    }
}

async fn run_workflow(shared: &Shared, task: TaskEnvelope) -> Result<Option<Vec<u8>>, String> {
    let workflow_id = task
        .workflow_id
        .unwrap_or_else(|| task.task_id.to_string());
    let run_id = task.run_id.unwrap_or_else(|| workflow_id.clone());

    let run = match shared.workflow_run(&task.task_type, &run_id) {
        Some(run) => run,
        None => {
            error!("No workflow registered for type: {}", task.task_type);
            return Err(format!("No workflow for type: {}", task.task_type));
        }
    };

    let activation = WorkflowActivation {
        workflow_id,
        run_id,
        workflow_type: task.task_type,
        task_queue: shared.task_queue.clone(),
        payload: task.payload,
    };

    shared.active_workflows.fetch_add(1, Ordering::SeqCst);
    let started = Instant::now();
    let result = run.handler.activate(activation.clone()).await;
    shared
        .metrics
        .observe_workspace_compute(started.elapsed().as_secs_f64() * 1000.0);
    shared.active_workflows.fetch_sub(1, Ordering::SeqCst);

    match result {
        Ok(outcome) => {
            for log in outcome.logs {
                shared.sinks.emit(&SinkEvent::WorkflowLog {
                    workflow_id: activation.workflow_id.clone(),
                    run_id: activation.run_id.clone(),
                    workflow_type: activation.workflow_type.clone(),
                    level: log.level,
                    message: log.message,
                });
            }
            if outcome.completion.is_some() {
                shared.finish_workflow(&activation, run.started_at, None);
            }
            shared.metrics.inc_workflow_total("completed");
            Ok(outcome.completion)
        }
        Err(e) => {
            warn!("Workflow {} failed: {}", activation.workflow_id, e);
            shared.finish_workflow(&activation, run.started_at, Some(e.clone()));
            shared.metrics.inc_workflow_total("failed");
            Err(e)
        }
    }
}

async fn report(
    shared: &Shared,
    task_id: Uuid,
    kind: TaskKind,
    outcome: Result<Option<Vec<u8>>, String>,
) {
    let (success, result, error) = match outcome {
        Ok(result) => (true, result, None),
        Err(e) => (false, None, Some(e)),
    };

    let message = Message::TaskResult(TaskResultRequest {
        task_id,
        worker_id: shared.worker_id.clone(),
        kind,
        success,
        result,
        error,
    });

    if let Err(e) = shared.connection.request(message).await {
        error!("Failed to report result of task {}: {}", task_id, e);
    }
}
