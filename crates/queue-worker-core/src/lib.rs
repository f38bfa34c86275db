pub mod activity;
pub mod config;
pub mod error;
pub mod interceptor;
pub mod options;
pub mod sink;
pub mod workflow;

pub use activity::{
    ActivityContext, ActivityHandler, ActivityInput, ActivityRegistry, ActivityResult, ControlPlane,
    EchoActivity,
};
pub use config::{ConfigResolver, Settings, SettingsSource, WorkerConfig};
pub use error::{
    AssemblyError, ConfigurationError, ConnectionError, Result, RuntimeError, WorkerError,
};
pub use interceptor::{
    append_default_interceptors, ActivityInboundInterceptor, ActivityInterceptorFactory,
    Interceptors, Next,
};
pub use options::{RuntimeOptions, WorkerOverrides};
pub use sink::{default_sinks, Sink, SinkEvent, SinkRegistry};
pub use workflow::{
    LogLevel, WorkflowActivation, WorkflowHandler, WorkflowLog, WorkflowModuleRef,
    WorkflowOutcome, WorkflowRegistry, WorkflowResult,
};

/// Instrument whose histogram gets the workspace compute latency buckets
pub const WORKSPACE_COMPUTE_LATENCY_METRIC: &str = "workspace_compute_latency";
