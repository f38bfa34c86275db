use clap::Parser;
use queue_worker::{BrokerRuntime, Runner};
use queue_worker_core::config::DEFAULT_WORKFLOWS_MODULE;
use queue_worker_core::{
    ActivityRegistry, ConfigResolver, EchoActivity, SettingsSource, WorkflowRegistry,
};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "queue-worker")]
#[command(about = "Task queue worker process", long_about = None)]
struct Args {
    /// Path to a YAML settings file (default: worker.yaml if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Task-queue service address, host:port
    #[arg(short, long)]
    address: Option<String>,

    /// Namespace to attach to
    #[arg(short, long)]
    namespace: Option<String>,

    /// Task queue to poll
    #[arg(short, long)]
    task_queue: Option<String>,

    /// Log as JSON lines
    #[arg(long)]
    json: bool,
}

fn init_logging(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .init();
    }
}

async fn wait_for_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!("Cannot listen for SIGTERM: {}", e);
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await.ok();

    tracing::info!("Received shutdown signal");
    shutdown.cancel();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.json);

    let mut source = SettingsSource::default();
    if let Some(path) = args.config {
        source = source.with_file(path);
    }
    let source = source
        .with_override_opt("backend.service_address", args.address)
        .with_override_opt("backend.namespace", args.namespace)
        .with_override_opt("worker.task_queue", args.task_queue);
    let resolver = ConfigResolver::new(source);

    let activities = ActivityRegistry::new();
    activities.register("echo", EchoActivity);
    tracing::info!("Registered activity types: {:?}", activities.activity_types());

    let runtime = BrokerRuntime::new()
        .with_workflow_module(DEFAULT_WORKFLOWS_MODULE, WorkflowRegistry::new());

    let shutdown = CancellationToken::new();
    tokio::spawn(wait_for_signal(shutdown.clone()));

    let mut runner = Runner::new(runtime, activities);
    runner
        .run(&resolver, queue_worker_telemetry::init, shutdown)
        .await?;

    Ok(())
}
