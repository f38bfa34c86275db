//! Worker configuration
//!
//! Settings are layered with the `config` crate: built-in defaults, an optional YAML
//! file, `QUEUE_WORKER__*` environment variables, then explicit overrides (CLI flags).
//! [`ConfigResolver`] validates the merged tree once and hands out the same
//! [`WorkerConfig`] reference on every later call.

use crate::error::ConfigurationError;
use crate::options::WorkerOverrides;
use config::{Config, Environment, File, FileFormat};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const DEFAULT_SERVICE_NAME: &str = "queue-worker";
pub const DEFAULT_WORKFLOWS_MODULE: &str = "workflows";
pub const ENV_PREFIX: &str = "QUEUE_WORKER";

/// Process-wide settings shared with other backend services
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendSettings {
    /// Task-queue service address, `host:port`
    pub service_address: Option<String>,
    pub namespace: Option<String>,
    /// Log the effective configuration at startup
    pub log_config: bool,
    pub api_key: Option<String>,
    /// Listen address of the prometheus scrape endpoint
    pub metrics_address: Option<String>,
}

/// Settings specific to this worker
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    pub service_name: String,
    pub task_queue: Option<String>,
    pub workflows_module: String,
    pub reuse_context: Option<bool>,
    pub max_concurrent_workflow_task_executions: Option<usize>,
    pub max_concurrent_activity_task_polls: Option<usize>,
    pub max_concurrent_workflow_task_polls: Option<usize>,
    pub max_cached_workflows: Option<usize>,
}

impl WorkerSettings {
    fn overrides(&self) -> WorkerOverrides {
        WorkerOverrides {
            reuse_context: self.reuse_context,
            max_concurrent_workflow_task_executions: self.max_concurrent_workflow_task_executions,
            max_concurrent_activity_task_polls: self.max_concurrent_activity_task_polls,
            max_concurrent_workflow_task_polls: self.max_concurrent_workflow_task_polls,
            max_cached_workflows: self.max_cached_workflows,
        }
    }
}

impl Default for WorkerSettings {
    fn default() -> Self {
        WorkerSettings {
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            task_queue: None,
            workflows_module: DEFAULT_WORKFLOWS_MODULE.to_string(),
            reuse_context: None,
            max_concurrent_workflow_task_executions: None,
            max_concurrent_activity_task_polls: None,
            max_concurrent_workflow_task_polls: None,
            max_cached_workflows: None,
        }
    }
}

/// Raw settings tree before validation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub backend: BackendSettings,
    pub worker: WorkerSettings,
}

/// Where settings come from
#[derive(Debug, Clone)]
pub struct SettingsSource {
    file: Option<(PathBuf, bool)>,
    yaml: Option<String>,
    env_prefix: Option<String>,
    overrides: Vec<(String, String)>,
}

impl Default for SettingsSource {
    fn default() -> Self {
        SettingsSource {
            file: Some((PathBuf::from("worker.yaml"), false)),
            yaml: None,
            env_prefix: Some(ENV_PREFIX.to_string()),
            overrides: Vec::new(),
        }
    }
}

impl SettingsSource {
    /// No file, no environment. Mostly useful for tests and embedding.
    pub fn empty() -> Self {
        SettingsSource {
            file: None,
            yaml: None,
            env_prefix: None,
            overrides: Vec::new(),
        }
    }

    /// Read settings from `path`; the file must exist.
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some((path.into(), true));
        self
    }

    pub fn with_yaml(mut self, yaml: impl Into<String>) -> Self {
        self.yaml = Some(yaml.into());
        self
    }

    pub fn without_env(mut self) -> Self {
        self.env_prefix = None;
        self
    }

    /// Highest-precedence value for a dotted key, e.g. `worker.task_queue`.
    pub fn with_override(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.overrides.push((key.into(), value.into()));
        self
    }

    pub fn with_override_opt(self, key: &str, value: Option<String>) -> Self {
        match value {
            Some(value) => self.with_override(key, value),
            None => self,
        }
    }
}

impl Settings {
    pub fn load(source: &SettingsSource) -> Result<Self, ConfigurationError> {
        let mut builder = Config::builder();

        if let Some((path, required)) = &source.file {
            builder = builder.add_source(File::from(path.as_path()).required(*required));
        }
        if let Some(yaml) = &source.yaml {
            builder = builder.add_source(File::from_str(yaml, FileFormat::Yaml));
        }
        if let Some(prefix) = &source.env_prefix {
            builder = builder.add_source(
                Environment::with_prefix(prefix)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );
        }
        for (key, value) in &source.overrides {
            builder = builder.set_override(key.as_str(), value.as_str())?;
        }

        Ok(builder.build()?.try_deserialize()?)
    }
}

/// Validated, immutable configuration for one worker process
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerConfig {
    pub service_name: String,
    pub task_queue: String,
    pub service_address: String,
    pub namespace: String,
    pub log_config: bool,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub metrics_address: Option<String>,
    pub workflows_module: String,
    #[serde(flatten)]
    pub overrides: WorkerOverrides,
}

fn required(value: Option<String>, field: &'static str) -> Result<String, ConfigurationError> {
    match value.map(|v| v.trim().to_string()) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(ConfigurationError::Missing(field)),
    }
}

fn validate_address(address: &str, field: &'static str) -> Result<(), ConfigurationError> {
    let invalid = |reason: &str| ConfigurationError::Invalid {
        field,
        reason: format!("{:?} {}", address, reason),
    };

    let (host, port) = address
        .rsplit_once(':')
        .ok_or_else(|| invalid("is not host:port"))?;
    if host.is_empty() {
        return Err(invalid("has an empty host"));
    }
    port.parse::<u16>()
        .map_err(|_| invalid("has an invalid port"))?;
    Ok(())
}

impl WorkerConfig {
    pub fn from_settings(settings: Settings) -> Result<Self, ConfigurationError> {
        let Settings { backend, worker } = settings;
        let raw = worker.overrides();

        let task_queue = required(worker.task_queue, "worker.task_queue")?;
        if task_queue.chars().any(char::is_whitespace) {
            return Err(ConfigurationError::Invalid {
                field: "worker.task_queue",
                reason: format!("{:?} contains whitespace", task_queue),
            });
        }

        let service_address = required(backend.service_address, "backend.service_address")?;
        validate_address(&service_address, "backend.service_address")?;

        let namespace = required(backend.namespace, "backend.namespace")?;

        let metrics_address = match backend.metrics_address {
            Some(addr) if !addr.trim().is_empty() => {
                validate_address(addr.trim(), "backend.metrics_address")?;
                Some(addr.trim().to_string())
            }
            _ => None,
        };

        let service_name = match worker.service_name.trim() {
            "" => DEFAULT_SERVICE_NAME.to_string(),
            name => name.to_string(),
        };

        let workflows_module = match worker.workflows_module.trim() {
            "" => DEFAULT_WORKFLOWS_MODULE.to_string(),
            module => module.to_string(),
        };

        let overrides = raw.normalized();
        if overrides != raw {
            tracing::warn!(
                "Ignoring zero/false worker overrides; runtime defaults apply for those fields"
            );
        }

        Ok(WorkerConfig {
            service_name,
            task_queue,
            service_address,
            namespace,
            log_config: backend.log_config,
            api_key: backend.api_key.filter(|k| !k.is_empty()),
            metrics_address,
            workflows_module,
            overrides,
        })
    }
}

/// Resolves settings into a [`WorkerConfig`] exactly once.
///
/// Every call to [`ConfigResolver::resolve`] after the first successful one returns
/// the same reference without touching the sources again.
#[derive(Debug)]
pub struct ConfigResolver {
    source: SettingsSource,
    resolved: OnceCell<WorkerConfig>,
}

impl ConfigResolver {
    pub fn new(source: SettingsSource) -> Self {
        ConfigResolver {
            source,
            resolved: OnceCell::new(),
        }
    }

    pub fn resolve(&self) -> Result<&WorkerConfig, ConfigurationError> {
        self.resolved
            .get_or_try_init(|| WorkerConfig::from_settings(Settings::load(&self.source)?))
    }
}
