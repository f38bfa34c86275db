use thiserror::Error;

/// A required setting is missing or malformed. Raised before any network activity.
#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("Failed to load settings: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    #[error("Invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Failure to reach or talk to the task-queue service.
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("Cannot reach {address}: {source}")]
    Io {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Handshake with {address} rejected: {reason}")]
    Handshake { address: String, reason: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Connection closed by server")]
    Closed,

    #[error("Request rejected by server: {0}")]
    Rejected(String),

    #[error("Task-queue connection failed: {0}")]
    TaskQueueLeg(#[source] Box<ConnectionError>),

    #[error("Control-plane client failed: {0}")]
    ControlPlaneLeg(#[source] Box<ConnectionError>),

    #[error("Both connection legs failed (task queue: {task_queue}; control plane: {control_plane})")]
    BothLegs {
        task_queue: Box<ConnectionError>,
        control_plane: Box<ConnectionError>,
    },
}

/// The runtime rejected the assembled execution policy.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum AssemblyError {
    #[error("Task queue name must not be empty")]
    EmptyTaskQueue,

    #[error("Invalid bound {name}: {reason}")]
    InvalidBound { name: &'static str, reason: String },

    #[error("Workflow module {0:?} is not registered with the runtime")]
    UnresolvedModule(String),
}

/// Failure while the poll loop is running.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Lost connection to task-queue service: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Telemetry error: {0}")]
    Telemetry(String),

    #[error("Illegal state transition from {from} to {to}")]
    IllegalTransition { from: String, to: String },

    #[error("Worker task panicked: {0}")]
    Panicked(String),

    #[error("{0}")]
    Other(String),
}

/// Every fatal condition of the worker process.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Assembly(#[from] AssemblyError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

pub type Result<T> = std::result::Result<T, WorkerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_both_legs_message_names_each_cause() {
        let err = ConnectionError::BothLegs {
            task_queue: Box::new(ConnectionError::Closed),
            control_plane: Box::new(ConnectionError::Protocol("bad frame".to_string())),
        };
        let text = err.to_string();
        assert!(text.contains("Connection closed by server"));
        assert!(text.contains("bad frame"));
    }

    #[test]
    fn test_worker_error_is_transparent() {
        let err: WorkerError = ConfigurationError::Missing("worker.task_queue").into();
        assert_eq!(err.to_string(), "Missing required setting: worker.task_queue");
    }
}
