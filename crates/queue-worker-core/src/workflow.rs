use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// One workflow task handed to a workflow handler
#[derive(Debug, Clone)]
pub struct WorkflowActivation {
    pub workflow_id: String,
    pub run_id: String,
    pub workflow_type: String,
    pub task_queue: String,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowLog {
    pub level: LogLevel,
    pub message: String,
}

impl WorkflowLog {
    pub fn info(message: impl Into<String>) -> Self {
        WorkflowLog {
            level: LogLevel::Info,
            message: message.into(),
        }
    }
}

/// What a workflow task produced
#[derive(Debug, Clone, Default)]
pub struct WorkflowOutcome {
    pub logs: Vec<WorkflowLog>,
    /// `Some` once the workflow run has finished
    pub completion: Option<Vec<u8>>,
}

pub type WorkflowResult = Result<WorkflowOutcome, String>;

#[async_trait]
pub trait WorkflowHandler: Send + Sync {
    async fn activate(&self, activation: WorkflowActivation) -> WorkflowResult;
}

pub type WorkflowFactory = Arc<dyn Fn() -> Arc<dyn WorkflowHandler> + Send + Sync>;

/// Workflow types a module exposes, each with a factory for fresh instances
#[derive(Clone, Default)]
pub struct WorkflowRegistry {
    factories: Arc<RwLock<HashMap<String, WorkflowFactory>>>,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, workflow_type: impl Into<String>, factory: F)
    where
        F: Fn() -> Arc<dyn WorkflowHandler> + Send + Sync + 'static,
    {
        self.factories
            .write()
            .insert(workflow_type.into(), Arc::new(factory));
    }

    /// Build a new handler instance for `workflow_type`
    pub fn instantiate(&self, workflow_type: &str) -> Option<Arc<dyn WorkflowHandler>> {
        self.factories.read().get(workflow_type).map(|f| f())
    }

    pub fn has_workflow(&self, workflow_type: &str) -> bool {
        self.factories.read().contains_key(workflow_type)
    }

    pub fn workflow_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.factories.read().keys().cloned().collect();
        types.sort();
        types
    }
}

impl fmt::Debug for WorkflowRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.workflow_types()).finish()
    }
}

/// Name under which a runtime looks up the workflow module to load
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkflowModuleRef(pub String);

impl WorkflowModuleRef {
    pub fn new(name: impl Into<String>) -> Self {
        WorkflowModuleRef(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkflowModuleRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
