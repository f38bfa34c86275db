use crate::error::ConnectionError;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Result type for activity handlers
pub type ActivityResult = Result<Vec<u8>, String>;

/// Secondary operations against the task-queue service, available to activities
/// through the interceptor chain.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn signal_workflow(
        &self,
        workflow_id: &str,
        signal_name: &str,
        payload: Vec<u8>,
    ) -> Result<(), ConnectionError>;

    async fn query_workflow(
        &self,
        workflow_id: &str,
        query_type: &str,
        args: Vec<u8>,
    ) -> Result<Vec<u8>, ConnectionError>;
}

/// Identity of one activity invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityContext {
    pub task_id: Uuid,
    pub activity_type: String,
    pub task_queue: String,
    pub workflow_id: Option<String>,
    pub attempt: u32,
}

/// Everything an activity handler receives
#[derive(Clone)]
pub struct ActivityInput {
    pub context: ActivityContext,
    pub payload: Vec<u8>,
    /// Set by the custom inbound interceptor
    pub control_plane: Option<Arc<dyn ControlPlane>>,
}

impl fmt::Debug for ActivityInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActivityInput")
            .field("context", &self.context)
            .field("payload_len", &self.payload.len())
            .field("control_plane", &self.control_plane.is_some())
            .finish()
    }
}

impl ActivityInput {
    pub fn new(context: ActivityContext, payload: Vec<u8>) -> Self {
        ActivityInput {
            context,
            payload,
            control_plane: None,
        }
    }
}

/// Trait for activity implementations
#[async_trait]
pub trait ActivityHandler: Send + Sync {
    async fn execute(&self, input: ActivityInput) -> ActivityResult;
}

/// Registry of activity handlers by activity type
#[derive(Clone)]
pub struct ActivityRegistry {
    handlers: Arc<RwLock<HashMap<String, Arc<dyn ActivityHandler>>>>,
}

impl ActivityRegistry {
    pub fn new() -> Self {
        ActivityRegistry {
            handlers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn register<H: ActivityHandler + 'static>(
        &self,
        activity_type: impl Into<String>,
        handler: H,
    ) {
        self.handlers
            .write()
            .insert(activity_type.into(), Arc::new(handler));
    }

    pub fn get(&self, activity_type: &str) -> Option<Arc<dyn ActivityHandler>> {
        self.handlers.read().get(activity_type).cloned()
    }

    pub fn has_handler(&self, activity_type: &str) -> bool {
        self.handlers.read().contains_key(activity_type)
    }

    /// Registered activity types, sorted
    pub fn activity_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.read().keys().cloned().collect();
        types.sort();
        types
    }

    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ActivityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ActivityRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.activity_types()).finish()
    }
}

/// Activity that returns its payload unchanged
pub struct EchoActivity;

#[async_trait]
impl ActivityHandler for EchoActivity {
    async fn execute(&self, input: ActivityInput) -> ActivityResult {
        Ok(input.payload)
    }
}

#[cfg(test)]
pub(crate) fn test_context(activity_type: &str) -> ActivityContext {
    ActivityContext {
        task_id: Uuid::new_v4(),
        activity_type: activity_type.to_string(),
        task_queue: "emails".to_string(),
        workflow_id: None,
        attempt: 1,
    }
}
