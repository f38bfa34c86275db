use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Message types for the broker protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Hello = 1,
    PollTask = 2,
    TaskResult = 3,
    Heartbeat = 4,
    Ack = 5,
    Nack = 6,
    SignalWorkflow = 7,
    QueryWorkflow = 8,
}

impl MessageType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(MessageType::Hello),
            2 => Some(MessageType::PollTask),
            3 => Some(MessageType::TaskResult),
            4 => Some(MessageType::Heartbeat),
            5 => Some(MessageType::Ack),
            6 => Some(MessageType::Nack),
            7 => Some(MessageType::SignalWorkflow),
            8 => Some(MessageType::QueryWorkflow),
            _ => None,
        }
    }

    pub fn as_u8(&self) -> u8 {
        *self as u8
    }
}

/// Which kind of task a poller is asking for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskKind {
    Activity,
    Workflow,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Activity => "activity",
            TaskKind::Workflow => "workflow",
        }
    }
}

/// Protocol messages
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Message {
    /// Opening handshake, sent once per connection
    Hello(HelloRequest),

    /// Poll the task queue for one task
    PollTask(PollTaskRequest),

    /// Report the outcome of a task
    TaskResult(TaskResultRequest),

    /// Worker liveness report
    Heartbeat(HeartbeatRequest),

    /// Positive acknowledgment
    Ack(AckResponse),

    /// Negative acknowledgment
    Nack(NackResponse),

    /// Deliver a signal to a running workflow
    SignalWorkflow(SignalWorkflowRequest),

    /// Query a running workflow
    QueryWorkflow(QueryWorkflowRequest),
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Hello(_) => MessageType::Hello,
            Message::PollTask(_) => MessageType::PollTask,
            Message::TaskResult(_) => MessageType::TaskResult,
            Message::Heartbeat(_) => MessageType::Heartbeat,
            Message::Ack(_) => MessageType::Ack,
            Message::Nack(_) => MessageType::Nack,
            Message::SignalWorkflow(_) => MessageType::SignalWorkflow,
            Message::QueryWorkflow(_) => MessageType::QueryWorkflow,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloRequest {
    pub namespace: String,
    pub identity: String,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollTaskRequest {
    pub worker_id: String,
    pub task_queue: String,
    pub kind: TaskKind,
}

/// A task handed out by the broker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEnvelope {
    pub task_id: Uuid,
    pub kind: TaskKind,
    /// Activity type or workflow type name
    pub task_type: String,
    pub workflow_id: Option<String>,
    pub run_id: Option<String>,
    pub attempt: u32,
    pub payload: Vec<u8>,
    /// 0 means "use the worker default"
    pub timeout_seconds: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResultRequest {
    pub task_id: Uuid,
    pub worker_id: String,
    pub kind: TaskKind,
    pub success: bool,
    pub result: Option<Vec<u8>>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub worker_id: String,
    pub task_queue: String,
    pub active_activities: usize,
    pub active_workflows: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalWorkflowRequest {
    pub namespace: String,
    pub workflow_id: String,
    pub signal_name: String,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryWorkflowRequest {
    pub namespace: String,
    pub workflow_id: String,
    pub query_type: String,
    pub args: Vec<u8>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AckResponse {
    /// Task returned for PollTask
    pub task: Option<TaskEnvelope>,
    /// Query answer for QueryWorkflow
    pub payload: Option<Vec<u8>>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NackResponse {
    pub error: String,
}
