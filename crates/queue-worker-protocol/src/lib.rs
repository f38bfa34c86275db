//! Wire protocol between a queue worker and the task-queue service.
//!
//! Every request gets exactly one `Ack` or `Nack` back on the same stream, so a
//! connection can be shared as long as each request/reply pair is serialized.

mod codec;
mod message;

pub use codec::MessageCodec;
pub use message::{
    AckResponse, HeartbeatRequest, HelloRequest, Message, MessageType, NackResponse,
    PollTaskRequest, QueryWorkflowRequest, SignalWorkflowRequest, TaskEnvelope, TaskKind,
    TaskResultRequest,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Unknown message type byte {0:#04x}")]
    InvalidMessageType(u8),

    #[error("Frame of {size} bytes exceeds the {max} byte limit")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Empty frame")]
    EmptyFrame,

    #[error("Malformed message body: {0}")]
    Body(#[from] bincode::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Largest frame accepted in either direction: a task payload plus envelope
pub const MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;
