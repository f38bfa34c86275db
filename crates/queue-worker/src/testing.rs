//! In-process broker for connection, runtime and runner tests.

use queue_worker_core::{WorkerConfig, WorkerOverrides};
use queue_worker_protocol::{
    AckResponse, Message, MessageCodec, MessageType, NackResponse, TaskEnvelope, TaskKind,
};

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;
use uuid::Uuid;

#[derive(Default)]
struct State {
    received: Mutex<Vec<Message>>,
    tasks: Mutex<VecDeque<TaskEnvelope>>,
    connections: AtomicUsize,
    close_on_poll: AtomicBool,
}

#[derive(Clone)]
pub(crate) struct FakeBroker {
    pub address: String,
    state: Arc<State>,
}

impl FakeBroker {
    /// Handshakes in this namespace are refused
    pub const FORBIDDEN_NAMESPACE: &'static str = "forbidden";

    pub async fn spawn() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let state = Arc::new(State::default());

        let accept_state = state.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                accept_state.connections.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve(stream, accept_state.clone()));
            }
        });

        FakeBroker { address, state }
    }

    pub fn push_task(&self, task: TaskEnvelope) {
        self.state.tasks.lock().push_back(task);
    }

    /// Drop the connection on the next poll instead of answering it
    pub fn close_on_poll(&self) {
        self.state.close_on_poll.store(true, Ordering::SeqCst);
    }

    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    pub fn received_of(&self, message_type: MessageType) -> Vec<Message> {
        self.state
            .received
            .lock()
            .iter()
            .filter(|m| m.message_type() == message_type)
            .cloned()
            .collect()
    }

    /// Wait until at least `count` messages of `message_type` arrived
    pub async fn wait_for(&self, message_type: MessageType, count: usize) -> Vec<Message> {
        for _ in 0..200 {
            let received = self.received_of(message_type);
            if received.len() >= count {
                return received;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("timed out waiting for {} {:?} messages", count, message_type);
    }
}

async fn serve(stream: TcpStream, state: Arc<State>) {
    let mut framed = Framed::new(stream, MessageCodec);

    while let Some(Ok(message)) = framed.next().await {
        state.received.lock().push(message.clone());

        let reply = match message {
            Message::Hello(hello) if hello.namespace == FakeBroker::FORBIDDEN_NAMESPACE => {
                Message::Nack(NackResponse {
                    error: format!("namespace {} is not allowed", hello.namespace),
                })
            }
            Message::PollTask(poll) => {
                if state.close_on_poll.load(Ordering::SeqCst) {
                    return;
                }
                let mut tasks = state.tasks.lock();
                let index = tasks.iter().position(|t| t.kind == poll.kind);
                let task = index.and_then(|i| tasks.remove(i));
                Message::Ack(AckResponse {
                    task,
                    ..AckResponse::default()
                })
            }
            Message::QueryWorkflow(query) => Message::Ack(AckResponse {
                payload: Some(format!("{}:{}", query.workflow_id, query.query_type).into_bytes()),
                ..AckResponse::default()
            }),
            _ => Message::Ack(AckResponse::default()),
        };

        if framed.send(reply).await.is_err() {
            return;
        }
    }
}

/// An address nothing listens on
pub(crate) async fn closed_address() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().to_string()
}

pub(crate) fn test_config(address: &str) -> WorkerConfig {
    WorkerConfig {
        service_name: "emails-worker".to_string(),
        task_queue: "emails".to_string(),
        service_address: address.to_string(),
        namespace: "default".to_string(),
        log_config: false,
        api_key: None,
        metrics_address: None,
        workflows_module: "workflows".to_string(),
        overrides: WorkerOverrides::default(),
    }
}

pub(crate) fn task(kind: TaskKind, task_type: &str, payload: &[u8]) -> TaskEnvelope {
    TaskEnvelope {
        task_id: Uuid::new_v4(),
        kind,
        task_type: task_type.to_string(),
        workflow_id: Some("wf-1".to_string()),
        run_id: Some("run-1".to_string()),
        attempt: 1,
        payload: payload.to_vec(),
        timeout_seconds: 0,
    }
}
