use queue_worker_core::ConnectionError;
use queue_worker_protocol::{AckResponse, HelloRequest, Message, MessageCodec};

use futures::{SinkExt, StreamExt};
use std::fmt;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::codec::Framed;
use tracing::{debug, info};

/// Identity announced to the task-queue service: `{service}-{host}-{pid}-{random}`
pub fn worker_identity(service_name: &str) -> String {
    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());
    let random = uuid::Uuid::new_v4().simple().to_string();

    format!(
        "{}-{}-{}-{}",
        service_name,
        hostname,
        std::process::id(),
        &random[..8]
    )
}

struct Inner {
    address: String,
    namespace: String,
    identity: String,
    framed: Mutex<Framed<TcpStream, MessageCodec>>,
}

/// Handshaken connection to the task-queue service.
///
/// Clones share one socket. Each [`Connection::request`] holds the socket for a full
/// request/response exchange. The socket closes when the last clone is dropped.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl Connection {
    /// Connect to `address` and perform the `Hello` handshake.
    pub async fn connect(
        address: &str,
        namespace: &str,
        identity: &str,
        api_key: Option<String>,
    ) -> Result<Self, ConnectionError> {
        let stream = TcpStream::connect(address)
            .await
            .map_err(|source| ConnectionError::Io {
                address: address.to_string(),
                source,
            })?;
        let mut framed = Framed::new(stream, MessageCodec);

        let hello = Message::Hello(HelloRequest {
            namespace: namespace.to_string(),
            identity: identity.to_string(),
            api_key,
        });
        let handshake = |reason: String| ConnectionError::Handshake {
            address: address.to_string(),
            reason,
        };

        framed
            .send(hello)
            .await
            .map_err(|e| handshake(e.to_string()))?;
        match framed.next().await {
            Some(Ok(Message::Ack(_))) => {}
            Some(Ok(Message::Nack(nack))) => return Err(handshake(nack.error)),
            Some(Ok(other)) => {
                return Err(handshake(format!(
                    "unexpected {:?} reply",
                    other.message_type()
                )))
            }
            Some(Err(e)) => return Err(handshake(e.to_string())),
            None => return Err(handshake("connection closed".to_string())),
        }

        info!("Connected to task-queue service at {} (namespace: {})", address, namespace);

        Ok(Connection {
            inner: Arc::new(Inner {
                address: address.to_string(),
                namespace: namespace.to_string(),
                identity: identity.to_string(),
                framed: Mutex::new(framed),
            }),
        })
    }

    pub fn address(&self) -> &str {
        &self.inner.address
    }

    pub fn namespace(&self) -> &str {
        &self.inner.namespace
    }

    pub fn identity(&self) -> &str {
        &self.inner.identity
    }

    /// Send `message` and wait for its reply. A `Nack` becomes [`ConnectionError::Rejected`].
    pub async fn request(&self, message: Message) -> Result<AckResponse, ConnectionError> {
        let message_type = message.message_type();
        let mut framed = self.inner.framed.lock().await;

        framed
            .send(message)
            .await
            .map_err(|e| ConnectionError::Protocol(e.to_string()))?;

        match framed.next().await {
            Some(Ok(Message::Ack(ack))) => Ok(ack),
            Some(Ok(Message::Nack(nack))) => {
                debug!("{:?} rejected: {}", message_type, nack.error);
                Err(ConnectionError::Rejected(nack.error))
            }
            Some(Ok(other)) => Err(ConnectionError::Protocol(format!(
                "unexpected {:?} reply to {:?}",
                other.message_type(),
                message_type
            ))),
            Some(Err(e)) => Err(ConnectionError::Protocol(e.to_string())),
            None => Err(ConnectionError::Closed),
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("address", &self.inner.address)
            .field("namespace", &self.inner.namespace)
            .field("identity", &self.inner.identity)
            .finish()
    }
}
