use crate::connection::Connection;
use async_trait::async_trait;
use queue_worker_core::{ConnectionError, ControlPlane};
use queue_worker_protocol::{Message, QueryWorkflowRequest, SignalWorkflowRequest};
use tracing::debug;

/// Signal and query access to workflows, handed to activities by the custom interceptor.
///
/// Holds its own connection so control-plane calls never queue behind task polls.
#[derive(Clone, Debug)]
pub struct ControlPlaneClient {
    connection: Connection,
}

impl ControlPlaneClient {
    pub async fn connect(
        address: &str,
        namespace: &str,
        identity: &str,
        api_key: Option<String>,
    ) -> Result<Self, ConnectionError> {
        let connection = Connection::connect(address, namespace, identity, api_key).await?;
        Ok(ControlPlaneClient { connection })
    }

    pub fn namespace(&self) -> &str {
        self.connection.namespace()
    }
}

#[async_trait]
impl ControlPlane for ControlPlaneClient {
    async fn signal_workflow(
        &self,
        workflow_id: &str,
        signal_name: &str,
        payload: Vec<u8>,
    ) -> Result<(), ConnectionError> {
        debug!("Signalling workflow {} with {}", workflow_id, signal_name);
        self.connection
            .request(Message::SignalWorkflow(SignalWorkflowRequest {
                namespace: self.namespace().to_string(),
                workflow_id: workflow_id.to_string(),
                signal_name: signal_name.to_string(),
                payload,
            }))
            .await?;
        Ok(())
    }

    async fn query_workflow(
        &self,
        workflow_id: &str,
        query_type: &str,
        args: Vec<u8>,
    ) -> Result<Vec<u8>, ConnectionError> {
        let ack = self
            .connection
            .request(Message::QueryWorkflow(QueryWorkflowRequest {
                namespace: self.namespace().to_string(),
                workflow_id: workflow_id.to_string(),
                query_type: query_type.to_string(),
                args,
            }))
            .await?;
        Ok(ack.payload.unwrap_or_default())
    }
}
