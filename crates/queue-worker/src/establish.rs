//! Opens the task-queue connection and the control-plane client side by side.

use crate::client::ControlPlaneClient;
use crate::connection::{worker_identity, Connection};
use queue_worker_core::{ConnectionError, WorkerConfig};
use tracing::{error, info};

/// Both legs, ready for assembly
#[derive(Debug, Clone)]
pub struct Connections {
    pub connection: Connection,
    pub control_plane: ControlPlaneClient,
}

/// Connect both legs concurrently and wait for both outcomes.
///
/// There is no degraded mode: if either leg fails the whole call fails, and the error
/// names the failing leg (or carries both causes).
pub async fn establish(config: &WorkerConfig) -> Result<Connections, ConnectionError> {
    let identity = worker_identity(&config.service_name);
    info!(
        "Connecting to {} as {} (namespace: {})",
        config.service_address, identity, config.namespace
    );

    let (connection, control_plane) = tokio::join!(
        Connection::connect(
            &config.service_address,
            &config.namespace,
            &identity,
            config.api_key.clone(),
        ),
        ControlPlaneClient::connect(
            &config.service_address,
            &config.namespace,
            &identity,
            config.api_key.clone(),
        ),
    );

    let (connection, control_plane) = combine(connection, control_plane)?;
    Ok(Connections {
        connection,
        control_plane,
    })
}

fn combine<A, B>(
    task_queue: Result<A, ConnectionError>,
    control_plane: Result<B, ConnectionError>,
) -> Result<(A, B), ConnectionError> {
    match (task_queue, control_plane) {
        (Ok(a), Ok(b)) => Ok((a, b)),
        (Err(e), Ok(_)) => {
            error!("Task-queue connection failed: {}", e);
            Err(ConnectionError::TaskQueueLeg(Box::new(e)))
        }
        (Ok(_), Err(e)) => {
            error!("Control-plane client failed: {}", e);
            Err(ConnectionError::ControlPlaneLeg(Box::new(e)))
        }
        (Err(task_queue), Err(control_plane)) => {
            error!(
                "Both connection legs failed: task queue: {}; control plane: {}",
                task_queue, control_plane
            );
            Err(ConnectionError::BothLegs {
                task_queue: Box::new(task_queue),
                control_plane: Box::new(control_plane),
            })
        }
    }
}
