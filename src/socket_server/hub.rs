//! Connection registry.
//!
//! The set of live connections is owned by one task, the hub actor. Every
//! mutation and every fan-out arrives as a [`HubCommand`] on its queue and is
//! processed in order, so the set needs no lock and a broadcast reaches exactly
//! the connections registered before it was queued.
//!
//! ```text
//!  connection ──Register/Unregister──┐
//!  router ─────Broadcast/Unicast─────┼──► mpsc ──► hub task ──try_send──► outbound queues
//!  library updater ──Broadcast───────┘
//! ```
//!
//! Delivery never blocks the hub: a full outbound queue hands the frame to a
//! detached task that waits on that one connection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::protocol::OutgoingMessage;

pub type ConnectionId = u64;

/// A serialized message, shared across all recipients of a broadcast
pub type Frame = Arc<str>;

/// The hub's view of one connection: its id and outbound queue
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub tx: mpsc::Sender<Frame>,
}

#[derive(Debug)]
pub enum HubCommand {
    Register(ConnectionHandle),
    Unregister(ConnectionId),
    Broadcast(Frame),
    Unicast { id: ConnectionId, frame: Frame },
    Count(oneshot::Sender<usize>),
    Shutdown,
}

/// Cloneable sender side of the hub
#[derive(Debug, Clone)]
pub struct HubHandle {
    tx: mpsc::UnboundedSender<HubCommand>,
    next_id: Arc<AtomicU64>,
}

/// Start the hub actor on the current runtime
pub fn spawn() -> (HubHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(run(rx));
    (
        HubHandle {
            tx,
            next_id: Arc::new(AtomicU64::new(1)),
        },
        task,
    )
}

impl HubHandle {
    pub fn next_connection_id(&self) -> ConnectionId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn command(&self, command: HubCommand) {
        if self.tx.send(command).is_err() {
            tracing::debug!("Hub is shut down; command dropped");
        }
    }

    pub fn register(&self, connection: ConnectionHandle) {
        self.command(HubCommand::Register(connection));
    }

    /// Remove a connection; a no-op for non-members
    pub fn unregister(&self, id: ConnectionId) {
        self.command(HubCommand::Unregister(id));
    }

    /// Queue `message` for every registered connection
    pub fn broadcast(&self, message: &OutgoingMessage) {
        match message.to_json() {
            Ok(json) => self.command(HubCommand::Broadcast(Frame::from(json))),
            Err(e) => tracing::error!(task = ?message.task, "Failed to encode broadcast: {}", e),
        }
    }

    /// Queue `message` for one connection if it is still registered
    pub fn send(&self, id: ConnectionId, message: &OutgoingMessage) {
        match message.to_json() {
            Ok(json) => self.command(HubCommand::Unicast {
                id,
                frame: Frame::from(json),
            }),
            Err(e) => tracing::error!(task = ?message.task, "Failed to encode reply: {}", e),
        }
    }

    /// Number of registered connections, 0 once the hub is gone
    pub async fn connection_count(&self) -> usize {
        let (reply, rx) = oneshot::channel();
        self.command(HubCommand::Count(reply));
        rx.await.unwrap_or(0)
    }

    /// Stop the actor; every outbound queue is closed
    pub fn shutdown(&self) {
        self.command(HubCommand::Shutdown);
    }
}

async fn run(mut rx: mpsc::UnboundedReceiver<HubCommand>) {
    let mut connections: HashMap<ConnectionId, mpsc::Sender<Frame>> = HashMap::new();

    while let Some(command) = rx.recv().await {
        match command {
            HubCommand::Register(connection) => {
                connections.insert(connection.id, connection.tx);
                tracing::debug!(
                    connection = connection.id,
                    total = connections.len(),
                    "Connection registered"
                );
            }
            HubCommand::Unregister(id) => {
                // Dropping the sender closes the queue; the writer then says goodbye
                if connections.remove(&id).is_some() {
                    tracing::debug!(connection = id, total = connections.len(), "Connection unregistered");
                }
            }
            HubCommand::Broadcast(frame) => {
                for (id, tx) in &connections {
                    deliver(*id, tx, Arc::clone(&frame));
                }
            }
            HubCommand::Unicast { id, frame } => match connections.get(&id) {
                Some(tx) => deliver(id, tx, frame),
                None => tracing::debug!(connection = id, "Reply dropped; connection is gone"),
            },
            HubCommand::Count(reply) => {
                let _ = reply.send(connections.len());
            }
            HubCommand::Shutdown => break,
        }
    }

    tracing::info!(open = connections.len(), "Hub stopped");
}

fn deliver(id: ConnectionId, tx: &mpsc::Sender<Frame>, frame: Frame) {
    match tx.try_send(frame) {
        Ok(()) => {}
        Err(TrySendError::Full(frame)) => {
            tracing::debug!(connection = id, "Outbound queue full; deferring frame");
            let tx = tx.clone();
            tokio::spawn(async move {
                let _ = tx.send(frame).await;
            });
        }
        Err(TrySendError::Closed(_)) => {}
    }
}
