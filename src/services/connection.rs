//! Handle to one live realtime connection.

use chrono::{DateTime, Utc};
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::error::RealtimeError;
use crate::models::presence::ConnectionId;

/// One live connection: id, connect time, and the queue its writer drains.
///
/// Clones share the same queue, so the registry can hold one without owning
/// the socket.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    connected_at: DateTime<Utc>,
    outbound: mpsc::Sender<String>,
}

impl ConnectionHandle {
    pub fn new(id: ConnectionId, outbound: mpsc::Sender<String>) -> Self {
        Self {
            id,
            connected_at: Utc::now(),
            outbound,
        }
    }

    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Queue a frame without waiting. A full queue or a closed writer is a
    /// `PushFailure`; nothing is retried.
    pub fn push(&self, frame: String) -> Result<(), RealtimeError> {
        self.outbound.try_send(frame).map_err(|e| {
            let reason = match e {
                TrySendError::Full(_) => "outbound queue full",
                TrySendError::Closed(_) => "connection closed",
            };
            RealtimeError::PushFailure {
                connection: self.id.to_string(),
                reason,
            }
        })
    }

    /// Queue a frame, waiting for room. Used for frames that must not be
    /// dropped for a merely slow client (presence snapshots).
    pub async fn send(&self, frame: String) -> Result<(), RealtimeError> {
        self.outbound
            .send(frame)
            .await
            .map_err(|_| RealtimeError::PushFailure {
                connection: self.id.to_string(),
                reason: "connection closed",
            })
    }
}
