//! Connection gateway: ties connection lifecycles to the presence registry
//! and broadcasts the online-user set on every join and leave.
//!
//! Every broadcast is the full snapshot, not a delta. Clients reconcile by
//! replacing their list; payload grows with connected clients times online
//! users.

use chrono::Utc;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};

use crate::models::presence::{ConnectionId, PresenceSnapshot, UserId};
use crate::services::connection::ConnectionHandle;
use crate::services::presence::PresenceRegistry;

/// Per-connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Authenticated,
    Registered,
    Closed,
}

/// Why a connection ended. All reasons are handled the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    Clean,
    TransportError,
    IdleTimeout,
    /// The session was dropped without an explicit close (task aborted or panicked).
    Dropped,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DisconnectReason::Clean => "clean",
            DisconnectReason::TransportError => "transport_error",
            DisconnectReason::IdleTimeout => "idle_timeout",
            DisconnectReason::Dropped => "dropped",
        };
        f.write_str(s)
    }
}

/// Accepts connections and publishes presence changes.
#[derive(Clone)]
pub struct Gateway {
    registry: PresenceRegistry,
    presence_tx: broadcast::Sender<PresenceSnapshot>,
    open: Arc<AtomicUsize>,
}

impl Gateway {
    pub fn new(registry: PresenceRegistry, capacity: usize) -> Self {
        let (presence_tx, _rx) = broadcast::channel(capacity.max(1));
        Self {
            registry,
            presence_tx,
            open: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn registry(&self) -> &PresenceRegistry {
        &self.registry
    }

    /// Receive every presence broadcast from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<PresenceSnapshot> {
        self.presence_tx.subscribe()
    }

    /// Connections currently open, anonymous ones included.
    pub fn open_connections(&self) -> usize {
        self.open.load(Ordering::Relaxed)
    }

    /// Admit a connection. `claimed` is the identity from the handshake,
    /// already verified by the session layer. A missing or invalid identity
    /// leaves the connection anonymous: it gets presence updates but never
    /// appears in them.
    pub fn connect(&self, claimed: Option<&str>, handle: ConnectionHandle) -> Session {
        let id = handle.id().clone();
        // subscribe first so the connection sees its own join
        let presence_rx = self.presence_tx.subscribe();
        self.open.fetch_add(1, Ordering::Relaxed);

        let mut state = ConnectionState::Connecting;
        let mut user = None;

        if let Some(raw) = claimed {
            match UserId::parse(raw) {
                Ok(parsed) => {
                    state = ConnectionState::Authenticated;
                    match self.registry.register(parsed.as_str(), handle.clone()) {
                        Ok(reg) => {
                            state = ConnectionState::Registered;
                            user = Some(reg.user);
                            if reg.added {
                                self.broadcast(reg.snapshot);
                            }
                        }
                        Err(e) => {
                            warn!(socket_id = %id, error = %e, "registration failed; continuing anonymous")
                        }
                    }
                }
                Err(e) => {
                    warn!(socket_id = %id, error = %e, "invalid identity; continuing anonymous")
                }
            }
        }

        info!(
            socket_id = %id,
            user_id = user.as_ref().map(|u| u.as_str()).unwrap_or("-"),
            state = ?state,
            "connection opened"
        );

        Session {
            id,
            handle,
            user,
            state,
            gateway: self.clone(),
            feed: Some(PresenceFeed {
                initial: Some(self.registry.snapshot()),
                last_version: None,
                rx: presence_rx,
            }),
        }
    }

    /// Disconnect hook for the transport: clean close, error, and idle
    /// timeout all land here. Returns false when the connection was not
    /// registered (anonymous or already removed).
    pub fn disconnect(&self, id: &ConnectionId, reason: DisconnectReason) -> bool {
        match self.registry.deregister(id) {
            Some(gone) => {
                info!(
                    socket_id = %id,
                    user_id = %gone.user,
                    went_offline = gone.went_offline,
                    reason = %reason,
                    "connection deregistered"
                );
                self.broadcast(gone.snapshot);
                true
            }
            None => {
                debug!(socket_id = %id, reason = %reason, "disconnect for unregistered connection");
                false
            }
        }
    }

    fn broadcast(&self, snapshot: PresenceSnapshot) {
        let online = snapshot.len();
        // no receivers is fine: nobody is listening
        let receivers = self.presence_tx.send(snapshot).unwrap_or(0);
        debug!(online, receivers, "presence broadcast");
    }
}

/// Presence updates for one connection: the snapshot at connect time, then
/// every newer broadcast. Out-of-order or repeated snapshots are skipped, so
/// the last one delivered is always the newest state.
pub struct PresenceFeed {
    initial: Option<PresenceSnapshot>,
    last_version: Option<u64>,
    rx: broadcast::Receiver<PresenceSnapshot>,
}

impl PresenceFeed {
    /// Next snapshot to forward; `None` once the gateway is gone.
    pub async fn next(&mut self) -> Option<PresenceSnapshot> {
        if let Some(snap) = self.initial.take() {
            self.last_version = Some(snap.version);
            return Some(snap);
        }
        loop {
            match self.rx.recv().await {
                Ok(snap) => {
                    if self.last_version.is_some_and(|v| snap.version <= v) {
                        continue;
                    }
                    self.last_version = Some(snap.version);
                    return Some(snap);
                }
                // a later full snapshot supersedes whatever was skipped
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "presence feed lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

/// A live connection admitted by the gateway. Dropping it without `close`
/// still deregisters, so abnormal termination cannot leave a ghost online.
pub struct Session {
    id: ConnectionId,
    handle: ConnectionHandle,
    user: Option<UserId>,
    state: ConnectionState,
    gateway: Gateway,
    feed: Option<PresenceFeed>,
}

impl Session {
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    pub fn user(&self) -> Option<&UserId> {
        self.user.as_ref()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Take the presence feed; only the first call returns it.
    pub fn take_presence_feed(&mut self) -> Option<PresenceFeed> {
        self.feed.take()
    }

    pub fn close(mut self, reason: DisconnectReason) {
        self.finish(reason);
    }

    fn finish(&mut self, reason: DisconnectReason) {
        if self.state == ConnectionState::Closed {
            return;
        }
        self.state = ConnectionState::Closed;
        self.gateway.open.fetch_sub(1, Ordering::Relaxed);
        self.gateway.disconnect(&self.id, reason);
        let lifetime = Utc::now() - self.handle.connected_at();
        info!(
            socket_id = %self.id,
            reason = %reason,
            connected_secs = lifetime.num_seconds(),
            "connection closed"
        );
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.finish(DisconnectReason::Dropped);
    }
}
