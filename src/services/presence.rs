//! Presence registry: which users are online and through which connections.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::error::RealtimeError;
use crate::models::presence::{ConnectionId, PresenceSnapshot, UserId};
use crate::services::connection::ConnectionHandle;

/// Both indices live behind one lock so they never disagree.
#[derive(Default)]
struct Indices {
    by_user: HashMap<UserId, HashMap<ConnectionId, ConnectionHandle>>,
    by_connection: HashMap<ConnectionId, UserId>,
    version: u64,
}

impl Indices {
    fn snapshot(&self) -> PresenceSnapshot {
        PresenceSnapshot {
            version: self.version,
            users: self.by_user.keys().cloned().collect(),
        }
    }
}

/// Outcome of a successful `register`.
#[derive(Debug, Clone)]
pub struct Registration {
    pub user: UserId,
    /// False when the exact handle was already registered.
    pub added: bool,
    /// Registry state right after the call, taken under the same lock.
    pub snapshot: PresenceSnapshot,
}

/// Outcome of a `deregister` that found the connection.
#[derive(Debug, Clone)]
pub struct Deregistration {
    pub user: UserId,
    /// True when this was the user's last connection.
    pub went_offline: bool,
    pub snapshot: PresenceSnapshot,
}

/// In-process presence registry. Cheap to clone; clones share state.
///
/// Never persisted: it describes the current process epoch only.
#[derive(Clone, Default)]
pub struct PresenceRegistry {
    inner: Arc<Mutex<Indices>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `handle` to the user's connection set.
    pub fn register(
        &self,
        user: &str,
        handle: ConnectionHandle,
    ) -> Result<Registration, RealtimeError> {
        let user = UserId::parse(user)?;
        let mut idx = self.inner.lock();

        if let Some(existing) = idx.by_connection.get(handle.id()) {
            if *existing != user {
                return Err(RealtimeError::IdentityMismatch {
                    connection: handle.id().to_string(),
                    registered: existing.to_string(),
                });
            }
            return Ok(Registration {
                user,
                added: false,
                snapshot: idx.snapshot(),
            });
        }

        idx.by_connection.insert(handle.id().clone(), user.clone());
        idx.by_user
            .entry(user.clone())
            .or_default()
            .insert(handle.id().clone(), handle);
        idx.version += 1;
        let snapshot = idx.snapshot();
        drop(idx);

        debug!(user_id = %user, version = snapshot.version, "connection registered");
        Ok(Registration {
            user,
            added: true,
            snapshot,
        })
    }

    /// Remove a connection from whichever user holds it. Unknown ids are a
    /// no-op returning `None`, so repeated disconnect hooks are harmless.
    pub fn deregister(&self, connection: &ConnectionId) -> Option<Deregistration> {
        let mut idx = self.inner.lock();
        let user = idx.by_connection.remove(connection)?;

        let went_offline = match idx.by_user.get_mut(&user) {
            Some(conns) => {
                conns.remove(connection);
                conns.is_empty()
            }
            None => true,
        };
        if went_offline {
            idx.by_user.remove(&user);
        }
        idx.version += 1;
        let snapshot = idx.snapshot();
        drop(idx);

        debug!(user_id = %user, went_offline, version = snapshot.version, "connection deregistered");
        Some(Deregistration {
            user,
            went_offline,
            snapshot,
        })
    }

    pub fn is_online(&self, user: &str) -> bool {
        match UserId::parse(user) {
            Ok(user) => self.inner.lock().by_user.contains_key(&user),
            Err(_) => false,
        }
    }

    /// Copy of the user's live connections; safe to iterate while others
    /// mutate the registry.
    pub fn connections_for(&self, user: &str) -> Vec<ConnectionHandle> {
        let Ok(user) = UserId::parse(user) else {
            return Vec::new();
        };
        self.inner
            .lock()
            .by_user
            .get(&user)
            .map(|conns| conns.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn snapshot(&self) -> PresenceSnapshot {
        self.inner.lock().snapshot()
    }

    pub fn online_count(&self) -> usize {
        self.inner.lock().by_user.len()
    }

    pub fn connection_count(&self) -> usize {
        self.inner.lock().by_connection.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tokio::sync::mpsc;

    fn handle(id: &str) -> ConnectionHandle {
        let (tx, _rx) = mpsc::channel(8);
        ConnectionHandle::new(ConnectionId::from(id), tx)
    }

    fn ids(handles: &[ConnectionHandle]) -> HashSet<String> {
        handles.iter().map(|h| h.id().to_string()).collect()
    }

    #[test]
    fn join_leave_scenario() {
        let reg = PresenceRegistry::new();
        tokio_test::assert_ok!(reg.register("u1", handle("c1")));
        assert_eq!(reg.snapshot().ids(), vec!["u1"]);

        tokio_test::assert_ok!(reg.register("u2", handle("c2")));
        assert_eq!(reg.snapshot().ids(), vec!["u1", "u2"]);

        assert!(reg.deregister(&ConnectionId::from("c1")).is_some());
        assert_eq!(reg.snapshot().ids(), vec!["u2"]);

        let before = reg.snapshot();
        assert!(reg.deregister(&ConnectionId::from("c1")).is_none());
        assert_eq!(reg.snapshot(), before);
    }

    #[test]
    fn register_is_idempotent_for_same_handle() {
        let reg = PresenceRegistry::new();
        let first = reg.register("u1", handle("c1")).unwrap();
        let again = reg.register("u1", handle("c1")).unwrap();
        assert!(first.added);
        assert!(!again.added);
        assert_eq!(first.snapshot.version, again.snapshot.version);
        assert_eq!(reg.connection_count(), 1);
    }

    #[test]
    fn register_rejects_identity_change() {
        let reg = PresenceRegistry::new();
        reg.register("u1", handle("c1")).unwrap();
        let err = reg.register("u2", handle("c1")).unwrap_err();
        assert!(matches!(err, RealtimeError::IdentityMismatch { .. }));
        assert!(!reg.is_online("u2"));
        assert_eq!(reg.connections_for("u1").len(), 1);
    }

    #[test]
    fn register_rejects_invalid_identity() {
        let reg = PresenceRegistry::new();
        let err = reg.register("  ", handle("c1")).unwrap_err();
        assert!(matches!(err, RealtimeError::InvalidIdentity(_)));
        assert!(reg.snapshot().is_empty());
        assert_eq!(reg.connection_count(), 0);
    }

    #[test]
    fn multi_device_stays_online_until_last_leaves() {
        let reg = PresenceRegistry::new();
        reg.register("u1", handle("phone")).unwrap();
        reg.register("u1", handle("laptop")).unwrap();
        assert_eq!(ids(&reg.connections_for("u1")), HashSet::from(["phone".to_string(), "laptop".to_string()]));

        let gone = reg.deregister(&ConnectionId::from("phone")).unwrap();
        assert!(!gone.went_offline);
        assert!(reg.is_online("u1"));
        assert_eq!(ids(&reg.connections_for("u1")), HashSet::from(["laptop".to_string()]));

        let gone = reg.deregister(&ConnectionId::from("laptop")).unwrap();
        assert!(gone.went_offline);
        assert!(!reg.is_online("u1"));
        assert!(reg.connections_for("u1").is_empty());
        assert_eq!(reg.online_count(), 0);
    }

    #[test]
    fn connections_for_is_a_copy() {
        let reg = PresenceRegistry::new();
        reg.register("u1", handle("c1")).unwrap();
        let before = reg.connections_for("u1");
        reg.register("u1", handle("c2")).unwrap();
        assert_eq!(ids(&before), HashSet::from(["c1".to_string()]));
        assert_eq!(reg.connections_for("u1").len(), 2);
    }

    #[test]
    fn version_grows_with_each_mutation() {
        let reg = PresenceRegistry::new();
        let v0 = reg.snapshot().version;
        let v1 = reg.register("u1", handle("c1")).unwrap().snapshot.version;
        let v2 = reg.deregister(&ConnectionId::from("c1")).unwrap().snapshot.version;
        assert!(v0 < v1 && v1 < v2);
    }

    #[test]
    fn online_tracks_latest_operation_per_connection() {
        let reg = PresenceRegistry::new();
        let ops: &[(&str, bool)] = &[
            ("a", true),
            ("b", true),
            ("a", false),
            ("a", false),
            ("c", true),
            ("b", false),
            ("c", false),
            ("a", true),
        ];
        let mut live: HashSet<&str> = HashSet::new();
        for (conn, add) in ops {
            if *add {
                reg.register("u1", handle(conn)).unwrap();
                live.insert(*conn);
            } else {
                reg.deregister(&ConnectionId::from(*conn));
                live.remove(*conn);
            }
            assert_eq!(reg.is_online("u1"), !live.is_empty());
            assert_eq!(reg.connections_for("u1").len(), live.len());
        }
    }

    #[test]
    fn concurrent_register_deregister_keeps_counts() {
        const THREADS: usize = 8;
        const PER_THREAD: usize = 200;
        let reg = PresenceRegistry::new();

        let workers: Vec<_> = (0..THREADS)
            .map(|t| {
                let reg = reg.clone();
                std::thread::spawn(move || {
                    for i in 0..PER_THREAD {
                        let conn = format!("t{}-c{}", t, i);
                        let user = format!("user{}", i % 5);
                        reg.register(&user, handle(&conn)).unwrap();
                        assert!(reg
                            .connections_for(&user)
                            .iter()
                            .any(|h| h.id().as_str() == conn));
                        // drop every third connection again
                        if i % 3 == 0 {
                            assert!(reg.deregister(&ConnectionId::from(conn.as_str())).is_some());
                        }
                    }
                })
            })
            .collect();
        for w in workers {
            w.join().unwrap();
        }

        let removed_per_thread = (0..PER_THREAD).filter(|i| i % 3 == 0).count();
        assert_eq!(
            reg.connection_count(),
            THREADS * (PER_THREAD - removed_per_thread)
        );
        assert_eq!(reg.online_count(), 5);
        let total: usize = (0..5)
            .map(|u| reg.connections_for(&format!("user{}", u)).len())
            .sum();
        assert_eq!(total, reg.connection_count());
    }
}
