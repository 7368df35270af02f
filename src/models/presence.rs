//! Identities and presence snapshots.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

use crate::error::RealtimeError;

/// Identity of the AI assistant contact. No socket may claim it.
pub const ASSISTANT_USER_ID: &str = "gemini-ai";

const MAX_USER_ID_LEN: usize = 128;

/// Logical user identity asserted at handshake.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Validate a raw identity: non-blank, bounded, printable, not reserved.
    pub fn parse(raw: &str) -> Result<Self, RealtimeError> {
        let id = raw.trim();
        if id.is_empty() {
            return Err(RealtimeError::InvalidIdentity("identity is empty".to_string()));
        }
        if id.len() > MAX_USER_ID_LEN {
            return Err(RealtimeError::InvalidIdentity(format!(
                "identity longer than {} bytes",
                MAX_USER_ID_LEN
            )));
        }
        if id.chars().any(char::is_control) {
            return Err(RealtimeError::InvalidIdentity(
                "identity contains control characters".to_string(),
            ));
        }
        if id == ASSISTANT_USER_ID {
            return Err(RealtimeError::InvalidIdentity(format!(
                "{} is reserved for the assistant",
                ASSISTANT_USER_ID
            )));
        }
        Ok(Self(id.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque per-connection identifier assigned by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Generate a unique socket/connection id.
    pub fn generate() -> Self {
        Self(format!("{}.{}", std::process::id(), Uuid::new_v4().as_simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Users online at one registry version.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PresenceSnapshot {
    /// Registry version the snapshot was taken at; grows with every mutation.
    pub version: u64,
    pub users: BTreeSet<UserId>,
}

impl PresenceSnapshot {
    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Identities as sent in `getOnlineUsers`.
    pub fn ids(&self) -> Vec<String> {
        self.users.iter().map(|u| u.0.clone()).collect()
    }
}
