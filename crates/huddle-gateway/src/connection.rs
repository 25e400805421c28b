//! Connection handles
//!
//! A [`ConnectionHandle`] is the relay's view of one authenticated transport:
//! identity claims plus a bounded outbound queue drained by the connection's
//! own task. Sends never block; a full or closed queue is reported to the
//! caller instead.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;

use crate::auth::Principal;
use crate::error::ConnectionError;
use crate::protocol::ServerEvent;

/// Handle to a signaling connection for sending events
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    /// Connection ID
    pub id: String,
    /// Verified identity
    pub principal: Principal,
    /// Handshake completion time
    pub connected_at: DateTime<Utc>,
    /// Channel for sending events to the connection
    sender: mpsc::Sender<ServerEvent>,
}

impl PartialEq for ConnectionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ConnectionHandle {}

impl ConnectionHandle {
    /// Create a new connection handle
    pub fn new(id: String, principal: Principal, sender: mpsc::Sender<ServerEvent>) -> Self {
        Self {
            id,
            principal,
            connected_at: Utc::now(),
            sender,
        }
    }

    /// Create a handle with a fresh ID together with the receiving end of
    /// its outbound queue.
    pub fn channel(principal: Principal, capacity: usize) -> (Self, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        let handle = Self::new(uuid::Uuid::new_v4().to_string(), principal, tx);
        (handle, rx)
    }

    /// Queue an event for this connection
    pub fn send(&self, event: ServerEvent) -> Result<(), ConnectionError> {
        self.sender.try_send(event).map_err(|e| match e {
            TrySendError::Full(_) => ConnectionError::BufferFull,
            TrySendError::Closed(_) => ConnectionError::Closed,
        })
    }

    pub fn user_id(&self) -> &str {
        &self.principal.user_id
    }

    pub fn role(&self) -> &str {
        &self.principal.role
    }

    /// Public description used by diagnostics
    pub fn info(&self) -> MemberInfo {
        MemberInfo {
            connection_id: self.id.clone(),
            user_id: self.principal.user_id.clone(),
            role: self.principal.role.clone(),
            connected_at: self.connected_at,
        }
    }
}

/// Send the same event to every recipient, logging individual failures.
pub(crate) fn broadcast(recipients: &[ConnectionHandle], event: &ServerEvent) {
    for handle in recipients {
        if let Err(e) = handle.send(event.clone()) {
            debug!(
                "Failed to deliver {} to connection {}: {}",
                event.kind(),
                handle.id,
                e
            );
        }
    }
}

/// Lifecycle state of a connection as observed by the relay
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "kebab-case")]
pub enum ConnectionState {
    /// Authenticated, not in any session
    Connected,
    /// Member of exactly one session
    #[serde(rename_all = "camelCase")]
    InRoom { session_id: String },
    /// Transport gone; terminal
    Closed,
}

/// Identity of a session member
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberInfo {
    pub connection_id: String,
    pub user_id: String,
    pub role: String,
    pub connected_at: DateTime<Utc>,
}
