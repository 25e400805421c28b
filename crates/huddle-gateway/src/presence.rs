//! Presence and connection lifecycle
//!
//! Tracks every live connection created by the gateway and performs the
//! session cleanup when a transport goes away.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::info;

use crate::connection::{ConnectionHandle, ConnectionState};
use crate::router::announce_departure;
use crate::session::{RoomStats, SessionRegistry};

/// A reserved place in the connection table.
///
/// Dropping it before [`PresenceManager::register`] gives the place back.
#[derive(Debug)]
pub struct ConnectionSlot {
    _permit: OwnedSemaphorePermit,
}

#[derive(Debug)]
struct LiveConnection {
    handle: ConnectionHandle,
    _slot: ConnectionSlot,
}

/// Live connection table plus teardown handling
#[derive(Debug)]
pub struct PresenceManager {
    registry: Arc<SessionRegistry>,
    /// Map of connection ID to connection handle
    connections: DashMap<String, LiveConnection>,
    /// One permit per allowed connection, held from handshake to teardown
    slots: Arc<Semaphore>,
}

impl PresenceManager {
    pub fn new(registry: Arc<SessionRegistry>, max_connections: usize) -> Self {
        Self {
            registry,
            connections: DashMap::new(),
            slots: Arc::new(Semaphore::new(max_connections.min(Semaphore::MAX_PERMITS))),
        }
    }

    /// Claim a place for a connection that is still handshaking.
    ///
    /// Returns `None` when every place is taken, including places held by
    /// handshakes that have not finished yet.
    pub fn try_reserve(&self) -> Option<ConnectionSlot> {
        Arc::clone(&self.slots)
            .try_acquire_owned()
            .ok()
            .map(|permit| ConnectionSlot { _permit: permit })
    }

    /// Start observing a freshly authenticated connection
    pub fn register(&self, handle: ConnectionHandle, slot: ConnectionSlot) {
        info!(
            "Connection {} registered for user {}",
            handle.id,
            handle.user_id()
        );
        self.connections.insert(
            handle.id.clone(),
            LiveConnection {
                handle,
                _slot: slot,
            },
        );
    }

    /// Tear down a connection after its transport closed or failed.
    ///
    /// Returns false when the connection was already gone, in which case
    /// nothing happens.
    pub fn disconnect(&self, connection_id: &str) -> bool {
        let Some((_, LiveConnection { handle, .. })) = self.connections.remove(connection_id)
        else {
            return false;
        };

        if let Some(departure) = self.registry.leave(&handle) {
            announce_departure(&handle, &departure);
        }

        info!(
            "Connection {} for user {} closed",
            handle.id,
            handle.user_id()
        );
        true
    }

    /// Get a connection by ID
    pub fn get(&self, connection_id: &str) -> Option<ConnectionHandle> {
        self.connections
            .get(connection_id)
            .map(|entry| entry.value().handle.clone())
    }

    pub fn state_of(&self, connection_id: &str) -> ConnectionState {
        if !self.connections.contains_key(connection_id) {
            return ConnectionState::Closed;
        }
        match self.registry.session_of(connection_id) {
            Some(session_id) => ConnectionState::InRoom { session_id },
            None => ConnectionState::Connected,
        }
    }

    /// Get current connection count
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Check if every place is taken, by live or handshaking connections
    pub fn is_full(&self) -> bool {
        self.slots.available_permits() == 0
    }

    /// Informational snapshot of every session; not for protocol decisions.
    pub fn room_stats(&self) -> BTreeMap<String, RoomStats> {
        self.registry.stats()
    }
}
