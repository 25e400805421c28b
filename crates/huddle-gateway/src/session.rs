//! Session registry
//!
//! In-memory bookkeeping of which connections belong to which session. The
//! member sets and each connection's back-reference live behind one lock, so
//! every operation (including the snapshot a caller broadcasts to) is atomic
//! with respect to other dispatches. The lock is never held while sending.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use crate::connection::{ConnectionHandle, MemberInfo};

/// A live session
#[derive(Debug, Clone)]
struct Room {
    created_at: DateTime<Utc>,
    /// Members in join order, without duplicates
    members: Vec<ConnectionHandle>,
}

#[derive(Debug, Default)]
struct RegistryState {
    rooms: HashMap<String, Room>,
    /// connection id -> session id
    memberships: HashMap<String, String>,
}

impl RegistryState {
    fn remove_member(&mut self, connection_id: &str) -> Option<Departure> {
        let session_id = self.memberships.remove(connection_id)?;
        let room = self.rooms.get_mut(&session_id)?;
        room.members.retain(|member| member.id != connection_id);

        let remaining = room.members.clone();
        let session_closed = remaining.is_empty();
        if session_closed {
            self.rooms.remove(&session_id);
        }

        Some(Departure {
            session_id,
            remaining,
            session_closed,
        })
    }
}

/// Result of [`SessionRegistry::join`]
#[derive(Debug, Clone)]
pub struct JoinOutcome {
    /// Member count after the join
    pub participant_count: usize,
    /// False when the connection was already a member of this session
    pub newly_joined: bool,
    /// The other members, snapshot taken after the join
    pub peers: Vec<ConnectionHandle>,
    /// Set when the connection had to leave a different session first
    pub previous: Option<Departure>,
}

/// A connection's removal from a session
#[derive(Debug, Clone)]
pub struct Departure {
    pub session_id: String,
    /// Members still in the session, in join order
    pub remaining: Vec<ConnectionHandle>,
    /// True when the departure emptied and deleted the session
    pub session_closed: bool,
}

/// Diagnostic view of one session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomStats {
    pub participant_count: usize,
    pub created_at: DateTime<Utc>,
    pub members: Vec<MemberInfo>,
}

/// Maps session IDs to their member connections
#[derive(Debug, Default)]
pub struct SessionRegistry {
    state: RwLock<RegistryState>,
}

impl SessionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `connection` to `session_id`, leaving any other session first.
    ///
    /// Joining a session the connection is already in leaves the member set
    /// untouched.
    pub fn join(&self, session_id: &str, connection: &ConnectionHandle) -> JoinOutcome {
        let mut state = self.state.write();

        let current = state.memberships.get(&connection.id).cloned();
        let previous = match current {
            Some(ref current) if current != session_id => state.remove_member(&connection.id),
            _ => None,
        };

        let room = state
            .rooms
            .entry(session_id.to_string())
            .or_insert_with(|| Room {
                created_at: Utc::now(),
                members: Vec::new(),
            });

        let newly_joined = !room.members.iter().any(|member| member.id == connection.id);
        if newly_joined {
            room.members.push(connection.clone());
        }

        let participant_count = room.members.len();
        let peers = room
            .members
            .iter()
            .filter(|member| member.id != connection.id)
            .cloned()
            .collect();

        state
            .memberships
            .insert(connection.id.clone(), session_id.to_string());

        JoinOutcome {
            participant_count,
            newly_joined,
            peers,
            previous,
        }
    }

    /// Remove `connection` from its session. No-op when it is in none.
    pub fn leave(&self, connection: &ConnectionHandle) -> Option<Departure> {
        self.state.write().remove_member(&connection.id)
    }

    /// First member of `session_id` whose user ID is `user_id`
    pub fn find_member(&self, session_id: &str, user_id: &str) -> Option<ConnectionHandle> {
        let state = self.state.read();
        state
            .rooms
            .get(session_id)?
            .members
            .iter()
            .find(|member| member.user_id() == user_id)
            .cloned()
    }

    /// Ordered snapshot of the members of `session_id`
    pub fn members_of(&self, session_id: &str) -> Vec<ConnectionHandle> {
        let state = self.state.read();
        state
            .rooms
            .get(session_id)
            .map(|room| room.members.clone())
            .unwrap_or_default()
    }

    /// The session a connection currently belongs to
    pub fn session_of(&self, connection_id: &str) -> Option<String> {
        self.state.read().memberships.get(connection_id).cloned()
    }

    /// Check if a session exists
    pub fn contains(&self, session_id: &str) -> bool {
        self.state.read().rooms.contains_key(session_id)
    }

    /// Get total session count
    pub fn session_count(&self) -> usize {
        self.state.read().rooms.len()
    }

    /// Per-session diagnostics, ordered by session ID
    pub fn stats(&self) -> BTreeMap<String, RoomStats> {
        let state = self.state.read();
        state
            .rooms
            .iter()
            .map(|(id, room)| {
                let stats = RoomStats {
                    participant_count: room.members.len(),
                    created_at: room.created_at,
                    members: room.members.iter().map(ConnectionHandle::info).collect(),
                };
                (id.clone(), stats)
            })
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn assert_consistent(&self) {
        let state = self.state.read();
        for (session_id, room) in &state.rooms {
            assert!(!room.members.is_empty(), "empty session {} kept", session_id);
            for member in &room.members {
                assert_eq!(state.memberships.get(&member.id), Some(session_id));
            }
        }
        for (connection_id, session_id) in &state.memberships {
            let room = state.rooms.get(session_id).expect("membership points at a live session");
            let count = room.members.iter().filter(|m| &m.id == connection_id).count();
            assert_eq!(count, 1);
        }
    }
}
