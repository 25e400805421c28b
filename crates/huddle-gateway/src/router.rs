//! Message routing
//!
//! Decodes client frames and dispatches them to one handler per message
//! type. Handlers mutate the registry or forward a payload to a single target
//! connection; failures come back to the sender as an `error` frame and never
//! close the connection.

use std::sync::Arc;

use huddle_observability::logging::session_span;
use tracing::{debug, warn};

use crate::connection::{broadcast, ConnectionHandle};
use crate::error::{ProtocolError, RoutingError};
use crate::protocol::{ClientMessage, ServerEvent, Signal, SignalKind};
use crate::session::{Departure, SessionRegistry};

/// Routes client messages against the session registry
#[derive(Debug, Clone)]
pub struct MessageRouter {
    registry: Arc<SessionRegistry>,
}

impl MessageRouter {
    /// Create a new message router
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Decode one text frame and dispatch it
    pub fn handle_text(&self, connection: &ConnectionHandle, text: &str) {
        match ClientMessage::parse(text) {
            Ok(message) => self.dispatch(connection, message),
            Err(e) => self.reject(connection, e),
        }
    }

    /// Answer a protocol violation with an error frame
    pub fn reject(&self, connection: &ConnectionHandle, error: ProtocolError) {
        warn!("Protocol error from connection {}: {}", connection.id, error);
        reply(connection, ServerEvent::error(error.to_string()));
    }

    /// Route an already decoded message
    pub fn dispatch(&self, connection: &ConnectionHandle, message: ClientMessage) {
        debug!(
            "Dispatching {} from {} ({})",
            message.kind(),
            connection.user_id(),
            connection.id
        );

        let result = match message {
            ClientMessage::JoinRoom { session_id } => self.join_room(connection, session_id),
            ClientMessage::LeaveRoom { session_id } => self.leave_room(connection, session_id),
            ClientMessage::Ping => self.ping(connection),
            ClientMessage::Offer {
                session_id,
                target_user_id,
                offer,
            } => self.relay_signal(
                connection,
                Signal::new(SignalKind::Offer, session_id, target_user_id, offer),
            ),
            ClientMessage::Answer {
                session_id,
                target_user_id,
                answer,
            } => self.relay_signal(
                connection,
                Signal::new(SignalKind::Answer, session_id, target_user_id, answer),
            ),
            ClientMessage::IceCandidate {
                session_id,
                target_user_id,
                candidate,
            } => self.relay_signal(
                connection,
                Signal::new(SignalKind::IceCandidate, session_id, target_user_id, candidate),
            ),
        };

        if let Err(e) = result {
            debug!("Routing error for connection {}: {}", connection.id, e);
            reply(connection, ServerEvent::error(e.to_string()));
        }
    }

    fn join_room(
        &self,
        connection: &ConnectionHandle,
        session_id: String,
    ) -> Result<(), RoutingError> {
        let _span = session_span(&session_id).entered();
        let outcome = self.registry.join(&session_id, connection);

        if let Some(previous) = outcome.previous {
            announce_departure(connection, &previous);
        }

        reply(
            connection,
            ServerEvent::JoinedRoom {
                session_id: session_id.clone(),
                participant_count: outcome.participant_count,
            },
        );

        if outcome.newly_joined {
            debug!(
                "{} joined {} ({} participants)",
                connection.user_id(),
                session_id,
                outcome.participant_count
            );
            let joined = ServerEvent::UserJoined {
                session_id,
                user_id: connection.user_id().to_string(),
                role: connection.role().to_string(),
            };
            broadcast(&outcome.peers, &joined);
        }

        Ok(())
    }

    fn leave_room(
        &self,
        connection: &ConnectionHandle,
        session_id: Option<String>,
    ) -> Result<(), RoutingError> {
        if let Some(requested) = session_id {
            if self.registry.session_of(&connection.id).as_deref() != Some(requested.as_str()) {
                return Err(RoutingError::NotInRoom);
            }
        }

        if let Some(departure) = self.registry.leave(connection) {
            announce_departure(connection, &departure);
        }
        Ok(())
    }

    fn relay_signal(
        &self,
        connection: &ConnectionHandle,
        signal: Signal,
    ) -> Result<(), RoutingError> {
        if self.registry.session_of(&connection.id).as_deref() != Some(signal.session_id.as_str()) {
            return Err(RoutingError::NotInRoom);
        }

        let target = self
            .registry
            .find_member(&signal.session_id, &signal.target_user_id)
            .ok_or(RoutingError::TargetNotFound)?;

        let event = signal.into_forward(connection.user_id());
        target.send(event).map_err(|e| {
            debug!("Failed to forward to connection {}: {}", target.id, e);
            RoutingError::TargetNotFound
        })
    }

    fn ping(&self, connection: &ConnectionHandle) -> Result<(), RoutingError> {
        reply(connection, ServerEvent::Pong);
        Ok(())
    }
}

/// Tell the remaining members of a session that `connection` is gone.
pub(crate) fn announce_departure(connection: &ConnectionHandle, departure: &Departure) {
    debug!(
        "{} left {} ({} remaining)",
        connection.user_id(),
        departure.session_id,
        departure.remaining.len()
    );
    let left = ServerEvent::UserLeft {
        session_id: departure.session_id.clone(),
        user_id: connection.user_id().to_string(),
    };
    broadcast(&departure.remaining, &left);
}

fn reply(connection: &ConnectionHandle, event: ServerEvent) {
    if let Err(e) = connection.send(event) {
        debug!("Failed to reply to connection {}: {}", connection.id, e);
    }
}
