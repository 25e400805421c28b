//! Signaling protocol definitions
//!
//! Every frame is a single JSON object tagged by `type`. Client frames are
//! decoded into [`ClientMessage`] at the router boundary; nothing downstream
//! touches raw JSON except the opaque offer/answer/candidate payloads.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;

/// Messages sent from client to relay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Join (or lazily create) a session
    #[serde(rename_all = "camelCase")]
    JoinRoom {
        /// Opaque session identifier
        session_id: String,
    },
    /// Leave the current session
    #[serde(rename_all = "camelCase")]
    LeaveRoom {
        /// Session to leave; defaults to the connection's current session
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },
    /// Session description offer for a peer
    #[serde(rename_all = "camelCase")]
    Offer {
        session_id: String,
        target_user_id: String,
        offer: Value,
    },
    /// Session description answer for a peer
    #[serde(rename_all = "camelCase")]
    Answer {
        session_id: String,
        target_user_id: String,
        answer: Value,
    },
    /// Connectivity candidate for a peer
    #[serde(rename_all = "camelCase")]
    IceCandidate {
        session_id: String,
        target_user_id: String,
        candidate: Value,
    },
    /// Liveness probe
    Ping,
}

impl ClientMessage {
    /// Every `type` a client may send
    pub const KINDS: [&'static str; 6] = [
        "join-room",
        "leave-room",
        "offer",
        "answer",
        "ice-candidate",
        "ping",
    ];

    /// Decode and validate one text frame.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(text).map_err(ProtocolError::MalformedJson)?;

        let kind = match value.get("type") {
            Some(Value::String(kind)) => kind.clone(),
            _ => return Err(ProtocolError::MissingType),
        };
        if !Self::KINDS.contains(&kind.as_str()) {
            return Err(ProtocolError::UnknownType(kind));
        }

        let message: ClientMessage = serde_json::from_value(value)
            .map_err(|source| ProtocolError::InvalidFields { kind, source })?;
        message.validate()?;
        Ok(message)
    }

    fn validate(&self) -> Result<(), ProtocolError> {
        match self {
            ClientMessage::JoinRoom { session_id } => require("sessionId", session_id),
            ClientMessage::LeaveRoom { session_id } => match session_id {
                Some(id) => require("sessionId", id),
                None => Ok(()),
            },
            ClientMessage::Offer {
                session_id,
                target_user_id,
                ..
            }
            | ClientMessage::Answer {
                session_id,
                target_user_id,
                ..
            }
            | ClientMessage::IceCandidate {
                session_id,
                target_user_id,
                ..
            } => {
                require("sessionId", session_id)?;
                require("targetUserId", target_user_id)
            }
            ClientMessage::Ping => Ok(()),
        }
    }

    /// The wire `type` of this message
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::JoinRoom { .. } => "join-room",
            ClientMessage::LeaveRoom { .. } => "leave-room",
            ClientMessage::Offer { .. } => "offer",
            ClientMessage::Answer { .. } => "answer",
            ClientMessage::IceCandidate { .. } => "ice-candidate",
            ClientMessage::Ping => "ping",
        }
    }
}

fn require(field: &'static str, value: &str) -> Result<(), ProtocolError> {
    if value.trim().is_empty() {
        Err(ProtocolError::EmptyField(field))
    } else {
        Ok(())
    }
}

/// The three peer-to-peer negotiation message kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Offer,
    Answer,
    IceCandidate,
}

/// A negotiation message addressed to one peer
#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    pub kind: SignalKind,
    pub session_id: String,
    pub target_user_id: String,
    pub payload: Value,
}

impl Signal {
    pub fn new(
        kind: SignalKind,
        session_id: String,
        target_user_id: String,
        payload: Value,
    ) -> Self {
        Self {
            kind,
            session_id,
            target_user_id,
            payload,
        }
    }

    /// Build the frame delivered to the target, stamped with the sender.
    pub fn into_forward(self, from_user_id: impl Into<String>) -> ServerEvent {
        let from_user_id = from_user_id.into();
        let session_id = self.session_id;
        match self.kind {
            SignalKind::Offer => ServerEvent::Offer {
                session_id,
                from_user_id,
                offer: self.payload,
            },
            SignalKind::Answer => ServerEvent::Answer {
                session_id,
                from_user_id,
                answer: self.payload,
            },
            SignalKind::IceCandidate => ServerEvent::IceCandidate {
                session_id,
                from_user_id,
                candidate: self.payload,
            },
        }
    }
}

/// Events sent from relay to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// Handshake accepted
    #[serde(rename_all = "camelCase")]
    Connected { user_id: String },
    /// Reply to `join-room`
    #[serde(rename_all = "camelCase")]
    JoinedRoom {
        session_id: String,
        participant_count: usize,
    },
    /// Another participant joined the session
    #[serde(rename_all = "camelCase")]
    UserJoined {
        session_id: String,
        user_id: String,
        role: String,
    },
    /// A participant left the session or disconnected
    #[serde(rename_all = "camelCase")]
    UserLeft { session_id: String, user_id: String },
    /// Forwarded offer
    #[serde(rename_all = "camelCase")]
    Offer {
        session_id: String,
        from_user_id: String,
        offer: Value,
    },
    /// Forwarded answer
    #[serde(rename_all = "camelCase")]
    Answer {
        session_id: String,
        from_user_id: String,
        answer: Value,
    },
    /// Forwarded connectivity candidate
    #[serde(rename_all = "camelCase")]
    IceCandidate {
        session_id: String,
        from_user_id: String,
        candidate: Value,
    },
    /// Reply to `ping`
    Pong,
    /// Protocol or routing failure, visible to the sender only
    Error { error: String },
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error {
            error: message.into(),
        }
    }

    /// The wire `type` of this event
    pub fn kind(&self) -> &'static str {
        match self {
            ServerEvent::Connected { .. } => "connected",
            ServerEvent::JoinedRoom { .. } => "joined-room",
            ServerEvent::UserJoined { .. } => "user-joined",
            ServerEvent::UserLeft { .. } => "user-left",
            ServerEvent::Offer { .. } => "offer",
            ServerEvent::Answer { .. } => "answer",
            ServerEvent::IceCandidate { .. } => "ice-candidate",
            ServerEvent::Pong => "pong",
            ServerEvent::Error { .. } => "error",
        }
    }
}
