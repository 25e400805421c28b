//! Error taxonomy for the signaling relay

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

/// Handshake-time failures, surfaced as an HTTP status before upgrade
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthenticationError {
    #[error("missing token")]
    MissingToken,
    #[error("invalid token")]
    InvalidToken,
}

impl AuthenticationError {
    pub fn status(&self) -> StatusCode {
        match self {
            AuthenticationError::MissingToken => StatusCode::UNAUTHORIZED,
            AuthenticationError::InvalidToken => StatusCode::FORBIDDEN,
        }
    }
}

impl IntoResponse for AuthenticationError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (self.status(), body).into_response()
    }
}

/// Malformed or unrecognized in-band message
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid JSON: {0}")]
    MalformedJson(#[source] serde_json::Error),
    #[error("missing message type")]
    MissingType,
    #[error("unknown message type: {0}")]
    UnknownType(String),
    #[error("invalid {kind} message: {source}")]
    InvalidFields {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("{0} must not be empty")]
    EmptyField(&'static str),
    #[error("binary frames are not supported")]
    BinaryFrame,
}

/// Well-formed message that cannot be routed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoutingError {
    #[error("not in this room")]
    NotInRoom,
    #[error("target user not found")]
    TargetNotFound,
}

/// Failure to hand an event to a connection's outbound queue
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    #[error("Connection closed")]
    Closed,
    #[error("Outbound buffer full")]
    BufferFull,
}

/// Gateway-related errors
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Address parse error: {0}")]
    AddrParse(#[from] std::net::AddrParseError),
    #[error("Invalid gateway configuration: {0}")]
    Config(String),
}
