//! Huddle Gateway - WebRTC signaling relay
//!
//! Authenticated WebSocket clients join sessions (rooms) and exchange SDP
//! offers/answers and ICE candidates with each other through this relay.
//! Media never flows through the server; only signaling does.

pub mod auth;
mod connection;
pub mod error;
mod gateway;
mod presence;
pub mod protocol;
mod router;
mod session;

pub use auth::{
    bearer_token, HttpTokenVerifier, Principal, StaticTokenVerifier, TokenVerifier, VerifyError,
};
pub use connection::{ConnectionHandle, ConnectionState, MemberInfo};
pub use error::{AuthenticationError, ConnectionError, GatewayError, ProtocolError, RoutingError};
pub use gateway::{Gateway, GatewayConfig};
pub use presence::{ConnectionSlot, PresenceManager};
pub use protocol::{ClientMessage, ServerEvent, Signal, SignalKind};
pub use router::MessageRouter;
pub use session::{Departure, JoinOutcome, RoomStats, SessionRegistry};
