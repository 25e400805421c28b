//! Gateway main structure
//!
//! The HTTP/WebSocket server that authenticates upgrade requests, runs one
//! task per connection and exposes health and diagnostic endpoints.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use huddle_observability::logging::connection_span;
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

use crate::auth::{bearer_token, Principal, TokenVerifier};
use crate::connection::ConnectionHandle;
use crate::error::{AuthenticationError, GatewayError, ProtocolError};
use crate::presence::{ConnectionSlot, PresenceManager};
use crate::protocol::ServerEvent;
use crate::router::MessageRouter;
use crate::session::SessionRegistry;

/// Gateway configuration
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Bind address (e.g., "127.0.0.1:8090")
    pub bind: String,
    /// Upgrade path for signaling connections
    pub ws_path: String,
    /// Maximum number of concurrent connections
    pub max_connections: usize,
    /// Outbound queue size per connection
    pub outbound_buffer: usize,
    /// Accept `?token=` when no Authorization header is present
    pub allow_query_token: bool,
    /// Serve `GET /rooms`
    pub expose_room_stats: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8090".to_string(),
            ws_path: "/signaling".to_string(),
            max_connections: 1000,
            outbound_buffer: 64,
            allow_query_token: false,
            expose_room_stats: true,
        }
    }
}

/// The signaling gateway
#[derive(Clone)]
pub struct Gateway {
    config: Arc<GatewayConfig>,
    verifier: Arc<dyn TokenVerifier>,
    registry: Arc<SessionRegistry>,
    router: Arc<MessageRouter>,
    presence: Arc<PresenceManager>,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("config", &self.config)
            .field("verifier", &"<verifier>")
            .field("registry", &self.registry)
            .field("presence", &self.presence)
            .finish()
    }
}

impl Gateway {
    /// Create a new Gateway with a fresh registry
    pub fn new(config: GatewayConfig, verifier: Arc<dyn TokenVerifier>) -> Self {
        let registry = Arc::new(SessionRegistry::new());
        let router = Arc::new(MessageRouter::new(Arc::clone(&registry)));
        let presence = Arc::new(PresenceManager::new(
            Arc::clone(&registry),
            config.max_connections,
        ));

        Self {
            config: Arc::new(config),
            verifier,
            registry,
            router,
            presence,
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Get the session registry
    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Get the presence manager
    pub fn presence(&self) -> &PresenceManager {
        &self.presence
    }

    /// Get the message router
    pub fn message_router(&self) -> &MessageRouter {
        &self.router
    }

    /// Resolve the principal for an upgrade request.
    ///
    /// Runs before the upgrade completes; a failure means no connection is
    /// ever created.
    pub async fn authenticate(
        &self,
        headers: &HeaderMap,
        query_token: Option<&str>,
    ) -> Result<Principal, AuthenticationError> {
        let token = match bearer_token(headers) {
            Some(token) => token,
            None => query_token
                .filter(|_| self.config.allow_query_token)
                .map(str::trim)
                .filter(|token| !token.is_empty())
                .ok_or(AuthenticationError::MissingToken)?,
        };

        self.verifier.verify(token).await.map_err(|e| {
            warn!("Token verification failed: {}", e);
            AuthenticationError::InvalidToken
        })
    }

    /// Build the HTTP router
    pub fn http_router(&self) -> Router {
        Router::new()
            .route(&self.config.ws_path, get(upgrade_handler))
            .route("/health", get(health_handler))
            .route("/rooms", get(rooms_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(self.clone())
    }

    /// Run the gateway server until the process exits
    pub async fn run(&self) -> Result<(), GatewayError> {
        let addr: SocketAddr = self.config.bind.parse()?;
        let listener = TcpListener::bind(&addr).await?;
        self.serve(listener, std::future::pending()).await
    }

    /// Serve on an existing listener until `shutdown` resolves
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<(), GatewayError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if !self.config.ws_path.starts_with('/') {
            return Err(GatewayError::Config(format!(
                "ws_path must start with '/': {}",
                self.config.ws_path
            )));
        }

        let addr = listener.local_addr()?;
        info!("Gateway listening on ws://{}{}", addr, self.config.ws_path);

        axum::serve(listener, self.http_router())
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("Gateway on {} stopped", addr);
        Ok(())
    }

    /// Drive one authenticated connection until its transport closes
    async fn handle_connection(
        self,
        socket: WebSocket,
        connection_id: String,
        principal: Principal,
        slot: ConnectionSlot,
    ) {
        let (mut sender, mut receiver) = socket.split();

        // Channel for sending events to this connection
        let (tx, mut rx) = mpsc::channel::<ServerEvent>(self.config.outbound_buffer);
        let handle = ConnectionHandle::new(connection_id.clone(), principal, tx);

        self.presence.register(handle.clone(), slot);
        if let Err(e) = handle.send(ServerEvent::Connected {
            user_id: handle.user_id().to_string(),
        }) {
            error!("Failed to queue connected ack: {}", e);
        }

        loop {
            tokio::select! {
                // Handle outgoing events
                Some(event) = rx.recv() => {
                    match serde_json::to_string(&event) {
                        Ok(json) => {
                            if let Err(e) = sender.send(Message::Text(json)).await {
                                debug!("Failed to send to {}: {}", connection_id, e);
                                break;
                            }
                        }
                        Err(e) => {
                            error!("Failed to serialize event: {}", e);
                        }
                    }
                }

                // Handle incoming frames
                incoming = receiver.next() => {
                    match incoming {
                        Some(Ok(Message::Text(text))) => {
                            self.router.handle_text(&handle, &text);
                        }
                        Some(Ok(Message::Binary(_))) => {
                            self.router.reject(&handle, ProtocolError::BinaryFrame);
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            debug!("Connection {} closed by client", connection_id);
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            debug!("WebSocket error on {}: {}", connection_id, e);
                            break;
                        }
                    }
                }
            }
        }

        self.presence.disconnect(&connection_id);
    }
}

#[derive(Debug, Default, Deserialize)]
struct HandshakeParams {
    token: Option<String>,
}

async fn upgrade_handler(
    State(gateway): State<Gateway>,
    Query(params): Query<HandshakeParams>,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    // Held across verification; dropped on every early return below.
    let Some(slot) = gateway.presence.try_reserve() else {
        warn!("Connection limit reached, rejecting upgrade");
        let body = Json(json!({ "error": "server at capacity" }));
        return (StatusCode::SERVICE_UNAVAILABLE, body).into_response();
    };

    let principal = match gateway.authenticate(&headers, params.token.as_deref()).await {
        Ok(principal) => principal,
        Err(e) => {
            info!("Rejected signaling handshake: {}", e);
            return e.into_response();
        }
    };

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    let connection_id = Uuid::new_v4().to_string();
    let span = connection_span(&connection_id, &principal.user_id);
    ws.on_upgrade(move |socket| {
        gateway
            .handle_connection(socket, connection_id, principal, slot)
            .instrument(span)
    })
}

async fn health_handler(State(gateway): State<Gateway>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "connections": gateway.presence.connection_count(),
        "rooms": gateway.registry.session_count(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn rooms_handler(State(gateway): State<Gateway>) -> Response {
    if !gateway.config.expose_room_stats {
        return StatusCode::NOT_FOUND.into_response();
    }
    Json(gateway.presence.room_stats()).into_response()
}

impl std::fmt::Display for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Gateway({}{})", self.config.bind, self.config.ws_path)
    }
}
