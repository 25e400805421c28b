use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use futures_util::{SinkExt, StreamExt};
use huddle_gateway::{
    Gateway, GatewayConfig, Principal, StaticTokenVerifier, TokenVerifier, VerifyError,
};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

const RECV_TIMEOUT: Duration = Duration::from_secs(2);

fn verifier() -> StaticTokenVerifier {
    StaticTokenVerifier::default()
        .with_token("tok-doctor", Principal::new("U1", "doctor"))
        .with_token("tok-patient", Principal::new("U2", "patient"))
        .with_token("tok-nurse", Principal::new("U3", "nurse"))
}

/// Answers like the static table, but only after a delay
struct SlowVerifier {
    inner: StaticTokenVerifier,
    delay: Duration,
}

#[async_trait]
impl TokenVerifier for SlowVerifier {
    async fn verify(&self, token: &str) -> Result<Principal, VerifyError> {
        tokio::time::sleep(self.delay).await;
        self.inner.verify(token).await
    }
}

/// Start a gateway on an ephemeral port
async fn start(config: GatewayConfig) -> (SocketAddr, Gateway) {
    start_with(config, Arc::new(verifier())).await
}

async fn start_with(
    config: GatewayConfig,
    verifier: Arc<dyn TokenVerifier>,
) -> (SocketAddr, Gateway) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let gateway = Gateway::new(config, verifier);

    let server = gateway.clone();
    tokio::spawn(async move {
        server.serve(listener, std::future::pending()).await.unwrap();
    });

    (addr, gateway)
}

async fn start_default() -> (SocketAddr, Gateway) {
    start(GatewayConfig::default()).await
}

/// Test client speaking JSON text frames
struct Client {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl Client {
    async fn try_connect(addr: SocketAddr, token: Option<&str>) -> Result<Self, WsError> {
        let mut request = format!("ws://{}/signaling", addr)
            .into_client_request()
            .unwrap();
        if let Some(token) = token {
            request.headers_mut().insert(
                "Authorization",
                HeaderValue::from_str(&format!("Bearer {}", token)).unwrap(),
            );
        }
        let (ws, _) = connect_async(request).await?;
        Ok(Self { ws })
    }

    /// Connect and consume the `connected` ack
    async fn connect(addr: SocketAddr, token: &str) -> Self {
        let mut client = Self::try_connect(addr, Some(token)).await.unwrap();
        let ack = client.recv().await;
        assert_eq!(ack["type"], "connected");
        client
    }

    async fn send(&mut self, frame: Value) {
        self.ws.send(Message::Text(frame.to_string())).await.unwrap();
    }

    async fn recv(&mut self) -> Value {
        loop {
            let frame = tokio::time::timeout(RECV_TIMEOUT, self.ws.next())
                .await
                .expect("timed out waiting for a frame")
                .expect("stream ended")
                .expect("websocket error");
            if let Message::Text(text) = frame {
                return serde_json::from_str(&text).unwrap();
            }
        }
    }

    /// Assert nothing arrives within a short window
    async fn expect_silence(&mut self) {
        let next = tokio::time::timeout(Duration::from_millis(200), self.ws.next()).await;
        assert!(next.is_err(), "unexpected frame: {:?}", next);
    }

    async fn join(&mut self, session_id: &str) -> Value {
        self.send(json!({"type": "join-room", "sessionId": session_id}))
            .await;
        self.recv().await
    }

    async fn close(mut self) {
        self.ws.close(None).await.unwrap();
    }
}

fn handshake_status(result: Result<Client, WsError>) -> u16 {
    match result {
        Err(WsError::Http(response)) => response.status().as_u16(),
        Err(e) => panic!("unexpected error: {}", e),
        Ok(_) => panic!("handshake unexpectedly succeeded"),
    }
}

#[tokio::test]
async fn test_missing_token_is_rejected_with_401() {
    let (addr, gateway) = start_default().await;

    assert_eq!(handshake_status(Client::try_connect(addr, None).await), 401);
    assert_eq!(gateway.presence().connection_count(), 0);
}

#[tokio::test]
async fn test_invalid_token_is_rejected_with_403() {
    let (addr, gateway) = start_default().await;

    assert_eq!(
        handshake_status(Client::try_connect(addr, Some("forged")).await),
        403
    );
    assert_eq!(gateway.presence().connection_count(), 0);
}

#[tokio::test]
async fn test_connected_ack_carries_user_id() {
    let (addr, _gateway) = start_default().await;

    let mut client = Client::try_connect(addr, Some("tok-doctor")).await.unwrap();
    assert_eq!(client.recv().await, json!({"type": "connected", "userId": "U1"}));
}

#[tokio::test]
async fn test_two_party_negotiation() {
    let (addr, _gateway) = start_default().await;
    let mut doctor = Client::connect(addr, "tok-doctor").await;
    let mut patient = Client::connect(addr, "tok-patient").await;

    assert_eq!(
        doctor.join("C123").await,
        json!({"type": "joined-room", "sessionId": "C123", "participantCount": 1})
    );
    assert_eq!(
        patient.join("C123").await,
        json!({"type": "joined-room", "sessionId": "C123", "participantCount": 2})
    );
    assert_eq!(
        doctor.recv().await,
        json!({"type": "user-joined", "sessionId": "C123", "userId": "U2", "role": "patient"})
    );

    let offer = json!({"type": "offer", "sdp": "v=0\r\no=- 1 2 IN IP4 127.0.0.1\r\n"});
    doctor
        .send(json!({"type": "offer", "sessionId": "C123", "targetUserId": "U2", "offer": offer}))
        .await;
    assert_eq!(
        patient.recv().await,
        json!({"type": "offer", "sessionId": "C123", "fromUserId": "U1", "offer": offer})
    );

    let answer = json!({"type": "answer", "sdp": "v=0\r\n"});
    patient
        .send(json!({"type": "answer", "sessionId": "C123", "targetUserId": "U1", "answer": answer}))
        .await;
    assert_eq!(
        doctor.recv().await,
        json!({"type": "answer", "sessionId": "C123", "fromUserId": "U2", "answer": answer})
    );

    let candidate = json!({"candidate": "candidate:1 1 UDP 2122 10.0.0.2 5000 typ host", "sdpMLineIndex": 0});
    doctor
        .send(json!({"type": "ice-candidate", "sessionId": "C123", "targetUserId": "U2", "candidate": candidate}))
        .await;
    let forwarded = patient.recv().await;
    assert_eq!(forwarded["type"], "ice-candidate");
    assert_eq!(forwarded["fromUserId"], "U1");
    assert_eq!(forwarded["candidate"], candidate);
    assert!(forwarded.get("targetUserId").is_none());
}

#[tokio::test]
async fn test_unknown_target_is_reported_to_sender_only() {
    let (addr, _gateway) = start_default().await;
    let mut doctor = Client::connect(addr, "tok-doctor").await;
    let mut patient = Client::connect(addr, "tok-patient").await;
    doctor.join("C123").await;
    patient.join("C123").await;
    doctor.recv().await;

    doctor
        .send(json!({"type": "offer", "sessionId": "C123", "targetUserId": "U9", "offer": {}}))
        .await;
    assert_eq!(
        doctor.recv().await,
        json!({"type": "error", "error": "target user not found"})
    );
    patient.expect_silence().await;

    // the connection survives the error
    doctor.send(json!({"type": "ping"})).await;
    assert_eq!(doctor.recv().await, json!({"type": "pong"}));
}

#[tokio::test]
async fn test_signal_outside_membership_is_refused() {
    let (addr, _gateway) = start_default().await;
    let mut doctor = Client::connect(addr, "tok-doctor").await;
    let mut patient = Client::connect(addr, "tok-patient").await;
    patient.join("C123").await;

    doctor
        .send(json!({"type": "offer", "sessionId": "C123", "targetUserId": "U2", "offer": {}}))
        .await;
    assert_eq!(
        doctor.recv().await,
        json!({"type": "error", "error": "not in this room"})
    );
    patient.expect_silence().await;
}

#[tokio::test]
async fn test_disconnect_notifies_remaining_members() {
    let (addr, gateway) = start_default().await;
    let mut doctor = Client::connect(addr, "tok-doctor").await;
    let mut patient = Client::connect(addr, "tok-patient").await;
    doctor.join("C123").await;
    patient.join("C123").await;
    doctor.recv().await;

    doctor.close().await;
    assert_eq!(
        patient.recv().await,
        json!({"type": "user-left", "sessionId": "C123", "userId": "U1"})
    );

    let members: Vec<String> = gateway
        .registry()
        .members_of("C123")
        .iter()
        .map(|m| m.user_id().to_string())
        .collect();
    assert_eq!(members, vec!["U2"]);
}

#[tokio::test]
async fn test_last_leave_deletes_session() {
    let (addr, gateway) = start_default().await;
    let mut nurse = Client::connect(addr, "tok-nurse").await;
    nurse.join("C7").await;
    assert!(gateway.registry().contains("C7"));

    nurse.send(json!({"type": "leave-room"})).await;
    nurse.send(json!({"type": "ping"})).await;
    assert_eq!(nurse.recv().await, json!({"type": "pong"}));
    assert!(!gateway.registry().contains("C7"));

    // the next join starts the session afresh
    let mut doctor = Client::connect(addr, "tok-doctor").await;
    assert_eq!(
        doctor.join("C7").await,
        json!({"type": "joined-room", "sessionId": "C7", "participantCount": 1})
    );
    nurse.expect_silence().await;
}

#[tokio::test]
async fn test_malformed_frames_keep_connection_open() {
    let (addr, _gateway) = start_default().await;
    let mut client = Client::connect(addr, "tok-doctor").await;

    client.ws.send(Message::Text("{not json".to_string())).await.unwrap();
    assert_eq!(client.recv().await["type"], "error");

    client.send(json!({"type": "teleport"})).await;
    assert_eq!(
        client.recv().await,
        json!({"type": "error", "error": "unknown message type: teleport"})
    );

    client.ws.send(Message::Binary(vec![1, 2, 3])).await.unwrap();
    assert_eq!(client.recv().await["type"], "error");

    client.send(json!({"type": "ping"})).await;
    assert_eq!(client.recv().await, json!({"type": "pong"}));
}

#[tokio::test]
async fn test_capacity_limit_returns_503() {
    let config = GatewayConfig {
        max_connections: 1,
        ..GatewayConfig::default()
    };
    let (addr, _gateway) = start(config).await;
    let _first = Client::connect(addr, "tok-doctor").await;

    assert_eq!(
        handshake_status(Client::try_connect(addr, Some("tok-patient")).await),
        503
    );
}

#[tokio::test]
async fn test_capacity_holds_during_slow_verification() {
    let config = GatewayConfig {
        max_connections: 1,
        ..GatewayConfig::default()
    };
    let verifier = SlowVerifier {
        inner: verifier(),
        delay: Duration::from_millis(100),
    };
    let (addr, gateway) = start_with(config, Arc::new(verifier)).await;

    let attempts = (0..8).map(|_| Client::try_connect(addr, Some("tok-doctor")));
    let results = join_all(attempts).await;

    let accepted = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(accepted, 1);
    for result in results.into_iter().filter(|r| r.is_err()) {
        assert_eq!(handshake_status(result), 503);
    }
    assert!(gateway.presence().connection_count() <= 1);
}

#[tokio::test]
async fn test_rejected_handshake_releases_its_slot() {
    let config = GatewayConfig {
        max_connections: 1,
        ..GatewayConfig::default()
    };
    let (addr, gateway) = start(config).await;

    assert_eq!(
        handshake_status(Client::try_connect(addr, Some("forged")).await),
        403
    );
    let _client = Client::connect(addr, "tok-doctor").await;
    assert_eq!(gateway.presence().connection_count(), 1);
}

#[tokio::test]
async fn test_health_and_room_stats() {
    let (addr, _gateway) = start_default().await;
    let mut doctor = Client::connect(addr, "tok-doctor").await;
    doctor.join("C123").await;

    let health: Value = reqwest::get(format!("http://{}/health", addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["connections"], 1);
    assert_eq!(health["rooms"], 1);

    let rooms: Value = reqwest::get(format!("http://{}/rooms", addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(rooms["C123"]["participantCount"], 1);
    assert_eq!(rooms["C123"]["members"][0]["userId"], "U1");
}

#[tokio::test]
async fn test_room_stats_can_be_hidden() {
    let config = GatewayConfig {
        expose_room_stats: false,
        ..GatewayConfig::default()
    };
    let (addr, _gateway) = start(config).await;

    let response = reqwest::get(format!("http://{}/rooms", addr)).await.unwrap();
    assert_eq!(response.status().as_u16(), 404);
}
