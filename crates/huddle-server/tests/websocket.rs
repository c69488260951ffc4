//! End-to-end tests against a server bound to an ephemeral port.

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use futures_util::{SinkExt, StreamExt};
use huddle_core::InMemoryMessageStore;
use huddle_protocol::{decode, Envelope, EnvelopeKind};
use huddle_server::auth::JwtAuthenticator;
use huddle_server::config::Config;
use huddle_server::handlers::{router, serve, AppState};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tower::ServiceExt;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestServer {
    addr: SocketAddr,
    state: Arc<AppState>,
    jwt: JwtAuthenticator,
    store: Arc<InMemoryMessageStore>,
}

impl TestServer {
    async fn start() -> Self {
        let config = Config::default();
        let jwt = JwtAuthenticator::from_config(&config.auth);
        let store = Arc::new(InMemoryMessageStore::new());
        let state = AppState::with_collaborators(
            config.clone(),
            Arc::new(JwtAuthenticator::from_config(&config.auth)),
            Arc::new(config.directory.build()),
            store.clone(),
        );

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, state.clone(), std::future::pending()));

        Self {
            addr,
            state,
            jwt,
            store,
        }
    }

    fn token(&self, user_id: u64, username: &str) -> String {
        self.jwt.mint(user_id, username).unwrap()
    }

    async fn connect(&self, user_id: u64, username: &str) -> Socket {
        let url = format!("ws://{}/ws?token={}", self.addr, self.token(user_id, username));
        let (socket, _) = connect_async(url).await.unwrap();
        socket
    }

    /// Issue a request against the routes sharing this server's hub.
    async fn http(
        &self,
        method: &str,
        path: &str,
        token: Option<&str>,
        body: &str,
    ) -> (StatusCode, serde_json::Value) {
        let mut request = Request::builder()
            .method(method)
            .uri(path)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            request = request.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = request.body(Body::from(body.to_string())).unwrap();

        let response = router(self.state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }
}

async fn send(socket: &mut Socket, json: &str) {
    socket.send(Message::Text(json.to_string())).await.unwrap();
}

/// Read envelopes until one matches, skipping everything else.
async fn expect<F>(socket: &mut Socket, mut matches: F) -> Envelope
where
    F: FnMut(&Envelope) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match socket.next().await {
                Some(Ok(Message::Text(text))) => {
                    let envelope = decode(text.as_bytes()).unwrap();
                    if matches(&envelope) {
                        return envelope;
                    }
                }
                Some(Ok(_)) => {}
                other => panic!("connection ended: {:?}", other),
            }
        }
    })
    .await
    .expect("timed out waiting for envelope")
}

async fn join(socket: &mut Socket, room: u64) {
    send(socket, &format!(r#"{{"type":"join","room_id":{}}}"#, room)).await;
    expect(socket, |e| {
        e.kind == EnvelopeKind::System && e.room() == Some(room) && e.content_str() == "joined room"
    })
    .await;
}

#[tokio::test]
async fn test_refuses_missing_and_invalid_tokens() {
    let server = TestServer::start().await;

    for url in [
        format!("ws://{}/ws", server.addr),
        format!("ws://{}/ws?token=garbage", server.addr),
    ] {
        match connect_async(url).await {
            Err(tungstenite::Error::Http(response)) => assert_eq!(response.status(), 401),
            other => panic!("expected 401, got {:?}", other.map(|(_, r)| r.status())),
        }
    }
}

#[tokio::test]
async fn test_join_text_and_typing() {
    let server = TestServer::start().await;
    let mut alice = server.connect(1, "alice").await;
    let mut bob = server.connect(2, "bob").await;

    join(&mut alice, 7).await;
    join(&mut bob, 7).await;

    let announce = expect(&mut alice, |e| e.content_str() == "bob joined the room").await;
    assert_eq!(announce.user_id, Some(2));

    let roster = expect(&mut alice, |e| {
        e.kind == EnvelopeKind::UserList && e.users.as_ref().map_or(0, Vec::len) == 2
    })
    .await;
    assert_eq!(roster.room(), Some(7));

    // Claimed identity is replaced by the authenticated one
    send(
        &mut bob,
        r#"{"type":"text","room_id":7,"content":"hi all","user_id":99,"username":"mallory"}"#,
    )
    .await;

    let received = expect(&mut alice, |e| e.kind == EnvelopeKind::Text).await;
    assert_eq!(received.content_str(), "hi all");
    assert_eq!(received.user_id, Some(2));
    assert_eq!(received.username.as_deref(), Some("bob"));
    let message_id = received.message_id.expect("stored text carries an id");

    let echo = expect(&mut bob, |e| e.kind == EnvelopeKind::Text).await;
    assert_eq!(echo.message_id, Some(message_id));

    let history = server.store.history(7);
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].id, message_id);
    assert_eq!(history[0].user_id, 2);

    send(&mut alice, r#"{"type":"typing","room_id":7}"#).await;
    let typing = expect(&mut bob, |e| e.kind == EnvelopeKind::Typing).await;
    assert_eq!(typing.username.as_deref(), Some("alice"));
}

#[tokio::test]
async fn test_errors_reported_on_socket() {
    let server = TestServer::start().await;
    let mut alice = server.connect(1, "alice").await;

    send(&mut alice, "{not json").await;
    let malformed = expect(&mut alice, |e| e.kind == EnvelopeKind::Error).await;
    assert_eq!(malformed.code, Some(400));

    send(&mut alice, r#"{"type":"text","room_id":5,"content":"x"}"#).await;
    let forbidden = expect(&mut alice, |e| e.kind == EnvelopeKind::Error).await;
    assert_eq!(forbidden.code, Some(403));
    assert!(server.store.is_empty());

    send(&mut alice, r#"{"type":"ping"}"#).await;
    expect(&mut alice, |e| e.kind == EnvelopeKind::Pong).await;
}

#[tokio::test]
async fn test_stats_and_admin_broadcast() {
    let server = TestServer::start().await;
    let mut alice = server.connect(1, "alice").await;
    join(&mut alice, 3).await;

    let admin = server.token(100, "admin");

    let (status, body) = server.http("GET", "/ws/stats", Some(&admin), "").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["total_clients"], 1);
    assert_eq!(body["data"]["total_rooms"], 1);
    assert_eq!(body["data"]["room_clients"]["3"], 1);

    let (status, body) = server
        .http("POST", "/ws/broadcast/3", Some(&admin), r#"{"content":"maintenance at noon"}"#)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "broadcast queued");

    let notice = expect(&mut alice, |e| {
        e.kind == EnvelopeKind::System && e.content_str() == "maintenance at noon"
    })
    .await;
    assert_eq!(notice.room(), Some(3));
}

#[tokio::test]
async fn test_management_rejections() {
    let server = TestServer::start().await;
    let admin = server.token(100, "admin");

    let (status, body) = server.http("GET", "/ws/stats", None, "").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "missing token");

    let (status, body) = server
        .http("POST", "/ws/broadcast/3", Some("garbage"), r#"{"content":"x"}"#)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "invalid token");

    let (status, _) = server
        .http("POST", "/ws/broadcast/abc", Some(&admin), r#"{"content":"x"}"#)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = server
        .http("POST", "/ws/broadcast/3", Some(&admin), r#"{"content":"   "}"#)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], 400);
}

#[tokio::test]
async fn test_health() {
    let server = TestServer::start().await;
    let (status, body) = server.http("GET", "/health", None, "").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}
