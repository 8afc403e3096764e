//! End-to-end tests for the bot side: command dispatch over real events and
//! the inbound WebSocket transport.

mod common;

use async_trait::async_trait;
use common::TestServer;
use futures::{SinkExt, StreamExt};
use ponte_server::bot::{BotTransport, CommandDispatcher, EventHandler};
use ponte_server::config::BotSettings;
use ponte_server::sso::SsoClient;
use ponte_server::store::{BindingStore, NewPendingAuth, PendingStore, SourceKind};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

fn message_event(user_id: i64, text: &str) -> serde_json::Value {
    serde_json::json!({
        "post_type": "message",
        "message_type": "private",
        "user_id": user_id,
        "message": text,
    })
}

fn group_message_event(user_id: i64, group_id: i64, text: &str) -> serde_json::Value {
    serde_json::json!({
        "post_type": "message",
        "message_type": "group",
        "user_id": user_id,
        "group_id": group_id,
        "message": text,
    })
}

/// Dispatcher wired against the test store, with a transport that has no
/// connections (replies are dropped, store effects still happen).
async fn make_dispatcher(server: &TestServer) -> Arc<CommandDispatcher> {
    let transport = BotTransport::new(
        BotSettings {
            ws_client_enabled: false,
            ws_server_enabled: false,
            ..Default::default()
        },
        CancellationToken::new(),
    );
    let sso = Arc::new(SsoClient::new(server.config.sso.clone()).unwrap());
    CommandDispatcher::new(
        server.config.clone(),
        server.store.clone(),
        transport,
        sso,
    )
}

fn seed_pending_auth(server: &TestServer, verification_code: &str, auth_code: &str) -> i64 {
    server
        .store
        .create_pending_auth(NewPendingAuth {
            verification_code: verification_code.to_string(),
            auth_code: auth_code.to_string(),
            client_id: common::TEST_CLIENT_ID.to_string(),
            redirect_uri: common::TEST_REDIRECT_URI.to_string(),
            scope: "openid uin".to_string(),
            state: None,
            code_challenge: None,
            code_challenge_method: None,
            nonce: None,
            client_ip: None,
            user_agent: None,
            expires_in_secs: 300,
        })
        .unwrap()
        .id
}

#[tokio::test]
async fn test_auth_command_claims_and_approves() {
    let server = TestServer::spawn().await;
    let user = server.bind_user(10001, "u-42");
    let dispatcher = make_dispatcher(&server).await;
    let pending_id = seed_pending_auth(&server, "K7M3Q2", "AC");

    // The code is typed lower-case in chat.
    dispatcher
        .handle_event(message_event(10001, "/sso auth k7m3q2"))
        .await;

    let pending = server
        .store
        .get_pending_auth_by_verification_code("K7M3Q2", false)
        .unwrap()
        .unwrap();
    assert_eq!(pending.id, pending_id);
    assert_eq!(pending.uin, 10001);
    assert_eq!(pending.bind_user_id, user.id);
    assert!(pending.is_approved);
    assert!(!pending.is_used);
}

#[tokio::test]
async fn test_auth_command_requires_binding() {
    let server = TestServer::spawn().await;
    let dispatcher = make_dispatcher(&server).await;
    seed_pending_auth(&server, "K7M3Q2", "AC");

    dispatcher
        .handle_event(message_event(10001, "/sso auth K7M3Q2"))
        .await;

    let pending = server
        .store
        .get_pending_auth_by_verification_code("K7M3Q2", false)
        .unwrap()
        .unwrap();
    assert_eq!(pending.uin, 0);
    assert!(!pending.is_approved);
}

#[tokio::test]
async fn test_auth_command_rejects_foreign_claim() {
    let server = TestServer::spawn().await;
    let first = server.bind_user(10001, "u-42");
    server.bind_user(10002, "u-43");
    let dispatcher = make_dispatcher(&server).await;
    let pending_id = seed_pending_auth(&server, "K7M3Q2", "AC");

    // First user claims but we hold approval back by claiming directly.
    assert!(server
        .store
        .claim_pending_auth(pending_id, 10001, first.id)
        .unwrap());

    // Second user cannot approve someone else's request.
    dispatcher
        .handle_event(message_event(10002, "/sso auth K7M3Q2"))
        .await;

    let pending = server
        .store
        .get_pending_auth_by_verification_code("K7M3Q2", false)
        .unwrap()
        .unwrap();
    assert_eq!(pending.uin, 10001);
    assert!(!pending.is_approved);
}

#[tokio::test]
async fn test_unbind_flow_with_confirm() {
    let server = TestServer::spawn().await;
    let user = server.bind_user(10001, "u-42");
    let dispatcher = make_dispatcher(&server).await;

    dispatcher
        .handle_event(message_event(10001, "/sso unbind alice"))
        .await;
    let pending = server.store.get_pending_unbind_by_uin(10001).unwrap();
    assert!(pending.is_some());

    dispatcher
        .handle_event(message_event(10001, "/sso unbind confirm"))
        .await;

    assert!(server
        .store
        .get_bind_user_by_uin(10001, true)
        .unwrap()
        .is_none());
    assert!(server.store.get_pending_unbind_by_uin(10001).unwrap().is_none());

    // The issued binding row survives for audit, inactive.
    let row = server
        .store
        .get_bind_user_by_uin(10001, false)
        .unwrap()
        .unwrap();
    assert_eq!(row.id, user.id);
    assert!(!row.is_active);
}

#[tokio::test]
async fn test_unbind_rejects_mismatched_username() {
    let server = TestServer::spawn().await;
    server.bind_user(10001, "u-42");
    let dispatcher = make_dispatcher(&server).await;

    dispatcher
        .handle_event(message_event(10001, "/sso unbind somebody-else"))
        .await;
    assert!(server.store.get_pending_unbind_by_uin(10001).unwrap().is_none());

    // Matching the sub exactly works too.
    dispatcher
        .handle_event(message_event(10001, "/sso unbind u-42"))
        .await;
    assert!(server.store.get_pending_unbind_by_uin(10001).unwrap().is_some());
}

#[tokio::test]
async fn test_cancel_clears_pending_unbind() {
    let server = TestServer::spawn().await;
    server.bind_user(10001, "u-42");
    let dispatcher = make_dispatcher(&server).await;

    dispatcher
        .handle_event(message_event(10001, "/sso unbind alice"))
        .await;
    dispatcher
        .handle_event(message_event(10001, "/sso cancel"))
        .await;

    assert!(server.store.get_pending_unbind_by_uin(10001).unwrap().is_none());
    // The binding is untouched.
    assert!(server
        .store
        .get_bind_user_by_uin(10001, true)
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_group_allow_list_drops_other_groups() {
    let server = TestServer::spawn().await;
    server.bind_user(10001, "u-42");

    // Rebuild the dispatcher with an allow-list.
    let mut config = (*server.config).clone();
    config.bot.allowed_groups = vec![555];
    let config = Arc::new(config);
    let transport = BotTransport::new(
        BotSettings {
            ws_client_enabled: false,
            ws_server_enabled: false,
            ..Default::default()
        },
        CancellationToken::new(),
    );
    let sso = Arc::new(SsoClient::new(config.sso.clone()).unwrap());
    let dispatcher =
        CommandDispatcher::new(config, server.store.clone(), transport, sso);

    seed_pending_auth(&server, "K7M3Q2", "AC");

    // Message from a group outside the allow-list is silently dropped.
    dispatcher
        .handle_event(group_message_event(10001, 999, "/sso auth K7M3Q2"))
        .await;
    let pending = server
        .store
        .get_pending_auth_by_verification_code("K7M3Q2", false)
        .unwrap()
        .unwrap();
    assert!(!pending.is_approved);

    // Same command from the allowed group goes through.
    dispatcher
        .handle_event(group_message_event(10001, 555, "/sso auth K7M3Q2"))
        .await;
    let pending = server
        .store
        .get_pending_auth_by_verification_code("K7M3Q2", false)
        .unwrap()
        .unwrap();
    assert!(pending.is_approved);
}

// ============================================================================
// Inbound WebSocket transport
// ============================================================================

struct Recorder(Mutex<Vec<serde_json::Value>>);

#[async_trait]
impl EventHandler for Recorder {
    async fn handle_event(&self, event: serde_json::Value) {
        self.0.lock().await.push(event);
    }
}

async fn free_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

fn server_transport(port: u16, access_token: &str) -> Arc<BotTransport> {
    BotTransport::new(
        BotSettings {
            ws_client_enabled: false,
            ws_server_enabled: true,
            ws_server_host: "127.0.0.1".to_string(),
            ws_server_port: port,
            ws_server_access_token: access_token.to_string(),
            ..Default::default()
        },
        CancellationToken::new(),
    )
}

async fn connect_with_token(
    port: u16,
    token: Option<&str>,
) -> tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
> {
    let url = format!("ws://127.0.0.1:{}", port);
    // The listener may not be up yet right after start().
    for attempt in 0..50 {
        let mut request = url.as_str().into_client_request().unwrap();
        if let Some(token) = token {
            request.headers_mut().insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {}", token)).unwrap(),
            );
        }
        match connect_async(request).await {
            Ok((ws, _)) => return ws,
            Err(_) if attempt < 49 => {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            Err(e) => panic!("failed to connect to bot server: {}", e),
        }
    }
    unreachable!()
}

#[tokio::test]
async fn test_inbound_peer_events_reach_handler() {
    let port = free_port().await;
    let transport = server_transport(port, "sekrit");
    let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
    let _tasks = transport.start(recorder.clone());

    let mut ws = connect_with_token(port, Some("sekrit")).await;
    ws.send(Message::Text(
        message_event(10001, "/sso help").to_string().into(),
    ))
    .await
    .unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    let events = recorder.0.lock().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["user_id"], 10001);
}

#[tokio::test]
async fn test_inbound_peer_with_bad_token_gets_4001() {
    let port = free_port().await;
    let transport = server_transport(port, "sekrit");
    let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
    let _tasks = transport.start(recorder);

    let mut ws = connect_with_token(port, Some("wrong")).await;
    // The server completes the handshake and then closes with 4001.
    match ws.next().await {
        Some(Ok(Message::Close(Some(frame)))) => {
            assert_eq!(u16::from(frame.code), 4001);
        }
        other => panic!("expected close frame, got {:?}", other),
    }
}

#[tokio::test]
async fn test_call_api_round_trip_over_inbound_peer() {
    let port = free_port().await;
    let transport = server_transport(port, "");
    let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
    let _tasks = transport.start(recorder);

    let mut ws = connect_with_token(port, None).await;
    // Give the server a moment to register the peer.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let transport_for_call = transport.clone();
    let call = tokio::spawn(async move {
        transport_for_call
            .send_message(SourceKind::Private, 10001, "hello")
            .await
    });

    // Act as the OneBot peer: read the RPC and echo a response.
    let request = loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => {
                break serde_json::from_str::<serde_json::Value>(text.as_str()).unwrap()
            }
            Some(Ok(_)) => continue,
            other => panic!("expected RPC frame, got {:?}", other),
        }
    };
    assert_eq!(request["action"], "send_private_msg");
    assert_eq!(request["params"]["user_id"], 10001);
    assert_eq!(request["params"]["message"], "hello");
    let echo = request["echo"].as_str().unwrap();
    assert!(echo.starts_with("send_private_msg_"));

    let response = serde_json::json!({
        "status": "ok",
        "retcode": 0,
        "echo": echo,
    });
    ws.send(Message::Text(response.to_string().into()))
        .await
        .unwrap();

    let result = call.await.unwrap().expect("RPC should resolve");
    assert_eq!(result["status"], "ok");
}
