//! Integration tests for the HTTP surface together with channel-backed sockets.

use axum::body::{to_bytes, Body};
use axum::extract::ConnectInfo;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use chat_api::router;
use chat_core::{ChatContext, Config, Identity, Role, ServerEvent, MAX_MESSAGE_LENGTH};
use chat_messaging::{handle_frame, MessagingService, API_USER_ID};
use serde_json::{json, Value};
use std::net::SocketAddr;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tower::ServiceExt;

fn test_app(config: Config) -> (MessagingService, Router) {
    let service = MessagingService::new(ChatContext::new(config));
    let app = router(service.clone());
    (service, app)
}

fn attach(service: &MessagingService, socket_id: &str, user_id: &str, name: &str) -> UnboundedReceiver<ServerEvent> {
    let (tx, mut rx) = unbounded_channel();
    let identity = Identity {
        user_id: user_id.to_string(),
        role: Role::Buyer,
        name: name.to_string(),
    };
    service
        .connect(socket_id, &identity, Some("127.0.0.1".to_string()), tx)
        .expect("connect");
    // Discard the online_users snapshot.
    assert!(matches!(rx.try_recv(), Ok(ServerEvent::OnlineUsers(_))));
    rx
}

async fn call(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.expect("request");
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("json body")
    };
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_end_to_end_conversation() {
    let (service, app) = test_app(Config::default());
    let mut alice = attach(&service, "socket-a", "user-1", "Sarah Johnson");
    let mut bob = attach(&service, "socket-b", "agent-1", "Emily Rodriguez");

    handle_frame(
        &service,
        "socket-a",
        r#"{"event":"join_conversation","data":{"conversationId":"conv-1"}}"#,
    );
    handle_frame(
        &service,
        "socket-b",
        r#"{"event":"send_message","data":{"conversationId":"conv-1","content":"hello"}}"#,
    );

    match alice.try_recv() {
        Ok(ServerEvent::NewMessage(message)) => {
            assert_eq!(message.content, "hello");
            assert_eq!(message.sender_id, "agent-1");
        }
        other => panic!("expected new_message, got {:?}", other),
    }
    match bob.try_recv() {
        Ok(ServerEvent::MessageSent(sent)) => assert!(sent.success),
        other => panic!("expected message_sent, got {:?}", other),
    }
    assert!(bob.try_recv().is_err());

    let (status, body) = call(&app, get("/api/messages/conv-1")).await;
    assert_eq!(status, StatusCode::OK);
    let messages = body["messages"].as_array().unwrap();
    assert_eq!(messages.last().unwrap()["content"], "hello");
    assert_eq!(body["pagination"]["hasMore"], false);
}

#[tokio::test]
async fn test_unknown_conversation_returns_empty_list() {
    let (_service, app) = test_app(Config::default());
    let (status, body) = call(&app, get("/api/messages/nope?page=abc&limit=-1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["messages"], json!([]));
    assert_eq!(body["pagination"]["page"], 1);
    assert_eq!(body["pagination"]["limit"], 50);
}

#[tokio::test]
async fn test_message_pagination_over_rest() {
    let (_service, app) = test_app(Config::default());
    let (status, body) = call(&app, get("/api/messages/conv-1?page=1&limit=2")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["messages"].as_array().unwrap().len(), 2);
    assert_eq!(body["pagination"]["total"], 3);
    assert_eq!(body["pagination"]["hasMore"], true);
    assert_eq!(
        body["messages"][1]["content"],
        "Thursday afternoon would be perfect."
    );
}

#[tokio::test]
async fn test_post_message_validation() {
    let (service, app) = test_app(Config::default());
    let mut listener = attach(&service, "socket-a", "user-2", "Michael Chen");
    handle_frame(
        &service,
        "socket-a",
        r#"{"event":"join_conversation","data":{"conversationId":"conv-2"}}"#,
    );

    let (status, body) = call(&app, post_json("/api/messages/conv-2", json!({"content": "   "}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let too_long = "z".repeat(MAX_MESSAGE_LENGTH + 1);
    let (status, _) = call(&app, post_json("/api/messages/conv-2", json!({"content": too_long}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(listener.try_recv().is_err());

    let (status, body) = call(
        &app,
        post_json("/api/messages/conv-2", json!({"content": " Offer accepted ", "type": "text"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["message"]["senderId"], API_USER_ID);
    assert_eq!(body["message"]["content"], "Offer accepted");

    assert!(matches!(listener.try_recv(), Ok(ServerEvent::NewMessage(_))));
}

#[tokio::test]
async fn test_conversations_join_participants() {
    let (service, app) = test_app(Config::default());
    let _rx = attach(&service, "socket-a", "user-1", "Sarah Johnson");

    let (status, body) = call(&app, get("/api/conversations")).await;
    assert_eq!(status, StatusCode::OK);
    let conversations = body["conversations"].as_array().unwrap();
    assert_eq!(conversations.len(), 3);

    let conv1 = conversations
        .iter()
        .find(|c| c["id"] == "conv-1")
        .expect("conv-1");
    assert_eq!(conv1["unreadCount"], 0);
    let participants = conv1["participants"].as_array().unwrap();
    assert_eq!(participants.len(), 2);
    let sarah = participants.iter().find(|p| p["id"] == "user-1").unwrap();
    assert_eq!(sarah["isOnline"], true);
    assert_eq!(sarah["role"], "buyer");
}

#[tokio::test]
async fn test_rate_limit_applies_to_api_only() {
    let mut config = Config::default();
    config.rate_limit.max_requests = 2;
    let (_service, app) = test_app(config);

    for _ in 0..2 {
        let (status, _) = call(&app, get("/api/conversations")).await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, body) = call(&app, get("/api/messages/conv-1")).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert!(body["retryAfter"].as_u64().unwrap() > 0);

    let (status, body) = call(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    let (status, _) = call(&app, get("/metrics")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_metrics_track_connections() {
    let (service, app) = test_app(Config::default());
    let _a = attach(&service, "socket-a", "user-1", "Sarah Johnson");
    let _b = attach(&service, "socket-b", "user-1", "Sarah Johnson");
    let _c = attach(&service, "socket-c", "agent-2", "David Kim");

    let (_, body) = call(&app, get("/metrics")).await;
    assert_eq!(body["activeConnections"], 3);
    assert_eq!(body["onlineUsers"], 2);
    assert_eq!(body["totalConversations"], 3);
    assert_eq!(body["totalMessages"], 6);

    service.disconnect("socket-c", "transport close");
    let (_, body) = call(&app, get("/health")).await;
    assert_eq!(body["connections"], 2);
}

#[tokio::test]
async fn test_cors_allows_each_configured_origin() {
    let mut config = Config::default();
    config.server.cors_origins = Some(vec![
        "http://a.example".to_string(),
        "http://b.example".to_string(),
    ]);
    let (_service, app) = test_app(config);

    for origin in ["http://a.example", "http://b.example"] {
        let request = Request::builder()
            .uri("/health")
            .header(header::ORIGIN, origin)
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.expect("request");
        assert_eq!(
            response.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
            origin
        );
    }

    let request = Request::builder()
        .uri("/health")
        .header(header::ORIGIN, "http://evil.example")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.expect("request");
    assert!(response.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
}

fn from_peer(uri: &str, forwarded_for: &str) -> Request<Body> {
    let peer: SocketAddr = "192.0.2.10:40000".parse().unwrap();
    Request::builder()
        .uri(uri)
        .header("x-forwarded-for", forwarded_for)
        .extension(ConnectInfo(peer))
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_rotating_forwarded_header_keeps_peer_budget() {
    let mut config = Config::default();
    config.rate_limit.max_requests = 2;
    let (_service, app) = test_app(config);

    let mut statuses = Vec::new();
    for i in 0..4 {
        let (status, _) = call(&app, from_peer("/api/conversations", &format!("10.9.9.{}", i))).await;
        statuses.push(status);
    }
    assert_eq!(
        statuses,
        vec![
            StatusCode::OK,
            StatusCode::OK,
            StatusCode::TOO_MANY_REQUESTS,
            StatusCode::TOO_MANY_REQUESTS,
        ]
    );
}

#[tokio::test]
async fn test_trusted_proxy_keys_on_forwarded_address() {
    let mut config = Config::default();
    config.rate_limit.max_requests = 1;
    config.server.trust_proxy = true;
    let (_service, app) = test_app(config);

    let (status, _) = call(&app, from_peer("/api/conversations", "203.0.113.1")).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = call(&app, from_peer("/api/conversations", "203.0.113.2")).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = call(&app, from_peer("/api/conversations", "203.0.113.1")).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_post_message_rejects_malformed_body() {
    let (_service, app) = test_app(Config::default());

    let (status, body) = call(&app, post_json("/api/messages/conv-1", json!({"content": 5}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().starts_with("Invalid request body"));

    let request = Request::builder()
        .method("POST")
        .uri("/api/messages/conv-1")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, body) = call(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let request = Request::builder()
        .method("POST")
        .uri("/api/messages/conv-1")
        .body(Body::from(r#"{"content":"hi"}"#))
        .unwrap();
    let (status, body) = call(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let (_, body) = call(&app, get("/api/messages/conv-1")).await;
    assert_eq!(body["pagination"]["total"], 3);
}

#[tokio::test]
async fn test_ws_handshake_refusals() {
    let mut config = Config::default();
    config.websocket.max_connections_per_user = 1;
    let (service, app) = test_app(config);

    let (status, body) = call(&app, get("/ws")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, json!({"error": "Authentication required"}));

    // An unverifiable token falls back to the demo user, who is already at the cap.
    let _rx = attach(&service, "socket-demo", "demo-user", "Demo User");
    let (status, body) = call(&app, get("/ws?token=not-a-jwt")).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body, json!({"error": "Too many connections"}));
}
