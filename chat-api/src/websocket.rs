use axum::{
    extract::{
        ws::{
            close_code, rejection::WebSocketUpgradeRejection, CloseFrame, Message, WebSocket,
            WebSocketUpgrade,
        },
        ConnectInfo, Extension, Query,
    },
    http::{header::AUTHORIZATION, HeaderMap},
    response::{IntoResponse, Response},
};
use chat_core::{Identity, ServerEvent};
use chat_messaging::{handle_frame, MessagingService};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::net::SocketAddr;
use tokio::sync::mpsc;
use tracing;
use uuid::Uuid;

use crate::auth;

#[derive(Debug, Default, Deserialize)]
pub struct WsQuery {
    #[serde(default)]
    token: Option<String>,
}

/// GET /ws
///
/// Authentication happens before the upgrade so a refused client never gets
/// a socket, and is answered with a JSON error even if the upgrade request
/// itself is malformed.
pub async fn websocket_handler(
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    Extension(service): Extension<MessagingService>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    connect_info: Option<ConnectInfo<SocketAddr>>,
) -> Response {
    let auth_header = headers.get(AUTHORIZATION).and_then(|h| h.to_str().ok());

    let identity = match auth::authenticate(service.context(), query.token.as_deref(), auth_header) {
        Ok(identity) => identity,
        Err(e) => {
            tracing::warn!("WebSocket handshake refused: {}", e);
            return e.into_response();
        }
    };

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    let trust_proxy = service.context().config.server.trust_proxy;
    let ip = client_ip(&headers, connect_info.map(|ConnectInfo(addr)| addr), trust_proxy);
    ws.on_upgrade(move |socket| handle_socket(socket, service, identity, ip))
}

/// The peer address, or the first `X-Forwarded-For` hop when the proxy in
/// front of us is trusted to set it.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>, trust_proxy: bool) -> Option<String> {
    let forwarded = if trust_proxy {
        headers
            .get("x-forwarded-for")
            .and_then(|h| h.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    } else {
        None
    };
    forwarded.or_else(|| peer.map(|addr| addr.ip().to_string()))
}

async fn handle_socket(
    socket: WebSocket,
    service: MessagingService,
    identity: Identity,
    ip: Option<String>,
) {
    let socket_id = Uuid::new_v4().to_string();
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();

    if let Err(e) = service.connect(&socket_id, &identity, ip, tx) {
        // Lost a race against another upgrade for the same user.
        tracing::warn!(user_id = %identity.user_id, "Refusing socket after upgrade: {}", e);
        if let Ok(text) = serde_json::to_string(&ServerEvent::error(e.to_string())) {
            let _ = sender.send(Message::Text(text)).await;
        }
        let _ = sender
            .send(Message::Close(Some(CloseFrame {
                code: close_code::POLICY,
                reason: e.to_string().into(),
            })))
            .await;
        return;
    }

    let ws_config = service.context().config.websocket.clone();

    // Forward routed events to the socket and keep the transport heartbeat.
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(ws_config.heartbeat_interval());
        heartbeat.tick().await;

        loop {
            tokio::select! {
                event = rx.recv() => {
                    let Some(event) = event else { break };
                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(e) => {
                            tracing::error!("Failed to encode {} event: {}", event.name(), e);
                            continue;
                        }
                    };
                    if let Err(e) = sender.send(Message::Text(text)).await {
                        tracing::debug!("Failed to send WebSocket message: {}", e);
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if sender.send(Message::Ping(Vec::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let recv_service = service.clone();
    let recv_socket_id = socket_id.clone();
    let idle_timeout = service.context().config.websocket.connection_timeout();

    // Route inbound frames; any frame counts as liveness.
    let mut recv_task = tokio::spawn(async move {
        loop {
            let frame = match tokio::time::timeout(idle_timeout, receiver.next()).await {
                Err(_) => return "ping timeout",
                Ok(None) => return "transport close",
                Ok(Some(Err(e))) => {
                    tracing::debug!(socket_id = %recv_socket_id, "WebSocket receive error: {}", e);
                    return "transport error";
                }
                Ok(Some(Ok(frame))) => frame,
            };

            match frame {
                Message::Text(text) => handle_frame(&recv_service, &recv_socket_id, &text),
                Message::Binary(_) => {
                    recv_service.reply_error(&recv_socket_id, "Binary frames are not supported");
                }
                Message::Ping(_) | Message::Pong(_) => {
                    recv_service.touch(&recv_socket_id);
                }
                Message::Close(_) => return "client namespace disconnect",
            }
        }
    });

    // Wait for either task to complete
    let reason = tokio::select! {
        result = &mut recv_task => {
            send_task.abort();
            result.unwrap_or("transport error")
        }
        _ = &mut send_task => {
            recv_task.abort();
            "transport close"
        }
    };

    service.disconnect(&socket_id, reason);
}
