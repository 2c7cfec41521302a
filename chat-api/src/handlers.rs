use axum::{
    extract::{rejection::JsonRejection, Extension, Path, Query},
    response::Json,
};
use chat_core::store::DEFAULT_PAGE_SIZE;
use chat_core::types::MessageKind;
use chat_messaging::MessagingService;
use chrono::Utc;
use serde::Deserialize;

use crate::error::ApiError;

pub async fn health(Extension(service): Extension<MessagingService>) -> Json<serde_json::Value> {
    let ctx = service.context();
    let state = ctx.state();

    Json(serde_json::json!({
        "status": "healthy",
        "service": "chat-api",
        "timestamp": Utc::now(),
        "uptimeSeconds": ctx.uptime_seconds(),
        "environment": ctx.config.server.environment,
        "connections": state.registry.active_count(),
        "users": state.store.user_count(),
        "conversations": state.store.conversation_count(),
        "messages": state.store.message_count(),
    }))
}

pub async fn metrics(Extension(service): Extension<MessagingService>) -> Json<serde_json::Value> {
    // Read before taking the state lock; expiring timers lock in the other order.
    let typing_indicators = service.typing_timers().armed_count();
    let ctx = service.context();
    let state = ctx.state();

    Json(serde_json::json!({
        "activeConnections": state.registry.active_count(),
        "onlineUsers": state.registry.online_user_count(),
        "totalUsers": state.store.user_count(),
        "totalConversations": state.store.conversation_count(),
        "totalMessages": state.store.message_count(),
        "typingIndicators": typing_indicators,
        "uptimeSeconds": ctx.uptime_seconds(),
        "timestamp": Utc::now(),
    }))
}

pub async fn get_conversations(
    Extension(service): Extension<MessagingService>,
) -> Json<serde_json::Value> {
    let conversations = service.context().state().store.list_conversations();
    Json(serde_json::json!({ "conversations": conversations }))
}

/// Page parameters are parsed leniently; garbage falls back to the defaults.
#[derive(Debug, Default, Deserialize)]
pub struct MessagesQuery {
    #[serde(default)]
    pub page: Option<String>,
    #[serde(default)]
    pub limit: Option<String>,
}

pub async fn get_messages(
    Extension(service): Extension<MessagingService>,
    Path(conversation_id): Path<String>,
    Query(params): Query<MessagesQuery>,
) -> Json<serde_json::Value> {
    let page = parse_number(params.page.as_deref()).unwrap_or(1);
    let limit = parse_number(params.limit.as_deref()).unwrap_or(DEFAULT_PAGE_SIZE);

    let result = service
        .context()
        .state()
        .store
        .list_messages(&conversation_id, page, limit);

    Json(serde_json::json!({
        "messages": result.messages,
        "pagination": {
            "page": result.page,
            "limit": result.limit,
            "total": result.total,
            "hasMore": result.has_more,
        },
    }))
}

#[derive(Debug, Deserialize)]
pub struct PostMessageRequest {
    #[serde(default)]
    pub content: String,
    #[serde(default, rename = "type")]
    pub kind: Option<MessageKind>,
}

pub async fn post_message(
    Extension(service): Extension<MessagingService>,
    Path(conversation_id): Path<String>,
    body: Result<Json<PostMessageRequest>, JsonRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Json(req) = body?;
    let message = service.post_message(&conversation_id, &req.content, req.kind)?;
    Ok(Json(serde_json::json!({ "success": true, "message": message })))
}

fn parse_number(raw: Option<&str>) -> Option<usize> {
    raw?.trim().parse().ok()
}
