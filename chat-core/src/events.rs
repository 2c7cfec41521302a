//! Socket wire protocol.
//!
//! Every frame is a JSON text frame of the form `{"event": <name>, "data": <payload>}`.
//! Events without a payload (`ping`, `pong`) omit `data`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ChatError;
use crate::types::{Message, MessageKind, UserSummary};

/// Events a client may send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    SendMessage(SendMessagePayload),
    JoinConversation(ConversationRef),
    LeaveConversation(ConversationRef),
    TypingStart(ConversationRef),
    TypingStop(ConversationRef),
    Ping,
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::SendMessage(_) => "send_message",
            ClientEvent::JoinConversation(_) => "join_conversation",
            ClientEvent::LeaveConversation(_) => "leave_conversation",
            ClientEvent::TypingStart(_) => "typing_start",
            ClientEvent::TypingStop(_) => "typing_stop",
            ClientEvent::Ping => "ping",
        }
    }

    /// Parse one inbound text frame.
    pub fn parse(frame: &str) -> Result<Self, ChatError> {
        serde_json::from_str(frame).map_err(|e| ChatError::InvalidPayload(e.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessagePayload {
    #[serde(default)]
    pub conversation_id: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, rename = "type")]
    pub kind: Option<MessageKind>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRef {
    #[serde(default)]
    pub conversation_id: String,
}

impl ConversationRef {
    pub fn new(conversation_id: impl Into<String>) -> Self {
        ConversationRef {
            conversation_id: conversation_id.into(),
        }
    }

    /// The referenced id, rejecting blank ones.
    pub fn id(&self) -> Result<&str, ChatError> {
        let id = self.conversation_id.trim();
        if id.is_empty() {
            return Err(ChatError::MissingConversationId);
        }
        Ok(id)
    }
}

/// Events the server emits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    OnlineUsers(Vec<UserSummary>),
    NewMessage(Message),
    MessageSent(MessageSent),
    UserTyping(UserTyping),
    UserStatusChange(UserStatusChange),
    Error(ErrorPayload),
    Pong,
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error(ErrorPayload {
            message: message.into(),
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::OnlineUsers(_) => "online_users",
            ServerEvent::NewMessage(_) => "new_message",
            ServerEvent::MessageSent(_) => "message_sent",
            ServerEvent::UserTyping(_) => "user_typing",
            ServerEvent::UserStatusChange(_) => "user_status_change",
            ServerEvent::Error(_) => "error",
            ServerEvent::Pong => "pong",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSent {
    pub success: bool,
    pub message: Message,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserTyping {
    pub user_id: String,
    pub user_name: String,
    pub is_typing: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStatusChange {
    pub user_id: String,
    pub is_online: bool,
    pub last_seen: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
}
