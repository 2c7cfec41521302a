use chrono::{DateTime, Utc};
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::{ChatError, ChatResult};
use crate::types::{
    Conversation, ConversationKind, ConversationSummary, Identity, Message, MessageKind,
    MessagePage, MessageStatus, User, UserSummary,
};

/// Upper bound on message content, in characters.
pub const MAX_MESSAGE_LENGTH: usize = 10_000;

pub const DEFAULT_PAGE_SIZE: usize = 50;
pub const MAX_PAGE_SIZE: usize = 100;

/// In-memory users, conversations and messages.
///
/// Messages live in a global map keyed by id; each conversation keeps the
/// ids of its messages in append order, which is also chronological order.
#[derive(Debug, Default)]
pub struct ConversationStore {
    users: HashMap<String, User>,
    conversations: HashMap<String, Conversation>,
    messages: HashMap<String, Message>,
    by_conversation: HashMap<String, Vec<String>>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_user(&mut self, user: User) {
        self.users.insert(user.id.clone(), user);
    }

    pub fn user(&self, user_id: &str) -> Option<&User> {
        self.users.get(user_id)
    }

    /// Make sure a connecting identity has a user record.
    pub fn upsert_identity(&mut self, identity: &Identity) -> &mut User {
        self.users
            .entry(identity.user_id.clone())
            .or_insert_with(|| User {
                id: identity.user_id.clone(),
                email: None,
                name: identity.name.clone(),
                role: identity.role,
                is_online: false,
                last_seen: None,
            })
    }

    pub fn set_presence(&mut self, user_id: &str, online: bool, at: DateTime<Utc>) -> Option<&User> {
        let user = self.users.get_mut(user_id)?;
        user.is_online = online;
        if !online {
            user.last_seen = Some(at);
        }
        Some(user)
    }

    pub fn online_users(&self) -> Vec<UserSummary> {
        let mut online: Vec<UserSummary> = self
            .users
            .values()
            .filter(|u| u.is_online)
            .map(UserSummary::from)
            .collect();
        online.sort_by(|a, b| a.id.cmp(&b.id));
        online
    }

    pub fn insert_conversation(&mut self, conversation: Conversation) {
        self.by_conversation
            .entry(conversation.id.clone())
            .or_default();
        self.conversations
            .insert(conversation.id.clone(), conversation);
    }

    pub fn conversation(&self, conversation_id: &str) -> Option<&Conversation> {
        self.conversations.get(conversation_id)
    }

    /// Validate, store and return a new message.
    ///
    /// A conversation id with no record gets a `direct` conversation whose
    /// only participant is the sender.
    pub fn append_message(
        &mut self,
        conversation_id: &str,
        sender_id: &str,
        sender_name: &str,
        content: &str,
        kind: MessageKind,
    ) -> ChatResult<Message> {
        let conversation_id = conversation_id.trim();
        if conversation_id.is_empty() {
            return Err(ChatError::MissingFields);
        }
        validate_content(content)?;

        let now = Utc::now();
        let message = Message {
            id: generate_message_id(now),
            conversation_id: conversation_id.to_string(),
            sender_id: sender_id.to_string(),
            sender_name: sender_name.to_string(),
            content: content.trim().to_string(),
            kind,
            timestamp: now,
            status: MessageStatus::Sent,
        };

        let conversation = self
            .conversations
            .entry(conversation_id.to_string())
            .or_insert_with(|| {
                tracing::info!(
                    conversation_id = %conversation_id,
                    sender_id = %sender_id,
                    "Creating conversation on first message"
                );
                Conversation {
                    id: conversation_id.to_string(),
                    kind: ConversationKind::Direct,
                    title: None,
                    participants: vec![sender_id.to_string()],
                    metadata: serde_json::json!({}),
                    created_at: now,
                    last_activity: now,
                }
            });
        conversation.last_activity = now;

        self.by_conversation
            .entry(conversation_id.to_string())
            .or_default()
            .push(message.id.clone());
        self.messages.insert(message.id.clone(), message.clone());

        Ok(message)
    }

    /// Reverse-chronological pagination anchored at the newest message.
    ///
    /// Page 1 holds the newest `limit` messages; each page is returned
    /// oldest-first.
    pub fn list_messages(&self, conversation_id: &str, page: usize, limit: usize) -> MessagePage {
        let page = page.max(1);
        let limit = limit.clamp(1, MAX_PAGE_SIZE);
        let ids = self
            .by_conversation
            .get(conversation_id)
            .map(Vec::as_slice)
            .unwrap_or_default();
        let total = ids.len();

        let end = total.saturating_sub((page - 1).saturating_mul(limit));
        let start = end.saturating_sub(limit);

        let messages = ids[start..end]
            .iter()
            .filter_map(|id| self.messages.get(id))
            .cloned()
            .collect();

        MessagePage {
            messages,
            page,
            limit,
            total,
            has_more: start > 0,
        }
    }

    pub fn list_conversations(&self) -> Vec<ConversationSummary> {
        let mut conversations: Vec<&Conversation> = self.conversations.values().collect();
        conversations.sort_by(|a, b| b.last_activity.cmp(&a.last_activity).then(a.id.cmp(&b.id)));

        conversations
            .into_iter()
            .map(|conversation| {
                let ids = self.by_conversation.get(&conversation.id);
                let last_message = ids
                    .and_then(|ids| ids.last())
                    .and_then(|id| self.messages.get(id))
                    .cloned();

                ConversationSummary {
                    id: conversation.id.clone(),
                    kind: conversation.kind,
                    title: conversation.title.clone(),
                    participants: conversation
                        .participants
                        .iter()
                        .filter_map(|id| self.users.get(id))
                        .map(UserSummary::from)
                        .collect(),
                    metadata: conversation.metadata.clone(),
                    created_at: conversation.created_at,
                    last_activity: conversation.last_activity,
                    last_message,
                    message_count: ids.map(Vec::len).unwrap_or(0),
                    // Read tracking is not implemented.
                    unread_count: 0,
                }
            })
            .collect()
    }

    pub fn mark_read(&mut self, message_id: &str) -> Option<&Message> {
        let message = self.messages.get_mut(message_id)?;
        message.status = MessageStatus::Read;
        Some(message)
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    pub fn conversation_count(&self) -> usize {
        self.conversations.len()
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }
}

/// Content rules shared by the socket and REST paths.
pub fn validate_content(content: &str) -> ChatResult<()> {
    if content.chars().count() > MAX_MESSAGE_LENGTH {
        return Err(ChatError::ContentTooLong);
    }
    if content.trim().is_empty() {
        return Err(ChatError::EmptyContent);
    }
    Ok(())
}

fn generate_message_id(now: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("msg_{}_{}", now.timestamp_millis(), &suffix[..9])
}
