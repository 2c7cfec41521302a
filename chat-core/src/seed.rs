use chrono::{Duration, Utc};
use serde_json::json;

use crate::store::ConversationStore;
use crate::types::{Conversation, ConversationKind, MessageKind, Role, User};

struct SeedUser {
    id: &'static str,
    email: &'static str,
    name: &'static str,
    role: Role,
}

const USERS: &[SeedUser] = &[
    SeedUser { id: "user-1", email: "sarah.johnson@example.com", name: "Sarah Johnson", role: Role::Buyer },
    SeedUser { id: "user-2", email: "michael.chen@example.com", name: "Michael Chen", role: Role::Buyer },
    SeedUser { id: "agent-1", email: "emily.rodriguez@realty.example.com", name: "Emily Rodriguez", role: Role::Agent },
    SeedUser { id: "agent-2", email: "david.kim@realty.example.com", name: "David Kim", role: Role::Agent },
    SeedUser { id: "admin-1", email: "admin@realty.example.com", name: "Platform Admin", role: Role::Admin },
];

/// Populate a fresh store with demo users, conversations and a short history.
pub fn load(store: &mut ConversationStore) {
    for user in USERS {
        store.insert_user(User {
            id: user.id.to_string(),
            email: Some(user.email.to_string()),
            name: user.name.to_string(),
            role: user.role,
            is_online: false,
            last_seen: None,
        });
    }

    let now = Utc::now();
    let conversations = [
        (
            "conv-1",
            ConversationKind::Direct,
            "Modern Downtown Loft",
            vec!["user-1", "agent-1"],
            json!({"propertyId": "prop-101", "propertyTitle": "Modern Downtown Loft"}),
        ),
        (
            "conv-2",
            ConversationKind::Direct,
            "Suburban Family Home",
            vec!["user-2", "agent-2"],
            json!({"propertyId": "prop-204", "propertyTitle": "Suburban Family Home"}),
        ),
        (
            "conv-3",
            ConversationKind::Support,
            "Account support",
            vec!["user-1", "admin-1"],
            json!({"topic": "account"}),
        ),
    ];

    for (offset, (id, kind, title, participants, metadata)) in conversations.into_iter().enumerate() {
        let created_at = now - Duration::days(3 - offset as i64);
        store.insert_conversation(Conversation {
            id: id.to_string(),
            kind,
            title: Some(title.to_string()),
            participants: participants.into_iter().map(str::to_string).collect(),
            metadata,
            created_at,
            last_activity: created_at,
        });
    }

    let history = [
        ("conv-1", "user-1", "Sarah Johnson", "Hi, is the downtown loft still available?"),
        ("conv-1", "agent-1", "Emily Rodriguez", "It is! Would you like to schedule a viewing this week?"),
        ("conv-1", "user-1", "Sarah Johnson", "Thursday afternoon would be perfect."),
        ("conv-2", "agent-2", "David Kim", "Thanks for your interest in the family home on Maple Street."),
        ("conv-2", "user-2", "Michael Chen", "Is there any flexibility on the asking price?"),
        ("conv-3", "admin-1", "Platform Admin", "Welcome! Let us know if you need help with your account."),
    ];

    for (conversation_id, sender_id, sender_name, content) in history {
        if let Err(e) =
            store.append_message(conversation_id, sender_id, sender_name, content, MessageKind::Text)
        {
            tracing::warn!("Skipping seed message for {}: {}", conversation_id, e);
        }
    }

    tracing::info!(
        users = store.user_count(),
        conversations = store.conversation_count(),
        messages = store.message_count(),
        "Seeded chat store"
    );
}
