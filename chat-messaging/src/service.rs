use chat_core::events::{
    ConversationRef, MessageSent, SendMessagePayload, UserStatusChange, UserTyping,
};
use chat_core::types::{Message, MessageKind};
use chat_core::{
    conversation_room, user_room, ChatContext, ChatError, ChatResult, ClientEvent, EventSender,
    Identity, ServerEvent,
};
use chrono::Utc;
use tracing;

use crate::typing::{TypingKey, TypingTimers, TYPING_TIMEOUT};

/// Pseudo-sender for messages posted over REST.
pub const API_USER_ID: &str = "api-user";
pub const API_USER_NAME: &str = "API User";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    Joined,
    Forbidden,
    NotFound,
}

/// Routes socket events into the chat state and fans results out to rooms.
#[derive(Clone)]
pub struct MessagingService {
    ctx: ChatContext,
    typing: TypingTimers,
}

impl MessagingService {
    pub fn new(ctx: ChatContext) -> Self {
        Self {
            ctx,
            typing: TypingTimers::new(),
        }
    }

    pub fn context(&self) -> &ChatContext {
        &self.ctx
    }

    pub fn typing_timers(&self) -> &TypingTimers {
        &self.typing
    }

    /// Admit an authenticated socket.
    ///
    /// Fails with `TooManyConnections` if the user reached the cap in the
    /// meantime; nothing is registered in that case.
    pub fn connect(
        &self,
        socket_id: &str,
        identity: &Identity,
        ip: Option<String>,
        outlet: EventSender,
    ) -> ChatResult<()> {
        let mut state = self.ctx.state();
        let first = state.registry.register(socket_id, identity, ip)?;

        state.rooms.attach(socket_id, outlet);
        state.rooms.join(socket_id, &user_room(&identity.user_id));
        state.store.upsert_identity(identity);
        state.store.set_presence(&identity.user_id, true, Utc::now());

        let online = state.store.online_users();
        state.rooms.emit_to(socket_id, ServerEvent::OnlineUsers(online));

        tracing::info!(
            socket_id = %socket_id,
            user_id = %identity.user_id,
            role = %identity.role,
            first_connection = first,
            connections = state.registry.connections_for(&identity.user_id),
            "User connected"
        );
        Ok(())
    }

    /// Tear down a socket. Presence goes offline only with the user's last socket.
    pub fn disconnect(&self, socket_id: &str, reason: &str) {
        self.typing.cancel_socket(socket_id);

        let mut state = self.ctx.state();
        state.rooms.detach(socket_id);

        let Some(departure) = state.registry.unregister(socket_id) else {
            tracing::debug!(socket_id = %socket_id, "Disconnect for unknown socket");
            return;
        };
        let user_id = departure.connection.user_id;

        tracing::info!(
            socket_id = %socket_id,
            user_id = %user_id,
            reason = %reason,
            "User disconnected"
        );

        if departure.last_for_user {
            let now = Utc::now();
            state.store.set_presence(&user_id, false, now);
            state
                .rooms
                .emit_all(&ServerEvent::UserStatusChange(UserStatusChange {
                    user_id,
                    is_online: false,
                    last_seen: Some(now),
                }));
        }
    }

    pub fn handle(&self, socket_id: &str, event: ClientEvent) -> ChatResult<()> {
        match event {
            ClientEvent::SendMessage(payload) => self.send_message(socket_id, payload).map(|_| ()),
            ClientEvent::JoinConversation(r) => match self.join_conversation(socket_id, &r)? {
                JoinOutcome::Joined => Ok(()),
                JoinOutcome::Forbidden => Err(ChatError::Forbidden(r.conversation_id)),
                JoinOutcome::NotFound => Err(ChatError::ConversationNotFound(r.conversation_id)),
            },
            ClientEvent::LeaveConversation(r) => self.leave_conversation(socket_id, &r),
            ClientEvent::TypingStart(r) => self.start_typing(socket_id, &r),
            ClientEvent::TypingStop(r) => self.stop_typing(socket_id, &r),
            ClientEvent::Ping => self.ping(socket_id),
        }
    }

    pub fn join_conversation(
        &self,
        socket_id: &str,
        conversation: &ConversationRef,
    ) -> ChatResult<JoinOutcome> {
        let conversation_id = conversation.id()?;
        let mut state = self.ctx.state();
        let user_id = state
            .registry
            .get(socket_id)
            .map(|c| c.user_id.clone())
            .ok_or_else(|| ChatError::UnknownConnection(socket_id.to_string()))?;

        if self.ctx.config.websocket.enforce_membership {
            match state.store.conversation(conversation_id) {
                None => return Ok(JoinOutcome::NotFound),
                Some(c) if !c.participants.iter().any(|p| p == &user_id) => {
                    tracing::warn!(
                        socket_id = %socket_id,
                        user_id = %user_id,
                        conversation_id = %conversation_id,
                        "Join refused for non-participant"
                    );
                    return Ok(JoinOutcome::Forbidden);
                }
                Some(_) => {}
            }
        }

        state
            .rooms
            .join(socket_id, &conversation_room(conversation_id));
        tracing::debug!(
            socket_id = %socket_id,
            user_id = %user_id,
            conversation_id = %conversation_id,
            "Joined conversation"
        );
        Ok(JoinOutcome::Joined)
    }

    pub fn leave_conversation(&self, socket_id: &str, conversation: &ConversationRef) -> ChatResult<()> {
        let conversation_id = conversation.id()?;
        self.ctx
            .state()
            .rooms
            .leave(socket_id, &conversation_room(conversation_id));
        tracing::debug!(socket_id = %socket_id, conversation_id = %conversation_id, "Left conversation");
        Ok(())
    }

    /// Store a message from a socket, broadcast it to the rest of the room
    /// and acknowledge the sender.
    pub fn send_message(&self, socket_id: &str, payload: SendMessagePayload) -> ChatResult<Message> {
        if payload.conversation_id.trim().is_empty() || payload.content.is_empty() {
            return Err(ChatError::MissingFields);
        }

        let mut state = self.ctx.state();
        let (sender_id, sender_name) = state
            .registry
            .get(socket_id)
            .map(|c| (c.user_id.clone(), c.user_name.clone()))
            .ok_or_else(|| ChatError::UnknownConnection(socket_id.to_string()))?;

        let message = state.store.append_message(
            &payload.conversation_id,
            &sender_id,
            &sender_name,
            &payload.content,
            payload.kind.unwrap_or_default(),
        )?;
        state.registry.touch(socket_id);

        let room = conversation_room(&message.conversation_id);
        let delivered = state.rooms.emit_room(
            &room,
            &ServerEvent::NewMessage(message.clone()),
            Some(socket_id),
        );
        state.rooms.emit_to(
            socket_id,
            ServerEvent::MessageSent(MessageSent {
                success: true,
                message: message.clone(),
            }),
        );

        tracing::info!(
            message_id = %message.id,
            conversation_id = %message.conversation_id,
            sender_id = %sender_id,
            recipients = delivered,
            "Message sent"
        );
        Ok(message)
    }

    /// Store a message posted over REST and broadcast it to the room.
    pub fn post_message(
        &self,
        conversation_id: &str,
        content: &str,
        kind: Option<MessageKind>,
    ) -> ChatResult<Message> {
        let mut state = self.ctx.state();
        let message = state.store.append_message(
            conversation_id,
            API_USER_ID,
            API_USER_NAME,
            content,
            kind.unwrap_or_default(),
        )?;

        let room = conversation_room(&message.conversation_id);
        state
            .rooms
            .emit_room(&room, &ServerEvent::NewMessage(message.clone()), None);

        tracing::info!(
            message_id = %message.id,
            conversation_id = %message.conversation_id,
            "Message posted via REST"
        );
        Ok(message)
    }

    pub fn start_typing(&self, socket_id: &str, conversation: &ConversationRef) -> ChatResult<()> {
        let conversation_id = conversation.id()?.to_string();
        let room = conversation_room(&conversation_id);

        let (user_id, user_name) = {
            let mut state = self.ctx.state();
            let typist = state
                .registry
                .get(socket_id)
                .map(|c| (c.user_id.clone(), c.user_name.clone()))
                .ok_or_else(|| ChatError::UnknownConnection(socket_id.to_string()))?;
            state.registry.touch(socket_id);
            state.rooms.emit_room(
                &room,
                &typing_event(&typist.0, &typist.1, true),
                Some(socket_id),
            );
            typist
        };

        let ctx = self.ctx.clone();
        let owner = socket_id.to_string();
        let key: TypingKey = (conversation_id, user_id.clone());
        self.typing.arm(key, socket_id, TYPING_TIMEOUT, move || {
            tracing::debug!(user_id = %user_id, room = %room, "Typing indicator expired");
            ctx.state()
                .rooms
                .emit_room(&room, &typing_event(&user_id, &user_name, false), Some(&owner));
        });
        Ok(())
    }

    pub fn stop_typing(&self, socket_id: &str, conversation: &ConversationRef) -> ChatResult<()> {
        let conversation_id = conversation.id()?.to_string();

        let (user_id, user_name) = self
            .ctx
            .state()
            .registry
            .get(socket_id)
            .map(|c| (c.user_id.clone(), c.user_name.clone()))
            .ok_or_else(|| ChatError::UnknownConnection(socket_id.to_string()))?;

        let room = conversation_room(&conversation_id);
        self.typing.cancel(&(conversation_id, user_id.clone()));

        self.ctx.state().rooms.emit_room(
            &room,
            &typing_event(&user_id, &user_name, false),
            Some(socket_id),
        );
        Ok(())
    }

    pub fn ping(&self, socket_id: &str) -> ChatResult<()> {
        let mut state = self.ctx.state();
        if !state.registry.touch(socket_id) {
            return Err(ChatError::UnknownConnection(socket_id.to_string()));
        }
        state.rooms.emit_to(socket_id, ServerEvent::Pong);
        Ok(())
    }

    /// Record transport-level activity (heartbeat frames).
    pub fn touch(&self, socket_id: &str) -> bool {
        self.ctx.state().registry.touch(socket_id)
    }

    /// Report a failure to the offending socket only.
    pub fn reply_error(&self, socket_id: &str, message: impl Into<String>) {
        self.ctx
            .state()
            .rooms
            .emit_to(socket_id, ServerEvent::error(message));
    }
}

fn typing_event(user_id: &str, user_name: &str, is_typing: bool) -> ServerEvent {
    ServerEvent::UserTyping(UserTyping {
        user_id: user_id.to_string(),
        user_name: user_name.to_string(),
        is_typing,
    })
}
