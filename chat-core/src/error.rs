use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    #[error("Conversation ID and content are required")]
    MissingFields,

    #[error("Conversation ID is required")]
    MissingConversationId,

    #[error("Message content cannot be empty")]
    EmptyContent,

    #[error("Message too long (max 10000 characters)")]
    ContentTooLong,

    #[error("Too many connections")]
    TooManyConnections,

    #[error("Not a participant of conversation {0}")]
    Forbidden(String),

    #[error("Conversation {0} not found")]
    ConversationNotFound(String),

    #[error("Unknown connection {0}")]
    UnknownConnection(String),

    #[error("Invalid event payload: {0}")]
    InvalidPayload(String),
}

pub type ChatResult<T> = Result<T, ChatError>;
