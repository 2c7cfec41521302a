pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod registry;
pub mod rooms;
pub mod seed;
pub mod store;
pub mod types;

pub use config::Config;
pub use context::{ChatContext, ChatState};
pub use error::{ChatError, ChatResult};
pub use events::{ClientEvent, ServerEvent};
pub use registry::{ConnectionRegistry, Departure};
pub use rooms::{conversation_room, user_room, EventSender, RoomHub};
pub use store::{ConversationStore, MAX_MESSAGE_LENGTH};
pub use types::{Identity, Role};
