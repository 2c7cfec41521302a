pub mod dispatch;
pub mod service;
pub mod typing;

pub use dispatch::{dispatch, handle_frame};
pub use service::{JoinOutcome, MessagingService, API_USER_ID, API_USER_NAME};
pub use typing::{TypingTimers, TYPING_TIMEOUT};
