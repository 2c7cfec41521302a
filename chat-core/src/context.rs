use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::config::Config;
use crate::registry::ConnectionRegistry;
use crate::rooms::RoomHub;
use crate::seed;
use crate::store::ConversationStore;

/// All mutable chat state. Guarded by a single lock so that every handler
/// observes and mutates it as one atomic step.
#[derive(Debug)]
pub struct ChatState {
    pub store: ConversationStore,
    pub registry: ConnectionRegistry,
    pub rooms: RoomHub,
}

impl ChatState {
    pub fn new(config: &Config) -> Self {
        ChatState {
            store: ConversationStore::new(),
            registry: ConnectionRegistry::new(config.websocket.max_connections_per_user),
            rooms: RoomHub::new(),
        }
    }
}

#[derive(Clone)]
pub struct ChatContext {
    pub config: Arc<Config>,
    pub started_at: DateTime<Utc>,
    state: Arc<Mutex<ChatState>>,
}

impl ChatContext {
    /// Context with the demo seed data loaded.
    pub fn new(config: Config) -> Self {
        let mut state = ChatState::new(&config);
        seed::load(&mut state.store);
        Self::with_state(config, state)
    }

    /// Context with no users or conversations.
    pub fn empty(config: Config) -> Self {
        let state = ChatState::new(&config);
        Self::with_state(config, state)
    }

    fn with_state(config: Config, state: ChatState) -> Self {
        ChatContext {
            config: Arc::new(config),
            started_at: Utc::now(),
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Lock the chat state. Never hold the guard across an `.await`.
    pub fn state(&self) -> MutexGuard<'_, ChatState> {
        // A panicking handler leaves the maps structurally intact.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn uptime_seconds(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds()
    }
}
