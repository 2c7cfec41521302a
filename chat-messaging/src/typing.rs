use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;

/// How long a typing indicator stays up without a refresh.
pub const TYPING_TIMEOUT: Duration = Duration::from_secs(5);

/// `(conversation_id, user_id)`
pub type TypingKey = (String, String);

struct Armed {
    generation: u64,
    socket_id: String,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct TimerTable {
    next_generation: u64,
    armed: HashMap<TypingKey, Armed>,
}

/// Auto-expiring typing indicators.
///
/// Each key holds at most one armed timer. Re-arming or cancelling bumps the
/// key out of the table, so a timer that already woke up but lost the race
/// sees a stale generation and does nothing.
///
/// Lock order: the expiry callback runs while this table is locked, so callers
/// must not hold the chat state lock when calling into `TypingTimers`.
#[derive(Clone, Default)]
pub struct TypingTimers {
    inner: Arc<Mutex<TimerTable>>,
}

impl TypingTimers {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> MutexGuard<'_, TimerTable> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Arm (or re-arm) the timer for `key`; `on_expire` runs once if nothing
    /// replaces or cancels it within `timeout`.
    pub fn arm<F>(&self, key: TypingKey, socket_id: &str, timeout: Duration, on_expire: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut table = self.table();
        table.next_generation += 1;
        let generation = table.next_generation;

        if let Some(previous) = table.armed.remove(&key) {
            previous.handle.abort();
        }

        let timers = self.clone();
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            timers.expire(&task_key, generation, on_expire);
        });

        table.armed.insert(
            key,
            Armed {
                generation,
                socket_id: socket_id.to_string(),
                handle,
            },
        );
    }

    pub fn cancel(&self, key: &TypingKey) -> bool {
        match self.table().armed.remove(key) {
            Some(armed) => {
                armed.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Cancel every timer armed from `socket_id`.
    pub fn cancel_socket(&self, socket_id: &str) -> usize {
        let mut table = self.table();
        let keys: Vec<TypingKey> = table
            .armed
            .iter()
            .filter(|(_, armed)| armed.socket_id == socket_id)
            .map(|(key, _)| key.clone())
            .collect();

        for key in &keys {
            if let Some(armed) = table.armed.remove(key) {
                armed.handle.abort();
            }
        }
        keys.len()
    }

    pub fn is_armed(&self, key: &TypingKey) -> bool {
        self.table().armed.contains_key(key)
    }

    pub fn armed_count(&self) -> usize {
        self.table().armed.len()
    }

    fn expire<F: FnOnce()>(&self, key: &TypingKey, generation: u64, on_expire: F) {
        let mut table = self.table();
        let current = table
            .armed
            .get(key)
            .map(|armed| armed.generation == generation)
            .unwrap_or(false);
        if !current {
            return;
        }
        table.armed.remove(key);
        on_expire();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn key(conversation: &str, user: &str) -> TypingKey {
        (conversation.to_string(), user.to_string())
    }

    fn counter() -> (Arc<AtomicUsize>, impl Fn() -> Box<dyn FnOnce() + Send>) {
        let fired = Arc::new(AtomicUsize::new(0));
        let handle = fired.clone();
        let make = move || {
            let fired = handle.clone();
            Box::new(move || {
                fired.fetch_add(1, Ordering::SeqCst);
            }) as Box<dyn FnOnce() + Send>
        };
        (fired, make)
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_once_after_timeout() {
        let timers = TypingTimers::new();
        let (fired, make) = counter();
        timers.arm(key("conv-1", "u1"), "s1", TYPING_TIMEOUT, make());

        tokio::time::sleep(Duration::from_millis(4_900)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!timers.is_armed(&key("conv-1", "u1")));

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_replaces_previous() {
        let timers = TypingTimers::new();
        let (fired, make) = counter();
        timers.arm(key("conv-1", "u1"), "s1", TYPING_TIMEOUT, make());
        tokio::time::sleep(Duration::from_secs(3)).await;
        timers.arm(key("conv-1", "u1"), "s1", TYPING_TIMEOUT, make());
        assert_eq!(timers.armed_count(), 1);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_expiry() {
        let timers = TypingTimers::new();
        let (fired, make) = counter();
        timers.arm(key("conv-1", "u1"), "s1", TYPING_TIMEOUT, make());
        timers.arm(key("conv-2", "u1"), "s1", TYPING_TIMEOUT, make());
        timers.arm(key("conv-2", "u2"), "s2", TYPING_TIMEOUT, make());

        assert!(timers.cancel(&key("conv-1", "u1")));
        assert!(!timers.cancel(&key("conv-1", "u1")));
        assert_eq!(timers.cancel_socket("s1"), 1);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(timers.armed_count(), 0);
    }
}
