use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header::RETRY_AFTER, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use chat_core::config::RateLimitConfig;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing;

use crate::websocket::client_ip;

/// Client table size above which expired windows are swept.
const SWEEP_THRESHOLD: usize = 10_000;

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed { remaining: u32 },
    Limited { retry_after: Duration },
}

/// Fixed-window request counter keyed by client address.
#[derive(Debug)]
pub struct RateLimiter {
    window: Duration,
    max_requests: u32,
    clients: Mutex<HashMap<String, Window>>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        RateLimiter {
            window: config.window(),
            max_requests: config.max_requests,
            clients: Mutex::new(HashMap::new()),
        }
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    pub fn check(&self, key: &str) -> Decision {
        self.check_at(key, Instant::now())
    }

    fn check_at(&self, key: &str, now: Instant) -> Decision {
        let mut clients = self.clients.lock().unwrap_or_else(|p| p.into_inner());

        if clients.len() >= SWEEP_THRESHOLD && !clients.contains_key(key) {
            let window = self.window;
            clients.retain(|_, w| now.duration_since(w.started) < window);
        }

        let entry = clients.entry(key.to_string()).or_insert(Window {
            started: now,
            count: 0,
        });
        if now.duration_since(entry.started) >= self.window {
            *entry = Window {
                started: now,
                count: 0,
            };
        }

        if entry.count >= self.max_requests {
            let elapsed = now.duration_since(entry.started);
            return Decision::Limited {
                retry_after: self.window.saturating_sub(elapsed),
            };
        }

        entry.count += 1;
        Decision::Allowed {
            remaining: self.max_requests - entry.count,
        }
    }
}

/// Limiter plus the address policy used to key it.
#[derive(Debug, Clone)]
pub struct RateLimitState {
    pub limiter: Arc<RateLimiter>,
    pub trust_proxy: bool,
}

pub async fn rate_limit_middleware(
    State(RateLimitState { limiter, trust_proxy }): State<RateLimitState>,
    req: Request,
    next: Next,
) -> Response {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let key = client_ip(req.headers(), peer, trust_proxy).unwrap_or_else(|| "unknown".to_string());

    match limiter.check(&key) {
        Decision::Allowed { remaining } => {
            let mut response = next.run(req).await;
            let headers = response.headers_mut();
            headers.insert("x-ratelimit-limit", HeaderValue::from(limiter.max_requests()));
            headers.insert("x-ratelimit-remaining", HeaderValue::from(remaining));
            response
        }
        Decision::Limited { retry_after } => {
            let retry_after = retry_after.as_secs_f64().ceil() as u64;
            tracing::warn!(client = %key, retry_after, "Rate limit exceeded");
            (
                StatusCode::TOO_MANY_REQUESTS,
                [(RETRY_AFTER, HeaderValue::from(retry_after))],
                Json(serde_json::json!({
                    "error": "Too many requests, please try again later.",
                    "retryAfter": retry_after,
                })),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max_requests: u32, window_ms: u64) -> RateLimiter {
        RateLimiter::new(&RateLimitConfig {
            window_ms,
            max_requests,
        })
    }

    #[test]
    fn test_limits_within_window() {
        let limiter = limiter(3, 60_000);
        let start = Instant::now();

        assert_eq!(limiter.check_at("1.2.3.4", start), Decision::Allowed { remaining: 2 });
        assert_eq!(limiter.check_at("1.2.3.4", start), Decision::Allowed { remaining: 1 });
        assert_eq!(limiter.check_at("1.2.3.4", start), Decision::Allowed { remaining: 0 });

        let later = start + Duration::from_secs(20);
        assert_eq!(
            limiter.check_at("1.2.3.4", later),
            Decision::Limited {
                retry_after: Duration::from_secs(40)
            }
        );

        // Separate clients have separate budgets.
        assert_eq!(limiter.check_at("5.6.7.8", later), Decision::Allowed { remaining: 2 });
    }

    #[test]
    fn test_window_resets() {
        let limiter = limiter(1, 1_000);
        let start = Instant::now();
        assert!(matches!(limiter.check_at("a", start), Decision::Allowed { .. }));
        assert!(matches!(limiter.check_at("a", start), Decision::Limited { .. }));
        assert!(matches!(
            limiter.check_at("a", start + Duration::from_millis(1_000)),
            Decision::Allowed { .. }
        ));
    }
}
