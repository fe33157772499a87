//! Per-user fixed-window rate limiter middleware.
//!
//! Each signed-in user gets a counter that resets every second. Runs after
//! authentication, so the [`Session`] extension is always present; requests
//! without one share a single anonymous window.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::{Extension, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::warn;
use uuid::Uuid;

use scanshelf_core::types::Session;

use crate::error::ApiError;

/// Window entries kept before stale ones are pruned.
const PRUNE_THRESHOLD: usize = 1024;

#[derive(Debug, Clone, Copy)]
struct Window {
    second: u64,
    count: u64,
}

/// Shared state for the rate limiter.
#[derive(Clone)]
pub struct RateLimiter {
    /// Maximum requests allowed per user per second.
    max_per_sec: u64,
    windows: Arc<Mutex<HashMap<Uuid, Window>>>,
}

impl RateLimiter {
    /// Create a new rate limiter allowing `max_per_sec` requests per user per second.
    pub fn new(max_per_sec: u64) -> Self {
        Self {
            max_per_sec: max_per_sec.max(1),
            windows: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Try to acquire a permit for `key`. Returns true if the request is allowed.
    pub fn try_acquire(&self, key: Uuid) -> bool {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        self.try_acquire_at(key, now)
    }

    fn try_acquire_at(&self, key: Uuid, now: u64) -> bool {
        let mut windows = self
            .windows
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if windows.len() > PRUNE_THRESHOLD {
            windows.retain(|_, w| w.second == now);
        }

        let window = windows.entry(key).or_insert(Window {
            second: now,
            count: 0,
        });
        if window.second != now {
            *window = Window {
                second: now,
                count: 0,
            };
        }
        window.count += 1;
        window.count <= self.max_per_sec
    }
}

/// Axum middleware that enforces the rate limit.
pub async fn rate_limit_middleware(
    Extension(limiter): Extension<RateLimiter>,
    req: Request,
    next: Next,
) -> Response {
    let key = req
        .extensions()
        .get::<Session>()
        .map(|s| s.user.id)
        .unwrap_or(Uuid::nil());

    if limiter.try_acquire(key) {
        next.run(req).await
    } else {
        warn!(user_id = %key, "Rate limit exceeded");
        ApiError::TooManyRequests("Rate limit exceeded".to_string()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_per_window() {
        let limiter = RateLimiter::new(3);
        let user = Uuid::new_v4();
        assert!(limiter.try_acquire_at(user, 10));
        assert!(limiter.try_acquire_at(user, 10));
        assert!(limiter.try_acquire_at(user, 10));
        assert!(!limiter.try_acquire_at(user, 10));

        // Next second starts fresh.
        assert!(limiter.try_acquire_at(user, 11));
    }

    #[test]
    fn test_users_are_independent() {
        let limiter = RateLimiter::new(1);
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        assert!(limiter.try_acquire_at(a, 5));
        assert!(!limiter.try_acquire_at(a, 5));
        assert!(limiter.try_acquire_at(b, 5));
    }

    #[test]
    fn test_stale_windows_pruned() {
        let limiter = RateLimiter::new(1);
        for _ in 0..=PRUNE_THRESHOLD {
            limiter.try_acquire_at(Uuid::new_v4(), 1);
        }
        limiter.try_acquire_at(Uuid::new_v4(), 2);
        assert_eq!(limiter.windows.lock().unwrap().len(), 1);
    }
}
