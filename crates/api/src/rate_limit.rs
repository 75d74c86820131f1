//! Fixed-window request limiter keyed by client identifier.
//!
//! Each identifier gets a window that opens with its first request and
//! lasts `window`. At most `max_clients` windows are kept; when full the
//! oldest window is evicted.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Default number of tracked identifiers.
pub const DEFAULT_MAX_CLIENTS: usize = 500;

/// Identifier used when the request carries none.
pub const ANONYMOUS_CLIENT: &str = "anonymous";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub limited: bool,
    pub limit: u32,
    pub remaining: u32,
}

#[derive(Debug)]
struct Window {
    opened_at: Instant,
    count: u32,
}

#[derive(Debug)]
pub struct RateLimiter {
    limit: u32,
    window: Duration,
    max_clients: usize,
    windows: Mutex<HashMap<String, Window>>,
}

impl RateLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self::with_capacity(limit, window, DEFAULT_MAX_CLIENTS)
    }

    pub fn with_capacity(limit: u32, window: Duration, max_clients: usize) -> Self {
        Self {
            limit,
            window,
            max_clients: max_clients.max(1),
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// `limit` requests per minute.
    pub fn per_minute(limit: u32) -> Self {
        Self::new(limit, Duration::from_secs(60))
    }

    /// Count one request from `client` and decide whether it may proceed.
    pub async fn check(&self, client: &str) -> RateLimitDecision {
        let now = Instant::now();
        let mut windows = self.windows.lock().await;

        windows.retain(|_, w| now.duration_since(w.opened_at) < self.window);

        if !windows.contains_key(client) && windows.len() >= self.max_clients {
            let oldest = windows
                .iter()
                .min_by_key(|(_, w)| w.opened_at)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                windows.remove(&oldest);
            }
        }

        let window = windows.entry(client.to_string()).or_insert(Window {
            opened_at: now,
            count: 0,
        });
        window.count = window.count.saturating_add(1);

        let limited = window.count > self.limit;
        RateLimitDecision {
            limited,
            limit: self.limit,
            remaining: if limited { 0 } else { self.limit - window.count },
        }
    }
}
