use std::{collections::HashMap, net::SocketAddr, sync::Arc, time::Duration};

use axum::http::HeaderMap;
use tokio::{sync::Mutex, time::Instant};

/// Prune stale windows once the map grows past this many keys.
const PRUNE_THRESHOLD: usize = 10_000;

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

/// Fixed-window counter per client key.
#[derive(Clone)]
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    windows: Arc<Mutex<HashMap<String, Window>>>,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            windows: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Count one request for `key`. `Err` carries the time until the window reopens.
    pub async fn check(&self, key: &str) -> Result<u32, Duration> {
        let now = Instant::now();
        let mut windows = self.windows.lock().await;
        if windows.len() > PRUNE_THRESHOLD {
            let window = self.window;
            windows.retain(|_, w| now.duration_since(w.started) < window);
        }

        let entry = windows.entry(key.to_string()).or_insert(Window {
            started: now,
            count: 0,
        });
        if now.duration_since(entry.started) >= self.window {
            *entry = Window { started: now, count: 0 };
        }
        if entry.count >= self.max_requests {
            return Err(self.window.saturating_sub(now.duration_since(entry.started)));
        }
        entry.count += 1;
        Ok(self.max_requests - entry.count)
    }
}

/// First `X-Forwarded-For` hop, then the socket peer.
pub fn client_key(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(str::to_string)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}
