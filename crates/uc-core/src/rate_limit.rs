use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Fixed-window limiter keyed by client address. A limit of zero disables
/// limiting entirely.
pub struct RateLimiter {
    limit: u64,
    window: Duration,
    windows: Mutex<HashMap<IpAddr, Window>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed { remaining: u64 },
    Limited { retry_after: Duration },
}

struct Window {
    started: Instant,
    count: u64,
}

impl RateLimiter {
    pub fn new(limit: u64, window: Duration) -> Self {
        Self {
            limit,
            window,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn per_minute(limit: u64) -> Self {
        Self::new(limit, Duration::from_secs(60))
    }

    pub fn is_enabled(&self) -> bool {
        self.limit > 0
    }

    pub async fn check(&self, client: IpAddr) -> RateDecision {
        if !self.is_enabled() {
            return RateDecision::Allowed {
                remaining: u64::MAX,
            };
        }

        let mut windows = self.windows.lock().await;
        let now = Instant::now();
        let window = windows.entry(client).or_insert(Window {
            started: now,
            count: 0,
        });
        if now.duration_since(window.started) >= self.window {
            window.started = now;
            window.count = 0;
        }

        window.count += 1;
        if window.count > self.limit {
            let retry_after = self
                .window
                .saturating_sub(now.duration_since(window.started));
            return RateDecision::Limited { retry_after };
        }
        RateDecision::Allowed {
            remaining: self.limit - window.count,
        }
    }

    /// Drops windows that have fully elapsed.
    pub async fn prune(&self) {
        let now = Instant::now();
        let window = self.window;
        self.windows
            .lock()
            .await
            .retain(|_, state| now.duration_since(state.started) < window);
    }
}
