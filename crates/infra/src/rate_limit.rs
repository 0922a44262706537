//! Client-side pacing for dispatch calls.
//!
//! Calls are delayed, never rejected. The mutex is held across the sleeps, so
//! concurrent callers on one limiter go through one at a time.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

const WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub max_per_minute: u32,
    pub min_interval: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_per_minute: 10,
            min_interval: Duration::from_secs(2),
        }
    }
}

#[derive(Debug)]
struct LimiterState {
    window_start: Instant,
    count: u32,
    last_request: Option<Instant>,
}

#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    state: Mutex<LimiterState>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            state: Mutex::new(LimiterState {
                window_start: Instant::now(),
                count: 0,
                last_request: None,
            }),
        }
    }

    pub fn config(&self) -> RateLimitConfig {
        self.config
    }

    /// Wait until the next call is allowed. Returns the time spent waiting.
    pub async fn acquire(&self) -> Duration {
        let started = Instant::now();
        let mut state = self.state.lock().await;

        if started.duration_since(state.window_start) >= WINDOW {
            state.window_start = started;
            state.count = 0;
        }

        if self.config.max_per_minute > 0 && state.count >= self.config.max_per_minute {
            let reset_at = state.window_start + WINDOW;
            debug!(wait_ms = reset_at.saturating_duration_since(Instant::now()).as_millis() as u64, "per-minute ceiling reached");
            tokio::time::sleep_until(reset_at).await;
            state.window_start = Instant::now();
            state.count = 0;
        }

        if let Some(last) = state.last_request {
            let next_allowed = last + self.config.min_interval;
            if Instant::now() < next_allowed {
                tokio::time::sleep_until(next_allowed).await;
            }
        }

        state.count += 1;
        state.last_request = Some(Instant::now());
        started.elapsed()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}
