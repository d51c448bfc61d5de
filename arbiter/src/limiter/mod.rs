//! Sliding-window rate limiter for outbound model calls.
//!
//! One shared limiter protects the local GPU (and the cloud bill) from retry
//! storms: within any window of `window` seconds at most `max_calls`
//! acquisitions succeed. The orchestrator uses the non-blocking
//! [`RateLimiter::try_acquire`] and surfaces denial as a retry-later error;
//! [`RateLimiter::acquire`] waits for a slot up to a timeout.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::warn;

const ACQUIRE_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Sliding-window limiter; all state behind one async mutex.
pub struct RateLimiter {
    max_calls: usize,
    window: Duration,
    calls: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(max_calls: usize, window: Duration) -> Self {
        Self {
            max_calls,
            window,
            calls: Mutex::new(VecDeque::new()),
        }
    }

    /// Limiter sized for a single local GPU: 15 calls per minute.
    pub fn default_local() -> Self {
        Self::new(15, Duration::from_secs(60))
    }

    fn prune(&self, calls: &mut VecDeque<Instant>, now: Instant) {
        while let Some(front) = calls.front() {
            if now.duration_since(*front) >= self.window {
                calls.pop_front();
            } else {
                break;
            }
        }
    }

    /// Non-blocking: true iff a slot is free, in which case "now" is recorded.
    pub async fn try_acquire(&self) -> bool {
        let mut calls = self.calls.lock().await;
        let now = Instant::now();
        self.prune(&mut calls, now);
        if calls.len() >= self.max_calls {
            warn!(
                used = calls.len(),
                max = self.max_calls,
                window_s = self.window.as_secs(),
                "rate limit exceeded"
            );
            return false;
        }
        calls.push_back(now);
        true
    }

    /// Blocking variant: polls for a slot until `timeout` elapses.
    pub async fn acquire(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.try_acquire().await {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            tokio::time::sleep(remaining.min(ACQUIRE_POLL_INTERVAL)).await;
        }
    }

    /// Slots left in the current window.
    pub async fn remaining(&self) -> usize {
        let mut calls = self.calls.lock().await;
        self.prune(&mut calls, Instant::now());
        self.max_calls.saturating_sub(calls.len())
    }

    /// Forgets all recorded calls.
    pub async fn reset(&self) {
        self.calls.lock().await.clear();
    }
}
