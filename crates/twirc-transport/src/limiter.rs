//! Rolling-window rate limiter.
//!
//! Chat servers count messages per rolling window: at most `capacity` sends
//! in any `window`-long interval. A refill-rate token bucket lets up to
//! twice the capacity through around a refill boundary, so this limiter
//! keeps the timestamps of the last `capacity` sends instead and waits for
//! the oldest one to leave the window.
//!
//! ```text
//!   capacity = 3, window = 1s
//!
//!   t=0.0  ■ ■ ■            (three sends, log full)
//!   t=0.2  ·                (fourth waits for t=1.0)
//!   t=1.0  ■                (oldest expired)
//! ```

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::{Instant, sleep_until};

/// `capacity` sends per `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub capacity: usize,
    pub window: Duration,
}

impl RateLimit {
    pub const fn new(capacity: usize, window: Duration) -> Self {
        Self { capacity, window }
    }
}

/// Sliding-window limiter owned by a single drain task.
#[derive(Debug)]
pub struct WindowLimiter {
    limit: RateLimit,
    sent: VecDeque<Instant>,
}

impl WindowLimiter {
    /// Creates a limiter. A zero capacity is treated as one.
    pub fn new(limit: RateLimit) -> Self {
        let limit = RateLimit {
            capacity: limit.capacity.max(1),
            window: limit.window,
        };
        Self {
            sent: VecDeque::with_capacity(limit.capacity),
            limit,
        }
    }

    pub fn limit(&self) -> RateLimit {
        self.limit
    }

    /// Waits until a send is allowed and records it.
    ///
    /// Cancel-safe: nothing is recorded unless the future completes.
    pub async fn acquire(&mut self) {
        loop {
            let now = Instant::now();
            self.expire(now);
            if self.sent.len() < self.limit.capacity {
                self.sent.push_back(now);
                return;
            }
            match self.sent.front() {
                Some(oldest) => sleep_until(*oldest + self.limit.window).await,
                None => return,
            }
        }
    }

    /// Sends still allowed in the current window.
    pub fn available(&mut self) -> usize {
        self.expire(Instant::now());
        self.limit.capacity - self.sent.len()
    }

    fn expire(&mut self, now: Instant) {
        while let Some(oldest) = self.sent.front() {
            if now.duration_since(*oldest) >= self.limit.window {
                self.sent.pop_front();
            } else {
                break;
            }
        }
    }
}
