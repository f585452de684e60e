//! Rolling-window rate limiter.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Admits at most `capacity` acquisitions per rolling `window`. Matches the
/// per-queue limiter the workers run under (default 10 jobs per second).
pub struct TokenBucket {
    capacity: usize,
    window: Duration,
    stamps: Mutex<VecDeque<Instant>>,
}

impl TokenBucket {
    pub fn new(capacity: usize, window: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            window,
            stamps: Mutex::new(VecDeque::new()),
        }
    }

    /// Wait until an admission slot is free, then take it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut stamps = self.stamps.lock().unwrap();
                let now = Instant::now();
                while let Some(front) = stamps.front() {
                    if now.duration_since(*front) >= self.window {
                        stamps.pop_front();
                    } else {
                        break;
                    }
                }
                if stamps.len() < self.capacity {
                    stamps.push_back(now);
                    return;
                }
                // Oldest stamp leaving the window frees the next slot.
                self.window - now.duration_since(*stamps.front().unwrap())
            };
            tokio::time::sleep(wait).await;
        }
    }
}
