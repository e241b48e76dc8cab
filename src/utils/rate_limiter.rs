/// Token bucket rate limiter
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket with a burst capacity and continuous refill. One bucket is
/// shared per API key; every outbound broker call acquires one token.
pub struct RateLimiter {
    capacity: f64,
    refill_per_second: f64,
    state: Mutex<BucketState>,
}

impl RateLimiter {
    pub fn new(calls_per_second: f64, burst_limit: u32) -> Self {
        RateLimiter {
            capacity: burst_limit as f64,
            refill_per_second: calls_per_second,
            state: Mutex::new(BucketState {
                tokens: burst_limit as f64,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Try to acquire a token, returns true if successful
    pub async fn try_acquire(&self) -> bool {
        let mut state = self.state.lock().await;
        Self::refill(&mut state, self.capacity, self.refill_per_second);

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Wait until a token is available, then acquire it
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                Self::refill(&mut state, self.capacity, self.refill_per_second);

                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return;
                }

                // Time until the next whole token
                let deficit = 1.0 - state.tokens;
                Duration::from_secs_f64(deficit / self.refill_per_second)
            };

            tokio::time::sleep(wait).await;
        }
    }

    /// Refill tokens based on elapsed time
    fn refill(state: &mut BucketState, capacity: f64, refill_per_second: f64) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * refill_per_second).min(capacity);
        state.last_refill = now;
    }

    /// Get current available tokens
    pub async fn available(&self) -> f64 {
        let mut state = self.state.lock().await;
        Self::refill(&mut state, self.capacity, self.refill_per_second);
        state.tokens
    }
}
