/// Retry backoff policy for transient broker failures
use std::time::Duration;

use rand::Rng;

/// Exponential backoff with full jitter: the actual delay is drawn
/// uniformly from [0, min(cap, base * 2^attempt)].
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base: Duration,
    pub cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            base: Duration::from_secs(1),
            cap: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = self.base.as_secs_f64() * 2f64.powi(attempt.saturating_sub(1) as i32);
        let ceiling = exp.min(self.cap.as_secs_f64());
        let jittered = rand::thread_rng().gen_range(0.0..=ceiling);
        Duration::from_secs_f64(jittered)
    }
}
