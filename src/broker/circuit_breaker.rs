/// Circuit breaker over transient broker failures
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::{Result, TradingError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    window_start: Option<Instant>,
    opened_at: Option<Instant>,
    probe_available: bool,
}

/// CLOSED -> OPEN after `threshold` consecutive transient failures within
/// `window`; OPEN rejects for `cooldown`, then HALF_OPEN admits one probe.
pub struct CircuitBreaker {
    name: String,
    threshold: u32,
    window: Duration,
    cooldown: Duration,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: &str, threshold: u32, window: Duration, cooldown: Duration) -> Self {
        CircuitBreaker {
            name: name.to_string(),
            threshold,
            window,
            cooldown,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                window_start: None,
                opened_at: None,
                probe_available: false,
            }),
        }
    }

    /// Gate a call. Fails with `CircuitOpen` while the breaker is open or
    /// a half-open probe is already in flight.
    pub async fn admit(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;

        match inner.state {
            BreakerState::Closed => Ok(()),
            BreakerState::Open => {
                let elapsed = inner.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= self.cooldown {
                    inner.state = BreakerState::HalfOpen;
                    inner.probe_available = false;
                    info!("Circuit breaker {} half-open, admitting probe", self.name);
                    Ok(())
                } else {
                    Err(TradingError::CircuitOpen(format!(
                        "{}: cooling down {:.0}s more",
                        self.name,
                        (self.cooldown - elapsed).as_secs_f64()
                    )))
                }
            }
            BreakerState::HalfOpen => {
                if inner.probe_available {
                    inner.probe_available = false;
                    Ok(())
                } else {
                    Err(TradingError::CircuitOpen(format!("{}: probe in flight", self.name)))
                }
            }
        }
    }

    pub async fn record_success(&self) {
        let mut inner = self.inner.lock().await;
        if inner.state != BreakerState::Closed {
            info!("Circuit breaker {} closed", self.name);
        }
        inner.state = BreakerState::Closed;
        inner.consecutive_failures = 0;
        inner.window_start = None;
        inner.opened_at = None;
    }

    pub async fn record_failure(&self) {
        let mut inner = self.inner.lock().await;

        match inner.state {
            BreakerState::HalfOpen => {
                // Probe failed, reopen for another cooldown
                inner.state = BreakerState::Open;
                inner.opened_at = Some(Instant::now());
                warn!("Circuit breaker {} probe failed, reopening", self.name);
            }
            BreakerState::Open => {}
            BreakerState::Closed => {
                let now = Instant::now();
                let window_expired = inner
                    .window_start
                    .map(|start| now.duration_since(start) > self.window)
                    .unwrap_or(true);

                if window_expired {
                    inner.window_start = Some(now);
                    inner.consecutive_failures = 1;
                } else {
                    inner.consecutive_failures += 1;
                }

                if inner.consecutive_failures >= self.threshold {
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(now);
                    warn!(
                        "Circuit breaker {} OPEN after {} consecutive failures",
                        self.name, inner.consecutive_failures
                    );
                }
            }
        }
    }

    pub async fn is_open(&self) -> bool {
        let inner = self.inner.lock().await;
        inner.state == BreakerState::Open
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, cooldown_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            threshold,
            Duration::from_secs(60),
            Duration::from_millis(cooldown_ms),
        )
    }

    #[tokio::test]
    async fn test_opens_after_threshold() {
        let b = breaker(3, 1000);

        for _ in 0..3 {
            assert!(b.admit().await.is_ok());
            b.record_failure().await;
        }

        assert!(b.is_open().await);
        assert!(matches!(b.admit().await, Err(TradingError::CircuitOpen(_))));
    }

    #[tokio::test]
    async fn test_probe_after_cooldown_then_close() {
        let b = breaker(2, 50);
        b.record_failure().await;
        b.record_failure().await;
        assert!(matches!(b.admit().await, Err(TradingError::CircuitOpen(_))));

        tokio::time::sleep(Duration::from_millis(60)).await;

        // One probe admitted, a second concurrent call is rejected
        assert!(b.admit().await.is_ok());
        assert!(matches!(b.admit().await, Err(TradingError::CircuitOpen(_))));

        b.record_success().await;
        assert!(b.admit().await.is_ok());
    }

    #[tokio::test]
    async fn test_probe_failure_reopens() {
        let b = breaker(2, 50);
        b.record_failure().await;
        b.record_failure().await;

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(b.admit().await.is_ok());
        b.record_failure().await;

        // Reopened: rejected again until another cooldown passes
        assert!(matches!(b.admit().await, Err(TradingError::CircuitOpen(_))));
    }

    #[tokio::test]
    async fn test_success_resets_failure_streak() {
        let b = breaker(3, 1000);
        b.record_failure().await;
        b.record_failure().await;
        b.record_success().await;
        b.record_failure().await;
        b.record_failure().await;

        assert!(!b.is_open().await);
    }
}
