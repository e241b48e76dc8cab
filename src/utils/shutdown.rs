/// Cancellation token threaded from the scheduler into every suspension point
use std::time::Duration;

use tokio::sync::watch;

use crate::error::{Result, TradingError};

/// Clonable shutdown signal. `trigger` flips every clone; observers either
/// poll `is_shutdown` at loop boundaries or race a sleep against it.
#[derive(Clone)]
pub struct ShutdownToken {
    tx: watch::Sender<bool>,
    rx: watch::Receiver<bool>,
}

impl ShutdownToken {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        ShutdownToken { tx, rx }
    }

    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow()
    }

    /// Short-circuit with `Cancelled` once shutdown was requested
    pub fn check(&self, context: &str) -> Result<()> {
        if self.is_shutdown() {
            return Err(TradingError::Cancelled(context.to_string()));
        }
        Ok(())
    }

    /// Resolves once shutdown is requested
    pub async fn wait(&self) {
        let mut rx = self.rx.clone();
        if *rx.borrow() {
            return;
        }
        let _ = rx.changed().await;
    }

    /// Sleep that wakes early on shutdown. Returns Err(Cancelled) when the
    /// sleep was interrupted.
    pub async fn sleep(&self, duration: Duration, context: &str) -> Result<()> {
        if self.is_shutdown() {
            return Err(TradingError::Cancelled(context.to_string()));
        }
        let mut rx = self.rx.clone();
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = rx.changed() => Err(TradingError::Cancelled(context.to_string())),
        }
    }
}

impl Default for ShutdownToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sleep_interrupted_by_trigger() {
        let token = ShutdownToken::new();
        let sleeper = token.clone();

        let handle = tokio::spawn(async move {
            sleeper.sleep(Duration::from_secs(30), "test").await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        token.trigger();

        let result = handle.await.unwrap();
        assert!(matches!(result, Err(TradingError::Cancelled(_))));
    }

    #[tokio::test]
    async fn test_check_after_trigger() {
        let token = ShutdownToken::new();
        assert!(token.check("loop").is_ok());
        token.trigger();
        assert!(matches!(token.check("loop"), Err(TradingError::Cancelled(_))));
    }
}
