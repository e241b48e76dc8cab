pub mod backoff;
pub mod fingerprint;
pub mod rate_limiter;
pub mod shutdown;

pub use backoff::RetryPolicy;
pub use fingerprint::{generate_idempotency_key, order_fingerprint, trade_checksum};
pub use rate_limiter::RateLimiter;
pub use shutdown::ShutdownToken;
