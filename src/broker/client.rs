/// Rate-limited, cache-backed, retry-wrapped access to the broker API
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::broker::api::{BrokerApi, BrokerPosition, OrderAck, OrderRecord, OrderRequest};
use crate::broker::circuit_breaker::CircuitBreaker;
use crate::broker::instrument_cache::InstrumentCache;
use crate::config::Config;
use crate::error::{Result, TradingError};
use crate::types::{Bar, Exchange, Instrument, Quote};
use crate::utils::{RateLimiter, RetryPolicy, ShutdownToken};

struct CachedQuote {
    quote: Quote,
    fetched_at: Instant,
}

/// The serialisation point for all outbound broker traffic. Every call
/// passes, in order: cancellation check, rate limiter, circuit breaker,
/// per-call timeout, transient-error retry with backoff.
pub struct BrokerClient {
    api: Arc<dyn BrokerApi>,
    limiter: RateLimiter,
    breaker: CircuitBreaker,
    retry: RetryPolicy,
    call_timeout: Duration,
    instruments: InstrumentCache,
    quote_ttl: Duration,
    quote_cache: RwLock<HashMap<String, CachedQuote>>,
    shutdown: ShutdownToken,
}

impl BrokerClient {
    pub fn new(api: Arc<dyn BrokerApi>, config: &Config, shutdown: ShutdownToken) -> Self {
        BrokerClient {
            api,
            limiter: RateLimiter::new(config.calls_per_second, config.burst_limit),
            breaker: CircuitBreaker::new(
                "broker",
                config.circuit_breaker_threshold,
                Duration::from_secs(config.circuit_breaker_window_seconds),
                Duration::from_secs(config.circuit_breaker_cooldown_seconds),
            ),
            retry: RetryPolicy::default(),
            call_timeout: Duration::from_secs(config.broker_call_timeout_seconds),
            instruments: InstrumentCache::new(Duration::from_secs(
                config.instrument_cache_ttl_seconds,
            )),
            quote_ttl: Duration::from_secs(config.quote_cache_ttl_seconds),
            quote_cache: RwLock::new(HashMap::new()),
            shutdown,
        }
    }

    /// Decorated call path shared by every entry point
    async fn call<T, Fut>(&self, op: &str, make: impl Fn() -> Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        let mut retries = 0u32;
        loop {
            self.shutdown.check(op)?;
            self.limiter.acquire().await;
            self.breaker.admit().await?;

            let outcome = match tokio::time::timeout(self.call_timeout, make()).await {
                Ok(result) => result,
                Err(_) => Err(TradingError::Timeout(op.to_string())),
            };

            match outcome {
                Ok(value) => {
                    self.breaker.record_success().await;
                    return Ok(value);
                }
                Err(e) if e.is_transient() => {
                    self.breaker.record_failure().await;
                    retries += 1;
                    if retries > self.retry.max_attempts {
                        return Err(e);
                    }
                    let delay = self.retry.delay(retries);
                    warn!(
                        "Broker call {} failed ({}), retry {}/{} in {:.1}s",
                        op,
                        e.error_code(),
                        retries,
                        self.retry.max_attempts,
                        delay.as_secs_f64()
                    );
                    self.shutdown.sleep(delay, op).await?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Instrument list for one exchange, cached for 30 minutes
    pub async fn get_instruments(&self, exchange: Exchange) -> Result<Arc<Vec<Instrument>>> {
        if let Some(list) = self.instruments.get(exchange).await {
            return Ok(list);
        }

        let api = Arc::clone(&self.api);
        let fetched = self
            .call("list_instruments", || {
                let api = Arc::clone(&api);
                async move { api.list_instruments(exchange).await }
            })
            .await?;

        Ok(self.instruments.put(exchange, fetched).await)
    }

    /// Combined NFO+BFO instrument set, cached under a composite key
    pub async fn get_combined_instruments(&self) -> Result<Arc<Vec<Instrument>>> {
        if let Some(list) = self.instruments.get_combined().await {
            return Ok(list);
        }

        let nfo = self.get_instruments(Exchange::NFO).await?;
        let bfo = self.get_instruments(Exchange::BFO).await?;

        let mut combined = Vec::with_capacity(nfo.len() + bfo.len());
        combined.extend(nfo.iter().cloned());
        combined.extend(bfo.iter().cloned());

        Ok(self.instruments.put_combined(combined).await)
    }

    /// Resolve a trading symbol to its instrument. Unresolvable symbols go
    /// into the negative cache and short-circuit on repeat lookups.
    pub async fn resolve_instrument(&self, symbol: &str) -> Result<Instrument> {
        if self.instruments.is_negative(symbol).await {
            return Err(TradingError::InstrumentNotFound(symbol.to_string()));
        }

        if let Some(inst) = self.instruments.lookup_symbol(symbol).await {
            return Ok(inst);
        }

        self.get_combined_instruments().await?;

        if let Some(inst) = self.instruments.lookup_symbol(symbol).await {
            return Ok(inst);
        }

        self.instruments.mark_negative(symbol).await;
        Err(TradingError::InstrumentNotFound(symbol.to_string()))
    }

    /// Bulk quote fetch with a short TTL cache. Quotes missing from the
    /// broker response keep their previous value flagged stale; timestamps
    /// never move backwards.
    pub async fn get_quotes(
        &self,
        symbols: &[String],
        force_refresh: bool,
    ) -> Result<HashMap<String, Quote>> {
        if symbols.is_empty() {
            return Ok(HashMap::new());
        }

        let mut result = HashMap::new();
        let mut need: Vec<String> = Vec::new();

        if force_refresh {
            need = symbols.to_vec();
        } else {
            let cache = self.quote_cache.read().await;
            for symbol in symbols {
                match cache.get(symbol) {
                    Some(entry) if entry.fetched_at.elapsed() < self.quote_ttl => {
                        result.insert(symbol.clone(), entry.quote.clone());
                    }
                    _ => need.push(symbol.clone()),
                }
            }
        }

        if need.is_empty() {
            return Ok(result);
        }

        let api = Arc::clone(&self.api);
        let wanted = need.clone();
        let fetched = self
            .call("quotes", || {
                let api = Arc::clone(&api);
                let wanted = wanted.clone();
                async move { api.quotes(&wanted).await }
            })
            .await?;

        let mut cache = self.quote_cache.write().await;
        for symbol in &need {
            match fetched.get(symbol) {
                Some(fresh) => {
                    let mut quote = fresh.clone();
                    if let Some(prev) = cache.get(symbol) {
                        if quote.last_price_timestamp < prev.quote.last_price_timestamp {
                            quote = prev.quote.clone();
                        }
                    }
                    quote.stale = false;
                    cache.insert(
                        symbol.clone(),
                        CachedQuote { quote: quote.clone(), fetched_at: Instant::now() },
                    );
                    result.insert(symbol.clone(), quote);
                }
                None => {
                    if let Some(entry) = cache.get_mut(symbol) {
                        entry.quote.stale = true;
                        result.insert(symbol.clone(), entry.quote.clone());
                        debug!("Quote for {} missing from response; keeping stale value", symbol);
                    }
                }
            }
        }

        Ok(result)
    }

    pub async fn get_historical(
        &self,
        token: u32,
        interval: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Bar>> {
        let api = Arc::clone(&self.api);
        let interval = interval.to_string();
        self.call("historical", || {
            let api = Arc::clone(&api);
            let interval = interval.clone();
            async move { api.historical(token, &interval, from, to).await }
        })
        .await
    }

    pub async fn place_order(&self, order: &OrderRequest) -> Result<OrderAck> {
        let api = Arc::clone(&self.api);
        let order = order.clone();
        self.call("place_order", || {
            let api = Arc::clone(&api);
            let order = order.clone();
            async move { api.place_order(&order).await }
        })
        .await
    }

    pub async fn get_orders(&self) -> Result<Vec<OrderRecord>> {
        let api = Arc::clone(&self.api);
        self.call("orders", || {
            let api = Arc::clone(&api);
            async move { api.orders().await }
        })
        .await
    }

    pub async fn get_positions(&self) -> Result<Vec<BrokerPosition>> {
        let api = Arc::clone(&self.api);
        self.call("positions", || {
            let api = Arc::clone(&api);
            async move { api.positions().await }
        })
        .await
    }

    pub async fn order_margins(&self, orders: &[OrderRequest]) -> Result<f64> {
        let api = Arc::clone(&self.api);
        let orders = orders.to_vec();
        self.call("order_margins", || {
            let api = Arc::clone(&api);
            let orders = orders.clone();
            async move { api.order_margins(&orders).await }
        })
        .await
    }

    pub async fn available_margin(&self) -> Result<f64> {
        let api = Arc::clone(&self.api);
        self.call("available_margin", || {
            let api = Arc::clone(&api);
            async move { api.available_margin().await }
        })
        .await
    }

    pub async fn breaker_open(&self) -> bool {
        self.breaker.is_open().await
    }
}
