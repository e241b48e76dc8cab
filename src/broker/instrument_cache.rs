/// Instrument cache with TTL, composite NFO+BFO entry and a negative cache
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::types::{Exchange, Instrument};

struct CachedList {
    instruments: Arc<Vec<Instrument>>,
    fetched_at: Instant,
}

/// Instrument lists rarely change intraday; they are cached per exchange
/// and the combined derivatives list is cached once under its own entry so
/// a lookup never pays two fetches.
pub struct InstrumentCache {
    ttl: Duration,
    by_exchange: RwLock<HashMap<Exchange, CachedList>>,
    combined: RwLock<Option<CachedList>>,
    by_symbol: RwLock<HashMap<String, Instrument>>,
    /// Symbols with no resolvable token; logged once per session
    negative: RwLock<HashSet<String>>,
}

impl InstrumentCache {
    pub fn new(ttl: Duration) -> Self {
        InstrumentCache {
            ttl,
            by_exchange: RwLock::new(HashMap::new()),
            combined: RwLock::new(None),
            by_symbol: RwLock::new(HashMap::new()),
            negative: RwLock::new(HashSet::new()),
        }
    }

    fn is_fresh(&self, entry: &CachedList) -> bool {
        entry.fetched_at.elapsed() < self.ttl
    }

    pub async fn get(&self, exchange: Exchange) -> Option<Arc<Vec<Instrument>>> {
        let cache = self.by_exchange.read().await;
        cache
            .get(&exchange)
            .filter(|entry| self.is_fresh(entry))
            .map(|entry| Arc::clone(&entry.instruments))
    }

    pub async fn put(&self, exchange: Exchange, instruments: Vec<Instrument>) -> Arc<Vec<Instrument>> {
        let count = instruments.len();
        let list = Arc::new(instruments);

        {
            let mut by_symbol = self.by_symbol.write().await;
            for inst in list.iter() {
                by_symbol.insert(inst.symbol.clone(), inst.clone());
            }
        }
        {
            let mut cache = self.by_exchange.write().await;
            cache.insert(
                exchange,
                CachedList { instruments: Arc::clone(&list), fetched_at: Instant::now() },
            );
        }
        {
            // The composite entry is rebuilt on next demand
            let mut combined = self.combined.write().await;
            *combined = None;
        }

        info!("📥 Cached {} instruments for {}", count, exchange.as_str());
        list
    }

    pub async fn get_combined(&self) -> Option<Arc<Vec<Instrument>>> {
        let combined = self.combined.read().await;
        combined
            .as_ref()
            .filter(|entry| self.is_fresh(entry))
            .map(|entry| Arc::clone(&entry.instruments))
    }

    pub async fn put_combined(&self, instruments: Vec<Instrument>) -> Arc<Vec<Instrument>> {
        let list = Arc::new(instruments);
        let mut combined = self.combined.write().await;
        *combined = Some(CachedList { instruments: Arc::clone(&list), fetched_at: Instant::now() });
        list
    }

    pub async fn lookup_symbol(&self, symbol: &str) -> Option<Instrument> {
        let by_symbol = self.by_symbol.read().await;
        by_symbol.get(symbol).cloned()
    }

    /// True when the symbol already failed resolution this session
    pub async fn is_negative(&self, symbol: &str) -> bool {
        let negative = self.negative.read().await;
        negative.contains(symbol)
    }

    /// Record an unresolvable symbol; logs only on first sighting
    pub async fn mark_negative(&self, symbol: &str) {
        let mut negative = self.negative.write().await;
        if negative.insert(symbol.to_string()) {
            warn!("Symbol {} has no instrument token; suppressing further lookups", symbol);
        }
    }
}
