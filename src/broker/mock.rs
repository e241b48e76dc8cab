/// Scriptable in-memory broker for unit tests
use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::RwLock;

use crate::broker::api::{BrokerApi, BrokerPosition, OrderAck, OrderRecord, OrderRequest};
use crate::error::{Result, TradingError};
use crate::types::{Bar, Exchange, Instrument, OptionType, Quote};

/// Expiry used by the seeded weekly chains (a Thursday)
pub fn seeded_weekly_expiry() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 2, 5).unwrap()
}

/// Expiry used by the seeded monthly chains (last Thursday of the month)
pub fn seeded_monthly_expiry() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 2, 26).unwrap()
}

#[derive(Default)]
struct MockState {
    quotes: HashMap<String, Quote>,
    instruments: HashMap<Exchange, Vec<Instrument>>,
    bars: HashMap<u32, Vec<Bar>>,
    /// op -> remaining scripted transient failures
    failures: HashMap<String, u32>,
    reject_orders: Option<String>,
    call_counts: HashMap<String, u32>,
    placed: Vec<OrderRequest>,
    available_margin: f64,
    margin_per_order: f64,
}

pub struct MockBroker {
    state: RwLock<MockState>,
}

impl MockBroker {
    pub fn new() -> Self {
        let mut state = MockState::default();
        state.available_margin = 10_000_000.0;
        state.margin_per_order = 100_000.0;
        MockBroker { state: RwLock::new(state) }
    }

    pub async fn set_quote(&self, symbol: &str, price: f64) {
        self.set_quote_at(symbol, price, Utc::now()).await;
    }

    pub async fn set_quote_at(&self, symbol: &str, price: f64, ts: DateTime<Utc>) {
        let mut state = self.state.write().await;
        state.quotes.insert(
            symbol.to_string(),
            Quote {
                symbol: symbol.to_string(),
                last_price: price,
                bid: price - 0.05,
                ask: price + 0.05,
                volume: 100_000,
                open_interest: 50_000,
                last_price_timestamp: ts,
                stale: false,
            },
        );
    }

    pub async fn remove_quote(&self, symbol: &str) {
        let mut state = self.state.write().await;
        state.quotes.remove(symbol);
    }

    pub async fn set_bars(&self, token: u32, bars: Vec<Bar>) {
        let mut state = self.state.write().await;
        state.bars.insert(token, bars);
    }

    pub async fn fail_next(&self, op: &str, count: u32) {
        let mut state = self.state.write().await;
        state.failures.insert(op.to_string(), count);
    }

    pub async fn reject_orders(&self, reason: &str) {
        let mut state = self.state.write().await;
        state.reject_orders = Some(reason.to_string());
    }

    pub async fn set_available_margin(&self, margin: f64) {
        let mut state = self.state.write().await;
        state.available_margin = margin;
    }

    pub async fn set_margin_per_order(&self, margin: f64) {
        let mut state = self.state.write().await;
        state.margin_per_order = margin;
    }

    pub async fn calls(&self, op: &str) -> u32 {
        let state = self.state.read().await;
        state.call_counts.get(op).copied().unwrap_or(0)
    }

    pub async fn placed_orders(&self) -> Vec<OrderRequest> {
        let state = self.state.read().await;
        state.placed.clone()
    }

    /// Seed NFO chains for NIFTY (weekly) and a BFO chain for SENSEX
    /// (monthly), with quotes on every leg and on the index spots.
    pub async fn seed_default_instruments(&self) {
        let mut token = 100u32;
        let mut nfo = Vec::new();
        let mut bfo = Vec::new();

        {
            let mut state = self.state.write().await;
            state.quotes.clear();
        }

        self.set_quote("NIFTY", 24_500.0).await;
        self.set_quote("BANKNIFTY", 51_000.0).await;
        self.set_quote("SENSEX", 81_000.0).await;

        for i in 0..31 {
            let strike = 23_750.0 + 50.0 * i as f64;
            for option_type in [OptionType::CE, OptionType::PE] {
                let symbol = format!("NIFTY26FEB{}{}", strike as i64, option_type.as_str());
                nfo.push(Instrument {
                    token,
                    symbol: symbol.clone(),
                    name: "NIFTY".to_string(),
                    exchange: Exchange::NFO,
                    expiry: Some(seeded_weekly_expiry()),
                    strike: Some(strike),
                    option_type: Some(option_type),
                    lot_size: 75,
                    tick_size: 0.05,
                });
                token += 1;

                // Rough premium shape: deeper in the money is richer
                let intrinsic = match option_type {
                    OptionType::CE => (24_500.0 - strike).max(0.0),
                    OptionType::PE => (strike - 24_500.0).max(0.0),
                };
                self.set_quote(&symbol, intrinsic + 80.0).await;
            }
        }

        for i in 0..21 {
            let strike = 80_000.0 + 100.0 * i as f64;
            for option_type in [OptionType::CE, OptionType::PE] {
                let symbol = format!("SENSEX26FEB{}{}", strike as i64, option_type.as_str());
                bfo.push(Instrument {
                    token,
                    symbol: symbol.clone(),
                    name: "SENSEX".to_string(),
                    exchange: Exchange::BFO,
                    expiry: Some(seeded_monthly_expiry()),
                    strike: Some(strike),
                    option_type: Some(option_type),
                    lot_size: 20,
                    tick_size: 0.05,
                });
                token += 1;

                let intrinsic = match option_type {
                    OptionType::CE => (81_000.0 - strike).max(0.0),
                    OptionType::PE => (strike - 81_000.0).max(0.0),
                };
                self.set_quote(&symbol, intrinsic + 200.0).await;
            }
        }

        let mut state = self.state.write().await;
        state.instruments.insert(Exchange::NFO, nfo);
        state.instruments.insert(Exchange::BFO, bfo);
    }

    async fn record_call(&self, op: &str) -> Result<()> {
        let mut state = self.state.write().await;
        *state.call_counts.entry(op.to_string()).or_insert(0) += 1;

        if let Some(remaining) = state.failures.get_mut(op) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(TradingError::ServerError {
                    status: 503,
                    message: format!("scripted failure on {}", op),
                });
            }
        }
        Ok(())
    }
}

impl Default for MockBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrokerApi for MockBroker {
    async fn list_instruments(&self, exchange: Exchange) -> Result<Vec<Instrument>> {
        self.record_call("list_instruments").await?;
        let state = self.state.read().await;
        Ok(state.instruments.get(&exchange).cloned().unwrap_or_default())
    }

    async fn quotes(&self, symbols: &[String]) -> Result<HashMap<String, Quote>> {
        self.record_call("quotes").await?;
        let state = self.state.read().await;
        Ok(symbols
            .iter()
            .filter_map(|s| state.quotes.get(s).map(|q| (s.clone(), q.clone())))
            .collect())
    }

    async fn historical(
        &self,
        token: u32,
        _interval: &str,
        _from: DateTime<Utc>,
        _to: DateTime<Utc>,
    ) -> Result<Vec<Bar>> {
        self.record_call("historical").await?;
        let state = self.state.read().await;
        Ok(state.bars.get(&token).cloned().unwrap_or_default())
    }

    async fn place_order(&self, order: &OrderRequest) -> Result<OrderAck> {
        self.record_call("place_order").await?;
        let mut state = self.state.write().await;

        if let Some(reason) = &state.reject_orders {
            return Err(TradingError::OrderRejected(reason.clone()));
        }

        let fill_price = order
            .price
            .or_else(|| state.quotes.get(&order.symbol).map(|q| q.last_price))
            .unwrap_or(100.0);

        state.placed.push(order.clone());

        Ok(OrderAck {
            order_id: format!("MOCK-{}", state.placed.len()),
            fill_price,
            fill_quantity: order.quantity,
            fees: 20.0,
            timestamp: Utc::now(),
        })
    }

    async fn orders(&self) -> Result<Vec<OrderRecord>> {
        self.record_call("orders").await?;
        let state = self.state.read().await;
        Ok(state
            .placed
            .iter()
            .enumerate()
            .map(|(i, o)| OrderRecord {
                order_id: format!("MOCK-{}", i + 1),
                symbol: o.symbol.clone(),
                side: o.side,
                quantity: o.quantity,
                status: "COMPLETE".to_string(),
            })
            .collect())
    }

    async fn positions(&self) -> Result<Vec<BrokerPosition>> {
        self.record_call("positions").await?;
        Ok(Vec::new())
    }

    async fn order_margins(&self, orders: &[OrderRequest]) -> Result<f64> {
        self.record_call("order_margins").await?;
        let state = self.state.read().await;
        Ok(state.margin_per_order * orders.len() as f64)
    }

    async fn available_margin(&self) -> Result<f64> {
        self.record_call("available_margin").await?;
        let state = self.state.read().await;
        Ok(state.available_margin)
    }
}
