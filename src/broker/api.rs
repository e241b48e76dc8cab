/// Broker API surface consumed by the engine
use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{Bar, Exchange, Instrument, Quote, Side};

/// Outbound order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub client_order_id: String,
    pub symbol: String,
    pub token: u32,
    pub exchange: Exchange,
    pub side: Side,
    pub quantity: i64,
    /// None places a market order
    pub price: Option<f64>,
}

/// Broker acknowledgement of a filled order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderAck {
    pub order_id: String,
    pub fill_price: f64,
    pub fill_quantity: i64,
    pub fees: f64,
    pub timestamp: DateTime<Utc>,
}

/// Order book entry as reported by the broker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRecord {
    pub order_id: String,
    pub symbol: String,
    pub side: Side,
    pub quantity: i64,
    pub status: String,
}

/// Net position as reported by the broker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerPosition {
    pub symbol: String,
    pub quantity: i64,
    pub average_price: f64,
}

/// The single external quote/order interface. `BrokerClient` is the only
/// caller; everything else goes through its rate-limited surface.
#[async_trait]
pub trait BrokerApi: Send + Sync {
    async fn list_instruments(&self, exchange: Exchange) -> Result<Vec<Instrument>>;

    /// Bulk quote fetch. Symbols missing from the response are simply
    /// absent from the map.
    async fn quotes(&self, symbols: &[String]) -> Result<HashMap<String, Quote>>;

    async fn historical(
        &self,
        token: u32,
        interval: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Bar>>;

    async fn place_order(&self, order: &OrderRequest) -> Result<OrderAck>;

    async fn orders(&self) -> Result<Vec<OrderRecord>>;

    async fn positions(&self) -> Result<Vec<BrokerPosition>>;

    /// Estimated margin required for a basket of orders
    async fn order_margins(&self, orders: &[OrderRequest]) -> Result<f64>;

    async fn available_margin(&self) -> Result<f64>;
}
