pub mod api;
pub mod circuit_breaker;
pub mod client;
pub mod http;
pub mod instrument_cache;

#[cfg(test)]
pub mod mock;

pub use api::{BrokerApi, BrokerPosition, OrderAck, OrderRecord, OrderRequest};
pub use circuit_breaker::CircuitBreaker;
pub use client::BrokerClient;
pub use http::HttpBroker;
pub use instrument_cache::InstrumentCache;
