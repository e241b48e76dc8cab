/// HTTP implementation of the broker API
use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::broker::api::{BrokerApi, BrokerPosition, OrderAck, OrderRecord, OrderRequest};
use crate::error::{Result, TradingError};
use crate::types::{Bar, Exchange, Instrument, OptionType, Quote};

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    status: bool,
    message: Option<String>,
    #[serde(rename = "errorcode")]
    error_code: Option<String>,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct RawInstrument {
    token: u32,
    symbol: String,
    name: String,
    expiry: Option<String>,
    strike: Option<f64>,
    #[serde(rename = "instrumenttype")]
    instrument_type: Option<String>,
    #[serde(rename = "lotsize")]
    lot_size: i64,
    #[serde(rename = "ticksize")]
    tick_size: f64,
}

#[derive(Debug, Serialize)]
struct QuoteRequest<'a> {
    symbols: &'a [String],
}

#[derive(Debug, Deserialize)]
struct RawQuote {
    symbol: String,
    ltp: f64,
    bid: f64,
    ask: f64,
    volume: i64,
    #[serde(rename = "openinterest", default)]
    open_interest: i64,
    #[serde(rename = "ltt")]
    last_trade_time: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct CandleRequest {
    token: u32,
    interval: String,
    #[serde(rename = "fromdate")]
    from_date: String,
    #[serde(rename = "todate")]
    to_date: String,
}

#[derive(Debug, Serialize)]
struct PlaceOrderRequest<'a> {
    #[serde(rename = "clientorderid")]
    client_order_id: &'a str,
    #[serde(rename = "tradingsymbol")]
    trading_symbol: &'a str,
    #[serde(rename = "symboltoken")]
    symbol_token: u32,
    exchange: &'a str,
    #[serde(rename = "transactiontype")]
    transaction_type: &'a str,
    quantity: i64,
    price: Option<f64>,
    #[serde(rename = "ordertype")]
    order_type: &'a str,
    duration: &'a str,
}

#[derive(Debug, Deserialize)]
struct RawOrderAck {
    #[serde(rename = "orderid")]
    order_id: String,
    #[serde(rename = "averageprice")]
    average_price: f64,
    #[serde(rename = "filledquantity")]
    filled_quantity: i64,
    fees: f64,
    timestamp: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct RawMargin {
    #[serde(rename = "totalmargin")]
    total_margin: f64,
}

#[derive(Debug, Deserialize)]
struct RawAvailableMargin {
    #[serde(rename = "availablecash")]
    available_cash: f64,
}

/// Thin typed client over the broker's REST gateway. Authentication is a
/// static API key; token lifecycle management lives outside the engine.
pub struct HttpBroker {
    client: Client,
    base_url: String,
    api_key: String,
}

impl HttpBroker {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(TradingError::HttpError)?;

        Ok(HttpBroker {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    fn status_error(status: StatusCode, body: &str) -> TradingError {
        match status {
            StatusCode::TOO_MANY_REQUESTS => {
                TradingError::TooManyRequests(format!("HTTP 429: {}", body))
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                TradingError::AuthFailed(format!("HTTP {}: {}", status.as_u16(), body))
            }
            s if s.is_server_error() => {
                TradingError::ServerError { status: s.as_u16(), message: body.to_string() }
            }
            s => TradingError::BrokerApiError {
                code: s.as_u16().to_string(),
                message: body.to_string(),
            },
        }
    }

    async fn request<T, B>(&self, method: reqwest::Method, path: &str, body: Option<&B>) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let url = format!("{}{}", self.base_url, path);
        let mut req = self
            .client
            .request(method, &url)
            .header("X-API-Key", &self.api_key)
            .header("Accept", "application/json");

        if let Some(body) = body {
            req = req.json(body);
        }

        let response = req.send().await?;
        let status = response.status();
        let text = response.text().await?;

        debug!("Broker {} -> {}", path, status);

        if !status.is_success() {
            return Err(Self::status_error(status, &text));
        }

        let envelope: Envelope<T> = serde_json::from_str(&text)?;
        if !envelope.status {
            return Err(TradingError::BrokerApiError {
                code: envelope.error_code.unwrap_or_default(),
                message: envelope.message.unwrap_or_default(),
            });
        }

        envelope.data.ok_or_else(|| {
            TradingError::BrokerApiError {
                code: "EMPTY".to_string(),
                message: format!("No data in {} response", path),
            }
        })
    }

    fn convert_instrument(raw: RawInstrument, exchange: Exchange) -> Instrument {
        let option_type = match raw.instrument_type.as_deref() {
            Some("CE") => Some(OptionType::CE),
            Some("PE") => Some(OptionType::PE),
            _ => None,
        };
        let expiry = raw
            .expiry
            .as_deref()
            .and_then(|e| NaiveDate::parse_from_str(e, "%Y-%m-%d").ok());

        Instrument {
            token: raw.token,
            symbol: raw.symbol,
            name: raw.name,
            exchange,
            expiry,
            strike: raw.strike.filter(|s| *s > 0.0),
            option_type,
            lot_size: raw.lot_size,
            tick_size: raw.tick_size,
        }
    }
}

#[async_trait]
impl BrokerApi for HttpBroker {
    async fn list_instruments(&self, exchange: Exchange) -> Result<Vec<Instrument>> {
        let raw: Vec<RawInstrument> = self
            .request(
                reqwest::Method::GET,
                &format!("/api/v1/instruments?exchange={}", exchange.as_str()),
                None::<&()>,
            )
            .await?;

        Ok(raw
            .into_iter()
            .map(|r| Self::convert_instrument(r, exchange))
            .collect())
    }

    async fn quotes(&self, symbols: &[String]) -> Result<HashMap<String, Quote>> {
        let raw: Vec<RawQuote> = self
            .request(
                reqwest::Method::POST,
                "/api/v1/quotes",
                Some(&QuoteRequest { symbols }),
            )
            .await?;

        Ok(raw
            .into_iter()
            .map(|r| {
                (
                    r.symbol.clone(),
                    Quote {
                        symbol: r.symbol,
                        last_price: r.ltp,
                        bid: r.bid,
                        ask: r.ask,
                        volume: r.volume,
                        open_interest: r.open_interest,
                        last_price_timestamp: r.last_trade_time,
                        stale: false,
                    },
                )
            })
            .collect())
    }

    async fn historical(
        &self,
        token: u32,
        interval: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Bar>> {
        let body = CandleRequest {
            token,
            interval: interval.to_string(),
            from_date: from.format("%Y-%m-%d %H:%M").to_string(),
            to_date: to.format("%Y-%m-%d %H:%M").to_string(),
        };

        // Candles arrive as [timestamp, open, high, low, close, volume] rows
        let raw: Vec<(DateTime<Utc>, f64, f64, f64, f64, i64)> = self
            .request(reqwest::Method::POST, "/api/v1/historical", Some(&body))
            .await?;

        Ok(raw
            .into_iter()
            .map(|(timestamp, open, high, low, close, volume)| Bar {
                timestamp,
                open,
                high,
                low,
                close,
                volume,
            })
            .collect())
    }

    async fn place_order(&self, order: &OrderRequest) -> Result<OrderAck> {
        let body = PlaceOrderRequest {
            client_order_id: &order.client_order_id,
            trading_symbol: &order.symbol,
            symbol_token: order.token,
            exchange: order.exchange.as_str(),
            transaction_type: order.side.as_str(),
            quantity: order.quantity,
            price: order.price,
            order_type: if order.price.is_some() { "LIMIT" } else { "MARKET" },
            duration: "DAY",
        };

        let raw: RawOrderAck = self
            .request(reqwest::Method::POST, "/api/v1/orders", Some(&body))
            .await
            .map_err(|e| match e {
                // A validation failure on order placement is a rejection,
                // not a retryable fault
                TradingError::BrokerApiError { code, message } => {
                    TradingError::OrderRejected(format!("{}: {}", code, message))
                }
                other => other,
            })?;

        Ok(OrderAck {
            order_id: raw.order_id,
            fill_price: raw.average_price,
            fill_quantity: raw.filled_quantity,
            fees: raw.fees,
            timestamp: raw.timestamp,
        })
    }

    async fn orders(&self) -> Result<Vec<OrderRecord>> {
        self.request(reqwest::Method::GET, "/api/v1/orders", None::<&()>).await
    }

    async fn positions(&self) -> Result<Vec<BrokerPosition>> {
        self.request(reqwest::Method::GET, "/api/v1/positions", None::<&()>).await
    }

    async fn order_margins(&self, orders: &[OrderRequest]) -> Result<f64> {
        let raw: RawMargin = self
            .request(reqwest::Method::POST, "/api/v1/margins/orders", Some(&orders.to_vec()))
            .await?;
        Ok(raw.total_margin)
    }

    async fn available_margin(&self) -> Result<f64> {
        let raw: RawAvailableMargin = self
            .request(reqwest::Method::GET, "/api/v1/margins", None::<&()>)
            .await?;
        Ok(raw.available_cash)
    }
}
