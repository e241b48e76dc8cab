/// Best-effort dashboard publisher.
///
/// One POST per iteration carries the full snapshot. Failures trip a local
/// circuit breaker and are never allowed to affect trading.
use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Asia::Kolkata;
use reqwest::Client;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::broker::CircuitBreaker;
use crate::config::Config;
use crate::types::{round_currency, PortfolioSnapshot, Trade, TradingMode};

#[derive(Debug, Serialize)]
struct DashboardPosition {
    symbol: String,
    shares: i64,
    entry_price: f64,
    current_price: f64,
    unrealised_pnl: f64,
}

#[derive(Debug, Serialize)]
struct Cumulative {
    total_trades: u64,
    win_rate: f64,
    total_pnl: f64,
}

#[derive(Debug, Serialize)]
struct DashboardUpdate {
    mode: TradingMode,
    timestamp: String,
    cash: f64,
    positions: Vec<DashboardPosition>,
    recent_trades: Vec<Trade>,
    cumulative: Cumulative,
}

pub struct DashboardSink {
    client: Client,
    url: String,
    api_key: String,
    breaker: CircuitBreaker,
    /// Session cookie (and CSRF token) captured from the server, echoed on
    /// subsequent requests
    session: RwLock<Option<(String, Option<String>)>>,
}

impl DashboardSink {
    /// Returns None when no dashboard is configured
    pub fn from_config(config: &Config) -> Option<Self> {
        let url = config.dashboard_url.clone()?;
        let client = Client::builder().timeout(Duration::from_secs(5)).build().ok()?;

        Some(DashboardSink {
            client,
            url: format!("{}/api/update", url.trim_end_matches('/')),
            api_key: config.dashboard_api_key.clone().unwrap_or_default(),
            breaker: CircuitBreaker::new(
                "dashboard",
                config.circuit_breaker_threshold,
                Duration::from_secs(config.circuit_breaker_window_seconds),
                Duration::from_secs(config.circuit_breaker_cooldown_seconds),
            ),
            session: RwLock::new(None),
        })
    }

    fn build_update(
        snapshot: &PortfolioSnapshot,
        prices: &HashMap<String, f64>,
        now: DateTime<Utc>,
    ) -> DashboardUpdate {
        let positions = snapshot
            .positions
            .iter()
            .map(|p| {
                let current = prices.get(&p.symbol).copied().unwrap_or(p.entry_price);
                DashboardPosition {
                    symbol: p.symbol.clone(),
                    shares: p.shares,
                    entry_price: round_currency(p.entry_price),
                    current_price: round_currency(current),
                    unrealised_pnl: round_currency(p.unrealized_pnl(current)),
                }
            })
            .collect();

        let closed = snapshot.counters.winning_trades + snapshot.counters.losing_trades;
        let win_rate = if closed > 0 {
            snapshot.counters.winning_trades as f64 / closed as f64 * 100.0
        } else {
            0.0
        };

        DashboardUpdate {
            mode: snapshot.mode,
            timestamp: now.with_timezone(&Kolkata).to_rfc3339(),
            cash: round_currency(snapshot.cash),
            positions,
            recent_trades: snapshot.recent_trades.clone(),
            cumulative: Cumulative {
                total_trades: snapshot.counters.total_trades,
                win_rate,
                total_pnl: round_currency(snapshot.counters.total_pnl),
            },
        }
    }

    /// Publish one update. Never propagates failure.
    pub async fn publish(
        &self,
        snapshot: &PortfolioSnapshot,
        prices: &HashMap<String, f64>,
        now: DateTime<Utc>,
    ) {
        if self.breaker.admit().await.is_err() {
            debug!("Dashboard breaker open, skipping update");
            return;
        }

        let update = Self::build_update(snapshot, prices, now);

        let mut request = self
            .client
            .post(&self.url)
            .header("X-API-Key", &self.api_key)
            .json(&update);

        {
            let session = self.session.read().await;
            if let Some((cookie, csrf)) = session.as_ref() {
                request = request.header("Cookie", cookie);
                if let Some(token) = csrf {
                    request = request.header("X-CSRF-Token", token);
                }
            }
        }

        match request.send().await {
            Ok(response) if response.status().is_success() => {
                // Capture a session cookie and CSRF token if the server
                // hands one out
                let cookie = response
                    .headers()
                    .get("set-cookie")
                    .and_then(|v| v.to_str().ok())
                    .map(|s| s.split(';').next().unwrap_or(s).to_string());
                let csrf = response
                    .headers()
                    .get("x-csrf-token")
                    .and_then(|v| v.to_str().ok())
                    .map(|s| s.to_string());

                if let Some(cookie) = cookie {
                    let mut session = self.session.write().await;
                    *session = Some((cookie, csrf));
                }

                self.breaker.record_success().await;
            }
            Ok(response) => {
                warn!("Dashboard update rejected: HTTP {}", response.status());
                self.breaker.record_failure().await;
            }
            Err(e) => {
                warn!("Dashboard update failed: {}", e);
                self.breaker.record_failure().await;
            }
        }
    }
}
