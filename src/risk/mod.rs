/// Pre-entry risk and compliance checks.
///
/// Every candidate entry passes the full chain before it reaches the
/// ledger: 1%-rule sizing, risk-reward floor, position-value cap,
/// per-underlying concentration, the F&O ban list, a live-mode margin
/// check and duplicate-order fingerprinting.
use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use tokio::sync::Mutex;
use tracing::debug;

use crate::broker::{BrokerClient, OrderRequest};
use crate::config::Config;
use crate::error::{Result, TradingError};
use crate::types::{Exchange, PortfolioSnapshot, Side, TradingMode, Underlying};
use crate::utils::order_fingerprint;

pub mod ban_list;

pub use ban_list::{BanList, BanListSource, FileBanList, StaticBanList};

/// A new-entry candidate as produced by the aggregation stage
#[derive(Debug, Clone)]
pub struct EntryCandidate {
    pub symbol: String,
    pub underlying: Underlying,
    pub token: u32,
    pub exchange: Exchange,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub lot_size: i64,
    pub expiry: Option<NaiveDate>,
    pub confidence: f64,
    pub strategy: String,
}

/// Candidate that survived every check, sized in whole lots
#[derive(Debug, Clone)]
pub struct SizedOrder {
    pub candidate: EntryCandidate,
    pub lots: i64,
    pub shares: i64,
}

pub struct RiskManager {
    mode: TradingMode,
    risk_pct: f64,
    min_rrr: f64,
    max_position_pct: f64,
    max_positions_per_underlying: usize,
    duplicate_window: Duration,
    ban_list: Arc<BanList>,
    broker: Option<Arc<BrokerClient>>,
    /// fingerprint -> submission time, pruned as it is consulted
    recent_fingerprints: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl RiskManager {
    pub fn new(config: &Config, ban_list: Arc<BanList>, broker: Option<Arc<BrokerClient>>) -> Self {
        RiskManager {
            mode: config.mode,
            risk_pct: config.effective_risk_pct(),
            min_rrr: config.min_rrr,
            max_position_pct: config.max_position_pct,
            max_positions_per_underlying: config.max_positions_per_underlying,
            duplicate_window: Duration::seconds(config.duplicate_window_seconds),
            ban_list,
            broker,
            recent_fingerprints: Mutex::new(HashMap::new()),
        }
    }

    /// Lots by the 1% rule: floor(equity * risk_pct / risk_per_lot).
    /// Returns 0 when the stop sits on (or above) the entry.
    pub fn size_lots(&self, equity: f64, entry: f64, stop: f64, lot_size: i64) -> i64 {
        let risk_per_lot = (entry - stop) * lot_size as f64;
        if risk_per_lot <= 0.0 {
            return 0;
        }
        let max_loss = equity * self.risk_pct;
        (max_loss / risk_per_lot).floor() as i64
    }

    /// Run the full chain. Returns the sized order or the first structured
    /// rejection.
    pub async fn check_entry(
        &self,
        candidate: &EntryCandidate,
        snapshot: &PortfolioSnapshot,
        equity: f64,
        now: DateTime<Utc>,
    ) -> Result<SizedOrder> {
        // Position sizing (1% rule)
        let lots = self.size_lots(
            equity,
            candidate.entry_price,
            candidate.stop_loss,
            candidate.lot_size,
        );
        if lots < 1 {
            return Err(TradingError::TradeTooRisky(format!(
                "{}: risk per lot exceeds {:.2}% of equity",
                candidate.symbol,
                self.risk_pct * 100.0
            )));
        }
        let shares = lots * candidate.lot_size;

        // Risk-reward ratio
        let risk = candidate.entry_price - candidate.stop_loss;
        let reward = candidate.take_profit - candidate.entry_price;
        let rrr = if risk > 0.0 { reward / risk } else { 0.0 };
        if rrr < self.min_rrr {
            return Err(TradingError::RiskRewardTooLow(format!(
                "{}: rrr {:.2} < {:.2}",
                candidate.symbol, rrr, self.min_rrr
            )));
        }

        // Per-position value cap
        let position_value = shares as f64 * candidate.entry_price;
        if position_value > self.max_position_pct * equity {
            return Err(TradingError::PositionTooLarge(format!(
                "{}: value {:.0} > {:.0}% of equity",
                candidate.symbol,
                position_value,
                self.max_position_pct * 100.0
            )));
        }

        // Concentration per underlying group
        let group = candidate.underlying.as_str();
        let open_in_group = snapshot.positions.iter().filter(|p| p.sector == group).count();
        if open_in_group >= self.max_positions_per_underlying {
            return Err(TradingError::ConcentrationLimit(format!(
                "{}: {} open positions in {}",
                candidate.symbol, open_in_group, group
            )));
        }

        // F&O ban list
        if self.ban_list.is_banned(group).await {
            return Err(TradingError::BannedUnderlying(group.to_string()));
        }

        // Margin check (live only)
        if self.mode == TradingMode::Live {
            if let Some(broker) = &self.broker {
                let order = OrderRequest {
                    client_order_id: String::new(),
                    symbol: candidate.symbol.clone(),
                    token: candidate.token,
                    exchange: candidate.exchange,
                    side: Side::Buy,
                    quantity: shares,
                    price: Some(candidate.entry_price),
                };
                let required = broker.order_margins(std::slice::from_ref(&order)).await?;
                let available = broker.available_margin().await?;
                if required > available * 0.95 {
                    return Err(TradingError::InsufficientMargin(format!(
                        "{}: need {:.0}, have {:.0}",
                        candidate.symbol, required, available
                    )));
                }
            }
        }

        // Duplicate / self-cross fingerprint
        let fingerprint = order_fingerprint(
            &candidate.symbol,
            Side::Buy,
            shares,
            candidate.entry_price,
            snapshot.mode.as_str(),
        );
        {
            let mut recent = self.recent_fingerprints.lock().await;
            recent.retain(|_, at| now - *at < self.duplicate_window);
            if recent.contains_key(&fingerprint) {
                return Err(TradingError::DuplicateOrder(candidate.symbol.clone()));
            }
            recent.insert(fingerprint, now);
        }

        debug!(
            "{}: sized {} lots ({} shares), rrr {:.2}",
            candidate.symbol, lots, shares, rrr
        );

        Ok(SizedOrder { candidate: candidate.clone(), lots, shares })
    }
}
