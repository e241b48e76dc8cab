/// Thread-safe cash and position accounting.
///
/// A single write lock covers cash, positions, the trade log and the
/// cumulative counters: no observer can ever see cash debited without the
/// matching position, and `snapshot` reads everything under one read-lock
/// acquisition.
use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::RwLock;
use tracing::info;

use crate::error::{Result, TradingError};
use crate::positions::TrailingUpdate;
use crate::types::{
    PortfolioCounters, PortfolioSnapshot, Position, Side, Trade, TradingMode,
};

const RECENT_TRADES: usize = 50;

/// Metadata a buy carries into the ledger
#[derive(Debug, Clone)]
pub struct EntryContext {
    pub sector: String,
    pub confidence: f64,
    pub strategy: String,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub expiry: Option<NaiveDate>,
    pub lot_size: i64,
    /// Timestamp of the bar the decision was taken on
    pub bar_ts: DateTime<Utc>,
    pub at: DateTime<Utc>,
}

/// Metadata a sell carries into the ledger
#[derive(Debug, Clone)]
pub struct SellContext {
    pub bar_ts: DateTime<Utc>,
    pub at: DateTime<Utc>,
}

struct PortfolioInner {
    cash: f64,
    positions: HashMap<String, Position>,
    trades: Vec<Trade>,
    counters: PortfolioCounters,
    sequence: u64,
}

pub struct Portfolio {
    mode: TradingMode,
    trading_day: NaiveDate,
    initial_cash: f64,
    inner: RwLock<PortfolioInner>,
}

impl Portfolio {
    pub fn new(mode: TradingMode, trading_day: NaiveDate, initial_cash: f64) -> Self {
        Portfolio {
            mode,
            trading_day,
            initial_cash,
            inner: RwLock::new(PortfolioInner {
                cash: initial_cash,
                positions: HashMap::new(),
                trades: Vec::new(),
                counters: PortfolioCounters::default(),
                sequence: 0,
            }),
        }
    }

    pub fn mode(&self) -> TradingMode {
        self.mode
    }

    pub fn trading_day(&self) -> NaiveDate {
        self.trading_day
    }

    pub fn initial_cash(&self) -> f64 {
        self.initial_cash
    }

    fn next_trade_id(&self, sequence: u64) -> String {
        format!("{}-{}-{:04}", self.trading_day, self.mode.as_str(), sequence)
    }

    /// Open or extend a long position. Cash is debited and the position
    /// upserted under one lock acquisition.
    pub async fn buy(
        &self,
        symbol: &str,
        shares: i64,
        price: f64,
        fees: f64,
        ctx: EntryContext,
    ) -> Result<Trade> {
        if symbol.is_empty() {
            return Err(TradingError::InvalidSymbol("empty symbol".to_string()));
        }
        if shares <= 0 {
            return Err(TradingError::InvalidShares(format!("buy {} shares", shares)));
        }

        let mut inner = self.inner.write().await;

        let cost = shares as f64 * price + fees;
        if inner.cash < cost {
            return Err(TradingError::InsufficientFunds {
                needed: cost,
                available: inner.cash,
            });
        }

        inner.cash -= cost;

        match inner.positions.get_mut(symbol) {
            Some(existing) => {
                // Blend the average entry price across the add-on
                let old_shares = existing.shares as f64;
                let new_shares = old_shares + shares as f64;
                existing.entry_price =
                    (existing.entry_price * old_shares + price * shares as f64) / new_shares;
                existing.shares += shares;
                existing.entry_bar_ts = ctx.bar_ts;
                existing.highest_price_seen = existing.highest_price_seen.max(price);
            }
            None => {
                inner.positions.insert(
                    symbol.to_string(),
                    Position {
                        symbol: symbol.to_string(),
                        shares,
                        entry_price: price,
                        entry_time: ctx.at,
                        entry_bar_ts: ctx.bar_ts,
                        stop_loss: ctx.stop_loss,
                        take_profit: ctx.take_profit,
                        trailing_active: false,
                        trailing_stop: None,
                        highest_price_seen: price,
                        sector: ctx.sector.clone(),
                        confidence_at_entry: ctx.confidence,
                        strategy: ctx.strategy.clone(),
                        expiry: ctx.expiry,
                        lot_size: ctx.lot_size,
                    },
                );
            }
        }

        inner.sequence += 1;
        inner.counters.total_trades += 1;
        let trade = Trade {
            trade_id: self.next_trade_id(inner.sequence),
            sequence_number: inner.sequence,
            timestamp: ctx.at,
            symbol: symbol.to_string(),
            side: Side::Buy,
            shares,
            price,
            fees,
            pnl: None,
            sector: ctx.sector,
            confidence: ctx.confidence,
            strategy: ctx.strategy,
            cash_balance_after: inner.cash,
        };
        inner.trades.push(trade.clone());

        info!(
            "Buy {} x {} @ {:.2} (fees {:.2}) cash {:.2}",
            shares, symbol, price, fees, inner.cash
        );

        Ok(trade)
    }

    /// Close (part of) a position. Unless `force_allow_immediate`, a sell
    /// on the bar that opened the position is rejected to prevent a
    /// same-bar self-cross.
    pub async fn sell(
        &self,
        symbol: &str,
        shares: i64,
        price: f64,
        fees: f64,
        ctx: SellContext,
        force_allow_immediate: bool,
    ) -> Result<Trade> {
        if shares <= 0 {
            return Err(TradingError::InvalidShares(format!("sell {} shares", shares)));
        }

        let mut inner = self.inner.write().await;

        let position = inner
            .positions
            .get_mut(symbol)
            .ok_or_else(|| TradingError::NoPosition(symbol.to_string()))?;
        if position.shares.abs() < shares {
            return Err(TradingError::NoPosition(format!(
                "{}: have {}, selling {}",
                symbol, position.shares, shares
            )));
        }

        if !force_allow_immediate && position.entry_bar_ts >= ctx.bar_ts {
            return Err(TradingError::SameBarExit(format!(
                "{}: entry bar {} vs current bar {}",
                symbol, position.entry_bar_ts, ctx.bar_ts
            )));
        }

        let entry_price = position.entry_price;
        let sector = position.sector.clone();
        let confidence = position.confidence_at_entry;
        let strategy = position.strategy.clone();

        position.shares -= shares;
        let remaining = position.shares;
        if remaining == 0 {
            inner.positions.remove(symbol);
        }

        let proceeds = shares as f64 * price - fees;
        let pnl = (price - entry_price) * shares as f64 - fees;

        inner.cash += proceeds;

        inner.sequence += 1;
        inner.counters.total_trades += 1;
        if pnl > 0.0 {
            inner.counters.winning_trades += 1;
        } else {
            inner.counters.losing_trades += 1;
        }
        if inner.counters.best_trade == 0.0 && inner.counters.worst_trade == 0.0
            && inner.counters.winning_trades + inner.counters.losing_trades == 1
        {
            inner.counters.best_trade = pnl;
            inner.counters.worst_trade = pnl;
        } else {
            inner.counters.best_trade = inner.counters.best_trade.max(pnl);
            inner.counters.worst_trade = inner.counters.worst_trade.min(pnl);
        }
        inner.counters.total_pnl += pnl;

        let trade = Trade {
            trade_id: self.next_trade_id(inner.sequence),
            sequence_number: inner.sequence,
            timestamp: ctx.at,
            symbol: symbol.to_string(),
            side: Side::Sell,
            shares,
            price,
            fees,
            pnl: Some(pnl),
            sector,
            confidence,
            strategy,
            cash_balance_after: inner.cash,
        };
        inner.trades.push(trade.clone());

        info!(
            "Sell {} x {} @ {:.2} pnl {:.2} cash {:.2}",
            shares, symbol, price, pnl, inner.cash
        );

        Ok(trade)
    }

    /// Idempotent stop update; the stop never loosens downward
    pub async fn update_stop(&self, symbol: &str, new_stop: f64) -> Result<()> {
        let mut inner = self.inner.write().await;
        let position = inner
            .positions
            .get_mut(symbol)
            .ok_or_else(|| TradingError::NoPosition(symbol.to_string()))?;
        if new_stop > position.stop_loss {
            position.stop_loss = new_stop;
        }
        Ok(())
    }

    /// Write back the stop/trail state computed by the exit evaluator
    pub async fn apply_trailing(&self, symbol: &str, update: &TrailingUpdate) -> Result<()> {
        let mut inner = self.inner.write().await;
        let position = inner
            .positions
            .get_mut(symbol)
            .ok_or_else(|| TradingError::NoPosition(symbol.to_string()))?;

        position.highest_price_seen = position.highest_price_seen.max(update.highest_price_seen);
        position.trailing_active = position.trailing_active || update.trailing_active;
        position.trailing_stop = match (position.trailing_stop, update.trailing_stop) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => b.or(a),
        };
        if update.stop_loss > position.stop_loss {
            position.stop_loss = update.stop_loss;
        }
        Ok(())
    }

    /// Restore a carried-over position (next-day restoration file). No
    /// trade is recorded and cash is untouched.
    pub async fn restore_position(&self, position: Position) -> Result<()> {
        if position.shares == 0 {
            return Err(TradingError::InvalidShares("restored position with 0 shares".to_string()));
        }
        let mut inner = self.inner.write().await;
        info!("Restored position {} x {}", position.shares, position.symbol);
        inner.positions.insert(position.symbol.clone(), position);
        Ok(())
    }

    /// Consistent point-in-time copy under one read-lock acquisition
    pub async fn snapshot(&self) -> PortfolioSnapshot {
        let inner = self.inner.read().await;
        let recent_start = inner.trades.len().saturating_sub(RECENT_TRADES);
        PortfolioSnapshot {
            mode: self.mode,
            trading_day: self.trading_day,
            initial_cash: self.initial_cash,
            cash: inner.cash,
            positions: inner.positions.values().cloned().collect(),
            recent_trades: inner.trades[recent_start..].to_vec(),
            counters: inner.counters.clone(),
        }
    }

    /// Full trade log in sequence order (archival)
    pub async fn all_trades(&self) -> Vec<Trade> {
        let inner = self.inner.read().await;
        inner.trades.clone()
    }

    pub async fn cash(&self) -> f64 {
        let inner = self.inner.read().await;
        inner.cash
    }

    pub async fn position(&self, symbol: &str) -> Option<Position> {
        let inner = self.inner.read().await;
        inner.positions.get(symbol).cloned()
    }

    pub async fn open_positions(&self) -> Vec<Position> {
        let inner = self.inner.read().await;
        inner.positions.values().cloned().collect()
    }

    /// Replay an archived trade list onto a fresh cash balance. Used to
    /// verify archives: the result must match the recorded closing cash.
    pub fn replay(initial_cash: f64, trades: &[Trade]) -> f64 {
        let mut cash = initial_cash;
        for trade in trades {
            match trade.side {
                Side::Buy => cash -= trade.shares as f64 * trade.price + trade.fees,
                Side::Sell => cash += trade.shares as f64 * trade.price - trade.fees,
            }
        }
        cash
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 2, 2).unwrap()
    }

    fn t(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 2, 6, minute, 0).unwrap()
    }

    fn entry_ctx(bar_minute: u32) -> EntryContext {
        EntryContext {
            sector: "NIFTY".to_string(),
            confidence: 0.7,
            strategy: "momentum".to_string(),
            stop_loss: 90.0,
            take_profit: 130.0,
            expiry: None,
            lot_size: 50,
            bar_ts: t(bar_minute),
            at: t(bar_minute),
        }
    }

    fn sell_ctx(bar_minute: u32) -> SellContext {
        SellContext { bar_ts: t(bar_minute), at: t(bar_minute) }
    }

    #[tokio::test]
    async fn test_buy_conserves_cash() {
        let portfolio = Portfolio::new(TradingMode::Paper, day(), 1_000_000.0);

        let trade = portfolio
            .buy("NIFTY24OCT24500CE", 50, 100.0, 50.0, entry_ctx(0))
            .await
            .unwrap();

        assert_eq!(trade.cash_balance_after, 994_950.0);
        assert_eq!(portfolio.cash().await, 994_950.0);
        let pos = portfolio.position("NIFTY24OCT24500CE").await.unwrap();
        assert_eq!(pos.shares, 50);
        assert_eq!(pos.stop_loss, 90.0);
        assert_eq!(pos.take_profit, 130.0);
    }

    #[tokio::test]
    async fn test_insufficient_funds() {
        let portfolio = Portfolio::new(TradingMode::Paper, day(), 1_000.0);

        let err = portfolio
            .buy("NIFTY24OCT24500CE", 50, 100.0, 50.0, entry_ctx(0))
            .await
            .unwrap_err();

        assert!(matches!(err, TradingError::InsufficientFunds { .. }));
        // Nothing changed
        assert_eq!(portfolio.cash().await, 1_000.0);
        assert!(portfolio.position("NIFTY24OCT24500CE").await.is_none());
    }

    #[tokio::test]
    async fn test_blended_average_entry() {
        let portfolio = Portfolio::new(TradingMode::Paper, day(), 1_000_000.0);

        portfolio.buy("NIFTY24OCT24500CE", 50, 100.0, 0.0, entry_ctx(0)).await.unwrap();
        portfolio.buy("NIFTY24OCT24500CE", 50, 110.0, 0.0, entry_ctx(1)).await.unwrap();

        let pos = portfolio.position("NIFTY24OCT24500CE").await.unwrap();
        assert_eq!(pos.shares, 100);
        assert!((pos.entry_price - 105.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_sell_realises_pnl_and_removes_position() {
        let portfolio = Portfolio::new(TradingMode::Paper, day(), 1_000_000.0);
        portfolio.buy("NIFTY24OCT24500CE", 50, 100.0, 50.0, entry_ctx(0)).await.unwrap();

        let trade = portfolio
            .sell("NIFTY24OCT24500CE", 50, 106.0, 50.0, sell_ctx(5), false)
            .await
            .unwrap();

        // S1 arithmetic: pnl = (106-100)*50 - 50 = 250,
        // cash = 994950 + 50*106 - 50 = 1_000_200
        assert_eq!(trade.pnl, Some(250.0));
        assert_eq!(trade.cash_balance_after, 1_000_200.0);
        assert!(portfolio.position("NIFTY24OCT24500CE").await.is_none());

        let snapshot = portfolio.snapshot().await;
        assert_eq!(snapshot.counters.winning_trades, 1);
        assert_eq!(snapshot.counters.total_pnl, 250.0);
        assert_eq!(snapshot.counters.best_trade, 250.0);
        assert_eq!(snapshot.counters.worst_trade, 250.0);
    }

    #[tokio::test]
    async fn test_sell_without_position() {
        let portfolio = Portfolio::new(TradingMode::Paper, day(), 1_000_000.0);
        let err = portfolio
            .sell("NIFTY24OCT24500CE", 50, 106.0, 50.0, sell_ctx(5), false)
            .await
            .unwrap_err();
        assert!(matches!(err, TradingError::NoPosition(_)));
    }

    #[tokio::test]
    async fn test_same_bar_exit_rejected_then_forced() {
        let portfolio = Portfolio::new(TradingMode::Paper, day(), 1_000_000.0);
        portfolio.buy("NIFTY24OCT24500CE", 50, 100.0, 0.0, entry_ctx(0)).await.unwrap();

        let err = portfolio
            .sell("NIFTY24OCT24500CE", 50, 101.0, 0.0, sell_ctx(0), false)
            .await
            .unwrap_err();
        assert!(matches!(err, TradingError::SameBarExit(_)));

        portfolio
            .sell("NIFTY24OCT24500CE", 50, 101.0, 0.0, sell_ctx(0), true)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_partial_sell_keeps_position() {
        let portfolio = Portfolio::new(TradingMode::Paper, day(), 1_000_000.0);
        portfolio.buy("NIFTY24OCT24500CE", 100, 100.0, 0.0, entry_ctx(0)).await.unwrap();

        portfolio
            .sell("NIFTY24OCT24500CE", 40, 110.0, 0.0, sell_ctx(5), false)
            .await
            .unwrap();

        let pos = portfolio.position("NIFTY24OCT24500CE").await.unwrap();
        assert_eq!(pos.shares, 60);
    }

    #[tokio::test]
    async fn test_trade_ids_and_sequence_monotonic() {
        let portfolio = Portfolio::new(TradingMode::Paper, day(), 1_000_000.0);
        portfolio.buy("A1", 10, 10.0, 0.0, entry_ctx(0)).await.unwrap();
        portfolio.buy("A2", 10, 10.0, 0.0, entry_ctx(1)).await.unwrap();
        portfolio.sell("A1", 10, 11.0, 0.0, sell_ctx(2), false).await.unwrap();

        let trades = portfolio.all_trades().await;
        assert_eq!(trades.len(), 3);
        assert_eq!(trades[0].trade_id, "2026-02-02-paper-0001");
        assert_eq!(trades[2].trade_id, "2026-02-02-paper-0003");
        assert!(trades.windows(2).all(|w| {
            w[0].sequence_number < w[1].sequence_number && w[0].timestamp <= w[1].timestamp
        }));
    }

    #[tokio::test]
    async fn test_update_stop_never_loosens() {
        let portfolio = Portfolio::new(TradingMode::Paper, day(), 1_000_000.0);
        portfolio.buy("A1", 10, 100.0, 0.0, entry_ctx(0)).await.unwrap();

        portfolio.update_stop("A1", 95.0).await.unwrap();
        portfolio.update_stop("A1", 80.0).await.unwrap();

        assert_eq!(portfolio.position("A1").await.unwrap().stop_loss, 95.0);
    }

    #[tokio::test]
    async fn test_counters_track_best_and_worst() {
        let portfolio = Portfolio::new(TradingMode::Paper, day(), 1_000_000.0);
        portfolio.buy("A1", 10, 100.0, 0.0, entry_ctx(0)).await.unwrap();
        portfolio.buy("A2", 10, 100.0, 0.0, entry_ctx(0)).await.unwrap();
        portfolio.sell("A1", 10, 120.0, 0.0, sell_ctx(2), false).await.unwrap();
        portfolio.sell("A2", 10, 90.0, 0.0, sell_ctx(3), false).await.unwrap();

        let counters = portfolio.snapshot().await.counters;
        assert_eq!(counters.winning_trades, 1);
        assert_eq!(counters.losing_trades, 1);
        assert_eq!(counters.best_trade, 200.0);
        assert_eq!(counters.worst_trade, -100.0);
        assert_eq!(counters.total_pnl, 100.0);
        assert_eq!(counters.total_trades, 4);
    }

    #[tokio::test]
    async fn test_replay_reproduces_cash() {
        let portfolio = Portfolio::new(TradingMode::Paper, day(), 1_000_000.0);
        portfolio.buy("A1", 50, 100.0, 50.0, entry_ctx(0)).await.unwrap();
        portfolio.sell("A1", 50, 106.0, 50.0, sell_ctx(5), false).await.unwrap();
        portfolio.buy("A2", 20, 200.0, 20.0, entry_ctx(6)).await.unwrap();

        let trades = portfolio.all_trades().await;
        let replayed = Portfolio::replay(1_000_000.0, &trades);

        assert!((replayed - portfolio.cash().await).abs() < 0.01);
    }
}
