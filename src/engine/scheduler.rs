/// Session scheduler: market-hours gate, scan/decide/execute iterations,
/// exactly-once end-of-day archival, graceful shutdown.
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use futures_util::stream::{self, StreamExt};
use tracing::{debug, error, info, warn};

use crate::broker::{BrokerApi, BrokerClient, OrderRequest};
use crate::config::Config;
use crate::dashboard::DashboardSink;
use crate::error::{Result, TradingError};
use crate::market::{ChainBuilder, OptionChain, PriceHistory};
use crate::portfolio::{ArchiveWriter, EntryContext, FeeModel, Portfolio, SellContext};
use crate::positions::{ExitContext, ExitEvaluator};
use crate::risk::{BanList, BanListSource, EntryCandidate, RiskManager, SizedOrder};
use crate::signals::SignalAggregator;
use crate::strategy::{build_strategies, indicators, Strategy};
use crate::time::{Clock, HolidayCalendar, MarketSession};
use crate::types::{
    AggregatedSignal, ExitReason, Position, SessionState, Side, SignalAction, SignalVote,
    TradingMode, Underlying,
};
use crate::utils::ShutdownToken;

/// What the state machine does with a session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SchedulerAction {
    Iterate,
    SleepShort,
    SleepLong,
    Archive,
}

fn decide(state: SessionState, bypass: bool) -> SchedulerAction {
    if bypass {
        return SchedulerAction::Iterate;
    }
    match state {
        SessionState::Open => SchedulerAction::Iterate,
        SessionState::PreMarket => SchedulerAction::SleepShort,
        SessionState::Weekend | SessionState::Holiday => SchedulerAction::SleepLong,
        SessionState::PostMarket => SchedulerAction::Archive,
    }
}

pub struct Scheduler {
    config: Arc<Config>,
    clock: Arc<dyn Clock>,
    session: MarketSession,
    client: Arc<BrokerClient>,
    portfolio: Arc<Portfolio>,
    strategies: Vec<Arc<dyn Strategy>>,
    aggregator: SignalAggregator,
    exits: ExitEvaluator,
    risk: RiskManager,
    archive: ArchiveWriter,
    fees: FeeModel,
    history: PriceHistory,
    chains: ChainBuilder,
    dashboard: Option<DashboardSink>,
    ban_list: Arc<BanList>,
    shutdown: ShutdownToken,
    dry_run: bool,
}

impl Scheduler {
    pub fn new(
        config: Arc<Config>,
        clock: Arc<dyn Clock>,
        api: Arc<dyn BrokerApi>,
        ban_source: Arc<dyn BanListSource>,
        shutdown: ShutdownToken,
        dry_run: bool,
    ) -> Result<Self> {
        let mut calendar = HolidayCalendar::builtin();
        if let Some(path) = &config.holiday_file {
            calendar = calendar.with_file(path)?;
        }
        let session = MarketSession::new(Arc::new(calendar));

        let client = Arc::new(BrokerClient::new(api, &config, shutdown.clone()));
        let trading_day = session.trading_day(clock.now());
        let portfolio = Arc::new(Portfolio::new(config.mode, trading_day, config.initial_capital));

        let strategies = build_strategies(&config.strategies, &config.strategy_params)?;
        let ban_list = Arc::new(BanList::new(ban_source));

        let broker_for_risk =
            if config.mode == TradingMode::Live { Some(Arc::clone(&client)) } else { None };

        Ok(Scheduler {
            aggregator: SignalAggregator::new(&config),
            exits: ExitEvaluator::new(&config),
            risk: RiskManager::new(&config, Arc::clone(&ban_list), broker_for_risk),
            archive: ArchiveWriter::from_config(&config),
            fees: FeeModel::from_config(&config),
            history: PriceHistory::new(512),
            chains: ChainBuilder::new(Arc::clone(&client), Arc::clone(&config)),
            dashboard: DashboardSink::from_config(&config),
            session,
            client,
            portfolio,
            strategies,
            ban_list,
            shutdown,
            dry_run,
            clock,
            config,
        })
    }

    pub fn portfolio(&self) -> Arc<Portfolio> {
        Arc::clone(&self.portfolio)
    }

    /// Load carried-over positions from a restoration file
    pub async fn restore_positions(&self, date: NaiveDate) -> Result<usize> {
        let file = self.archive.load_restoration(date)?;
        let count = file.positions.len();
        for (_, restored) in file.positions {
            self.portfolio.restore_position(restored.position).await?;
        }
        info!("♻️  Restored {} positions from {}", count, date);
        Ok(count)
    }

    /// Main loop: CHECK_SESSION -> iterate while OPEN -> archive once in
    /// POST_MARKET -> exit.
    pub async fn run(&self) -> Result<()> {
        info!(
            "🏁 Scheduler starting: mode={} day={} watchlist={:?}",
            self.config.mode.as_str(),
            self.portfolio.trading_day(),
            self.config.watchlist
        );

        if self.config.bypass_market_hours {
            warn!("bypass_market_hours is set; trading outside session boundaries");
        }

        self.ban_list.refresh().await;
        self.spawn_ban_refresher();

        let mut iteration: u64 = 0;
        let mut had_open_iteration = false;

        loop {
            if self.shutdown.is_shutdown() {
                info!("🛑 Shutdown requested");
                break;
            }

            let now = self.clock.now();

            // Day boundary under bypass: archive and stop instead of
            // trading into a day the portfolio was not opened for
            if self.session.trading_day(now) != self.portfolio.trading_day() {
                if had_open_iteration {
                    self.archive_day(now).await?;
                }
                info!("Day rolled over, exiting");
                return Ok(());
            }

            match decide(self.session.state(now), self.config.bypass_market_hours) {
                SchedulerAction::SleepLong => {
                    info!("📅 {} - sleeping", self.session.state(now).as_str());
                    let _ = self.cancellable_sleep(Duration::from_secs(3600)).await;
                }
                SchedulerAction::SleepShort => {
                    let wait = self.session.seconds_to_open(now).clamp(1, 300) as u64;
                    debug!("Pre-market, opening in {}s", self.session.seconds_to_open(now));
                    let _ = self.cancellable_sleep(Duration::from_secs(wait)).await;
                }
                SchedulerAction::Iterate => {
                    iteration += 1;
                    had_open_iteration = true;
                    match self.run_iteration(iteration).await {
                        Ok(()) => {}
                        Err(e) if e.is_shutdown() => break,
                        Err(e) if e.is_archival() => return Err(e),
                        Err(e) if e.is_fatal() => {
                            error!("Fatal error in iteration: {} ({})", e, e.error_code());
                            return Err(e);
                        }
                        Err(e) => {
                            warn!(
                                "Iteration {} error: {} ({})",
                                iteration,
                                e,
                                e.error_code()
                            );
                        }
                    }
                    let _ = self
                        .cancellable_sleep(Duration::from_secs(self.config.scan_interval_seconds))
                        .await;
                }
                SchedulerAction::Archive => {
                    if had_open_iteration {
                        self.archive_day(now).await?;
                    } else {
                        info!("Post-market with no open iterations; nothing to archive");
                    }
                    info!("🌙 Session closed");
                    return Ok(());
                }
            }
        }

        self.graceful_shutdown(iteration).await
    }

    /// Sleep that both honours the shutdown token and advances manual
    /// clocks in tests
    async fn cancellable_sleep(&self, duration: Duration) -> Result<()> {
        self.shutdown.check("sleep")?;
        tokio::select! {
            _ = self.clock.sleep(duration) => Ok(()),
            _ = self.shutdown.wait() => Err(TradingError::Cancelled("sleep".to_string())),
        }
    }

    fn spawn_ban_refresher(&self) {
        let ban_list = Arc::clone(&self.ban_list);
        let shutdown = self.shutdown.clone();
        let interval = Duration::from_secs(self.config.ban_list_refresh_minutes.max(1) as u64 * 60);

        tokio::spawn(async move {
            loop {
                if shutdown.sleep(interval, "ban refresh").await.is_err() {
                    return;
                }
                ban_list.refresh().await;
            }
        });
    }

    /// One scan cycle: exits on held positions first, then new entries,
    /// then the outbound snapshot.
    async fn run_iteration(&self, iteration: u64) -> Result<()> {
        let now = self.clock.now();
        self.shutdown.check("iteration")?;

        // 1. One snapshot of current positions
        let snapshot = self.portfolio.snapshot().await;
        let held_symbols: Vec<String> =
            snapshot.positions.iter().map(|p| p.symbol.clone()).collect();

        // 2. ONE bulk quote fetch, reused for exits, valuation and the
        // dashboard event
        let current_prices = self.client.get_quotes(&held_symbols, true).await?;
        for (symbol, quote) in &current_prices {
            self.history.record(symbol, quote.last_price, quote.volume, now);
        }

        // 3. Exits before entries, always
        for position in &snapshot.positions {
            self.shutdown.check("exit evaluation")?;
            if let Err(e) = self.evaluate_position(position, &current_prices, now).await {
                warn!("{}: exit evaluation failed: {} ({})", position.symbol, e, e.error_code());
            }
        }

        // 4. New entries, bounded fan-out across the watchlist
        if let Err(e) = self.scan_for_entries(now).await {
            if e.is_shutdown() {
                return Err(e);
            }
            warn!("Entry scan failed: {} ({})", e, e.error_code());
        }

        // 5. Outbound snapshot + checkpoint
        let snapshot = self.portfolio.snapshot().await;
        let price_map: HashMap<String, f64> = current_prices
            .iter()
            .map(|(s, q)| (s.clone(), q.last_price))
            .collect();
        let total_value = snapshot.total_value(&price_map);

        if let Some(dashboard) = &self.dashboard {
            dashboard.publish(&snapshot, &price_map, now).await;
        }
        if let Err(e) = self.archive.write_checkpoint(iteration, &snapshot, total_value, now) {
            warn!("Checkpoint write failed: {}", e);
        }

        debug!(
            "Iteration {} done: cash {:.2}, {} positions, value {:.2}",
            iteration,
            snapshot.cash,
            snapshot.positions.len(),
            total_value
        );

        Ok(())
    }

    /// Evaluate exits for one held position
    async fn evaluate_position(
        &self,
        position: &Position,
        current_prices: &HashMap<String, crate::types::Quote>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let quote = match current_prices.get(&position.symbol) {
            Some(quote) => quote,
            None => {
                // Data-quality failure: skip this symbol, others proceed
                return Err(TradingError::StaleQuote(position.symbol.clone()));
            }
        };
        let price = quote.last_price;

        let bars = self.history.bars(&position.symbol);
        let atr = indicators::calculate_atr(&bars, self.config.atr_period).unwrap_or(0.0);

        let votes: Vec<SignalVote> = self
            .strategies
            .iter()
            .filter_map(|s| s.generate_signal(&position.symbol, &bars, Some(position), now))
            .collect();

        let exit_hint = votes
            .iter()
            .filter(|v| v.direction == -1)
            .map(|v| v.strength)
            .fold(None, |acc: Option<f64>, s| Some(acc.map_or(s, |a| a.max(s))));

        let refreshed_confidence = if votes.is_empty() {
            None
        } else {
            let longs: Vec<f64> =
                votes.iter().filter(|v| v.direction == 1).map(|v| v.strength).collect();
            if longs.is_empty() {
                Some(0.0)
            } else {
                Some(longs.iter().sum::<f64>() / longs.len() as f64)
            }
        };

        let aggregated = self.aggregator.aggregate(&position.symbol, &votes, true, None, now);
        let aggregator_exit = if aggregated.action == SignalAction::Sell {
            Some(&aggregated)
        } else {
            None
        };

        let ctx = ExitContext {
            last_price: price,
            atr,
            now,
            in_flatten_window: self
                .session
                .in_flatten_window(now, self.config.flatten_window_minutes),
            aggregator_exit,
            exit_hint,
            refreshed_confidence,
        };

        let (directive, trailing) = self.exits.evaluate(position, &ctx);
        self.portfolio.apply_trailing(&position.symbol, &trailing).await?;

        if let Some(directive) = directive {
            info!(
                "🚪 Exit {} x {} ({})",
                directive.shares,
                directive.symbol,
                directive.reason.as_str()
            );
            self.execute_exit(position, directive.reason, price, now).await?;
        }

        Ok(())
    }

    async fn execute_exit(
        &self,
        position: &Position,
        reason: ExitReason,
        price: f64,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if self.dry_run {
            info!(
                "[DRY RUN] would sell {} x {} @ {:.2} ({})",
                position.shares,
                position.symbol,
                price,
                reason.as_str()
            );
            return Ok(());
        }

        let bar_ts = PriceHistory::minute_boundary(now);
        let ctx = SellContext { bar_ts, at: now };

        let result = match self.config.mode {
            TradingMode::Live => {
                let instrument = self.client.resolve_instrument(&position.symbol).await?;
                let order = OrderRequest {
                    client_order_id: uuid::Uuid::new_v4().to_string(),
                    symbol: position.symbol.clone(),
                    token: instrument.token,
                    exchange: instrument.exchange,
                    side: Side::Sell,
                    quantity: position.shares,
                    price: None,
                };
                let ack = self.client.place_order(&order).await?;
                // The broker filled; the ledger must record it
                self.portfolio
                    .sell(&position.symbol, ack.fill_quantity, ack.fill_price, ack.fees, ctx, true)
                    .await
            }
            _ => {
                let fill = self.fees.fill_price(Side::Sell, price);
                let fees = self.fees.fees(position.shares, fill);
                let force = reason == ExitReason::MarketClose;
                self.portfolio
                    .sell(&position.symbol, position.shares, fill, fees, ctx, force)
                    .await
            }
        };

        match result {
            Ok(trade) => {
                self.aggregator.record_exit(&position.symbol, reason, now);
                for strategy in &self.strategies {
                    strategy.notify_executed(&position.symbol, Side::Sell, now);
                }
                info!(
                    "Closed {} pnl {:.2} ({})",
                    trade.symbol,
                    trade.pnl.unwrap_or(0.0),
                    reason.as_str()
                );
                Ok(())
            }
            Err(TradingError::SameBarExit(msg)) => {
                // Entry and exit landed on the same bar; retried next scan
                debug!("Deferred exit: {}", msg);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Build chains, collect votes, aggregate, throttle, risk-check and
    /// execute entries.
    async fn scan_for_entries(&self, now: DateTime<Utc>) -> Result<()> {
        let underlyings: Vec<Underlying> = self
            .config
            .watchlist
            .iter()
            .filter_map(|name| Underlying::from_str(name))
            .collect();

        let scans: Vec<Result<Option<(AggregatedSignal, EntryCandidate)>>> =
            stream::iter(underlyings)
                .map(|u| self.scan_underlying(u, now))
                .buffer_unordered(self.config.max_parallel_chains.max(1))
                .collect()
                .await;

        let mut signals = Vec::new();
        let mut candidates: HashMap<String, EntryCandidate> = HashMap::new();
        for scan in scans {
            match scan {
                Ok(Some((signal, candidate))) => {
                    candidates.insert(candidate.symbol.clone(), candidate);
                    signals.push(signal);
                }
                Ok(None) => {}
                Err(e) if e.is_shutdown() => return Err(e),
                Err(e) => {
                    // Per-symbol data problems skip that symbol only
                    debug!("Chain scan skipped: {} ({})", e, e.error_code());
                }
            }
        }

        // Cross-symbol top-N throttle
        let admitted = self.aggregator.throttle_entries(signals);

        for signal in admitted {
            let candidate = match candidates.remove(&signal.symbol) {
                Some(candidate) => candidate,
                None => continue,
            };

            let snapshot = self.portfolio.snapshot().await;
            let equity = snapshot.cash
                + snapshot
                    .positions
                    .iter()
                    .map(|p| p.entry_price * p.shares as f64)
                    .sum::<f64>();

            match self.risk.check_entry(&candidate, &snapshot, equity, now).await {
                Ok(sized) => {
                    if let Err(e) = self.execute_entry(&sized, now).await {
                        warn!(
                            "Entry {} failed: {} ({})",
                            sized.candidate.symbol,
                            e,
                            e.error_code()
                        );
                    }
                }
                Err(e) => {
                    info!(
                        "Entry rejected {}: {} ({})",
                        candidate.symbol,
                        e,
                        e.error_code()
                    );
                    self.aggregator.record_rejection(&candidate.symbol, now);
                }
            }
        }

        Ok(())
    }

    /// Scan one underlying: chain, strategy votes on the index series,
    /// aggregation, ATM contract selection.
    async fn scan_underlying(
        &self,
        underlying: Underlying,
        now: DateTime<Utc>,
    ) -> Result<Option<(AggregatedSignal, EntryCandidate)>> {
        self.shutdown.check("chain scan")?;

        let today = self.session.trading_day(now);
        let chain = self.chains.build(underlying, None, today).await?;

        let index_symbol = underlying.as_str();
        self.history.record(index_symbol, chain.spot_price, 0, now);
        let bars = self.history.bars(index_symbol);

        let votes: Vec<SignalVote> = self
            .strategies
            .iter()
            .filter_map(|s| s.generate_signal(index_symbol, &bars, None, now))
            .collect();

        let trend = if self.config.use_trend_filter {
            indicators::calculate_ema(&bars, self.config.strategy_params.trend_ema_period).map(
                |ema| {
                    let close = bars.last().map(|b| b.close).unwrap_or(ema);
                    if close > ema {
                        1
                    } else if close < ema {
                        -1
                    } else {
                        0
                    }
                },
            )
        } else {
            None
        };

        let decision = self.aggregator.aggregate(index_symbol, &votes, false, trend, now);
        if decision.action == SignalAction::Hold {
            return Ok(None);
        }

        Ok(self.select_contract(&chain, &decision, now))
    }

    /// Directional decision -> ATM option candidate (bullish buys the
    /// call, bearish buys the put; options stay long-only)
    fn select_contract(
        &self,
        chain: &OptionChain,
        decision: &AggregatedSignal,
        now: DateTime<Utc>,
    ) -> Option<(AggregatedSignal, EntryCandidate)> {
        let pair = chain.atm_pair();
        let contract = match decision.action {
            SignalAction::Buy => &pair.call,
            SignalAction::Sell => &pair.put,
            SignalAction::Hold => return None,
        };

        if contract.is_stale() {
            debug!("{}: stale ATM quote, skipping entry", contract.instrument.symbol);
            return None;
        }
        let entry_price = contract.last_price()?;
        if entry_price <= 0.0 {
            return None;
        }

        let symbol = contract.instrument.symbol.clone();
        if self.aggregator.entry_blocked(&symbol, now) {
            debug!("{}: entry cooldown active", symbol);
            return None;
        }

        let strategy = decision
            .contributing_votes
            .iter()
            .max_by(|a, b| a.strength.partial_cmp(&b.strength).unwrap_or(std::cmp::Ordering::Equal))
            .map(|v| v.source.clone())
            .unwrap_or_else(|| "aggregate".to_string());

        let candidate = EntryCandidate {
            symbol: symbol.clone(),
            underlying: chain.underlying,
            token: contract.instrument.token,
            exchange: contract.instrument.exchange,
            entry_price,
            stop_loss: entry_price * (1.0 - self.config.option_stop_loss_pct),
            take_profit: entry_price * (1.0 + self.config.option_target_pct),
            lot_size: contract.instrument.lot_size,
            expiry: contract.instrument.expiry,
            confidence: decision.confidence,
            strategy,
        };

        let mut signal = decision.clone();
        signal.symbol = symbol;

        Some((signal, candidate))
    }

    async fn execute_entry(&self, sized: &SizedOrder, now: DateTime<Utc>) -> Result<()> {
        let candidate = &sized.candidate;

        if self.dry_run {
            info!(
                "[DRY RUN] would buy {} x {} @ {:.2} ({} lots)",
                sized.shares, candidate.symbol, candidate.entry_price, sized.lots
            );
            return Ok(());
        }

        let bar_ts = PriceHistory::minute_boundary(now);
        let ctx = EntryContext {
            sector: candidate.underlying.as_str().to_string(),
            confidence: candidate.confidence,
            strategy: candidate.strategy.clone(),
            stop_loss: candidate.stop_loss,
            take_profit: candidate.take_profit,
            expiry: candidate.expiry,
            lot_size: candidate.lot_size,
            bar_ts,
            at: now,
        };

        let trade = match self.config.mode {
            TradingMode::Live => {
                let order = OrderRequest {
                    client_order_id: uuid::Uuid::new_v4().to_string(),
                    symbol: candidate.symbol.clone(),
                    token: candidate.token,
                    exchange: candidate.exchange,
                    side: Side::Buy,
                    quantity: sized.shares,
                    price: Some(candidate.entry_price),
                };
                let ack = self.client.place_order(&order).await?;
                self.portfolio
                    .buy(&candidate.symbol, ack.fill_quantity, ack.fill_price, ack.fees, ctx)
                    .await?
            }
            _ => {
                let fill = self.fees.fill_price(Side::Buy, candidate.entry_price);
                let fees = self.fees.fees(sized.shares, fill);
                self.portfolio.buy(&candidate.symbol, sized.shares, fill, fees, ctx).await?
            }
        };

        for strategy in &self.strategies {
            strategy.notify_executed(candidate.underlying.as_str(), Side::Buy, now);
        }

        info!(
            "📈 Entered {} x {} @ {:.2} ({})",
            trade.shares, trade.symbol, trade.price, trade.strategy
        );
        Ok(())
    }

    /// End-of-day archival: primary + verified backup, next-day
    /// restoration file, final dashboard event. Idempotent per
    /// (trading_day, mode).
    pub async fn archive_day(&self, now: DateTime<Utc>) -> Result<()> {
        let day = self.portfolio.trading_day();
        let mode = self.portfolio.mode();

        if self.archive.already_archived(day, mode) {
            info!("Archive marker present for {} {}, skipping", day, mode.as_str());
            return Ok(());
        }

        let snapshot = self.portfolio.snapshot().await;
        let trades = self.portfolio.all_trades().await;

        // Best-effort closing prices for held positions
        let held: Vec<String> = snapshot.positions.iter().map(|p| p.symbol.clone()).collect();
        let prices: HashMap<String, f64> = match self.client.get_quotes(&held, false).await {
            Ok(quotes) => quotes.iter().map(|(s, q)| (s.clone(), q.last_price)).collect(),
            Err(e) => {
                warn!("Closing quotes unavailable for archive: {}", e);
                HashMap::new()
            }
        };

        let record = ArchiveWriter::build_record(&snapshot, &trades, &prices, now);
        self.archive.write_archive(&record)?;

        if !snapshot.positions.is_empty() {
            let next_day = self.session.calendar().next_trading_day(day);
            self.archive.write_restoration(&snapshot, &prices, next_day, now)?;
        }

        if let Some(dashboard) = &self.dashboard {
            dashboard.publish(&snapshot, &prices, now).await;
        }

        info!("✅ Day {} archived ({} trades)", day, trades.len());
        Ok(())
    }

    /// Flush state and exit without liquidating positions
    async fn graceful_shutdown(&self, iteration: u64) -> Result<()> {
        let deadline = Duration::from_secs(self.config.shutdown_timeout_seconds);
        let flush = async {
            let snapshot = self.portfolio.snapshot().await;
            let total_value = snapshot.total_value(&HashMap::new());
            if let Err(e) =
                self.archive.write_checkpoint(iteration, &snapshot, total_value, self.clock.now())
            {
                warn!("Final checkpoint failed: {}", e);
            }
        };

        if tokio::time::timeout(deadline, flush).await.is_err() {
            return Err(TradingError::ShutdownTimeout(format!(
                "flush exceeded {}s",
                deadline.as_secs()
            )));
        }

        info!("👋 Graceful shutdown complete");
        Ok(())
    }
}
