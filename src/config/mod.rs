/// Engine configuration
use std::collections::HashMap;

use serde::Deserialize;

use crate::types::{ExpiryCadence, MarketBias, TradingMode, Underlying};

pub mod loader;

pub use loader::load_config;

/// Full configuration document. Every key has a default so a minimal TOML
/// file (or an empty one plus broker settings) is enough to run paper mode.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "defaults::mode")]
    pub mode: TradingMode,

    #[serde(default = "defaults::initial_capital")]
    pub initial_capital: f64,

    // Risk & sizing
    #[serde(default = "defaults::risk_per_trade_pct")]
    pub risk_per_trade_pct: f64,
    #[serde(default = "defaults::max_position_pct")]
    pub max_position_pct: f64,
    #[serde(default = "defaults::max_positions_per_underlying")]
    pub max_positions_per_underlying: usize,
    #[serde(default = "defaults::min_rrr")]
    pub min_rrr: f64,
    #[serde(default = "defaults::duplicate_window_seconds")]
    pub duplicate_window_seconds: i64,

    // Scheduler
    #[serde(default = "defaults::scan_interval_seconds")]
    pub scan_interval_seconds: u64,
    #[serde(default)]
    pub bypass_market_hours: bool,
    #[serde(default = "defaults::shutdown_timeout_seconds")]
    pub shutdown_timeout_seconds: u64,
    #[serde(default = "defaults::flatten_window_minutes")]
    pub flatten_window_minutes: i64,

    // Broker client
    #[serde(default = "defaults::calls_per_second")]
    pub calls_per_second: f64,
    #[serde(default = "defaults::burst_limit")]
    pub burst_limit: u32,
    #[serde(default = "defaults::circuit_breaker_threshold")]
    pub circuit_breaker_threshold: u32,
    #[serde(default = "defaults::circuit_breaker_window_seconds")]
    pub circuit_breaker_window_seconds: u64,
    #[serde(default = "defaults::circuit_breaker_cooldown_seconds")]
    pub circuit_breaker_cooldown_seconds: u64,
    #[serde(default = "defaults::broker_call_timeout_seconds")]
    pub broker_call_timeout_seconds: u64,
    #[serde(default = "defaults::instrument_cache_ttl_seconds")]
    pub instrument_cache_ttl_seconds: u64,
    #[serde(default = "defaults::quote_cache_ttl_seconds")]
    pub quote_cache_ttl_seconds: u64,
    #[serde(default)]
    pub broker_base_url: String,
    #[serde(default)]
    pub broker_api_key: String,

    // Option chains
    #[serde(default = "defaults::strike_half_width")]
    pub strike_half_width: usize,
    #[serde(default = "defaults::min_paired_strikes")]
    pub min_paired_strikes: usize,
    #[serde(default = "defaults::max_parallel_chains")]
    pub max_parallel_chains: usize,

    // Signal aggregation
    #[serde(default = "defaults::market_bias")]
    pub market_bias: MarketBias,
    #[serde(default = "defaults::entry_agreement_threshold")]
    pub entry_agreement_threshold: f64,
    #[serde(default = "defaults::min_entry_confidence")]
    pub min_entry_confidence: f64,
    #[serde(default = "defaults::top_n_entries")]
    pub top_n_entries: usize,
    #[serde(default = "defaults::cooldown_minutes")]
    pub cooldown_minutes: i64,
    #[serde(default = "defaults::stop_loss_cooldown_minutes")]
    pub stop_loss_cooldown_minutes: i64,
    #[serde(default)]
    pub use_trend_filter: bool,

    // Entry stop/target placement on the option premium
    #[serde(default = "defaults::option_stop_loss_pct")]
    pub option_stop_loss_pct: f64,
    #[serde(default = "defaults::option_target_pct")]
    pub option_target_pct: f64,

    // Exits
    #[serde(default = "defaults::trailing_activation_multiplier")]
    pub trailing_activation_multiplier: f64,
    #[serde(default = "defaults::trailing_stop_multiplier")]
    pub trailing_stop_multiplier: f64,
    #[serde(default = "defaults::intelligent_exit_threshold")]
    pub intelligent_exit_threshold: f64,
    #[serde(default = "defaults::atr_period")]
    pub atr_period: usize,

    // Fees (paper / backtest)
    #[serde(default = "defaults::fees_flat")]
    pub fees_flat: f64,
    #[serde(default = "defaults::fees_slippage_pct")]
    pub fees_slippage_pct: f64,

    // Watchlist & strategies
    #[serde(default = "defaults::watchlist")]
    pub watchlist: Vec<String>,
    #[serde(default = "defaults::strategies")]
    pub strategies: Vec<String>,
    #[serde(default)]
    pub strategy_params: StrategyParams,

    // Ban list
    #[serde(default = "defaults::ban_list_refresh_minutes")]
    pub ban_list_refresh_minutes: i64,
    #[serde(default)]
    pub ban_list_path: Option<String>,

    // Calendars
    #[serde(default)]
    pub holiday_file: Option<String>,

    // Paths
    #[serde(default = "defaults::data_dir")]
    pub data_dir: String,
    #[serde(default = "defaults::archive_dir")]
    pub archive_dir: String,
    #[serde(default = "defaults::archive_backup_dir")]
    pub archive_backup_dir: String,
    #[serde(default = "defaults::saved_trades_dir")]
    pub saved_trades_dir: String,

    // Dashboard sink
    #[serde(default)]
    pub dashboard_url: Option<String>,
    #[serde(default)]
    pub dashboard_api_key: Option<String>,

    // Logging
    #[serde(default = "defaults::log_level")]
    pub log_level: String,

    /// Per-underlying contract parameters; entries here override the
    /// built-in table
    #[serde(default)]
    pub per_underlying: HashMap<String, UnderlyingParams>,
}

/// Contract parameters per index underlying
#[derive(Debug, Clone, Deserialize)]
pub struct UnderlyingParams {
    pub lot_size: i64,
    pub strike_step: f64,
    pub expiry_cadence: ExpiryCadence,
}

/// Indicator and gating parameters shared by the built-in strategies
#[derive(Debug, Clone, Deserialize)]
pub struct StrategyParams {
    #[serde(default = "defaults::confirmation_bars")]
    pub confirmation_bars: usize,
    #[serde(default = "defaults::cooldown_minutes")]
    pub cooldown_minutes: i64,
    #[serde(default = "defaults::ma_fast_period")]
    pub ma_fast_period: usize,
    #[serde(default = "defaults::ma_slow_period")]
    pub ma_slow_period: usize,
    #[serde(default = "defaults::rsi_period")]
    pub rsi_period: usize,
    #[serde(default = "defaults::rsi_oversold")]
    pub rsi_oversold: f64,
    #[serde(default = "defaults::rsi_overbought")]
    pub rsi_overbought: f64,
    #[serde(default = "defaults::bollinger_period")]
    pub bollinger_period: usize,
    #[serde(default = "defaults::bollinger_k")]
    pub bollinger_k: f64,
    #[serde(default = "defaults::breakout_lookback")]
    pub breakout_lookback: usize,
    #[serde(default = "defaults::breakout_volume_factor")]
    pub breakout_volume_factor: f64,
    #[serde(default = "defaults::momentum_period")]
    pub momentum_period: usize,
    #[serde(default = "defaults::momentum_threshold_pct")]
    pub momentum_threshold_pct: f64,
    #[serde(default = "defaults::trend_ema_period")]
    pub trend_ema_period: usize,
}

impl Default for StrategyParams {
    fn default() -> Self {
        toml::from_str("").expect("StrategyParams defaults")
    }
}

impl Config {
    /// Per-trade risk fraction: live is capped at 1.5%, paper and backtest
    /// at 1%
    pub fn effective_risk_pct(&self) -> f64 {
        match self.mode {
            TradingMode::Live => self.risk_per_trade_pct.min(0.015),
            _ => self.risk_per_trade_pct.min(0.01),
        }
    }

    /// Contract parameters for an underlying, config override first
    pub fn underlying_params(&self, underlying: Underlying) -> UnderlyingParams {
        if let Some(params) = self.per_underlying.get(underlying.as_str()) {
            return params.clone();
        }
        builtin_underlying_params(underlying)
    }
}

/// NSE/BSE index contract table (current lot sizes and strike steps)
pub fn builtin_underlying_params(underlying: Underlying) -> UnderlyingParams {
    let (lot_size, strike_step, expiry_cadence) = match underlying {
        Underlying::Nifty => (75, 50.0, ExpiryCadence::Weekly),
        Underlying::BankNifty => (30, 100.0, ExpiryCadence::Weekly),
        Underlying::FinNifty => (65, 50.0, ExpiryCadence::Weekly),
        Underlying::MidcpNifty => (120, 25.0, ExpiryCadence::Weekly),
        Underlying::Sensex => (20, 100.0, ExpiryCadence::Monthly),
        Underlying::Bankex => (30, 100.0, ExpiryCadence::Monthly),
    };
    UnderlyingParams { lot_size, strike_step, expiry_cadence }
}

mod defaults {
    use crate::types::{MarketBias, TradingMode};

    pub fn mode() -> TradingMode {
        TradingMode::Paper
    }
    pub fn initial_capital() -> f64 {
        1_000_000.0
    }
    pub fn risk_per_trade_pct() -> f64 {
        0.015
    }
    pub fn max_position_pct() -> f64 {
        0.20
    }
    pub fn max_positions_per_underlying() -> usize {
        6
    }
    pub fn min_rrr() -> f64 {
        1.5
    }
    pub fn duplicate_window_seconds() -> i64 {
        2
    }
    pub fn scan_interval_seconds() -> u64 {
        10
    }
    pub fn shutdown_timeout_seconds() -> u64 {
        30
    }
    pub fn flatten_window_minutes() -> i64 {
        5
    }
    pub fn calls_per_second() -> f64 {
        3.0
    }
    pub fn burst_limit() -> u32 {
        5
    }
    pub fn circuit_breaker_threshold() -> u32 {
        5
    }
    pub fn circuit_breaker_window_seconds() -> u64 {
        60
    }
    pub fn circuit_breaker_cooldown_seconds() -> u64 {
        300
    }
    pub fn broker_call_timeout_seconds() -> u64 {
        10
    }
    pub fn instrument_cache_ttl_seconds() -> u64 {
        1800
    }
    pub fn quote_cache_ttl_seconds() -> u64 {
        60
    }
    pub fn strike_half_width() -> usize {
        15
    }
    pub fn min_paired_strikes() -> usize {
        5
    }
    pub fn max_parallel_chains() -> usize {
        4
    }
    pub fn market_bias() -> MarketBias {
        MarketBias::Neutral
    }
    pub fn entry_agreement_threshold() -> f64 {
        0.40
    }
    pub fn min_entry_confidence() -> f64 {
        0.65
    }
    pub fn top_n_entries() -> usize {
        5
    }
    pub fn cooldown_minutes() -> i64 {
        15
    }
    pub fn stop_loss_cooldown_minutes() -> i64 {
        60
    }
    pub fn option_stop_loss_pct() -> f64 {
        0.10
    }
    pub fn option_target_pct() -> f64 {
        0.20
    }
    pub fn trailing_activation_multiplier() -> f64 {
        1.1
    }
    pub fn trailing_stop_multiplier() -> f64 {
        0.9
    }
    pub fn intelligent_exit_threshold() -> f64 {
        0.70
    }
    pub fn atr_period() -> usize {
        14
    }
    pub fn fees_flat() -> f64 {
        20.0
    }
    pub fn fees_slippage_pct() -> f64 {
        0.05
    }
    pub fn watchlist() -> Vec<String> {
        vec!["NIFTY".to_string(), "BANKNIFTY".to_string()]
    }
    pub fn strategies() -> Vec<String> {
        vec![
            "ma_crossover".to_string(),
            "rsi_reversion".to_string(),
            "bollinger_reversal".to_string(),
            "volume_breakout".to_string(),
            "momentum".to_string(),
        ]
    }
    pub fn ban_list_refresh_minutes() -> i64 {
        60
    }
    pub fn data_dir() -> String {
        "data".to_string()
    }
    pub fn archive_dir() -> String {
        "trade_archives".to_string()
    }
    pub fn archive_backup_dir() -> String {
        "trade_archives_backup".to_string()
    }
    pub fn saved_trades_dir() -> String {
        "saved_trades".to_string()
    }
    pub fn log_level() -> String {
        "optra=info".to_string()
    }
    pub fn confirmation_bars() -> usize {
        2
    }
    pub fn ma_fast_period() -> usize {
        9
    }
    pub fn ma_slow_period() -> usize {
        21
    }
    pub fn rsi_period() -> usize {
        14
    }
    pub fn rsi_oversold() -> f64 {
        30.0
    }
    pub fn rsi_overbought() -> f64 {
        70.0
    }
    pub fn bollinger_period() -> usize {
        20
    }
    pub fn bollinger_k() -> f64 {
        2.0
    }
    pub fn breakout_lookback() -> usize {
        20
    }
    pub fn breakout_volume_factor() -> f64 {
        1.5
    }
    pub fn momentum_period() -> usize {
        10
    }
    pub fn momentum_threshold_pct() -> f64 {
        1.0
    }
    pub fn trend_ema_period() -> usize {
        50
    }
}
