/// Core type definitions for the trading engine
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Exchange segments the engine trades on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Exchange {
    NSE,
    BSE,
    NFO,
    BFO,
}

impl Exchange {
    pub fn as_str(&self) -> &str {
        match self {
            Exchange::NSE => "NSE",
            Exchange::BSE => "BSE",
            Exchange::NFO => "NFO",
            Exchange::BFO => "BFO",
        }
    }
}

/// Index underlyings with tradable option chains
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Underlying {
    Nifty,
    BankNifty,
    FinNifty,
    MidcpNifty,
    Sensex,
    Bankex,
}

impl Underlying {
    pub fn as_str(&self) -> &str {
        match self {
            Underlying::Nifty => "NIFTY",
            Underlying::BankNifty => "BANKNIFTY",
            Underlying::FinNifty => "FINNIFTY",
            Underlying::MidcpNifty => "MIDCPNIFTY",
            Underlying::Sensex => "SENSEX",
            Underlying::Bankex => "BANKEX",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "NIFTY" => Some(Underlying::Nifty),
            "BANKNIFTY" => Some(Underlying::BankNifty),
            "FINNIFTY" => Some(Underlying::FinNifty),
            "MIDCPNIFTY" => Some(Underlying::MidcpNifty),
            "SENSEX" => Some(Underlying::Sensex),
            "BANKEX" => Some(Underlying::Bankex),
            _ => None,
        }
    }

    /// Derivatives segment carrying this underlying's options
    pub fn exchange(&self) -> Exchange {
        match self {
            Underlying::Sensex | Underlying::Bankex => Exchange::BFO,
            _ => Exchange::NFO,
        }
    }

    /// Resolve the underlying of an option trading symbol.
    /// BANKNIFTY must be checked before NIFTY: both share the prefix.
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        const ORDERED: [Underlying; 6] = [
            Underlying::BankNifty,
            Underlying::FinNifty,
            Underlying::MidcpNifty,
            Underlying::Nifty,
            Underlying::Bankex,
            Underlying::Sensex,
        ];
        ORDERED.iter().find(|u| symbol.starts_with(u.as_str())).copied()
    }

    pub fn all() -> [Underlying; 6] {
        [
            Underlying::Nifty,
            Underlying::BankNifty,
            Underlying::FinNifty,
            Underlying::MidcpNifty,
            Underlying::Sensex,
            Underlying::Bankex,
        ]
    }
}

/// Weekly or monthly option expiry cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpiryCadence {
    Weekly,
    Monthly,
}

/// Option type (Call or Put)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OptionType {
    CE,
    PE,
}

impl OptionType {
    pub fn as_str(&self) -> &str {
        match self {
            OptionType::CE => "CE",
            OptionType::PE => "PE",
        }
    }
}

/// Trade side (Buy or Sell)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

/// Execution mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradingMode {
    Paper,
    Live,
    Backtest,
}

impl TradingMode {
    pub fn as_str(&self) -> &str {
        match self {
            TradingMode::Paper => "paper",
            TradingMode::Live => "live",
            TradingMode::Backtest => "backtest",
        }
    }
}

/// Market session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    PreMarket,
    Open,
    PostMarket,
    Holiday,
    Weekend,
}

impl SessionState {
    pub fn as_str(&self) -> &str {
        match self {
            SessionState::PreMarket => "PRE_MARKET",
            SessionState::Open => "OPEN",
            SessionState::PostMarket => "POST_MARKET",
            SessionState::Holiday => "HOLIDAY",
            SessionState::Weekend => "WEEKEND",
        }
    }
}

/// Process-wide directional regime supplied to the aggregator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketBias {
    Bullish,
    Bearish,
    Neutral,
}

/// OHLCV bar
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
}

/// Quote snapshot for one instrument
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub last_price: f64,
    pub bid: f64,
    pub ask: f64,
    pub volume: i64,
    pub open_interest: i64,
    pub last_price_timestamp: DateTime<Utc>,
    /// Set when the instrument was missing from the latest quote response
    pub stale: bool,
}

/// Instrument data from the broker master; immutable per trading day
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instrument {
    pub token: u32,
    pub symbol: String,
    pub name: String,
    pub exchange: Exchange,
    pub expiry: Option<NaiveDate>,
    pub strike: Option<f64>,
    pub option_type: Option<OptionType>,
    pub lot_size: i64,
    pub tick_size: f64,
}

impl Instrument {
    pub fn is_option(&self) -> bool {
        self.option_type.is_some()
    }
}

/// Open position held by the portfolio
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    /// Positive = long. Options are long-only in this engine.
    pub shares: i64,
    pub entry_price: f64,
    pub entry_time: DateTime<Utc>,
    /// Bar timestamp of the opening trade; guards against same-bar self-cross
    pub entry_bar_ts: DateTime<Utc>,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub trailing_active: bool,
    pub trailing_stop: Option<f64>,
    pub highest_price_seen: f64,
    pub sector: String,
    pub confidence_at_entry: f64,
    pub strategy: String,
    pub expiry: Option<NaiveDate>,
    pub lot_size: i64,
}

impl Position {
    pub fn unrealized_pnl(&self, current_price: f64) -> f64 {
        (current_price - self.entry_price) * self.shares as f64
    }

    pub fn unrealized_pnl_pct(&self, current_price: f64) -> f64 {
        if self.entry_price == 0.0 {
            return 0.0;
        }
        (current_price - self.entry_price) / self.entry_price * 100.0
    }
}

/// Immutable trade record; append-only once written
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub trade_id: String,
    pub sequence_number: u64,
    #[serde(with = "ist_timestamp")]
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub side: Side,
    pub shares: i64,
    pub price: f64,
    pub fees: f64,
    /// Populated only on closing trades
    pub pnl: Option<f64>,
    pub sector: String,
    pub confidence: f64,
    pub strategy: String,
    pub cash_balance_after: f64,
}

/// Cumulative counters maintained by the ledger
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortfolioCounters {
    pub total_trades: u64,
    pub winning_trades: u64,
    pub losing_trades: u64,
    pub best_trade: f64,
    pub worst_trade: f64,
    pub total_pnl: f64,
}

/// Consistent point-in-time copy of the ledger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub mode: TradingMode,
    pub trading_day: NaiveDate,
    pub initial_cash: f64,
    pub cash: f64,
    pub positions: Vec<Position>,
    pub recent_trades: Vec<Trade>,
    pub counters: PortfolioCounters,
}

impl PortfolioSnapshot {
    /// Cash plus marked-to-market positions; positions missing a quote are
    /// valued at entry
    pub fn total_value(&self, prices: &std::collections::HashMap<String, f64>) -> f64 {
        let held: f64 = self
            .positions
            .iter()
            .map(|p| prices.get(&p.symbol).copied().unwrap_or(p.entry_price) * p.shares as f64)
            .sum();
        self.cash + held
    }
}

/// Per-strategy directional vote
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalVote {
    pub source: String,
    /// +1 buy, 0 hold, -1 sell
    pub direction: i8,
    pub strength: f64,
    pub reason: Option<String>,
}

/// Aggregated decision for one symbol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalAction {
    Buy,
    Sell,
    Hold,
}

impl SignalAction {
    pub fn as_str(&self) -> &str {
        match self {
            SignalAction::Buy => "buy",
            SignalAction::Sell => "sell",
            SignalAction::Hold => "hold",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedSignal {
    pub symbol: String,
    pub action: SignalAction,
    pub confidence: f64,
    pub contributing_votes: Vec<SignalVote>,
    pub is_exit: bool,
}

impl AggregatedSignal {
    pub fn hold(symbol: &str, is_exit: bool) -> Self {
        AggregatedSignal {
            symbol: symbol.to_string(),
            action: SignalAction::Hold,
            confidence: 0.0,
            contributing_votes: Vec::new(),
            is_exit,
        }
    }
}

/// Why a position was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    MarketClose,
    StopLoss,
    TakeProfit,
    TrailingStop,
    Intelligent,
    Aggregator,
}

impl ExitReason {
    pub fn as_str(&self) -> &str {
        match self {
            ExitReason::MarketClose => "MARKET_CLOSE",
            ExitReason::StopLoss => "STOP_LOSS",
            ExitReason::TakeProfit => "TAKE_PROFIT",
            ExitReason::TrailingStop => "TRAILING_STOP",
            ExitReason::Intelligent => "INTELLIGENT",
            ExitReason::Aggregator => "AGGREGATOR",
        }
    }

    /// Stop-outs carry the longer re-entry cooldown
    pub fn is_stop_out(&self) -> bool {
        matches!(self, ExitReason::StopLoss | ExitReason::TrailingStop)
    }
}

/// Serialize timestamps as ISO-8601 with the IST offset (+05:30)
pub mod ist_timestamp {
    use chrono::{DateTime, Utc};
    use chrono_tz::Asia::Kolkata;
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let ist = ts.with_timezone(&Kolkata);
        serializer.serialize_str(&ist.to_rfc3339())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

/// Round to two decimals, half to even (applied at persistence boundaries)
pub fn round_currency(value: f64) -> f64 {
    let scaled = value * 100.0;
    let floor = scaled.floor();
    let frac = scaled - floor;
    // Tolerance absorbs binary representation error around exact halves
    let rounded = if (frac - 0.5).abs() < 1e-9 {
        if (floor as i64) % 2 == 0 {
            floor
        } else {
            floor + 1.0
        }
    } else {
        scaled.round()
    };
    rounded / 100.0
}
