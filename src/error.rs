/// Centralized error types for the trading engine
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TradingError {
    // Input / Validation Errors
    #[error("Invalid symbol: {0}")]
    InvalidSymbol(String),

    #[error("Invalid share quantity: {0}")]
    InvalidShares(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    // Broker Transient Errors
    #[error("Network timeout: {0}")]
    Timeout(String),

    #[error("Too many requests: {0}")]
    TooManyRequests(String),

    #[error("Broker server error ({status}): {message}")]
    ServerError { status: u16, message: String },

    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    // Broker Permanent Errors
    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("Order rejected: {0}")]
    OrderRejected(String),

    #[error("Insufficient margin: {0}")]
    InsufficientMargin(String),

    #[error("Broker API error: {code} - {message}")]
    BrokerApiError { code: String, message: String },

    #[error("Instrument not found: {0}")]
    InstrumentNotFound(String),

    // Circuit Breaker
    #[error("Circuit breaker open: {0}")]
    CircuitOpen(String),

    // Ledger Errors
    #[error("Insufficient funds: need {needed:.2}, have {available:.2}")]
    InsufficientFunds { needed: f64, available: f64 },

    #[error("No position: {0}")]
    NoPosition(String),

    #[error("Same-bar exit rejected: {0}")]
    SameBarExit(String),

    #[error("Duplicate order: {0}")]
    DuplicateOrder(String),

    // Risk Rejections
    #[error("Trade too risky: {0}")]
    TradeTooRisky(String),

    #[error("Position too large: {0}")]
    PositionTooLarge(String),

    #[error("Concentration limit: {0}")]
    ConcentrationLimit(String),

    #[error("Underlying in F&O ban: {0}")]
    BannedUnderlying(String),

    #[error("Risk-reward too low: {0}")]
    RiskRewardTooLow(String),

    // Data Quality Errors
    #[error("Stale quote: {0}")]
    StaleQuote(String),

    #[error("Spot unavailable: {0}")]
    SpotUnavailable(String),

    #[error("Option chain too sparse: {0}")]
    ChainTooSparse(String),

    #[error("Deserialization failed: {0}")]
    DeserializationError(#[from] serde_json::Error),

    // Archival Errors
    #[error("Archive checksum mismatch: {0}")]
    ChecksumMismatch(String),

    #[error("Archive write failed: {0}")]
    ArchiveWriteFailed(String),

    #[error("File I/O error: {0}")]
    FileError(#[from] std::io::Error),

    // Market Session Errors
    #[error("Market closed: {0}")]
    MarketClosed(String),

    #[error("Non-trading day: {0}")]
    NonTradingDay(String),

    // Session / Shutdown
    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Shutdown timeout: {0}")]
    ShutdownTimeout(String),

    // System Errors
    #[error("Fatal error: {0}")]
    FatalError(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, TradingError>;

impl TradingError {
    /// Transient broker failures: retried with backoff, counted by the breaker
    pub fn is_transient(&self) -> bool {
        match self {
            TradingError::Timeout(_)
            | TradingError::TooManyRequests(_)
            | TradingError::ServerError { .. } => true,
            TradingError::HttpError(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.status().map(|s| s.is_server_error()).unwrap_or(false)
            }
            _ => false,
        }
    }

    /// Check if error requires immediate system shutdown
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TradingError::FatalError(_)
                | TradingError::AuthFailed(_)
                | TradingError::ConfigError(_)
        )
    }

    /// Archival failures are critical: the scheduler exits with code 3
    pub fn is_archival(&self) -> bool {
        matches!(
            self,
            TradingError::ChecksumMismatch(_) | TradingError::ArchiveWriteFailed(_)
        )
    }

    /// Expected during graceful shutdown; not logged at error level
    pub fn is_shutdown(&self) -> bool {
        matches!(
            self,
            TradingError::Cancelled(_) | TradingError::ShutdownTimeout(_)
        )
    }

    /// Get error code for logging/monitoring
    pub fn error_code(&self) -> &str {
        match self {
            TradingError::InvalidSymbol(_) => "VAL_001",
            TradingError::InvalidShares(_) => "VAL_002",
            TradingError::ConfigError(_) => "CFG_001",
            TradingError::Timeout(_) => "NET_001",
            TradingError::TooManyRequests(_) => "NET_002",
            TradingError::ServerError { .. } => "NET_003",
            TradingError::HttpError(_) => "NET_004",
            TradingError::AuthFailed(_) => "AUTH_001",
            TradingError::OrderRejected(_) => "ORDER_001",
            TradingError::InsufficientMargin(_) => "ORDER_002",
            TradingError::BrokerApiError { .. } => "BROKER_001",
            TradingError::InstrumentNotFound(_) => "BROKER_002",
            TradingError::CircuitOpen(_) => "BROKER_003",
            TradingError::InsufficientFunds { .. } => "LEDGER_001",
            TradingError::NoPosition(_) => "LEDGER_002",
            TradingError::SameBarExit(_) => "LEDGER_003",
            TradingError::DuplicateOrder(_) => "LEDGER_004",
            TradingError::TradeTooRisky(_) => "RISK_001",
            TradingError::PositionTooLarge(_) => "RISK_002",
            TradingError::ConcentrationLimit(_) => "RISK_003",
            TradingError::BannedUnderlying(_) => "RISK_004",
            TradingError::RiskRewardTooLow(_) => "RISK_005",
            TradingError::StaleQuote(_) => "DATA_001",
            TradingError::SpotUnavailable(_) => "DATA_002",
            TradingError::ChainTooSparse(_) => "DATA_003",
            TradingError::DeserializationError(_) => "DATA_004",
            TradingError::ChecksumMismatch(_) => "ARCH_001",
            TradingError::ArchiveWriteFailed(_) => "ARCH_002",
            TradingError::FileError(_) => "FILE_001",
            TradingError::MarketClosed(_) => "MKT_001",
            TradingError::NonTradingDay(_) => "MKT_002",
            TradingError::Cancelled(_) => "SYS_001",
            TradingError::ShutdownTimeout(_) => "SYS_002",
            TradingError::FatalError(_) => "SYS_003",
            TradingError::Other(_) => "GEN_001",
        }
    }
}
