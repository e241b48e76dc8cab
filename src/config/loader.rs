/// Configuration loading from TOML file
use std::path::Path;

use crate::config::Config;
use crate::error::{Result, TradingError};
use crate::types::Underlying;

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = std::fs::read_to_string(&path).map_err(|e| {
        TradingError::ConfigError(format!(
            "Failed to read config file {}: {}",
            path.as_ref().display(),
            e
        ))
    })?;

    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content)
        .map_err(|e| TradingError::ConfigError(format!("Failed to parse config: {}", e)))?;

    validate_config(&config)?;

    Ok(config)
}

fn validate_config(config: &Config) -> Result<()> {
    if config.initial_capital <= 0.0 {
        return Err(TradingError::ConfigError(format!(
            "Invalid initial_capital: {}",
            config.initial_capital
        )));
    }

    if config.risk_per_trade_pct <= 0.0 || config.risk_per_trade_pct > 0.10 {
        return Err(TradingError::ConfigError(format!(
            "Invalid risk_per_trade_pct: {}",
            config.risk_per_trade_pct
        )));
    }

    if config.max_position_pct <= 0.0 || config.max_position_pct > 1.0 {
        return Err(TradingError::ConfigError(format!(
            "Invalid max_position_pct: {}",
            config.max_position_pct
        )));
    }

    if config.min_rrr < 1.0 {
        return Err(TradingError::ConfigError(format!(
            "min_rrr must be >= 1.0, got {}",
            config.min_rrr
        )));
    }

    if config.scan_interval_seconds < 5 {
        return Err(TradingError::ConfigError(
            "scan_interval_seconds must be >= 5".to_string(),
        ));
    }

    if config.calls_per_second <= 0.0 || config.burst_limit == 0 {
        return Err(TradingError::ConfigError(
            "calls_per_second and burst_limit must be positive".to_string(),
        ));
    }

    if config.entry_agreement_threshold <= 0.0 || config.entry_agreement_threshold > 1.0 {
        return Err(TradingError::ConfigError(format!(
            "Invalid entry_agreement_threshold: {}",
            config.entry_agreement_threshold
        )));
    }

    if config.min_entry_confidence <= 0.0 || config.min_entry_confidence > 1.0 {
        return Err(TradingError::ConfigError(format!(
            "Invalid min_entry_confidence: {}",
            config.min_entry_confidence
        )));
    }

    if config.option_stop_loss_pct <= 0.0 || config.option_stop_loss_pct >= 1.0 {
        return Err(TradingError::ConfigError(format!(
            "Invalid option_stop_loss_pct: {}",
            config.option_stop_loss_pct
        )));
    }

    // Entries could never pass the RRR floor otherwise
    if config.option_target_pct / config.option_stop_loss_pct < config.min_rrr {
        return Err(TradingError::ConfigError(format!(
            "option_target_pct {} / option_stop_loss_pct {} falls below min_rrr {}",
            config.option_target_pct, config.option_stop_loss_pct, config.min_rrr
        )));
    }

    if config.trailing_stop_multiplier >= config.trailing_activation_multiplier {
        return Err(TradingError::ConfigError(
            "trailing_stop_multiplier must be < trailing_activation_multiplier".to_string(),
        ));
    }

    if config.watchlist.is_empty() {
        return Err(TradingError::ConfigError("watchlist is empty".to_string()));
    }

    for name in &config.watchlist {
        if Underlying::from_str(name).is_none() {
            return Err(TradingError::ConfigError(format!(
                "Unknown watchlist underlying: {}",
                name
            )));
        }
    }

    if config.strategies.is_empty() {
        return Err(TradingError::ConfigError("strategies list is empty".to_string()));
    }

    Ok(())
}
