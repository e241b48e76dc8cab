/// Strategy contract and the compile-time registry
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::config::StrategyParams;
use crate::error::{Result, TradingError};
use crate::types::{Bar, Position, Side, SignalVote};

pub mod base;
pub mod bollinger;
pub mod breakout;
pub mod indicators;
pub mod ma_crossover;
pub mod momentum;
pub mod rsi_reversion;

pub use base::StrategyCore;
pub use bollinger::BollingerReversal;
pub use breakout::VolumeBreakout;
pub use ma_crossover::MaCrossover;
pub use momentum::Momentum;
pub use rsi_reversion::RsiReversion;

/// A stateful signal evaluator. Signal generation is pure with respect to
/// the supplied series; only confirmation and cooldown bookkeeping live in
/// internal state.
pub trait Strategy: Send + Sync {
    fn name(&self) -> &str;

    /// Vote on a symbol. `position` is supplied when the symbol is held so
    /// the strategy can emit its exit rule even without a full entry setup.
    fn generate_signal(
        &self,
        symbol: &str,
        bars: &[Bar],
        position: Option<&Position>,
        now: DateTime<Utc>,
    ) -> Option<SignalVote>;

    /// Informs the strategy a trade occurred so it can set a cooldown
    fn notify_executed(&self, symbol: &str, side: Side, at: DateTime<Utc>);

    /// Clears all internal state (backtests and daily rollover)
    fn reset(&self);
}

/// Resolve configured strategy names to instances. Unknown names fail fast.
pub fn build_strategies(
    names: &[String],
    params: &StrategyParams,
) -> Result<Vec<Arc<dyn Strategy>>> {
    names
        .iter()
        .map(|name| -> Result<Arc<dyn Strategy>> {
            match name.as_str() {
                "ma_crossover" => Ok(Arc::new(MaCrossover::new(params))),
                "rsi_reversion" => Ok(Arc::new(RsiReversion::new(params))),
                "bollinger_reversal" => Ok(Arc::new(BollingerReversal::new(params))),
                "volume_breakout" => Ok(Arc::new(VolumeBreakout::new(params))),
                "momentum" => Ok(Arc::new(Momentum::new(params))),
                unknown => Err(TradingError::ConfigError(format!(
                    "Unknown strategy: {}",
                    unknown
                ))),
            }
        })
        .collect()
}
