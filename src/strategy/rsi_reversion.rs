/// RSI mean-reversion strategy
use chrono::{DateTime, Utc};

use crate::config::StrategyParams;
use crate::strategy::indicators::calculate_rsi;
use crate::strategy::{Strategy, StrategyCore};
use crate::types::{Bar, Position, Side, SignalVote};

pub struct RsiReversion {
    period: usize,
    oversold: f64,
    overbought: f64,
    core: StrategyCore,
}

impl RsiReversion {
    pub fn new(params: &StrategyParams) -> Self {
        RsiReversion {
            period: params.rsi_period,
            oversold: params.rsi_oversold,
            overbought: params.rsi_overbought,
            core: StrategyCore::new(params.confirmation_bars, params.cooldown_minutes),
        }
    }

    fn vote(&self, direction: i8, strength: f64, reason: &str) -> SignalVote {
        SignalVote {
            source: self.name().to_string(),
            direction,
            strength: strength.clamp(0.0, 1.0),
            reason: Some(reason.to_string()),
        }
    }
}

impl Strategy for RsiReversion {
    fn name(&self) -> &str {
        "rsi_reversion"
    }

    fn generate_signal(
        &self,
        symbol: &str,
        bars: &[Bar],
        position: Option<&Position>,
        now: DateTime<Utc>,
    ) -> Option<SignalVote> {
        let rsi = calculate_rsi(bars, self.period)?;

        // A held long has mean-reverted once RSI is back above the midline
        if let Some(pos) = position {
            if pos.shares > 0 && rsi >= 50.0 {
                let strength = 0.5 + (rsi - 50.0) / 100.0;
                return Some(self.vote(-1, strength, "reversion_complete"));
            }
        }

        let raw = if rsi <= self.oversold {
            1
        } else if rsi >= self.overbought {
            -1
        } else {
            0
        };

        let direction = self.core.gate(symbol, raw, now);
        if direction == 0 {
            return Some(self.vote(0, 0.0, "rsi_neutral"));
        }

        let depth = if direction == 1 {
            (self.oversold - rsi) / self.oversold
        } else {
            (rsi - self.overbought) / (100.0 - self.overbought)
        };

        Some(self.vote(direction, 0.6 + depth, "rsi_extreme"))
    }

    fn notify_executed(&self, symbol: &str, _side: Side, at: DateTime<Utc>) {
        self.core.start_cooldown(symbol, at);
    }

    fn reset(&self) {
        self.core.reset();
    }
}
