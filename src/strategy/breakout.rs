/// Volume-confirmed breakout strategy
use chrono::{DateTime, Utc};

use crate::config::StrategyParams;
use crate::strategy::indicators::{average_volume, calculate_sma};
use crate::strategy::{Strategy, StrategyCore};
use crate::types::{Bar, Position, Side, SignalVote};

pub struct VolumeBreakout {
    lookback: usize,
    volume_factor: f64,
    core: StrategyCore,
}

impl VolumeBreakout {
    pub fn new(params: &StrategyParams) -> Self {
        VolumeBreakout {
            lookback: params.breakout_lookback,
            volume_factor: params.breakout_volume_factor,
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

impl Strategy for VolumeBreakout {
    fn name(&self) -> &str {
        "volume_breakout"
    }

    fn generate_signal(
        &self,
        symbol: &str,
        bars: &[Bar],
        position: Option<&Position>,
        now: DateTime<Utc>,
    ) -> Option<SignalVote> {
        if bars.len() < self.lookback + 1 {
            return None;
        }

        let (window, latest) = bars.split_at(bars.len() - 1);
        let window = &window[window.len().saturating_sub(self.lookback)..];
        let latest = &latest[0];

        // A breakout long is abandoned once price sinks back under the
        // range average
        if let Some(pos) = position {
            if let Some(mean) = calculate_sma(window, window.len()) {
                if pos.shares > 0 && latest.close < mean {
                    return Some(self.vote(-1, 0.6, "back_inside_range"));
                }
            }
        }

        let range_high = window.iter().map(|b| b.high).fold(f64::MIN, f64::max);
        let range_low = window.iter().map(|b| b.low).fold(f64::MAX, f64::min);
        let avg_volume = average_volume(window, window.len())?;

        let volume_confirmed =
            avg_volume > 0.0 && latest.volume as f64 >= self.volume_factor * avg_volume;

        let raw = if volume_confirmed && latest.close > range_high {
            1
        } else if volume_confirmed && latest.close < range_low {
            -1
        } else {
            0
        };

        let direction = self.core.gate(symbol, raw, now);
        if direction == 0 {
            return Some(self.vote(0, 0.0, "no_breakout"));
        }

        let volume_ratio = latest.volume as f64 / (avg_volume * self.volume_factor);
        Some(self.vote(direction, 0.5 + 0.25 * volume_ratio, "volume_breakout"))
    }

    fn notify_executed(&self, symbol: &str, _side: Side, at: DateTime<Utc>) {
        self.core.start_cooldown(symbol, at);
    }

    fn reset(&self) {
        self.core.reset();
    }
}
