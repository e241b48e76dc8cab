/// Moving-average crossover strategy
use chrono::{DateTime, Utc};

use crate::config::StrategyParams;
use crate::strategy::indicators::calculate_sma;
use crate::strategy::{Strategy, StrategyCore};
use crate::types::{Bar, Position, Side, SignalVote};

pub struct MaCrossover {
    fast_period: usize,
    slow_period: usize,
    core: StrategyCore,
}

impl MaCrossover {
    pub fn new(params: &StrategyParams) -> Self {
        MaCrossover {
            fast_period: params.ma_fast_period,
            slow_period: params.ma_slow_period,
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

impl Strategy for MaCrossover {
    fn name(&self) -> &str {
        "ma_crossover"
    }

    fn generate_signal(
        &self,
        symbol: &str,
        bars: &[Bar],
        position: Option<&Position>,
        now: DateTime<Utc>,
    ) -> Option<SignalVote> {
        let fast = calculate_sma(bars, self.fast_period)?;
        let slow = calculate_sma(bars, self.slow_period)?;
        let close = bars.last()?.close;

        // A held long is abandoned once price slips under the fast average,
        // regardless of the slow-line setup
        if let Some(pos) = position {
            if pos.shares > 0 && close < fast {
                let depth = (fast - close) / fast * 100.0;
                return Some(self.vote(-1, 0.5 + depth, "close_below_fast_ma"));
            }
        }

        if slow == 0.0 {
            return None;
        }

        let separation_pct = (fast - slow).abs() / slow * 100.0;
        let raw = if fast > slow {
            1
        } else if fast < slow {
            -1
        } else {
            0
        };

        let direction = self.core.gate(symbol, raw, now);
        if direction == 0 {
            return Some(self.vote(0, 0.0, "no_crossover"));
        }

        Some(self.vote(direction, separation_pct / 0.5, "ma_crossover"))
    }

    fn notify_executed(&self, symbol: &str, _side: Side, at: DateTime<Utc>) {
        self.core.start_cooldown(symbol, at);
    }

    fn reset(&self) {
        self.core.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::indicators::bars_from_closes;
    use chrono::TimeZone;

    fn params() -> StrategyParams {
        toml::from_str(
            r#"
            confirmation_bars = 1
            ma_fast_period = 3
            ma_slow_period = 5
            "#,
        )
        .unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 2, 5, 30, 0).unwrap()
    }

    fn held(symbol: &str, entry: f64) -> Position {
        Position {
            symbol: symbol.to_string(),
            shares: 75,
            entry_price: entry,
            entry_time: now(),
            entry_bar_ts: now(),
            stop_loss: entry * 0.9,
            take_profit: entry * 1.3,
            trailing_active: false,
            trailing_stop: None,
            highest_price_seen: entry,
            sector: "NIFTY".to_string(),
            confidence_at_entry: 0.7,
            strategy: "ma_crossover".to_string(),
            expiry: None,
            lot_size: 75,
        }
    }

    #[test]
    fn test_bullish_crossover_votes_buy() {
        let strategy = MaCrossover::new(&params());
        let bars = bars_from_closes(&[100.0, 100.0, 100.0, 104.0, 108.0, 112.0]);

        let vote = strategy.generate_signal("NIFTY", &bars, None, now()).unwrap();
        assert_eq!(vote.direction, 1);
        assert!(vote.strength > 0.0);
    }

    #[test]
    fn test_insufficient_data_returns_none() {
        let strategy = MaCrossover::new(&params());
        let bars = bars_from_closes(&[100.0, 101.0]);
        assert!(strategy.generate_signal("NIFTY", &bars, None, now()).is_none());
    }

    #[test]
    fn test_position_exit_rule_fires_without_entry_setup() {
        let strategy = MaCrossover::new(&params());
        // Uptrend rolling over: last close under the fast average
        let bars = bars_from_closes(&[100.0, 110.0, 120.0, 118.0, 116.0, 105.0]);

        let pos = held("NIFTY24OCT24500CE", 100.0);
        let vote = strategy
            .generate_signal("NIFTY24OCT24500CE", &bars, Some(&pos), now())
            .unwrap();

        assert_eq!(vote.direction, -1);
        assert!(vote.strength >= 0.5);
        assert_eq!(vote.reason.as_deref(), Some("close_below_fast_ma"));
    }
}
