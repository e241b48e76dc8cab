/// Rate-of-change momentum strategy
use chrono::{DateTime, Utc};

use crate::config::StrategyParams;
use crate::strategy::indicators::calculate_roc;
use crate::strategy::{Strategy, StrategyCore};
use crate::types::{Bar, Position, Side, SignalVote};

pub struct Momentum {
    period: usize,
    threshold_pct: f64,
    core: StrategyCore,
}

impl Momentum {
    pub fn new(params: &StrategyParams) -> Self {
        Momentum {
            period: params.momentum_period,
            threshold_pct: params.momentum_threshold_pct,
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

impl Strategy for Momentum {
    fn name(&self) -> &str {
        "momentum"
    }

    fn generate_signal(
        &self,
        symbol: &str,
        bars: &[Bar],
        position: Option<&Position>,
        now: DateTime<Utc>,
    ) -> Option<SignalVote> {
        let roc = calculate_roc(bars, self.period)?;

        // Momentum longs do not outstay the move: any negative drift exits
        if let Some(pos) = position {
            if pos.shares > 0 && roc < 0.0 {
                let strength = 0.5 + (roc.abs() / self.threshold_pct) * 0.25;
                return Some(self.vote(-1, strength, "momentum_faded"));
            }
        }

        let raw = if roc >= self.threshold_pct {
            1
        } else if roc <= -self.threshold_pct {
            -1
        } else {
            0
        };

        let direction = self.core.gate(symbol, raw, now);
        if direction == 0 {
            return Some(self.vote(0, 0.0, "momentum_flat"));
        }

        Some(self.vote(direction, roc.abs() / (2.0 * self.threshold_pct), "momentum"))
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
            momentum_period = 5
            momentum_threshold_pct = 1.0
            "#,
        )
        .unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 2, 5, 30, 0).unwrap()
    }

    #[test]
    fn test_positive_momentum_votes_buy() {
        let strategy = Momentum::new(&params());
        let bars = bars_from_closes(&[100.0, 100.5, 101.0, 101.5, 102.0, 103.0]);

        let vote = strategy.generate_signal("NIFTY", &bars, None, now()).unwrap();
        assert_eq!(vote.direction, 1);
    }

    #[test]
    fn test_confirmation_delays_signal() {
        let strategy = Momentum::new(&toml::from_str::<StrategyParams>(
            "confirmation_bars = 2\nmomentum_period = 5\n",
        )
        .unwrap());
        let bars = bars_from_closes(&[100.0, 100.5, 101.0, 101.5, 102.0, 103.0]);

        // First evaluation only starts the streak
        let vote = strategy.generate_signal("NIFTY", &bars, None, now()).unwrap();
        assert_eq!(vote.direction, 0);

        let vote = strategy.generate_signal("NIFTY", &bars, None, now()).unwrap();
        assert_eq!(vote.direction, 1);
    }

    #[test]
    fn test_debounce_after_execution() {
        let strategy = Momentum::new(&params());
        let bars = bars_from_closes(&[100.0, 100.5, 101.0, 101.5, 102.0, 103.0]);
        let t = now();

        let vote = strategy.generate_signal("NIFTY", &bars, None, t).unwrap();
        assert_eq!(vote.direction, 1);

        strategy.notify_executed("NIFTY", Side::Buy, t);
        let vote = strategy
            .generate_signal("NIFTY", &bars, None, t + chrono::Duration::minutes(5))
            .unwrap();
        assert_eq!(vote.direction, 0);
    }
}
