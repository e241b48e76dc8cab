/// Bollinger band reversal strategy
use chrono::{DateTime, Utc};

use crate::config::StrategyParams;
use crate::strategy::indicators::calculate_bollinger;
use crate::strategy::{Strategy, StrategyCore};
use crate::types::{Bar, Position, Side, SignalVote};

pub struct BollingerReversal {
    period: usize,
    k: f64,
    core: StrategyCore,
}

impl BollingerReversal {
    pub fn new(params: &StrategyParams) -> Self {
        BollingerReversal {
            period: params.bollinger_period,
            k: params.bollinger_k,
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

impl Strategy for BollingerReversal {
    fn name(&self) -> &str {
        "bollinger_reversal"
    }

    fn generate_signal(
        &self,
        symbol: &str,
        bars: &[Bar],
        position: Option<&Position>,
        now: DateTime<Utc>,
    ) -> Option<SignalVote> {
        let (middle, upper, lower) = calculate_bollinger(bars, self.period, self.k)?;
        let close = bars.last()?.close;
        let band_width = upper - lower;

        // A reversal long has run its course at the middle band
        if let Some(pos) = position {
            if pos.shares > 0 && close >= middle {
                return Some(self.vote(-1, 0.65, "middle_band_reached"));
            }
        }

        if band_width <= 0.0 {
            return Some(self.vote(0, 0.0, "flat_bands"));
        }

        let raw = if close < lower {
            1
        } else if close > upper {
            -1
        } else {
            0
        };

        let direction = self.core.gate(symbol, raw, now);
        if direction == 0 {
            return Some(self.vote(0, 0.0, "inside_bands"));
        }

        let penetration = if direction == 1 {
            (lower - close) / band_width
        } else {
            (close - upper) / band_width
        };

        Some(self.vote(direction, 0.6 + 2.0 * penetration, "band_break"))
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
            bollinger_period = 10
            bollinger_k = 2.0
            "#,
        )
        .unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 2, 5, 30, 0).unwrap()
    }

    #[test]
    fn test_lower_band_break_votes_buy() {
        let strategy = BollingerReversal::new(&params());
        // Quiet range then a sharp drop through the lower band
        let mut closes: Vec<f64> = (0..12).map(|i| 100.0 + (i % 3) as f64).collect();
        closes.push(80.0);
        let bars = bars_from_closes(&closes);

        let vote = strategy.generate_signal("NIFTY", &bars, None, now()).unwrap();
        assert_eq!(vote.direction, 1);
        assert!(vote.strength >= 0.6);
    }

    #[test]
    fn test_inside_bands_holds() {
        let strategy = BollingerReversal::new(&params());
        let closes: Vec<f64> = (0..15).map(|i| 100.0 + (i % 3) as f64).collect();
        let bars = bars_from_closes(&closes);

        let vote = strategy.generate_signal("NIFTY", &bars, None, now()).unwrap();
        assert_eq!(vote.direction, 0);
    }
}
