/// Stop, target, trailing and intelligent exit evaluation.
///
/// Runs against every held position each iteration and emits at most one
/// exit directive per position, in strict priority order.
use chrono::{DateTime, Utc};
use chrono_tz::Asia::Kolkata;
use tracing::debug;

use crate::config::Config;
use crate::types::{AggregatedSignal, ExitReason, Position, SignalAction, TradingMode};

/// Exit decision for one position
#[derive(Debug, Clone)]
pub struct ExitDirective {
    pub symbol: String,
    pub reason: ExitReason,
    pub shares: i64,
}

/// New stop/trail state computed during evaluation; written back to the
/// ledger even when no exit fires
#[derive(Debug, Clone, PartialEq)]
pub struct TrailingUpdate {
    pub highest_price_seen: f64,
    pub trailing_active: bool,
    pub trailing_stop: Option<f64>,
    pub stop_loss: f64,
}

/// Per-iteration inputs for one position
pub struct ExitContext<'a> {
    pub last_price: f64,
    pub atr: f64,
    pub now: DateTime<Utc>,
    pub in_flatten_window: bool,
    /// Aggregated exit decision for this symbol, when one was produced
    pub aggregator_exit: Option<&'a AggregatedSignal>,
    /// Strongest strategy exit hint in [0, 1]
    pub exit_hint: Option<f64>,
    /// Entry confidence re-evaluated on fresh data
    pub refreshed_confidence: Option<f64>,
}

pub struct ExitEvaluator {
    force_flatten: bool,
    trailing_activation_multiplier: f64,
    trailing_stop_multiplier: f64,
    intelligent_exit_threshold: f64,
    min_entry_confidence: f64,
}

impl ExitEvaluator {
    pub fn new(config: &Config) -> Self {
        ExitEvaluator {
            // Force-flatten near the close applies to live trading only
            force_flatten: config.mode == TradingMode::Live,
            trailing_activation_multiplier: config.trailing_activation_multiplier,
            trailing_stop_multiplier: config.trailing_stop_multiplier,
            intelligent_exit_threshold: config.intelligent_exit_threshold,
            min_entry_confidence: config.min_entry_confidence,
        }
    }

    /// Evaluate one position. Returns the exit directive (if any) plus the
    /// stop/trail state update to persist.
    pub fn evaluate(
        &self,
        position: &Position,
        ctx: &ExitContext<'_>,
    ) -> (Option<ExitDirective>, TrailingUpdate) {
        let price = ctx.last_price;
        let mut update = TrailingUpdate {
            highest_price_seen: position.highest_price_seen.max(price),
            trailing_active: position.trailing_active,
            trailing_stop: position.trailing_stop,
            stop_loss: position.stop_loss,
        };

        let directive = |reason: ExitReason| {
            Some(ExitDirective {
                symbol: position.symbol.clone(),
                reason,
                shares: position.shares,
            })
        };

        // 1. Market-close force-flatten
        if self.force_flatten && ctx.in_flatten_window {
            return (directive(ExitReason::MarketClose), update);
        }

        // 2. Hard stop-loss
        if price <= position.stop_loss {
            return (directive(ExitReason::StopLoss), update);
        }

        // 3. Take-profit
        if price >= position.take_profit {
            return (directive(ExitReason::TakeProfit), update);
        }

        // 4. Trailing stop update & fire. ATR = 0 disables trailing
        // entirely without forcing exits.
        if ctx.atr > 0.0 {
            let activation =
                position.entry_price + self.trailing_activation_multiplier * ctx.atr;
            let candidate = price - self.trailing_stop_multiplier * ctx.atr;

            if !update.trailing_active && price >= activation {
                update.trailing_active = true;
                update.trailing_stop = Some(candidate);
                debug!(
                    "{}: trailing activated at {:.2}, stop {:.2}",
                    position.symbol, price, candidate
                );
            } else if update.trailing_active {
                // The stop only ratchets upward
                let current = update.trailing_stop.unwrap_or(candidate);
                update.trailing_stop = Some(current.max(candidate));
            }

            if update.trailing_active {
                if let Some(trail) = update.trailing_stop {
                    if price <= trail {
                        return (directive(ExitReason::TrailingStop), update);
                    }
                }
            }
        }

        // Halfway to target the position rides risk-free
        if position.take_profit > position.entry_price {
            let halfway =
                position.entry_price + 0.5 * (position.take_profit - position.entry_price);
            if price >= halfway && update.stop_loss < position.entry_price {
                update.stop_loss = position.entry_price;
                debug!("{}: stop moved to entry (risk-free)", position.symbol);
            }
        }

        // 5. Intelligent score-based exit
        if self.intelligent_score(position, ctx) > self.intelligent_exit_threshold {
            return (directive(ExitReason::Intelligent), update);
        }

        // 6. Aggregator-driven exit
        if let Some(signal) = ctx.aggregator_exit {
            if signal.is_exit && signal.action == SignalAction::Sell {
                return (directive(ExitReason::Aggregator), update);
            }
        }

        (None, update)
    }

    /// Composite exit pressure in [0, 1]: adverse PnL, theta pressure near
    /// expiry, strategy hints and confidence decay.
    fn intelligent_score(&self, position: &Position, ctx: &ExitContext<'_>) -> f64 {
        // Unrealised loss component; denominators guarded
        let pnl_pct = if position.entry_price > 0.0 {
            (ctx.last_price - position.entry_price) / position.entry_price * 100.0
        } else {
            0.0
        };
        let loss_component = (-pnl_pct / 10.0).clamp(0.0, 1.0);

        // Theta pressure: exits accelerate within two trading days of expiry
        let theta_component = match position.expiry {
            Some(expiry) => {
                let today = ctx.now.with_timezone(&Kolkata).date_naive();
                match (expiry - today).num_days() {
                    d if d <= 0 => 1.0,
                    1 => 0.7,
                    2 => 0.4,
                    _ => 0.0,
                }
            }
            None => 0.0,
        };

        let hint_component = ctx.exit_hint.unwrap_or(0.0).clamp(0.0, 1.0);

        // Confidence decay: the entry would no longer pass the entry gate
        let decay_component = match ctx.refreshed_confidence {
            Some(c) if self.min_entry_confidence > 0.0 => {
                ((self.min_entry_confidence - c) / self.min_entry_confidence).clamp(0.0, 1.0)
            }
            _ => 0.0,
        };

        0.35 * loss_component
            + 0.25 * theta_component
            + 0.20 * hint_component
            + 0.20 * decay_component
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::loader::parse_config;
    use chrono::TimeZone;

    fn evaluator(extra: &str) -> ExitEvaluator {
        ExitEvaluator::new(&parse_config(extra).unwrap())
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 2, 6, 0, 0).unwrap()
    }

    fn position() -> Position {
        Position {
            symbol: "NIFTY24OCT24500CE".to_string(),
            shares: 50,
            entry_price: 100.0,
            entry_time: now(),
            entry_bar_ts: now(),
            stop_loss: 90.0,
            take_profit: 130.0,
            trailing_active: false,
            trailing_stop: None,
            highest_price_seen: 100.0,
            sector: "NIFTY".to_string(),
            confidence_at_entry: 0.7,
            strategy: "momentum".to_string(),
            expiry: None,
            lot_size: 50,
        }
    }

    fn ctx(price: f64, atr: f64) -> ExitContext<'static> {
        ExitContext {
            last_price: price,
            atr,
            now: now(),
            in_flatten_window: false,
            aggregator_exit: None,
            exit_hint: None,
            refreshed_confidence: None,
        }
    }

    #[test]
    fn test_stop_loss_fires() {
        let eval = evaluator("");
        let (exit, _) = eval.evaluate(&position(), &ctx(89.5, 10.0));
        assert_eq!(exit.unwrap().reason, ExitReason::StopLoss);
    }

    #[test]
    fn test_take_profit_fires() {
        let eval = evaluator("");
        let (exit, _) = eval.evaluate(&position(), &ctx(130.0, 10.0));
        assert_eq!(exit.unwrap().reason, ExitReason::TakeProfit);
    }

    #[test]
    fn test_trailing_lifecycle() {
        // Scenario: entry 100, ATR 10, activation at 111, trail gap 9
        let eval = evaluator("");
        let mut pos = position();

        // 105: below activation, nothing happens
        let (exit, update) = eval.evaluate(&pos, &ctx(105.0, 10.0));
        assert!(exit.is_none());
        assert!(!update.trailing_active);
        assert_eq!(update.highest_price_seen, 105.0);
        pos.highest_price_seen = update.highest_price_seen;

        // 115: activates, trail = 115 - 9 = 106; halfway (115) also moves
        // the hard stop to entry
        let (exit, update) = eval.evaluate(&pos, &ctx(115.0, 10.0));
        assert!(exit.is_none());
        assert!(update.trailing_active);
        assert_eq!(update.trailing_stop, Some(106.0));
        assert_eq!(update.stop_loss, 100.0);
        pos.trailing_active = update.trailing_active;
        pos.trailing_stop = update.trailing_stop;
        pos.stop_loss = update.stop_loss;
        pos.highest_price_seen = update.highest_price_seen;

        // 111: above the trail, ratchet holds at 106 (111 - 9 = 102 < 106)
        let (exit, update) = eval.evaluate(&pos, &ctx(111.0, 10.0));
        assert!(exit.is_none());
        assert_eq!(update.trailing_stop, Some(106.0));

        // 106: trail touched, exit
        let (exit, _) = eval.evaluate(&pos, &ctx(106.0, 10.0));
        assert_eq!(exit.unwrap().reason, ExitReason::TrailingStop);
    }

    #[test]
    fn test_trailing_ratchets_upward() {
        let eval = evaluator("");
        let mut pos = position();
        pos.trailing_active = true;
        pos.trailing_stop = Some(106.0);

        let (_, update) = eval.evaluate(&pos, &ctx(120.0, 10.0));
        assert_eq!(update.trailing_stop, Some(111.0));
    }

    #[test]
    fn test_zero_atr_disables_trailing_without_exit() {
        let eval = evaluator("");
        let mut pos = position();
        pos.trailing_active = true;
        pos.trailing_stop = Some(106.0);

        // Price at the trail, but ATR = 0: no trailing evaluation at all
        let (exit, update) = eval.evaluate(&pos, &ctx(106.0, 0.0));
        assert!(exit.is_none());
        assert_eq!(update.trailing_stop, Some(106.0));
    }

    #[test]
    fn test_force_flatten_only_in_live_mode() {
        let paper = evaluator("");
        let live = evaluator(r#"mode = "live""#);

        let mut c = ctx(105.0, 10.0);
        c.in_flatten_window = true;

        let (exit, _) = paper.evaluate(&position(), &c);
        assert!(exit.is_none());

        let (exit, _) = live.evaluate(&position(), &c);
        assert_eq!(exit.unwrap().reason, ExitReason::MarketClose);
    }

    #[test]
    fn test_intelligent_exit_near_expiry_with_loss() {
        let eval = evaluator("");
        let mut pos = position();
        // Expires tomorrow (IST date of `now` is 2026-02-02)
        pos.expiry = chrono::NaiveDate::from_ymd_opt(2026, 2, 3);

        let mut c = ctx(92.0, 10.0);
        c.exit_hint = Some(0.9);
        c.refreshed_confidence = Some(0.10);

        // 0.35*0.8 + 0.25*0.7 + 0.2*0.9 + 0.2*0.85 ≈ 0.805
        let (exit, _) = eval.evaluate(&pos, &c);
        assert_eq!(exit.unwrap().reason, ExitReason::Intelligent);
    }

    #[test]
    fn test_aggregator_exit_is_last_resort() {
        let eval = evaluator("");
        let signal = AggregatedSignal {
            symbol: "NIFTY24OCT24500CE".to_string(),
            action: SignalAction::Sell,
            confidence: 0.8,
            contributing_votes: vec![],
            is_exit: true,
        };

        let c = ExitContext { aggregator_exit: Some(&signal), ..ctx(105.0, 0.0) };

        let (exit, _) = eval.evaluate(&position(), &c);
        assert_eq!(exit.unwrap().reason, ExitReason::Aggregator);
    }

    #[test]
    fn test_no_exit_on_quiet_position() {
        let eval = evaluator("");
        let (exit, update) = eval.evaluate(&position(), &ctx(104.0, 10.0));
        assert!(exit.is_none());
        assert_eq!(update.stop_loss, 90.0);
    }

    #[test]
    fn test_zero_entry_price_guarded() {
        let eval = evaluator("");
        let mut pos = position();
        pos.entry_price = 0.0;
        pos.stop_loss = -1.0;
        pos.take_profit = 1_000.0;

        // Must not panic or emit NaN-driven exits
        let (exit, _) = eval.evaluate(&pos, &ctx(5.0, 0.0));
        assert!(exit.is_none());
    }
}
