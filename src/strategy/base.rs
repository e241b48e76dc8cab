/// Shared confirmation and debounce bookkeeping for strategies
use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

#[derive(Default)]
struct SymbolState {
    streak_direction: i8,
    streak: usize,
    cooldown_until: Option<DateTime<Utc>>,
}

/// Every built-in strategy owns one of these. It enforces the two shared
/// behaviours: a raw condition must hold for `confirmation_bars`
/// consecutive evaluations before a signal is emitted, and after emitting
/// a non-hold signal the symbol is debounced for `cooldown_minutes`.
pub struct StrategyCore {
    confirmation_bars: usize,
    cooldown: Duration,
    state: Mutex<HashMap<String, SymbolState>>,
}

impl StrategyCore {
    pub fn new(confirmation_bars: usize, cooldown_minutes: i64) -> Self {
        StrategyCore {
            confirmation_bars: confirmation_bars.max(1),
            cooldown: Duration::minutes(cooldown_minutes),
            state: Mutex::new(HashMap::new()),
        }
    }

    /// Feed this evaluation's raw direction. Returns the confirmed
    /// direction, or 0 until the streak is long enough.
    fn confirm(&self, symbol: &str, raw: i8) -> i8 {
        let mut state = self.state.lock().unwrap();
        let entry = state.entry(symbol.to_string()).or_default();

        if raw == 0 || raw != entry.streak_direction {
            entry.streak_direction = raw;
            entry.streak = usize::from(raw != 0);
        } else {
            entry.streak += 1;
        }

        if raw != 0 && entry.streak >= self.confirmation_bars {
            raw
        } else {
            0
        }
    }

    pub fn in_cooldown(&self, symbol: &str, now: DateTime<Utc>) -> bool {
        let state = self.state.lock().unwrap();
        state
            .get(symbol)
            .and_then(|s| s.cooldown_until)
            .map(|until| now < until)
            .unwrap_or(false)
    }

    /// Start (or refresh) the debounce window for a symbol
    pub fn start_cooldown(&self, symbol: &str, now: DateTime<Utc>) {
        let mut state = self.state.lock().unwrap();
        let entry = state.entry(symbol.to_string()).or_default();
        entry.cooldown_until = Some(now + self.cooldown);
    }

    /// Confirmation plus debounce in one step: the emitted direction, or 0
    pub fn gate(&self, symbol: &str, raw: i8, now: DateTime<Utc>) -> i8 {
        let confirmed = self.confirm(symbol, raw);
        if confirmed == 0 {
            return 0;
        }
        if self.in_cooldown(symbol, now) {
            return 0;
        }
        self.start_cooldown(symbol, now);
        confirmed
    }

    pub fn reset(&self) {
        let mut state = self.state.lock().unwrap();
        state.clear();
    }
}
