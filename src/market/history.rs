/// Minute-bar aggregation from polled quotes.
///
/// The engine polls rather than streams, so strategy inputs are built by
/// bucketing each scan's quotes into minute bars per symbol.
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, DurationRound, Utc};

use crate::types::Bar;

struct SymbolSeries {
    bars: VecDeque<Bar>,
    current: Option<Bar>,
    last_total_volume: i64,
}

pub struct PriceHistory {
    capacity: usize,
    series: Mutex<HashMap<String, SymbolSeries>>,
}

impl PriceHistory {
    pub fn new(capacity: usize) -> Self {
        PriceHistory { capacity: capacity.max(2), series: Mutex::new(HashMap::new()) }
    }

    pub fn minute_boundary(ts: DateTime<Utc>) -> DateTime<Utc> {
        ts.duration_trunc(chrono::Duration::minutes(1)).unwrap_or(ts)
    }

    /// Fold one polled quote into the symbol's bar series. `total_volume`
    /// is the cumulative session volume as brokers report it; bar volume
    /// is the per-bar delta.
    pub fn record(&self, symbol: &str, price: f64, total_volume: i64, ts: DateTime<Utc>) {
        let boundary = Self::minute_boundary(ts);
        let mut series = self.series.lock().unwrap();
        let entry = series.entry(symbol.to_string()).or_insert_with(|| SymbolSeries {
            bars: VecDeque::new(),
            current: None,
            last_total_volume: 0,
        });

        let volume_delta = (total_volume - entry.last_total_volume).max(0);
        entry.last_total_volume = entry.last_total_volume.max(total_volume);

        match &mut entry.current {
            Some(bar) if bar.timestamp == boundary => {
                bar.high = bar.high.max(price);
                bar.low = bar.low.min(price);
                bar.close = price;
                bar.volume += volume_delta;
            }
            _ => {
                if let Some(done) = entry.current.take() {
                    entry.bars.push_back(done);
                    if entry.bars.len() > self.capacity {
                        entry.bars.pop_front();
                    }
                }
                entry.current = Some(Bar {
                    timestamp: boundary,
                    open: price,
                    high: price,
                    low: price,
                    close: price,
                    volume: volume_delta,
                });
            }
        }
    }

    /// Completed bars plus the in-progress one, oldest first
    pub fn bars(&self, symbol: &str) -> Vec<Bar> {
        let series = self.series.lock().unwrap();
        match series.get(symbol) {
            Some(s) => {
                let mut bars: Vec<Bar> = s.bars.iter().cloned().collect();
                if let Some(current) = &s.current {
                    bars.push(current.clone());
                }
                bars
            }
            None => Vec::new(),
        }
    }

    pub fn reset(&self) {
        let mut series = self.series.lock().unwrap();
        series.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_ticks_fold_into_minute_bars() {
        let history = PriceHistory::new(100);
        let t0 = Utc.with_ymd_and_hms(2026, 2, 2, 5, 0, 5).unwrap();

        history.record("NIFTY", 100.0, 1_000, t0);
        history.record("NIFTY", 102.0, 1_500, t0 + chrono::Duration::seconds(10));
        history.record("NIFTY", 99.0, 2_000, t0 + chrono::Duration::seconds(20));
        history.record("NIFTY", 101.0, 2_400, t0 + chrono::Duration::seconds(70));

        let bars = history.bars("NIFTY");
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].open, 100.0);
        assert_eq!(bars[0].high, 102.0);
        assert_eq!(bars[0].low, 99.0);
        assert_eq!(bars[0].close, 99.0);
        assert_eq!(bars[0].volume, 2_000);
        assert_eq!(bars[1].close, 101.0);
        assert_eq!(bars[1].volume, 400);
    }

    #[test]
    fn test_capacity_bound() {
        let history = PriceHistory::new(5);
        let t0 = Utc.with_ymd_and_hms(2026, 2, 2, 5, 0, 0).unwrap();

        for i in 0..10 {
            history.record("NIFTY", 100.0 + i as f64, 0, t0 + chrono::Duration::minutes(i));
        }

        // 5 completed bars retained plus the in-progress one
        let bars = history.bars("NIFTY");
        assert_eq!(bars.len(), 6);
        assert_eq!(bars.last().unwrap().close, 109.0);
    }

    #[test]
    fn test_volume_delta_never_negative() {
        let history = PriceHistory::new(10);
        let t0 = Utc.with_ymd_and_hms(2026, 2, 2, 5, 0, 0).unwrap();

        history.record("NIFTY", 100.0, 5_000, t0);
        // Broker glitch: cumulative volume goes backwards
        history.record("NIFTY", 100.5, 4_000, t0 + chrono::Duration::seconds(10));

        let bars = history.bars("NIFTY");
        assert_eq!(bars[0].volume, 5_000);
    }
}
