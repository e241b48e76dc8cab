/// Technical indicators implementation
use crate::types::Bar;

/// Simple moving average over the trailing `period` closes
pub fn calculate_sma(bars: &[Bar], period: usize) -> Option<f64> {
    if period == 0 || bars.len() < period {
        return None;
    }

    let sum: f64 = bars.iter().rev().take(period).map(|b| b.close).sum();
    Some(sum / period as f64)
}

/// Calculate EMA (Exponential Moving Average) seeded from an SMA
pub fn calculate_ema(bars: &[Bar], period: usize) -> Option<f64> {
    if period == 0 || bars.len() < period {
        return None;
    }

    let seed: f64 = bars.iter().take(period).map(|b| b.close).sum::<f64>() / period as f64;
    let multiplier = 2.0 / (period as f64 + 1.0);

    let mut ema = seed;
    for bar in bars.iter().skip(period) {
        ema = (bar.close - ema) * multiplier + ema;
    }

    Some(ema)
}

/// Calculate RSI (Relative Strength Index)
pub fn calculate_rsi(bars: &[Bar], period: usize) -> Option<f64> {
    if bars.len() < period + 1 {
        return None;
    }

    let mut gains = Vec::new();
    let mut losses = Vec::new();

    for i in 1..bars.len() {
        let change = bars[i].close - bars[i - 1].close;
        if change > 0.0 {
            gains.push(change);
            losses.push(0.0);
        } else {
            gains.push(0.0);
            losses.push(change.abs());
        }
    }

    let avg_gain: f64 = gains.iter().rev().take(period).sum::<f64>() / period as f64;
    let avg_loss: f64 = losses.iter().rev().take(period).sum::<f64>() / period as f64;

    if avg_loss == 0.0 {
        return Some(100.0);
    }

    let rs = avg_gain / avg_loss;
    Some(100.0 - (100.0 / (1.0 + rs)))
}

/// Average True Range using Wilder's smoothing
pub fn calculate_atr(bars: &[Bar], period: usize) -> Option<f64> {
    if period == 0 || bars.len() < period + 1 {
        return None;
    }

    let mut tr_values = Vec::with_capacity(bars.len() - 1);
    for i in 1..bars.len() {
        let high = bars[i].high;
        let low = bars[i].low;
        let prev_close = bars[i - 1].close;

        let tr = (high - low)
            .max((high - prev_close).abs())
            .max((low - prev_close).abs());
        tr_values.push(tr);
    }

    let mut atr: f64 = tr_values.iter().take(period).sum::<f64>() / period as f64;
    for tr in tr_values.iter().skip(period) {
        atr = ((period - 1) as f64 * atr + tr) / period as f64;
    }

    Some(atr)
}

/// Standard deviation of the trailing `period` closes
pub fn calculate_stdev(bars: &[Bar], period: usize) -> Option<f64> {
    if period < 2 || bars.len() < period {
        return None;
    }

    let closes: Vec<f64> = bars.iter().rev().take(period).map(|b| b.close).collect();
    let mean = closes.iter().sum::<f64>() / period as f64;
    let variance = closes.iter().map(|c| (c - mean).powi(2)).sum::<f64>() / period as f64;

    Some(variance.sqrt())
}

/// Bollinger bands: (middle, upper, lower)
pub fn calculate_bollinger(bars: &[Bar], period: usize, k: f64) -> Option<(f64, f64, f64)> {
    let middle = calculate_sma(bars, period)?;
    let stdev = calculate_stdev(bars, period)?;
    Some((middle, middle + k * stdev, middle - k * stdev))
}

/// Rate of change over `period` bars, in percent
pub fn calculate_roc(bars: &[Bar], period: usize) -> Option<f64> {
    if bars.len() < period + 1 {
        return None;
    }

    let latest = bars[bars.len() - 1].close;
    let earlier = bars[bars.len() - 1 - period].close;
    if earlier == 0.0 {
        return Some(0.0);
    }

    Some((latest - earlier) / earlier * 100.0)
}

/// Average volume over the trailing `period` bars
pub fn average_volume(bars: &[Bar], period: usize) -> Option<f64> {
    if period == 0 || bars.len() < period {
        return None;
    }

    let sum: i64 = bars.iter().rev().take(period).map(|b| b.volume).sum();
    Some(sum as f64 / period as f64)
}

#[cfg(test)]
pub fn bars_from_closes(closes: &[f64]) -> Vec<Bar> {
    use chrono::{Duration, TimeZone, Utc};

    let start = Utc.with_ymd_and_hms(2026, 2, 2, 4, 0, 0).unwrap();
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| Bar {
            timestamp: start + Duration::minutes(i as i64),
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 10_000,
        })
        .collect()
}
