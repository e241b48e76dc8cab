/// NSE/BSE trading holiday calendar
use std::collections::HashSet;
use std::path::Path;

use chrono::{Datelike, NaiveDate};

use crate::error::{Result, TradingError};

/// Trading holidays for 2025 (update annually)
fn holidays_2025() -> Vec<NaiveDate> {
    vec![
        NaiveDate::from_ymd_opt(2025, 1, 26).unwrap(),  // Republic Day
        NaiveDate::from_ymd_opt(2025, 2, 26).unwrap(),  // Mahashivratri
        NaiveDate::from_ymd_opt(2025, 3, 14).unwrap(),  // Holi
        NaiveDate::from_ymd_opt(2025, 3, 31).unwrap(),  // Id-Ul-Fitr
        NaiveDate::from_ymd_opt(2025, 4, 10).unwrap(),  // Mahavir Jayanti
        NaiveDate::from_ymd_opt(2025, 4, 14).unwrap(),  // Dr. Ambedkar Jayanti
        NaiveDate::from_ymd_opt(2025, 4, 18).unwrap(),  // Good Friday
        NaiveDate::from_ymd_opt(2025, 5, 1).unwrap(),   // Maharashtra Day
        NaiveDate::from_ymd_opt(2025, 5, 12).unwrap(),  // Buddha Purnima
        NaiveDate::from_ymd_opt(2025, 6, 7).unwrap(),   // Bakri Id
        NaiveDate::from_ymd_opt(2025, 7, 7).unwrap(),   // Muharram
        NaiveDate::from_ymd_opt(2025, 8, 15).unwrap(),  // Independence Day
        NaiveDate::from_ymd_opt(2025, 8, 27).unwrap(),  // Ganesh Chaturthi
        NaiveDate::from_ymd_opt(2025, 9, 5).unwrap(),   // Eid-E-Milad
        NaiveDate::from_ymd_opt(2025, 10, 2).unwrap(),  // Mahatma Gandhi Jayanti
        NaiveDate::from_ymd_opt(2025, 10, 21).unwrap(), // Diwali
        NaiveDate::from_ymd_opt(2025, 10, 22).unwrap(), // Diwali Balipratipada
        NaiveDate::from_ymd_opt(2025, 11, 5).unwrap(),  // Gurunanak Jayanti
        NaiveDate::from_ymd_opt(2025, 12, 25).unwrap(), // Christmas
    ]
}

/// Trading holidays for 2026 (update annually)
fn holidays_2026() -> Vec<NaiveDate> {
    vec![
        NaiveDate::from_ymd_opt(2026, 1, 26).unwrap(),  // Republic Day
        NaiveDate::from_ymd_opt(2026, 3, 4).unwrap(),   // Holi
        NaiveDate::from_ymd_opt(2026, 3, 20).unwrap(),  // Id-Ul-Fitr
        NaiveDate::from_ymd_opt(2026, 3, 31).unwrap(),  // Mahavir Jayanti
        NaiveDate::from_ymd_opt(2026, 4, 3).unwrap(),   // Good Friday
        NaiveDate::from_ymd_opt(2026, 4, 14).unwrap(),  // Dr. Ambedkar Jayanti
        NaiveDate::from_ymd_opt(2026, 5, 1).unwrap(),   // Maharashtra Day
        NaiveDate::from_ymd_opt(2026, 5, 27).unwrap(),  // Bakri Id
        NaiveDate::from_ymd_opt(2026, 6, 26).unwrap(),  // Muharram
        NaiveDate::from_ymd_opt(2026, 9, 14).unwrap(),  // Ganesh Chaturthi
        NaiveDate::from_ymd_opt(2026, 10, 2).unwrap(),  // Mahatma Gandhi Jayanti
        NaiveDate::from_ymd_opt(2026, 10, 20).unwrap(), // Dussehra
        NaiveDate::from_ymd_opt(2026, 11, 9).unwrap(),  // Diwali Balipratipada
        NaiveDate::from_ymd_opt(2026, 11, 24).unwrap(), // Gurunanak Jayanti
        NaiveDate::from_ymd_opt(2026, 12, 25).unwrap(), // Christmas
    ]
}

/// Injected holiday calendar. Built-in years cover 2025-2026; a file can
/// replace or extend them.
pub struct HolidayCalendar {
    holidays: HashSet<NaiveDate>,
}

impl HolidayCalendar {
    /// Calendar with the embedded holiday sets
    pub fn builtin() -> Self {
        let mut holidays = HashSet::new();
        holidays.extend(holidays_2025());
        holidays.extend(holidays_2026());
        HolidayCalendar { holidays }
    }

    /// Load additional holidays from a file of `YYYY-MM-DD` lines.
    /// Blank lines and `#` comments are skipped.
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)?;
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let date = NaiveDate::parse_from_str(line, "%Y-%m-%d").map_err(|e| {
                TradingError::ConfigError(format!("Bad holiday entry '{}': {}", line, e))
            })?;
            self.holidays.insert(date);
        }
        Ok(self)
    }

    #[cfg(test)]
    pub fn from_dates(dates: impl IntoIterator<Item = NaiveDate>) -> Self {
        HolidayCalendar { holidays: dates.into_iter().collect() }
    }

    pub fn is_holiday(&self, date: NaiveDate) -> bool {
        self.holidays.contains(&date)
    }

    /// Check if a date is a trading day (not weekend, not holiday)
    pub fn is_trading_day(&self, date: NaiveDate) -> bool {
        let weekday = date.weekday();
        if weekday == chrono::Weekday::Sat || weekday == chrono::Weekday::Sun {
            return false;
        }
        !self.is_holiday(date)
    }

    /// Get next trading day strictly after `from_date`
    pub fn next_trading_day(&self, from_date: NaiveDate) -> NaiveDate {
        let mut date = from_date + chrono::Duration::days(1);
        while !self.is_trading_day(date) {
            date += chrono::Duration::days(1);
        }
        date
    }
}
