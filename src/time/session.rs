/// Market session state derivation (IST)
use std::sync::Arc;

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc, Weekday};
use chrono_tz::Asia::Kolkata;

use crate::time::HolidayCalendar;
use crate::types::SessionState;

pub const OPEN_HOUR: u32 = 9;
pub const OPEN_MINUTE: u32 = 15;
pub const CLOSE_HOUR: u32 = 15;
pub const CLOSE_MINUTE: u32 = 30;

/// Session gate: trading day + IST open/close boundaries
pub struct MarketSession {
    calendar: Arc<HolidayCalendar>,
}

impl MarketSession {
    pub fn new(calendar: Arc<HolidayCalendar>) -> Self {
        MarketSession { calendar }
    }

    /// Calendar date in IST
    pub fn trading_day(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&Kolkata).date_naive()
    }

    /// Session open/close instants for a trading day
    pub fn open_close(&self, date: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
        let open = Kolkata
            .with_ymd_and_hms(date.year(), date.month(), date.day(), OPEN_HOUR, OPEN_MINUTE, 0)
            .unwrap()
            .with_timezone(&Utc);
        let close = Kolkata
            .with_ymd_and_hms(date.year(), date.month(), date.day(), CLOSE_HOUR, CLOSE_MINUTE, 0)
            .unwrap()
            .with_timezone(&Utc);
        (open, close)
    }

    pub fn state(&self, now: DateTime<Utc>) -> SessionState {
        let ist = now.with_timezone(&Kolkata);
        let date = ist.date_naive();

        let weekday = date.weekday();
        if weekday == Weekday::Sat || weekday == Weekday::Sun {
            return SessionState::Weekend;
        }
        if self.calendar.is_holiday(date) {
            return SessionState::Holiday;
        }

        let (open, close) = self.open_close(date);
        if now < open {
            SessionState::PreMarket
        } else if now < close {
            SessionState::Open
        } else {
            SessionState::PostMarket
        }
    }

    /// Seconds until today's close; zero once the session has ended
    pub fn seconds_to_close(&self, now: DateTime<Utc>) -> i64 {
        let (_, close) = self.open_close(self.trading_day(now));
        (close - now).num_seconds().max(0)
    }

    /// Seconds until the session opens (today or next trading day)
    pub fn seconds_to_open(&self, now: DateTime<Utc>) -> i64 {
        let today = self.trading_day(now);
        let (open, _) = self.open_close(today);
        if self.calendar.is_trading_day(today) && now < open {
            return (open - now).num_seconds();
        }
        let next = self.calendar.next_trading_day(today);
        let (next_open, _) = self.open_close(next);
        (next_open - now).num_seconds().max(0)
    }

    /// True within `window_minutes` of the close (force-flatten window)
    pub fn in_flatten_window(&self, now: DateTime<Utc>, window_minutes: i64) -> bool {
        self.state(now) == SessionState::Open
            && self.seconds_to_close(now) <= window_minutes * 60
    }

    pub fn calendar(&self) -> &HolidayCalendar {
        &self.calendar
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> MarketSession {
        MarketSession::new(Arc::new(HolidayCalendar::builtin()))
    }

    fn ist(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Kolkata.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_state_transitions_over_a_trading_day() {
        let s = session();
        // Monday 2026-01-05
        assert_eq!(s.state(ist(2026, 1, 5, 8, 0)), SessionState::PreMarket);
        assert_eq!(s.state(ist(2026, 1, 5, 9, 15)), SessionState::Open);
        assert_eq!(s.state(ist(2026, 1, 5, 15, 29)), SessionState::Open);
        assert_eq!(s.state(ist(2026, 1, 5, 15, 30)), SessionState::PostMarket);
    }

    #[test]
    fn test_weekend_and_holiday_states() {
        let s = session();
        assert_eq!(s.state(ist(2026, 1, 3, 11, 0)), SessionState::Weekend);
        assert_eq!(s.state(ist(2026, 1, 26, 11, 0)), SessionState::Holiday);
    }

    #[test]
    fn test_flatten_window() {
        let s = session();
        assert!(!s.in_flatten_window(ist(2026, 1, 5, 15, 0), 5));
        assert!(s.in_flatten_window(ist(2026, 1, 5, 15, 26), 5));
        assert!(!s.in_flatten_window(ist(2026, 1, 5, 15, 31), 5));
    }

    #[test]
    fn test_seconds_to_open_rolls_to_next_trading_day() {
        let s = session();
        // Friday post-market: next open is Monday 09:15
        let friday_evening = ist(2026, 1, 9, 18, 0);
        let expected_open = ist(2026, 1, 12, 9, 15);
        assert_eq!(
            s.seconds_to_open(friday_evening),
            (expected_open - friday_evening).num_seconds()
        );
    }
}
