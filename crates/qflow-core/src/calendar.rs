//! Business-day arithmetic in a fixed local time zone.
//!
//! Ticket numbering is scoped to the local `[00:00, 24:00)` window and
//! counters close at a local time of day, so every date computation goes
//! through one fixed UTC offset (UTC+07:00 by default).

use chrono::{DateTime, Duration, FixedOffset, NaiveTime, TimeZone, Timelike, Utc};

use crate::error::{CoreError, CoreResult};

/// Seconds in a day.
const SECS_PER_DAY: i64 = 86_400;

/// Default offset: UTC+07:00.
pub const DEFAULT_UTC_OFFSET_MINUTES: i32 = 7 * 60;

/// Half-open UTC interval `[start, end)` covering one local business day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DayWindow {
    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        self.start <= t && t < self.end
    }
}

/// Local calendar with a fixed UTC offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusinessCalendar {
    offset: FixedOffset,
}

impl Default for BusinessCalendar {
    fn default() -> Self {
        Self {
            offset: FixedOffset::east_opt(DEFAULT_UTC_OFFSET_MINUTES * 60)
                .expect("UTC+07:00 is a valid offset"),
        }
    }
}

impl BusinessCalendar {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }

    /// Build from an offset in minutes east of UTC.
    pub fn from_offset_minutes(minutes: i32) -> CoreResult<Self> {
        minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .map(Self::new)
            .ok_or_else(|| CoreError::InvalidConfig(format!("invalid UTC offset: {minutes}min")))
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Convert to local time.
    pub fn local(&self, t: DateTime<Utc>) -> DateTime<FixedOffset> {
        t.with_timezone(&self.offset)
    }

    /// The business day containing `t`.
    pub fn day_window(&self, t: DateTime<Utc>) -> DayWindow {
        let local_midnight = self.local(t).date_naive().and_time(NaiveTime::MIN);
        let utc_midnight =
            local_midnight - Duration::seconds(i64::from(self.offset.local_minus_utc()));
        let start = Utc.from_utc_datetime(&utc_midnight);
        DayWindow {
            start,
            end: start + Duration::days(1),
        }
    }

    /// Whether a counter closing at local `closes_at` is due at `now`.
    ///
    /// Due means the local time of day is within `window` of `closes_at`
    /// (inclusive), measured around the clock so 23:59:30 is 60s from 00:00:30.
    pub fn is_closing_due(&self, closes_at: NaiveTime, now: DateTime<Utc>, window: Duration) -> bool {
        let now_secs = i64::from(self.local(now).num_seconds_from_midnight());
        let close_secs = i64::from(closes_at.num_seconds_from_midnight());
        let diff = (now_secs - close_secs).rem_euclid(SECS_PER_DAY);
        let distance = diff.min(SECS_PER_DAY - diff);
        distance <= window.num_seconds()
    }

    /// Tickets created before this instant are past retention.
    pub fn retention_cutoff(&self, now: DateTime<Utc>, retention_days: u32) -> DateTime<Utc> {
        now - Duration::days(i64::from(retention_days))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, month, day, hour, min, sec).unwrap()
    }

    fn hms(h: u32, m: u32, s: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, s).unwrap()
    }

    #[test]
    fn test_day_window_uses_local_midnight() {
        let cal = BusinessCalendar::default();
        // 2026-03-02 18:30 UTC is 2026-03-03 01:30 in UTC+7
        let window = cal.day_window(utc(2026, 3, 2, 18, 30, 0));
        assert_eq!(window.start, utc(2026, 3, 2, 17, 0, 0));
        assert_eq!(window.end, utc(2026, 3, 3, 17, 0, 0));
    }

    #[test]
    fn test_day_window_is_half_open() {
        let cal = BusinessCalendar::default();
        let window = cal.day_window(utc(2026, 3, 2, 5, 0, 0));
        assert!(window.contains(window.start));
        assert!(!window.contains(window.end));
        assert!(!window.contains(window.start - Duration::seconds(1)));
    }

    #[test]
    fn test_utc_calendar() {
        let cal = BusinessCalendar::from_offset_minutes(0).unwrap();
        let window = cal.day_window(utc(2026, 3, 2, 23, 59, 59));
        assert_eq!(window.start, utc(2026, 3, 2, 0, 0, 0));
    }

    #[test]
    fn test_invalid_offset() {
        assert!(BusinessCalendar::from_offset_minutes(24 * 60).is_err());
        assert!(BusinessCalendar::from_offset_minutes(40_000_000).is_err());
        assert!(BusinessCalendar::from_offset_minutes(i32::MIN).is_err());
    }

    #[test]
    fn test_closing_due_within_window() {
        let cal = BusinessCalendar::default();
        let window = Duration::seconds(60);
        // 09:00 UTC == 16:00 local
        assert!(cal.is_closing_due(hms(16, 0, 0), utc(2026, 3, 2, 9, 0, 0), window));
        assert!(cal.is_closing_due(hms(16, 0, 0), utc(2026, 3, 2, 8, 59, 0), window));
        assert!(cal.is_closing_due(hms(16, 0, 0), utc(2026, 3, 2, 9, 1, 0), window));
        assert!(!cal.is_closing_due(hms(16, 0, 0), utc(2026, 3, 2, 9, 1, 1), window));
        assert!(!cal.is_closing_due(hms(16, 0, 0), utc(2026, 3, 2, 8, 58, 59), window));
    }

    #[test]
    fn test_closing_due_wraps_midnight() {
        let cal = BusinessCalendar::from_offset_minutes(0).unwrap();
        let window = Duration::seconds(60);
        assert!(cal.is_closing_due(hms(0, 0, 30), utc(2026, 3, 2, 23, 59, 45), window));
        assert!(cal.is_closing_due(hms(23, 59, 50), utc(2026, 3, 3, 0, 0, 20), window));
    }

    #[test]
    fn test_retention_cutoff() {
        let cal = BusinessCalendar::default();
        let now = utc(2026, 3, 31, 0, 0, 0);
        assert_eq!(cal.retention_cutoff(now, 30), utc(2026, 3, 1, 0, 0, 0));
    }
}
