//! Market-hours window parsing and the clock gate for scheduled runs.
//!
//! Windows are times of day ("10:30", "14:15") inside US regular trading
//! hours. The driver launches a market-hours iteration only when the
//! local clock falls within a window's tolerance on a trading day;
//! otherwise it reports when the next window opens.

use chrono::{Datelike, Duration as ChronoDuration, NaiveDate, NaiveDateTime, NaiveTime, Weekday};

use crate::config::ConfigError;

/// US market holidays the scheduler skips. Simplified fixed list; a
/// production deployment would source these from a calendar feed.
pub const US_MARKET_HOLIDAYS: &[&str] = &[
    "2024-01-01",
    "2024-01-15",
    "2024-02-19",
    "2024-03-29",
    "2024-05-27",
    "2024-06-19",
    "2024-07-04",
    "2024-09-02",
    "2024-11-28",
    "2024-12-25",
    "2025-01-01",
    "2025-01-20",
    "2025-02-17",
    "2025-04-18",
    "2025-05-26",
    "2025-06-19",
    "2025-07-04",
    "2025-09-01",
    "2025-11-27",
    "2025-12-25",
    "2026-01-01",
    "2026-01-19",
    "2026-02-16",
    "2026-04-03",
    "2026-05-25",
    "2026-06-19",
    "2026-07-03",
    "2026-09-07",
    "2026-11-26",
    "2026-12-25",
];

/// Regular session open (9:30 AM exchange time).
pub fn market_open() -> NaiveTime {
    NaiveTime::from_hms_opt(9, 30, 0).expect("static time")
}

/// Regular session close (4:00 PM exchange time).
pub fn market_close() -> NaiveTime {
    NaiveTime::from_hms_opt(16, 0, 0).expect("static time")
}

/// Parse a comma-separated window list: `"11"`, `"11:30"`, `"10:30,14:15"`.
///
/// Every window must fall within regular trading hours. Returns windows
/// sorted ascending with duplicates removed.
pub fn parse_windows(input: &str) -> Result<Vec<NaiveTime>, ConfigError> {
    let parts: Vec<&str> = input
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();
    if parts.is_empty() {
        return Err(ConfigError::NoWindows);
    }

    let mut windows = Vec::with_capacity(parts.len());
    for part in parts {
        windows.push(parse_one_window(part)?);
    }
    windows.sort();
    windows.dedup();
    Ok(windows)
}

fn parse_one_window(part: &str) -> Result<NaiveTime, ConfigError> {
    let bad = |reason: &str| ConfigError::InvalidWindow {
        window: part.to_string(),
        reason: reason.to_string(),
    };

    let (hour_str, minute_str) = match part.split_once(':') {
        Some((h, m)) => (h, m),
        None => (part, "0"),
    };
    let hour: u32 = hour_str
        .trim()
        .parse()
        .map_err(|_| bad("hour is not a number"))?;
    let minute: u32 = minute_str
        .trim()
        .parse()
        .map_err(|_| bad("minute is not a number"))?;
    if minute > 59 {
        return Err(bad("minute must be 0-59"));
    }
    let time = NaiveTime::from_hms_opt(hour, minute, 0).ok_or_else(|| bad("invalid time"))?;
    if time < market_open() || time > market_close() {
        return Err(bad("outside regular trading hours (9:30-16:00)"));
    }
    Ok(time)
}

pub fn is_holiday(date: NaiveDate) -> bool {
    let formatted = date.format("%Y-%m-%d").to_string();
    US_MARKET_HOLIDAYS.contains(&formatted.as_str())
}

/// Weekday and not a listed holiday.
pub fn is_trading_day(date: NaiveDate) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) && !is_holiday(date)
}

/// The window `now` currently falls in, if any: within `[window, window +
/// tolerance]` on a trading day.
pub fn active_window(
    now: NaiveDateTime,
    windows: &[NaiveTime],
    tolerance: ChronoDuration,
) -> Option<NaiveTime> {
    if !is_trading_day(now.date()) {
        return None;
    }
    let time = now.time();
    windows.iter().copied().find(|&w| {
        let end = w.overflowing_add_signed(tolerance).0;
        time >= w && time <= end
    })
}

/// Next window occurrence at or after `now`, skipping weekends and
/// holidays. `None` when `windows` is empty.
pub fn next_window(now: NaiveDateTime, windows: &[NaiveTime]) -> Option<NaiveDateTime> {
    if windows.is_empty() {
        return None;
    }
    let mut sorted = windows.to_vec();
    sorted.sort();

    if is_trading_day(now.date()) {
        if let Some(&later) = sorted.iter().find(|&&w| w > now.time()) {
            return Some(now.date().and_time(later));
        }
    }

    // Walk forward to the next trading day's first window. The holiday
    // list is finite, so bound the walk.
    let mut date = now.date();
    for _ in 0..30 {
        date = date.succ_opt()?;
        if is_trading_day(date) {
            return Some(date.and_time(sorted[0]));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn parses_single_hour_and_hour_minute() {
        assert_eq!(parse_windows("11").unwrap(), vec![t(11, 0)]);
        assert_eq!(parse_windows("11:30").unwrap(), vec![t(11, 30)]);
    }

    #[test]
    fn parses_comma_list_sorted_and_deduped() {
        assert_eq!(
            parse_windows("14:15, 10:30, 14:15").unwrap(),
            vec![t(10, 30), t(14, 15)]
        );
    }

    #[test]
    fn rejects_out_of_session_windows() {
        assert!(parse_windows("8:00").is_err());
        assert!(parse_windows("16:30").is_err());
        assert!(parse_windows("10:30,17:00").is_err());
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_windows("").is_err());
        assert!(parse_windows("  , ,").is_err());
        assert!(parse_windows("ten thirty").is_err());
        assert!(parse_windows("10:99").is_err());
    }

    #[test]
    fn session_boundaries_are_inclusive() {
        assert_eq!(parse_windows("9:30").unwrap(), vec![t(9, 30)]);
        assert_eq!(parse_windows("16:00").unwrap(), vec![t(16, 0)]);
    }

    #[test]
    fn weekends_and_holidays_are_not_trading_days() {
        assert!(is_trading_day(d(2025, 8, 27))); // Wednesday
        assert!(!is_trading_day(d(2025, 8, 30))); // Saturday
        assert!(!is_trading_day(d(2025, 8, 31))); // Sunday
        assert!(!is_trading_day(d(2025, 12, 25))); // Christmas
    }

    #[test]
    fn active_window_respects_tolerance() {
        let windows = vec![t(10, 30), t(14, 15)];
        let tol = ChronoDuration::minutes(5);
        let day = d(2025, 8, 27);

        assert_eq!(
            active_window(day.and_time(t(10, 30)), &windows, tol),
            Some(t(10, 30))
        );
        assert_eq!(
            active_window(day.and_time(t(10, 34)), &windows, tol),
            Some(t(10, 30))
        );
        assert_eq!(active_window(day.and_time(t(10, 36)), &windows, tol), None);
        assert_eq!(
            active_window(day.and_time(t(14, 16)), &windows, tol),
            Some(t(14, 15))
        );
    }

    #[test]
    fn no_active_window_on_weekends() {
        let windows = vec![t(10, 30)];
        let saturday = d(2025, 8, 30);
        assert_eq!(
            active_window(
                saturday.and_time(t(10, 30)),
                &windows,
                ChronoDuration::minutes(5)
            ),
            None
        );
    }

    #[test]
    fn next_window_later_same_day() {
        let windows = vec![t(10, 30), t(14, 15)];
        let now = d(2025, 8, 27).and_time(t(11, 0));
        assert_eq!(
            next_window(now, &windows),
            Some(d(2025, 8, 27).and_time(t(14, 15)))
        );
    }

    #[test]
    fn next_window_rolls_over_weekend() {
        let windows = vec![t(10, 30)];
        // Friday after the last window rolls to Monday.
        let friday_close = d(2025, 8, 29).and_time(t(15, 0));
        assert_eq!(
            next_window(friday_close, &windows),
            Some(d(2025, 9, 2).and_time(t(10, 30)))
        );
    }

    #[test]
    fn next_window_empty_is_none() {
        assert_eq!(next_window(d(2025, 8, 27).and_time(t(11, 0)), &[]), None);
    }

    proptest! {
        /// The parser never panics, whatever the input.
        #[test]
        fn parse_never_panics(input in ".{0,40}") {
            let _ = parse_windows(&input);
        }

        /// Valid in-session times always parse back to themselves.
        #[test]
        fn valid_windows_roundtrip(hour in 10u32..16, minute in 0u32..60) {
            let input = format!("{hour}:{minute:02}");
            let parsed = parse_windows(&input).unwrap();
            prop_assert_eq!(parsed, vec![t(hour, minute)]);
        }
    }
}
