//! Range Token → concrete half-open `[start, end)` UTC interval, §4.3.
//! Shared by C5 (optional `time_context` attachment) and C6 (authoritative
//! SQL time-window compilation) so there is exactly one implementation of
//! these time semantics.

use crate::models::semantic_ir::{Interval, RangeToken};
use chrono::{DateTime, Datelike, Duration, TimeZone, Utc, Weekday};

fn floor_day(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive().and_hms_opt(0, 0, 0).unwrap().and_utc()
}

fn monday_of(now: DateTime<Utc>) -> DateTime<Utc> {
    let day = floor_day(now);
    let offset = day.weekday().num_days_from_monday();
    day - Duration::days(offset as i64)
}

fn floor_month(now: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0).single().unwrap()
}

fn floor_year(now: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(now.year(), 1, 1, 0, 0, 0).single().unwrap()
}

fn add_months(dt: DateTime<Utc>, months: i32) -> DateTime<Utc> {
    let total = dt.month0() as i32 + months;
    let year = dt.year() + total.div_euclid(12);
    let month0 = total.rem_euclid(12);
    Utc.with_ymd_and_hms(year, (month0 + 1) as u32, 1, 0, 0, 0).single().unwrap()
}

/// Resolves `token` against `now` into `[start, end)` plus the granularity
/// a GROUP BY over this window would naturally bucket at (used as the
/// default `interval` when none is otherwise specified).
pub fn resolve(token: &RangeToken, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>, Interval) {
    match token {
        RangeToken::Today => (floor_day(now), floor_day(now) + Duration::days(1), Interval::Hour),
        RangeToken::Yesterday => (floor_day(now) - Duration::days(1), floor_day(now), Interval::Hour),
        RangeToken::LastNMinutes(n) => (now - Duration::minutes(*n as i64), now, Interval::Minute),
        RangeToken::LastNHours(n) => (now - Duration::hours(*n as i64), now, Interval::Hour),
        RangeToken::LastNDays(n) => (now - Duration::days(*n as i64), now, Interval::Day),
        RangeToken::LastNWeeks(n) => (now - Duration::weeks(*n as i64), now, Interval::Week),
        RangeToken::LastNMonths(n) => (now - Duration::days(30 * *n as i64), now, Interval::Month),
        RangeToken::NHoursAgo(n) => (
            now - Duration::hours(*n as i64),
            now - Duration::hours((*n as i64) - 1),
            Interval::Hour,
        ),
        RangeToken::NDaysAgo(n) => (
            floor_day(now) - Duration::days(*n as i64),
            floor_day(now) - Duration::days((*n as i64) - 1),
            Interval::Day,
        ),
        RangeToken::NWeeksAgo(n) => {
            let start = monday_of(now - Duration::weeks(*n as i64));
            (start, start + Duration::days(7), Interval::Week)
        }
        RangeToken::PreviousNHours(n) => (
            now - Duration::hours(2 * *n as i64),
            now - Duration::hours(*n as i64),
            Interval::Hour,
        ),
        RangeToken::PreviousNDays(n) => (
            now - Duration::days(2 * *n as i64),
            now - Duration::days(*n as i64),
            Interval::Day,
        ),
        RangeToken::PreviousNWeeks(n) => (
            now - Duration::weeks(2 * *n as i64),
            now - Duration::weeks(*n as i64),
            Interval::Week,
        ),
        RangeToken::ThisWeek => {
            let start = monday_of(now);
            (start, start + Duration::days(7), Interval::Day)
        }
        RangeToken::ThisMonth => {
            let start = floor_month(now);
            (start, add_months(start, 1), Interval::Day)
        }
        RangeToken::ThisYear => {
            let start = floor_year(now);
            (start, add_months(start, 12), Interval::Month)
        }
        RangeToken::LastWeek => (now - Duration::days(7), now, Interval::Day),
        RangeToken::LastMonth => (now - Duration::days(30), now, Interval::Day),
        RangeToken::LastYear => (now - Duration::days(365), now, Interval::Month),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, 26, 15, 30, 0).unwrap() // a Sunday
    }

    #[test]
    fn today_is_floor_to_floor_plus_one_day() {
        let (start, end, _) = resolve(&RangeToken::Today, fixed_now());
        assert_eq!(start, Utc.with_ymd_and_hms(2026, 7, 26, 0, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2026, 7, 27, 0, 0, 0).unwrap());
    }

    #[test]
    fn yesterday_is_one_day_before_today() {
        let (start, end, _) = resolve(&RangeToken::Yesterday, fixed_now());
        assert_eq!(start, Utc.with_ymd_and_hms(2026, 7, 25, 0, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2026, 7, 26, 0, 0, 0).unwrap());
    }

    #[test]
    fn n_hours_ago_is_a_one_hour_bucket() {
        let now = fixed_now();
        let (start, end, _) = resolve(&RangeToken::NHoursAgo(3), now);
        assert_eq!(start, now - Duration::hours(3));
        assert_eq!(end, now - Duration::hours(2));
    }

    #[test]
    fn previous_n_days_does_not_overlap_last_n_days() {
        let now = fixed_now();
        let (_, last_end, _) = resolve(&RangeToken::LastNDays(3), now);
        let (prev_start, prev_end, _) = resolve(&RangeToken::PreviousNDays(3), now);
        assert_eq!(prev_end, now - Duration::days(3));
        assert!(prev_start < prev_end);
        assert_eq!(last_end, now);
    }

    #[test]
    fn this_week_starts_on_monday() {
        let (start, _, _) = resolve(&RangeToken::ThisWeek, fixed_now());
        assert_eq!(start.weekday(), Weekday::Mon);
    }
}
