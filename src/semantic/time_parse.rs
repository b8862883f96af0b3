//! Regex-driven NL time-expression scanner, §4.5. Maps to a `RangeToken`
//! and, since the match is always resolvable, also to a concrete
//! `TimeContext` via [`crate::time_window::resolve`].

use crate::models::semantic_ir::{RangeToken, TimeContext};
use crate::time_window;
use chrono::Utc;
use regex::Regex;
use std::sync::OnceLock;

pub struct ParsedTime {
    pub range_token: RangeToken,
    pub time_context: TimeContext,
}

fn persian_word_numerals() -> &'static [(&'static str, u32)] {
    &[
        ("یک", 1), ("دو", 2), ("سه", 3), ("چهار", 4), ("پنج", 5),
        ("شش", 6), ("هفت", 7), ("هشت", 8), ("نه", 9), ("ده", 10),
    ]
}

fn persian_digit_to_ascii(c: char) -> Option<char> {
    match c {
        '۰' => Some('0'), '۱' => Some('1'), '۲' => Some('2'), '۳' => Some('3'), '۴' => Some('4'),
        '۵' => Some('5'), '۶' => Some('6'), '۷' => Some('7'), '۸' => Some('8'), '۹' => Some('9'),
        _ => None,
    }
}

/// Normalizes Persian digits/number-words to ASCII digits so the regex
/// patterns below only ever need to match `\d+`.
fn normalize_numerals(text: &str) -> String {
    let mut out: String = text
        .chars()
        .map(|c| persian_digit_to_ascii(c).unwrap_or(c))
        .collect();
    for (word, n) in persian_word_numerals() {
        out = out.replace(word, &n.to_string());
    }
    out
}

struct Patterns {
    hours_ago: Regex,
    last_hours: Regex,
    days_ago: Regex,
    last_days: Regex,
    weeks_ago: Regex,
    last_weeks: Regex,
    minutes_ago: Regex,
    last_minutes: Regex,
    this_period: Regex,
    last_period: Regex,
    fa_hours_ago: Regex,
    fa_recent_hours: Regex,
    fa_days_ago: Regex,
    fa_recent_days: Regex,
    fa_weeks_ago: Regex,
    fa_recent_weeks: Regex,
    fa_today: Regex,
    fa_yesterday: Regex,
    fa_this_week: Regex,
    fa_last_week: Regex,
    fa_this_month: Regex,
    fa_last_month: Regex,
    fa_this_year: Regex,
    fa_last_year: Regex,
}

static PATTERNS: OnceLock<Patterns> = OnceLock::new();

fn patterns() -> &'static Patterns {
    PATTERNS.get_or_init(|| Patterns {
        hours_ago: Regex::new(r"(\d+)\s*hours?\s*ago").unwrap(),
        last_hours: Regex::new(r"(?:last|past)\s*(\d+)\s*hours?").unwrap(),
        days_ago: Regex::new(r"(\d+)\s*days?\s*ago").unwrap(),
        last_days: Regex::new(r"(?:last|past)\s*(\d+)\s*days?").unwrap(),
        weeks_ago: Regex::new(r"(\d+)\s*weeks?\s*ago").unwrap(),
        last_weeks: Regex::new(r"(?:last|past)\s*(\d+)\s*weeks?").unwrap(),
        minutes_ago: Regex::new(r"(\d+)\s*min(?:ute)?s?\s*ago").unwrap(),
        last_minutes: Regex::new(r"(?:last|past)\s*(\d+)\s*min(?:ute)?s?").unwrap(),
        this_period: Regex::new(r"this\s+(week|month|year)").unwrap(),
        last_period: Regex::new(r"last\s+(week|month|year)").unwrap(),
        fa_hours_ago: Regex::new(r"(\d+)\s*ساعت\s*(?:پیش|قبل)").unwrap(),
        fa_recent_hours: Regex::new(r"(\d+)\s*ساعت\s*(?:اخیر|گذشته)").unwrap(),
        fa_days_ago: Regex::new(r"(\d+)\s*روز\s*(?:پیش|قبل)").unwrap(),
        fa_recent_days: Regex::new(r"(\d+)\s*روز\s*(?:اخیر|گذشته)").unwrap(),
        fa_weeks_ago: Regex::new(r"(\d+)\s*هفته\s*(?:پیش|قبل)").unwrap(),
        fa_recent_weeks: Regex::new(r"(\d+)\s*هفته\s*(?:اخیر|گذشته)").unwrap(),
        fa_today: Regex::new(r"امروز").unwrap(),
        fa_yesterday: Regex::new(r"دیروز").unwrap(),
        fa_this_week: Regex::new(r"این\s*هفته").unwrap(),
        fa_last_week: Regex::new(r"هفته\s*(?:قبل|گذشته|پیش)").unwrap(),
        fa_this_month: Regex::new(r"این\s*ماه").unwrap(),
        fa_last_month: Regex::new(r"ماه\s*(?:قبل|گذشته|پیش)").unwrap(),
        fa_this_year: Regex::new(r"این\s*سال").unwrap(),
        fa_last_year: Regex::new(r"سال\s*(?:قبل|گذشته|پیش)").unwrap(),
    })
}

fn capture_u32(re: &Regex, text: &str) -> Option<u32> {
    re.captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Scans `text` (already numeral-normalized upstream by the caller or not
/// — this function normalizes internally to stay self-contained) for a
/// supported time expression. Falls back to `last_24_hours`/hour
/// granularity when nothing matches, per §4.5.
pub fn parse(text: &str) -> ParsedTime {
    let normalized = normalize_numerals(&text.to_lowercase());
    let p = patterns();
    let now = Utc::now();

    let token = if normalized.contains("today") || p.fa_today.is_match(&normalized) {
        RangeToken::Today
    } else if normalized.contains("yesterday") || p.fa_yesterday.is_match(&normalized) {
        RangeToken::Yesterday
    } else if let Some(n) = capture_u32(&p.hours_ago, &normalized).or_else(|| capture_u32(&p.fa_hours_ago, &normalized)) {
        RangeToken::NHoursAgo(n)
    } else if let Some(n) = capture_u32(&p.last_hours, &normalized).or_else(|| capture_u32(&p.fa_recent_hours, &normalized)) {
        RangeToken::LastNHours(n)
    } else if let Some(n) = capture_u32(&p.minutes_ago, &normalized) {
        RangeToken::LastNMinutes(n)
    } else if let Some(n) = capture_u32(&p.last_minutes, &normalized) {
        RangeToken::LastNMinutes(n)
    } else if let Some(n) = capture_u32(&p.days_ago, &normalized).or_else(|| capture_u32(&p.fa_days_ago, &normalized)) {
        RangeToken::NDaysAgo(n)
    } else if let Some(n) = capture_u32(&p.last_days, &normalized).or_else(|| capture_u32(&p.fa_recent_days, &normalized)) {
        RangeToken::LastNDays(n)
    } else if let Some(n) = capture_u32(&p.weeks_ago, &normalized).or_else(|| capture_u32(&p.fa_weeks_ago, &normalized)) {
        RangeToken::NWeeksAgo(n)
    } else if let Some(n) = capture_u32(&p.last_weeks, &normalized).or_else(|| capture_u32(&p.fa_recent_weeks, &normalized)) {
        RangeToken::LastNWeeks(n)
    } else if p.fa_this_week.is_match(&normalized) {
        RangeToken::ThisWeek
    } else if p.fa_this_month.is_match(&normalized) {
        RangeToken::ThisMonth
    } else if p.fa_this_year.is_match(&normalized) {
        RangeToken::ThisYear
    } else if p.fa_last_week.is_match(&normalized) {
        RangeToken::LastWeek
    } else if p.fa_last_month.is_match(&normalized) {
        RangeToken::LastMonth
    } else if p.fa_last_year.is_match(&normalized) {
        RangeToken::LastYear
    } else if let Some(period) = p.this_period.captures(&normalized).and_then(|c| c.get(1)) {
        match period.as_str() {
            "week" => RangeToken::ThisWeek,
            "month" => RangeToken::ThisMonth,
            _ => RangeToken::ThisYear,
        }
    } else if let Some(period) = p.last_period.captures(&normalized).and_then(|c| c.get(1)) {
        match period.as_str() {
            "week" => RangeToken::LastWeek,
            "month" => RangeToken::LastMonth,
            _ => RangeToken::LastYear,
        }
    } else {
        RangeToken::last_24_hours()
    };

    let (start, end, interval) = time_window::resolve(&token, now);
    ParsedTime { range_token: token, time_context: TimeContext { start, end, interval } }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_n_hours_ago() {
        let result = parse("what was the temperature 3 hours ago");
        assert_eq!(result.range_token, RangeToken::NHoursAgo(3));
    }

    #[test]
    fn parses_last_n_days() {
        let result = parse("average over the last 3 days");
        assert_eq!(result.range_token, RangeToken::LastNDays(3));
    }

    #[test]
    fn parses_persian_recent_days() {
        let result = parse("میانگین دمای سه روز اخیر");
        assert_eq!(result.range_token, RangeToken::LastNDays(3));
    }

    #[test]
    fn parses_this_week_vs_last_week() {
        assert_eq!(parse("this week").range_token, RangeToken::ThisWeek);
        assert_eq!(parse("last week").range_token, RangeToken::LastWeek);
    }

    #[test]
    fn defaults_to_last_24_hours_when_no_match() {
        let result = parse("what is the current temperature");
        assert_eq!(result.range_token, RangeToken::LastNHours(24));
    }

    #[test]
    fn parses_today_and_yesterday() {
        assert_eq!(parse("readings today").range_token, RangeToken::Today);
        assert_eq!(parse("readings yesterday").range_token, RangeToken::Yesterday);
    }
}
