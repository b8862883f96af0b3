//! Comparison-intent detection and compound/comparison range expansion,
//! §4.5. Deliberately stricter than a bare keyword search (§9 "Design
//! Notes": the source's keyword-only detection fires spuriously).

use crate::models::semantic_ir::{Grouping, Interval, RangeToken};
use regex::Regex;
use std::sync::OnceLock;

static COMPARISON_CUE: OnceLock<Regex> = OnceLock::new();
static VS_PATTERN: OnceLock<Regex> = OnceLock::new();
static LAST_VS_PREVIOUS: OnceLock<Regex> = OnceLock::new();

fn comparison_cue_re() -> &'static Regex {
    COMPARISON_CUE.get_or_init(|| {
        Regex::new(r"\b(compare|comparison|vs\.?|versus|difference|compared to)\b").unwrap()
    })
}

fn vs_pattern_re() -> &'static Regex {
    VS_PATTERN.get_or_init(|| Regex::new(r"between\s+.+\s+and\s+.+").unwrap())
}

fn last_vs_previous_re() -> &'static Regex {
    LAST_VS_PREVIOUS.get_or_init(|| {
        Regex::new(r"last\s+\d+\s*\w*\s+(?:vs\.?|versus)\s+previous\s+\d+").unwrap()
    })
}

/// `true` iff the canonical English text carries an explicit comparison
/// cue. "Trend" alone never implies comparison (§4.5).
pub fn detect(canonical_english: &str) -> bool {
    let text = canonical_english.to_lowercase();
    comparison_cue_re().is_match(&text) || vs_pattern_re().is_match(&text) || last_vs_previous_re().is_match(&text)
}

/// Expands a single detected range into the canonical pair/list a
/// comparison query needs, using the granularity implied by the token
/// itself. E.g. "compare last 4 hours" (detected as `LastNHours(4)`)
/// expands into the four constituent 1-hour-ago buckets; "this week vs
/// last week" expands `ThisWeek` into `[ThisWeek, LastWeek]`.
pub fn expand(token: &RangeToken) -> (Vec<RangeToken>, Grouping) {
    match token {
        RangeToken::LastNHours(n) => {
            let buckets = (1..=*n).rev().map(RangeToken::NHoursAgo).collect();
            (buckets, Grouping::ByHour)
        }
        RangeToken::LastNDays(n) => {
            let buckets = (1..=*n).rev().map(RangeToken::NDaysAgo).collect();
            (buckets, Grouping::ByDay)
        }
        RangeToken::LastNWeeks(n) => {
            let buckets = (1..=*n).rev().map(RangeToken::NWeeksAgo).collect();
            (buckets, Grouping::ByWeek)
        }
        RangeToken::ThisWeek => (vec![RangeToken::ThisWeek, RangeToken::LastWeek], Grouping::ByWeek),
        RangeToken::ThisMonth => (vec![RangeToken::ThisMonth, RangeToken::LastMonth], Grouping::ByMonth),
        RangeToken::ThisYear => (vec![RangeToken::ThisYear, RangeToken::LastYear], Grouping::ByMonth),
        RangeToken::Today => (vec![RangeToken::Today, RangeToken::Yesterday], Grouping::ByHour),
        other => (vec![other.clone(), other.clone()], Grouping::ByDay),
    }
}

pub fn grouping_for_interval(interval: Interval) -> Grouping {
    match interval {
        Interval::Minute => Grouping::ByMinute,
        Interval::Hour => Grouping::ByHour,
        Interval::Day => Grouping::ByDay,
        Interval::Week => Grouping::ByWeek,
        Interval::Month => Grouping::ByMonth,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_explicit_compare_keyword() {
        assert!(detect("compare soil moisture this week vs last week"));
    }

    #[test]
    fn trend_alone_is_not_comparison() {
        assert!(!detect("show me the trend of temperature"));
    }

    #[test]
    fn detects_between_and_pattern() {
        assert!(detect("readings between monday and friday"));
    }

    #[test]
    fn expand_this_week_yields_week_pair() {
        let (tokens, grouping) = expand(&RangeToken::ThisWeek);
        assert_eq!(tokens, vec![RangeToken::ThisWeek, RangeToken::LastWeek]);
        assert_eq!(grouping, Grouping::ByWeek);
    }

    #[test]
    fn expand_last_n_hours_yields_hourly_buckets() {
        let (tokens, _) = expand(&RangeToken::LastNHours(4));
        assert_eq!(
            tokens,
            vec![
                RangeToken::NHoursAgo(4),
                RangeToken::NHoursAgo(3),
                RangeToken::NHoursAgo(2),
                RangeToken::NHoursAgo(1),
            ]
        );
    }
}
