use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Canonical textual label for a time interval (§4.3). `N` is carried inline
/// rather than as a separate field so the token round-trips through SQL
/// comments/labels as a single string (needed for UNION-labeled comparisons).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RangeToken {
    Today,
    Yesterday,
    LastNMinutes(u32),
    LastNHours(u32),
    LastNDays(u32),
    LastNWeeks(u32),
    LastNMonths(u32),
    NHoursAgo(u32),
    NDaysAgo(u32),
    NWeeksAgo(u32),
    PreviousNHours(u32),
    PreviousNDays(u32),
    PreviousNWeeks(u32),
    ThisWeek,
    ThisMonth,
    ThisYear,
    LastWeek,
    LastMonth,
    LastYear,
}

impl RangeToken {
    /// Stable label used both as a UNION branch discriminator and in chart
    /// x-axis metadata.
    pub fn label(&self) -> String {
        match self {
            RangeToken::Today => "today".to_string(),
            RangeToken::Yesterday => "yesterday".to_string(),
            RangeToken::LastNMinutes(n) => format!("last_{n}_minutes"),
            RangeToken::LastNHours(n) => format!("last_{n}_hours"),
            RangeToken::LastNDays(n) => format!("last_{n}_days"),
            RangeToken::LastNWeeks(n) => format!("last_{n}_weeks"),
            RangeToken::LastNMonths(n) => format!("last_{n}_months"),
            RangeToken::NHoursAgo(n) => format!("{n}_hours_ago"),
            RangeToken::NDaysAgo(n) => format!("{n}_days_ago"),
            RangeToken::NWeeksAgo(n) => format!("{n}_weeks_ago"),
            RangeToken::PreviousNHours(n) => format!("previous_{n}_hours"),
            RangeToken::PreviousNDays(n) => format!("previous_{n}_days"),
            RangeToken::PreviousNWeeks(n) => format!("previous_{n}_weeks"),
            RangeToken::ThisWeek => "this_week".to_string(),
            RangeToken::ThisMonth => "this_month".to_string(),
            RangeToken::ThisYear => "this_year".to_string(),
            RangeToken::LastWeek => "last_week".to_string(),
            RangeToken::LastMonth => "last_month".to_string(),
            RangeToken::LastYear => "last_year".to_string(),
        }
    }

    pub fn last_24_hours() -> Self {
        RangeToken::LastNHours(24)
    }
}

/// Either a single entity or a comparison set — set semantics (membership,
/// no duplicates), ordering is insertion order for stable SQL/labels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Entity {
    Single(String),
    Set(Vec<String>),
}

impl Entity {
    pub fn as_slice(&self) -> Vec<&str> {
        match self {
            Entity::Single(s) => vec![s.as_str()],
            Entity::Set(v) => v.iter().map(|s| s.as_str()).collect(),
        }
    }

    pub fn is_set(&self) -> bool {
        matches!(self, Entity::Set(_))
    }

    pub fn len(&self) -> usize {
        match self {
            Entity::Single(_) => 1,
            Entity::Set(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn first(&self) -> Option<&str> {
        self.as_slice().first().copied()
    }

    /// True if every element is unique (set semantics, no duplicate check
    /// needed for `Single`).
    pub fn has_no_duplicates(&self) -> bool {
        match self {
            Entity::Single(_) => true,
            Entity::Set(v) => {
                let set: BTreeSet<&str> = v.iter().map(|s| s.as_str()).collect();
                set.len() == v.len()
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    Current,
    Average,
    Min,
    Max,
    Count,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Grouping {
    None,
    ByMinute,
    ByHour,
    ByDay,
    ByWeek,
    ByMonth,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Value,
    Trend,
    Comparison,
    Distribution,
}

/// Either a single Range Token or an ordered list (list ⇒ comparison).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TimeRange {
    Single(RangeToken),
    List(Vec<RangeToken>),
}

impl TimeRange {
    pub fn as_list(&self) -> Vec<&RangeToken> {
        match self {
            TimeRange::Single(r) => vec![r],
            TimeRange::List(v) => v.iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            TimeRange::Single(_) => 1,
            TimeRange::List(v) => v.len(),
        }
    }
}

/// A concrete half-open `[start, end)` UTC interval plus granularity,
/// optionally attached to the IR to override Range-Token lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeContext {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub interval: Interval,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interval {
    Minute,
    Hour,
    Day,
    Week,
    Month,
}

/// The sole input to the Query Builder (C6). Produced by the Semantic
/// Translator (C5), possibly after one or more fallback relaxations (§4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticIr {
    pub entity: Entity,
    pub aggregation: Aggregation,
    pub time_range: TimeRange,
    pub grouping: Grouping,
    pub format: OutputFormat,
    pub comparison: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_context: Option<TimeContext>,
    /// Set when this IR is the result of a validation-failure fallback.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
}

impl SemanticIr {
    /// §4.5 IR validation. Returns the specific reason on failure so the
    /// caller can decide whether to fall back to the minimal IR.
    pub fn validate(&self) -> Result<(), String> {
        if self.entity.is_empty() {
            return Err("entity must be non-empty".to_string());
        }
        if !self.entity.has_no_duplicates() {
            return Err("entity set must not contain duplicates".to_string());
        }
        let list_comparison = matches!(&self.time_range, TimeRange::List(v) if v.len() >= 2);
        let entity_comparison = self.entity.len() >= 2;
        let should_be_comparison = list_comparison || entity_comparison;
        if self.comparison != should_be_comparison {
            return Err(format!(
                "comparison={} but time_range/entity shape implies comparison={}",
                self.comparison, should_be_comparison
            ));
        }
        Ok(())
    }

    /// The minimal fallback IR per §4.5: single best-guess entity, current
    /// value, last 24 hours, no grouping.
    pub fn minimal_fallback(entity: String, reason: impl Into<String>) -> Self {
        SemanticIr {
            entity: Entity::Single(entity),
            aggregation: Aggregation::Current,
            time_range: TimeRange::Single(RangeToken::last_24_hours()),
            grouping: Grouping::None,
            format: OutputFormat::Value,
            comparison: false,
            time_context: None,
            fallback_reason: Some(reason.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_comparison_mismatch() {
        let ir = SemanticIr {
            entity: Entity::Single("temperature".into()),
            aggregation: Aggregation::Average,
            time_range: TimeRange::List(vec![RangeToken::ThisWeek, RangeToken::LastWeek]),
            grouping: Grouping::ByWeek,
            format: OutputFormat::Comparison,
            comparison: false,
            time_context: None,
            fallback_reason: None,
        };
        assert!(ir.validate().is_err());
    }

    #[test]
    fn validate_accepts_single_current() {
        let ir = SemanticIr {
            entity: Entity::Single("temperature".into()),
            aggregation: Aggregation::Current,
            time_range: TimeRange::Single(RangeToken::last_24_hours()),
            grouping: Grouping::None,
            format: OutputFormat::Value,
            comparison: false,
            time_context: None,
            fallback_reason: None,
        };
        assert!(ir.validate().is_ok());
    }

    #[test]
    fn validate_rejects_duplicate_entities() {
        let ir = SemanticIr {
            entity: Entity::Set(vec!["temperature".into(), "temperature".into()]),
            aggregation: Aggregation::Average,
            time_range: TimeRange::Single(RangeToken::Today),
            grouping: Grouping::None,
            format: OutputFormat::Comparison,
            comparison: true,
            time_context: None,
            fallback_reason: None,
        };
        assert!(ir.validate().is_err());
    }
}
