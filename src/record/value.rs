//! Attribute values stored inside a record's data map.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// One attribute value.
///
/// Serialized untagged, so stored data reads as a plain JSON object
/// (`{"email": "a@x.com", "amount": 100}`). Dates travel as ISO-8601 text
/// and are cast at the boundaries that need a calendar date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
    List(Vec<FieldValue>),
}

impl Default for FieldValue {
    fn default() -> Self {
        FieldValue::Null
    }
}

impl FieldValue {
    /// Empty means null, blank text, or an empty list. Empty values are
    /// skipped by duplicate matching and fail `is_required` checks.
    pub fn is_empty(&self) -> bool {
        match self {
            FieldValue::Null => true,
            FieldValue::Text(s) => s.trim().is_empty(),
            FieldValue::List(items) => items.is_empty(),
            _ => false,
        }
    }

    /// Numeric cast: numbers pass through, numeric text parses. Everything
    /// else is not a number.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => Some(*n),
            FieldValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Calendar-date cast from date or datetime text.
    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            FieldValue::Text(s) => parse_date(s),
            _ => None,
        }
    }

    /// Canonical text form used for comparisons, search, phonetic codes,
    /// and concat merges. Whole numbers print without a fraction, matching
    /// their JSON form.
    pub fn to_text(&self) -> String {
        match self {
            FieldValue::Null => String::new(),
            FieldValue::Bool(b) => b.to_string(),
            FieldValue::Number(n) => format_number(*n),
            FieldValue::Text(s) => s.clone(),
            FieldValue::List(items) => items
                .iter()
                .map(FieldValue::to_text)
                .collect::<Vec<_>>()
                .join(", "),
        }
    }

    /// Case-folded, trimmed text form; `None` when the value is empty.
    pub fn fold_text(&self) -> Option<String> {
        if self.is_empty() {
            return None;
        }
        Some(self.to_text().trim().to_lowercase())
    }

    /// Loose equality for filter predicates: numeric when both sides are
    /// numbers, boolean on booleans, case-folded text otherwise.
    pub fn loosely_equals(&self, other: &FieldValue) -> bool {
        match (self, other) {
            (FieldValue::Number(a), FieldValue::Number(b)) => a == b,
            (FieldValue::Bool(a), FieldValue::Bool(b)) => a == b,
            (FieldValue::Null, FieldValue::Null) => true,
            _ => {
                self.to_text().trim().to_lowercase() == other.to_text().trim().to_lowercase()
            }
        }
    }

    /// Ordering for sort keys: numeric when both sides are numbers,
    /// case-folded text otherwise. Callers order missing values last.
    pub fn sort_cmp(&self, other: &FieldValue) -> Ordering {
        match (self, other) {
            (FieldValue::Number(a), FieldValue::Number(b)) => {
                a.partial_cmp(b).unwrap_or(Ordering::Equal)
            }
            _ => self
                .to_text()
                .to_lowercase()
                .cmp(&other.to_text().to_lowercase()),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Text(s)
    }
}

impl From<f64> for FieldValue {
    fn from(n: f64) -> Self {
        FieldValue::Number(n)
    }
}

impl From<i64> for FieldValue {
    fn from(n: i64) -> Self {
        FieldValue::Number(n as f64)
    }
}

impl From<u64> for FieldValue {
    fn from(n: u64) -> Self {
        FieldValue::Number(n as f64)
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        FieldValue::Bool(b)
    }
}

impl From<Vec<FieldValue>> for FieldValue {
    fn from(items: Vec<FieldValue>) -> Self {
        FieldValue::List(items)
    }
}

/// Accepts plain dates, RFC 3339 timestamps, and the two common
/// space/`T`-separated datetime spellings.
pub(crate) fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(d);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.date_naive());
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt.date());
        }
    }
    None
}

fn format_number(n: f64) -> String {
    // 2^53: the largest range where f64 holds exact integers.
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}
