//! Filter and sort translation.
//!
//! Callers describe what they want with a small typed AST; the store
//! evaluates it against records. System fields (`id`, `created_at`,
//! `updated_at`) are matched natively; attribute fields are extracted from
//! the data map, string comparisons are case-folded, and numeric/date casts
//! happen only for the operators that need them. A value that cannot be
//! cast is excluded, never an error.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::record::types::ModuleRecord;
use crate::record::value::FieldValue;

/// Columns every record has, addressable in filters and sorts alongside
/// attribute fields.
pub const SYSTEM_FIELDS: [&str; 3] = ["id", "created_at", "updated_at"];

pub fn is_system_field(name: &str) -> bool {
    SYSTEM_FIELDS.contains(&name)
}

/// The field name search predicates are attached to; their real targets
/// are the per-module searchable fields.
pub(crate) const SEARCH_FIELD: &str = "_search";

/// One condition of an AND-composed filter set.
///
/// Serializes flat, so the wire form reads
/// `{"field": "amount", "operator": "between", "min": 100, "max": 500}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldPredicate {
    pub field: String,
    #[serde(flatten)]
    pub predicate: Predicate,
}

/// Operator vocabulary. String operators fold case; numeric and date
/// operators cast and exclude values that will not cast; the negative
/// string operators follow SQL semantics, so an absent value never
/// matches them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "operator", rename_all = "snake_case")]
pub enum Predicate {
    Equals { value: FieldValue },
    NotEquals { value: FieldValue },
    Contains { value: String },
    NotContains { value: String },
    StartsWith { value: String },
    EndsWith { value: String },
    GreaterThan { value: f64 },
    LessThan { value: f64 },
    GreaterThanOrEqual { value: f64 },
    LessThanOrEqual { value: f64 },
    /// Inclusive on both bounds.
    Between { min: f64, max: f64 },
    In { values: Vec<FieldValue> },
    NotIn { values: Vec<FieldValue> },
    IsNull,
    IsNotNull,
    DateEquals { value: NaiveDate },
    DateBefore { value: NaiveDate },
    DateAfter { value: NaiveDate },
    /// Inclusive on both bounds.
    DateBetween { start: NaiveDate, end: NaiveDate },
    /// Case-insensitive substring across the named fields, OR-combined.
    Search { value: String, fields: Vec<String> },
}

impl FieldPredicate {
    pub fn new(field: impl Into<String>, predicate: Predicate) -> Self {
        Self {
            field: field.into(),
            predicate,
        }
    }

    pub fn equals(field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Self::new(field, Predicate::Equals { value: value.into() })
    }

    pub fn not_equals(field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Self::new(field, Predicate::NotEquals { value: value.into() })
    }

    pub fn contains(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(field, Predicate::Contains { value: value.into() })
    }

    pub fn greater_than(field: impl Into<String>, value: f64) -> Self {
        Self::new(field, Predicate::GreaterThan { value })
    }

    pub fn less_than(field: impl Into<String>, value: f64) -> Self {
        Self::new(field, Predicate::LessThan { value })
    }

    pub fn between(field: impl Into<String>, min: f64, max: f64) -> Self {
        Self::new(field, Predicate::Between { min, max })
    }

    pub fn is_null(field: impl Into<String>) -> Self {
        Self::new(field, Predicate::IsNull)
    }

    pub fn is_not_null(field: impl Into<String>) -> Self {
        Self::new(field, Predicate::IsNotNull)
    }

    pub fn date_between(field: impl Into<String>, start: NaiveDate, end: NaiveDate) -> Self {
        Self::new(field, Predicate::DateBetween { start, end })
    }

    pub fn search(value: impl Into<String>, fields: Vec<String>) -> Self {
        Self::new(
            SEARCH_FIELD,
            Predicate::Search {
                value: value.into(),
                fields,
            },
        )
    }

    /// Whether `record` satisfies this condition.
    pub fn matches(&self, record: &ModuleRecord) -> bool {
        if let Predicate::Search { value, fields } = &self.predicate {
            return search_matches(record, value, fields);
        }
        match system_value(record, &self.field) {
            Some(v) => self.predicate.matches_value(Some(&v)),
            None => self.predicate.matches_value(record.data.get(&self.field)),
        }
    }
}

impl Predicate {
    fn matches_value(&self, value: Option<&FieldValue>) -> bool {
        // Absent keys and explicit nulls are the same thing here.
        let present = match value {
            Some(FieldValue::Null) | None => None,
            Some(v) => Some(v),
        };
        match self {
            Predicate::IsNull => present.is_none(),
            Predicate::IsNotNull => present.is_some(),
            Predicate::Equals { value } => present.map_or(false, |v| v.loosely_equals(value)),
            Predicate::NotEquals { value } => present.map_or(false, |v| !v.loosely_equals(value)),
            Predicate::Contains { value } => text_op(present, |t| t.contains(&fold(value))),
            Predicate::NotContains { value } => text_op(present, |t| !t.contains(&fold(value))),
            Predicate::StartsWith { value } => text_op(present, |t| t.starts_with(&fold(value))),
            Predicate::EndsWith { value } => text_op(present, |t| t.ends_with(&fold(value))),
            Predicate::GreaterThan { value } => num_op(present, |n| n > *value),
            Predicate::LessThan { value } => num_op(present, |n| n < *value),
            Predicate::GreaterThanOrEqual { value } => num_op(present, |n| n >= *value),
            Predicate::LessThanOrEqual { value } => num_op(present, |n| n <= *value),
            Predicate::Between { min, max } => num_op(present, |n| n >= *min && n <= *max),
            Predicate::In { values } => {
                present.map_or(false, |v| values.iter().any(|c| v.loosely_equals(c)))
            }
            Predicate::NotIn { values } => {
                present.map_or(false, |v| !values.iter().any(|c| v.loosely_equals(c)))
            }
            Predicate::DateEquals { value } => date_op(present, |d| d == *value),
            Predicate::DateBefore { value } => date_op(present, |d| d < *value),
            Predicate::DateAfter { value } => date_op(present, |d| d > *value),
            Predicate::DateBetween { start, end } => {
                date_op(present, |d| d >= *start && d <= *end)
            }
            // Search is evaluated at the record level in `matches`.
            Predicate::Search { .. } => false,
        }
    }
}

fn fold(s: &str) -> String {
    s.trim().to_lowercase()
}

fn text_op(value: Option<&FieldValue>, f: impl Fn(&str) -> bool) -> bool {
    value
        .and_then(FieldValue::fold_text)
        .map_or(false, |t| f(&t))
}

fn num_op(value: Option<&FieldValue>, f: impl Fn(f64) -> bool) -> bool {
    value.and_then(FieldValue::as_number).map_or(false, f)
}

fn date_op(value: Option<&FieldValue>, f: impl Fn(NaiveDate) -> bool) -> bool {
    value.and_then(FieldValue::as_date).map_or(false, f)
}

fn search_matches(record: &ModuleRecord, term: &str, fields: &[String]) -> bool {
    let needle = fold(term);
    if needle.is_empty() || fields.is_empty() {
        return false;
    }
    fields.iter().any(|field| {
        record
            .data
            .get(field)
            .and_then(FieldValue::fold_text)
            .map_or(false, |t| t.contains(&needle))
    })
}

/// System column as a comparable value; `None` for attribute fields.
pub(crate) fn system_value(record: &ModuleRecord, field: &str) -> Option<FieldValue> {
    match field {
        "id" => Some(FieldValue::Number(record.id as f64)),
        "created_at" => Some(FieldValue::Text(record.created_at.to_rfc3339())),
        "updated_at" => Some(FieldValue::Text(record.updated_at.to_rfc3339())),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

/// One key of a multi-key sort.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SortKey {
    pub field: String,
    pub direction: SortDirection,
}

impl SortKey {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Desc,
        }
    }

    fn apply(&self, ord: Ordering) -> Ordering {
        match self.direction {
            SortDirection::Asc => ord,
            SortDirection::Desc => ord.reverse(),
        }
    }

    /// Missing and null attribute values order last regardless of
    /// direction, so sorted listings never lead with blanks.
    pub(crate) fn compare(&self, a: &ModuleRecord, b: &ModuleRecord) -> Ordering {
        match self.field.as_str() {
            "id" => self.apply(a.id.cmp(&b.id)),
            "created_at" => self.apply(a.created_at.cmp(&b.created_at)),
            "updated_at" => self.apply(a.updated_at.cmp(&b.updated_at)),
            name => {
                let va = a.data.get(name).filter(|v| !matches!(v, FieldValue::Null));
                let vb = b.data.get(name).filter(|v| !matches!(v, FieldValue::Null));
                match (va, vb) {
                    (None, None) => Ordering::Equal,
                    (None, Some(_)) => Ordering::Greater,
                    (Some(_), None) => Ordering::Less,
                    (Some(x), Some(y)) => self.apply(x.sort_cmp(y)),
                }
            }
        }
    }
}

/// Stable multi-key sort with an ascending-id tie break, so paginating the
/// same query never shows a record on two pages.
pub(crate) fn sort_records(records: &mut [ModuleRecord], keys: &[SortKey]) {
    records.sort_by(|a, b| {
        for key in keys {
            let ord = key.compare(a, b);
            if ord != Ordering::Equal {
                return ord;
            }
        }
        a.id.cmp(&b.id)
    });
}
