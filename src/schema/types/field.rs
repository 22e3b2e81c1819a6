//! Field entity: one typed attribute of a module.
//!
//! A field declares its value type, behavior flags, validation rules, and
//! an optional conditional-visibility expression referencing sibling
//! fields. Record writes are validated against these declarations; reads
//! tolerate anything already stored.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::record::FieldValue;
use crate::schema::types::field_option::NewFieldOption;

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern compiles"));
static URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^https?://\S+$").expect("url pattern compiles"));

/// Value type vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    TextArea,
    Email,
    Phone,
    Url,
    Number,
    Currency,
    Percent,
    Date,
    DateTime,
    Boolean,
    Select,
    MultiSelect,
    Relation,
}

impl FieldType {
    /// Types whose legal values come from the field's option list.
    pub fn uses_options(&self) -> bool {
        matches!(self, FieldType::Select | FieldType::MultiSelect)
    }

    /// Checks a non-empty value against this type; returns the complaint
    /// when it does not fit. Emptiness is `is_required`'s concern.
    pub fn check_value(&self, value: &FieldValue) -> Result<(), String> {
        let ok = match self {
            FieldType::Number | FieldType::Currency | FieldType::Percent => {
                matches!(value, FieldValue::Number(_))
            }
            FieldType::Boolean => matches!(value, FieldValue::Bool(_)),
            FieldType::Date | FieldType::DateTime => value.as_date().is_some(),
            FieldType::MultiSelect => matches!(
                value,
                FieldValue::List(items) if items.iter().all(|v| matches!(v, FieldValue::Text(_)))
            ),
            FieldType::Relation => {
                matches!(value, FieldValue::Number(n) if n.fract() == 0.0 && *n >= 0.0)
            }
            _ => matches!(value, FieldValue::Text(_)),
        };
        if ok {
            Ok(())
        } else {
            Err(format!("expected {}", self.expected_kind()))
        }
    }

    fn expected_kind(&self) -> &'static str {
        match self {
            FieldType::Number | FieldType::Currency | FieldType::Percent => "a numeric value",
            FieldType::Boolean => "a boolean value",
            FieldType::Date | FieldType::DateTime => "a date value",
            FieldType::MultiSelect => "a list of text values",
            FieldType::Relation => "a record id",
            _ => "a text value",
        }
    }
}

/// A declarative constraint checked at record write time against present,
/// non-empty values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum ValidationRule {
    MinLength { value: usize },
    MaxLength { value: usize },
    MinValue { value: f64 },
    MaxValue { value: f64 },
    /// Full-match regular expression; compiled (and rejected when invalid)
    /// at field save.
    Pattern { value: String },
    Email,
    Url,
}

impl ValidationRule {
    pub fn check(&self, value: &FieldValue) -> Result<(), String> {
        match self {
            ValidationRule::MinLength { value: min } => {
                if value.to_text().chars().count() < *min {
                    return Err(format!("must be at least {} characters", min));
                }
            }
            ValidationRule::MaxLength { value: max } => {
                if value.to_text().chars().count() > *max {
                    return Err(format!("must be at most {} characters", max));
                }
            }
            ValidationRule::MinValue { value: min } => {
                if let Some(n) = value.as_number() {
                    if n < *min {
                        return Err(format!("must be at least {}", min));
                    }
                }
            }
            ValidationRule::MaxValue { value: max } => {
                if let Some(n) = value.as_number() {
                    if n > *max {
                        return Err(format!("must be at most {}", max));
                    }
                }
            }
            ValidationRule::Pattern { value: pattern } => {
                // Invalid patterns were rejected at field save; a pattern
                // that no longer compiles is skipped rather than blocking
                // every write.
                if let Ok(re) = Regex::new(pattern) {
                    if !re.is_match(&value.to_text()) {
                        return Err("does not match the required pattern".to_string());
                    }
                }
            }
            ValidationRule::Email => {
                if !EMAIL_RE.is_match(value.to_text().trim()) {
                    return Err("must be a valid email address".to_string());
                }
            }
            ValidationRule::Url => {
                if !URL_RE.is_match(value.to_text().trim()) {
                    return Err("must be a valid http(s) url".to_string());
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VisibilityLogic {
    All,
    Any,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisibilityOperator {
    Equals,
    NotEquals,
    Contains,
    In,
    IsEmpty,
    IsNotEmpty,
}

/// One clause of a visibility expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisibilityRule {
    /// Api name of a sibling field in the same module.
    pub field: String,
    pub operator: VisibilityOperator,
    #[serde(default)]
    pub value: FieldValue,
}

/// Show/hide condition attached to a field. References are validated at
/// save: they must name existing sibling fields and may not close a
/// dependency cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisibilityExpression {
    pub logic: VisibilityLogic,
    pub rules: Vec<VisibilityRule>,
}

impl VisibilityExpression {
    pub fn all(rules: Vec<VisibilityRule>) -> Self {
        Self {
            logic: VisibilityLogic::All,
            rules,
        }
    }

    pub fn any(rules: Vec<VisibilityRule>) -> Self {
        Self {
            logic: VisibilityLogic::Any,
            rules,
        }
    }

    /// Distinct referenced api names, in order of first appearance.
    pub fn referenced_fields(&self) -> Vec<String> {
        let mut seen: Vec<String> = Vec::new();
        for rule in &self.rules {
            if !seen.iter().any(|f| f == &rule.field) {
                seen.push(rule.field.clone());
            }
        }
        seen
    }

    /// Evaluates the expression against a record's attribute map.
    pub fn evaluate(&self, data: &BTreeMap<String, FieldValue>) -> bool {
        let check = |rule: &VisibilityRule| -> bool {
            let current = data.get(&rule.field);
            match rule.operator {
                VisibilityOperator::IsEmpty => current.map_or(true, FieldValue::is_empty),
                VisibilityOperator::IsNotEmpty => current.map_or(false, |v| !v.is_empty()),
                VisibilityOperator::Equals => {
                    current.map_or(false, |v| v.loosely_equals(&rule.value))
                }
                VisibilityOperator::NotEquals => {
                    current.map_or(true, |v| !v.loosely_equals(&rule.value))
                }
                VisibilityOperator::Contains => current
                    .and_then(FieldValue::fold_text)
                    .map_or(false, |t| {
                        t.contains(&rule.value.to_text().trim().to_lowercase())
                    }),
                VisibilityOperator::In => match &rule.value {
                    FieldValue::List(options) => current
                        .map_or(false, |v| options.iter().any(|o| v.loosely_equals(o))),
                    single => current.map_or(false, |v| v.loosely_equals(single)),
                },
            }
        };
        match self.logic {
            VisibilityLogic::All => self.rules.iter().all(check),
            VisibilityLogic::Any => self.rules.iter().any(check),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Field {
    pub id: u64,
    pub module_id: u64,
    pub block_id: Option<u64>,
    pub label: String,
    /// Key into record data maps; unique within the module.
    pub api_name: String,
    pub field_type: FieldType,
    pub description: Option<String>,
    pub help_text: Option<String>,
    pub is_required: bool,
    pub is_unique: bool,
    pub is_searchable: bool,
    pub is_filterable: bool,
    pub is_sortable: bool,
    #[serde(default)]
    pub validation_rules: Vec<ValidationRule>,
    #[serde(default)]
    pub settings: Map<String, Value>,
    pub default_value: Option<FieldValue>,
    pub visibility: Option<VisibilityExpression>,
    pub display_order: u32,
    /// Layout width as a percentage, 1..=100.
    pub width: u8,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for `create_field`. Select and multi-select fields must carry at
/// least one option.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewField {
    pub module_id: u64,
    pub block_id: Option<u64>,
    pub label: String,
    /// Derived from `label` when omitted.
    pub api_name: Option<String>,
    pub field_type: FieldType,
    pub description: Option<String>,
    pub help_text: Option<String>,
    pub is_required: bool,
    pub is_unique: bool,
    pub is_searchable: bool,
    pub is_filterable: bool,
    pub is_sortable: bool,
    #[serde(default)]
    pub validation_rules: Vec<ValidationRule>,
    #[serde(default)]
    pub settings: Map<String, Value>,
    pub default_value: Option<FieldValue>,
    pub visibility: Option<VisibilityExpression>,
    #[serde(default)]
    pub display_order: u32,
    #[serde(default = "full_width")]
    pub width: u8,
    /// Options created together with the field.
    #[serde(default)]
    pub options: Vec<NewFieldOption>,
}

fn full_width() -> u8 {
    100
}

impl NewField {
    /// A plain field with the common flag defaults: filterable and
    /// sortable, nothing else.
    pub fn new(module_id: u64, label: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            module_id,
            block_id: None,
            label: label.into(),
            api_name: None,
            field_type,
            description: None,
            help_text: None,
            is_required: false,
            is_unique: false,
            is_searchable: false,
            is_filterable: true,
            is_sortable: true,
            validation_rules: Vec::new(),
            settings: Map::new(),
            default_value: None,
            visibility: None,
            display_order: 0,
            width: 100,
            options: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_api_name(mut self, api_name: impl Into<String>) -> Self {
        self.api_name = Some(api_name.into());
        self
    }

    #[must_use]
    pub fn in_block(mut self, block_id: u64) -> Self {
        self.block_id = Some(block_id);
        self
    }

    #[must_use]
    pub fn required(mut self) -> Self {
        self.is_required = true;
        self
    }

    #[must_use]
    pub fn unique(mut self) -> Self {
        self.is_unique = true;
        self
    }

    #[must_use]
    pub fn searchable(mut self) -> Self {
        self.is_searchable = true;
        self
    }

    #[must_use]
    pub fn with_rules(mut self, rules: Vec<ValidationRule>) -> Self {
        self.validation_rules = rules;
        self
    }

    #[must_use]
    pub fn with_default(mut self, value: impl Into<FieldValue>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    #[must_use]
    pub fn with_visibility(mut self, expression: VisibilityExpression) -> Self {
        self.visibility = Some(expression);
        self
    }

    #[must_use]
    pub fn with_options(mut self, options: Vec<NewFieldOption>) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub fn with_order(mut self, display_order: u32) -> Self {
        self.display_order = display_order;
        self
    }
}

/// Partial update for a field; `None` keeps the stored value, the nested
/// options clear with `Some(None)`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FieldUpdate {
    pub label: Option<String>,
    /// Field api names may change; record data stored under the old name
    /// becomes a tolerated unknown key.
    pub api_name: Option<String>,
    pub block_id: Option<Option<u64>>,
    pub field_type: Option<FieldType>,
    pub description: Option<String>,
    pub help_text: Option<String>,
    pub is_required: Option<bool>,
    pub is_unique: Option<bool>,
    pub is_searchable: Option<bool>,
    pub is_filterable: Option<bool>,
    pub is_sortable: Option<bool>,
    pub validation_rules: Option<Vec<ValidationRule>>,
    pub settings: Option<Map<String, Value>>,
    pub default_value: Option<Option<FieldValue>>,
    pub visibility: Option<Option<VisibilityExpression>>,
    pub display_order: Option<u32>,
    pub width: Option<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_checks() {
        assert!(FieldType::Number.check_value(&FieldValue::Number(5.0)).is_ok());
        assert!(FieldType::Number.check_value(&"five".into()).is_err());
        assert!(FieldType::Boolean.check_value(&true.into()).is_ok());
        assert!(FieldType::Date.check_value(&"2024-06-01".into()).is_ok());
        assert!(FieldType::Date.check_value(&"tomorrow".into()).is_err());
        assert!(FieldType::MultiSelect
            .check_value(&FieldValue::List(vec!["a".into(), "b".into()]))
            .is_ok());
        assert!(FieldType::MultiSelect.check_value(&"a".into()).is_err());
        assert!(FieldType::Relation.check_value(&FieldValue::Number(42.0)).is_ok());
        assert!(FieldType::Relation.check_value(&FieldValue::Number(4.2)).is_err());
        assert!(FieldType::Text.check_value(&"anything".into()).is_ok());
    }

    #[test]
    fn test_validation_rules() {
        let min = ValidationRule::MinLength { value: 3 };
        assert!(min.check(&"ab".into()).is_err());
        assert!(min.check(&"abc".into()).is_ok());

        let cap = ValidationRule::MaxValue { value: 100.0 };
        assert!(cap.check(&FieldValue::Number(101.0)).is_err());
        assert!(cap.check(&FieldValue::Number(100.0)).is_ok());

        assert!(ValidationRule::Email.check(&"jane@acme.com".into()).is_ok());
        assert!(ValidationRule::Email.check(&"jane-at-acme".into()).is_err());

        assert!(ValidationRule::Url.check(&"https://acme.com/x".into()).is_ok());
        assert!(ValidationRule::Url.check(&"acme.com".into()).is_err());

        let pattern = ValidationRule::Pattern { value: r"^\d{5}$".to_string() };
        assert!(pattern.check(&"12345".into()).is_ok());
        assert!(pattern.check(&"1234".into()).is_err());
    }

    #[test]
    fn test_visibility_evaluation() {
        let expr = VisibilityExpression::all(vec![
            VisibilityRule {
                field: "type".into(),
                operator: VisibilityOperator::Equals,
                value: "company".into(),
            },
            VisibilityRule {
                field: "website".into(),
                operator: VisibilityOperator::IsNotEmpty,
                value: FieldValue::Null,
            },
        ]);
        let mut data: BTreeMap<String, FieldValue> = BTreeMap::new();
        data.insert("type".into(), "company".into());
        assert!(!expr.evaluate(&data));
        data.insert("website".into(), "https://acme.com".into());
        assert!(expr.evaluate(&data));

        let any = VisibilityExpression::any(vec![
            VisibilityRule {
                field: "type".into(),
                operator: VisibilityOperator::In,
                value: FieldValue::List(vec!["person".into(), "company".into()]),
            },
            VisibilityRule {
                field: "missing".into(),
                operator: VisibilityOperator::Equals,
                value: "x".into(),
            },
        ]);
        assert!(any.evaluate(&data));
    }

    #[test]
    fn test_referenced_fields_dedupe() {
        let expr = VisibilityExpression::any(vec![
            VisibilityRule {
                field: "a".into(),
                operator: VisibilityOperator::IsNotEmpty,
                value: FieldValue::Null,
            },
            VisibilityRule {
                field: "b".into(),
                operator: VisibilityOperator::IsEmpty,
                value: FieldValue::Null,
            },
            VisibilityRule {
                field: "a".into(),
                operator: VisibilityOperator::Equals,
                value: "x".into(),
            },
        ]);
        assert_eq!(expr.referenced_fields(), vec!["a".to_string(), "b".to_string()]);
    }
}
