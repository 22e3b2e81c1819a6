//! Options for select and multi-select fields.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldOption {
    pub id: u64,
    pub field_id: u64,
    /// Display text.
    pub label: String,
    /// Value stored in record data when this option is chosen.
    pub value: String,
    pub color: Option<String>,
    pub is_active: bool,
    pub display_order: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for `create_field_option`, and the option rows carried by
/// `NewField::options`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewFieldOption {
    pub label: String,
    /// Defaults to the label when omitted.
    pub value: Option<String>,
    pub color: Option<String>,
    #[serde(default)]
    pub display_order: u32,
}

impl NewFieldOption {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            value: None,
            color: None,
            display_order: 0,
        }
    }

    #[must_use]
    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    #[must_use]
    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = Some(color.into());
        self
    }

    #[must_use]
    pub fn with_order(mut self, display_order: u32) -> Self {
        self.display_order = display_order;
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FieldOptionUpdate {
    pub label: Option<String>,
    pub value: Option<String>,
    pub color: Option<Option<String>>,
    pub is_active: Option<bool>,
    pub display_order: Option<u32>,
}
