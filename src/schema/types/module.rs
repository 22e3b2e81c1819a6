//! Module entity: a user-defined record type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A record type whose whole shape lives in configuration. Records belong
/// to exactly one module; blocks and fields describe its layout and typed
/// attributes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Module {
    pub id: u64,
    /// Plural display name ("Contacts").
    pub name: String,
    /// Singular display name ("Contact").
    pub singular_name: String,
    /// Stable machine identifier; unique and immutable after create.
    pub api_name: String,
    pub icon: Option<String>,
    pub description: Option<String>,
    pub is_active: bool,
    /// Free-form configuration (list layouts, color, feature toggles).
    #[serde(default)]
    pub settings: Map<String, Value>,
    pub display_order: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Module {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Record writes require a live, active module.
    pub fn accepts_writes(&self) -> bool {
        self.is_active && !self.is_deleted()
    }
}

/// Input for `create_module`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewModule {
    pub name: String,
    pub singular_name: String,
    /// Derived from `name` when omitted.
    pub api_name: Option<String>,
    pub icon: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub settings: Map<String, Value>,
    #[serde(default)]
    pub display_order: u32,
}

/// Partial update for a module; `None` keeps the stored value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModuleUpdate {
    pub name: Option<String>,
    pub singular_name: Option<String>,
    /// Accepted only when it equals the stored value; the api name is
    /// immutable after create.
    pub api_name: Option<String>,
    pub icon: Option<String>,
    pub description: Option<String>,
    pub settings: Option<Map<String, Value>>,
    pub display_order: Option<u32>,
    pub is_active: Option<bool>,
}
