//! Block entity: a named layout section of a module's detail view.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Layout kind of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockType {
    #[default]
    Section,
    Panel,
    Tab,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub id: u64,
    pub module_id: u64,
    pub name: String,
    pub block_type: BlockType,
    #[serde(default)]
    pub settings: Map<String, Value>,
    pub display_order: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for `create_block`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewBlock {
    pub module_id: u64,
    pub name: String,
    #[serde(default)]
    pub block_type: BlockType,
    #[serde(default)]
    pub settings: Map<String, Value>,
    #[serde(default)]
    pub display_order: u32,
}

impl NewBlock {
    pub fn new(module_id: u64, name: impl Into<String>) -> Self {
        Self {
            module_id,
            name: name.into(),
            block_type: BlockType::Section,
            settings: Map::new(),
            display_order: 0,
        }
    }
}

/// Partial update for a block; `None` keeps the stored value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BlockUpdate {
    pub name: Option<String>,
    pub block_type: Option<BlockType>,
    pub settings: Option<Map<String, Value>>,
    pub display_order: Option<u32>,
}
