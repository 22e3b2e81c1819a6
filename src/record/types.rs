//! Record and pagination types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::record::value::FieldValue;

/// One stored row of a module. The attribute map is schemaless at rest;
/// the owning module's fields define what gets validated on the way in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleRecord {
    pub id: u64,
    pub module_id: u64,
    pub data: BTreeMap<String, FieldValue>,
    pub created_by: Option<u64>,
    pub updated_by: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl ModuleRecord {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Attribute value for `key`, if present.
    pub fn value(&self, key: &str) -> Option<&FieldValue> {
        self.data.get(key)
    }
}

/// One page of results plus paging metadata. Mirrors the envelope record
/// listings hand to clients: rows, total before paging, and page bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub total: u64,
    pub per_page: u32,
    pub current_page: u32,
    pub last_page: u32,
}

impl<T> Page<T> {
    /// Slices already-sorted rows into the requested 1-based page. Page and
    /// size are clamped to at least 1; pages past the end come back empty
    /// with intact metadata.
    pub(crate) fn slice(rows: Vec<T>, page: u32, per_page: u32) -> Page<T> {
        let per_page = per_page.max(1);
        let page = page.max(1);
        let total = rows.len() as u64;
        let last_page = ((total + u64::from(per_page) - 1) / u64::from(per_page)) as u32;
        let start = (page as usize - 1).saturating_mul(per_page as usize);
        let data = rows
            .into_iter()
            .skip(start)
            .take(per_page as usize)
            .collect();
        Page {
            data,
            total,
            per_page,
            current_page: page,
            last_page,
        }
    }
}
