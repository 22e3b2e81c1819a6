//! Embedded storage layer.
//!
//! One `sled::Db` with a named tree per entity family. Keys are zero-padded
//! decimal ids so lexicographic tree order equals numeric id order; record
//! keys carry the owning module id as a prefix so one prefix scan walks a
//! module's records in ascending id order.

use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::transaction::{ConflictableTransactionError, TransactionalTree};
use std::path::Path;

use crate::error::{CoreError, CoreResult};

/// Shared handle over the database and its trees. Services hold this in an
/// `Arc` and stay cheap to construct and clone around.
pub struct Storage {
    db: sled::Db,
    pub(crate) modules: sled::Tree,
    pub(crate) blocks: sled::Tree,
    pub(crate) fields: sled::Tree,
    pub(crate) field_options: sled::Tree,
    pub(crate) records: sled::Tree,
    pub(crate) related_items: sled::Tree,
    pub(crate) duplicate_rules: sled::Tree,
    pub(crate) duplicate_candidates: sled::Tree,
    pub(crate) candidate_pairs: sled::Tree,
    pub(crate) merge_logs: sled::Tree,
}

impl Storage {
    /// Opens (or creates) a database at `path`.
    pub fn open(path: impl AsRef<Path>) -> CoreResult<Self> {
        Self::with_db(sled::open(path)?)
    }

    /// Opens a throwaway database that never touches disk after close.
    pub fn open_temporary() -> CoreResult<Self> {
        Self::with_db(sled::Config::new().temporary(true).open()?)
    }

    fn with_db(db: sled::Db) -> CoreResult<Self> {
        Ok(Self {
            modules: db.open_tree("modules")?,
            blocks: db.open_tree("blocks")?,
            fields: db.open_tree("fields")?,
            field_options: db.open_tree("field_options")?,
            records: db.open_tree("records")?,
            related_items: db.open_tree("related_items")?,
            duplicate_rules: db.open_tree("duplicate_rules")?,
            duplicate_candidates: db.open_tree("duplicate_candidates")?,
            candidate_pairs: db.open_tree("candidate_pairs")?,
            merge_logs: db.open_tree("merge_logs")?,
            db,
        })
    }

    /// Allocates the next row id. Monotonic across all entity families.
    pub fn next_id(&self) -> CoreResult<u64> {
        Ok(self.db.generate_id()?)
    }

    // ========== GENERIC TREE OPERATIONS ==========

    pub(crate) fn put<T: Serialize>(&self, tree: &sled::Tree, key: &str, item: &T) -> CoreResult<()> {
        let bytes = serde_json::to_vec(item)?;
        tree.insert(key.as_bytes(), bytes)?;
        tree.flush()?;
        Ok(())
    }

    pub(crate) fn get<T: DeserializeOwned>(&self, tree: &sled::Tree, key: &str) -> CoreResult<Option<T>> {
        match tree.get(key.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub(crate) fn remove(&self, tree: &sled::Tree, key: &str) -> CoreResult<bool> {
        let removed = tree.remove(key.as_bytes())?.is_some();
        tree.flush()?;
        Ok(removed)
    }

    /// Decodes every row in a tree, skipping rows that no longer parse.
    pub(crate) fn list<T: DeserializeOwned>(&self, tree: &sled::Tree) -> CoreResult<Vec<T>> {
        let mut items = Vec::new();
        for entry in tree.iter() {
            let (key, bytes) = entry?;
            match serde_json::from_slice(&bytes) {
                Ok(item) => items.push(item),
                Err(e) => log::warn!(
                    "skipping undecodable row {}: {}",
                    String::from_utf8_lossy(&key),
                    e
                ),
            }
        }
        Ok(items)
    }
}

// ========== KEY ENCODING ==========

/// Fixed-width decimal form of an id; covers the full u64 range.
pub(crate) fn id_key(id: u64) -> String {
    format!("{:020}", id)
}

pub(crate) fn record_key(module_id: u64, record_id: u64) -> String {
    format!("{:020}/{:020}", module_id, record_id)
}

pub(crate) fn record_prefix(module_id: u64) -> String {
    format!("{:020}/", module_id)
}

/// Candidate pair index key; callers pass the ids already normalized so
/// `record_id_a < record_id_b`.
pub(crate) fn pair_key(module_id: u64, record_id_a: u64, record_id_b: u64) -> String {
    format!("{:020}/{:020}/{:020}", module_id, record_id_a, record_id_b)
}

pub(crate) fn related_key(kind: &str, id: u64) -> String {
    format!("{}/{:020}", kind, id)
}

// ========== TRANSACTIONAL HELPERS ==========

// Counterparts of `get`/`put` usable inside `sled::Transactional` closures,
// where serialization failures must abort the whole transaction.

pub(crate) fn tx_get<T: DeserializeOwned>(
    tree: &TransactionalTree,
    key: &str,
) -> Result<Option<T>, ConflictableTransactionError<CoreError>> {
    match tree.get(key.as_bytes())? {
        Some(bytes) => match serde_json::from_slice(&bytes) {
            Ok(item) => Ok(Some(item)),
            Err(e) => Err(ConflictableTransactionError::Abort(CoreError::Serialization(e))),
        },
        None => Ok(None),
    }
}

pub(crate) fn tx_put<T: Serialize>(
    tree: &TransactionalTree,
    key: &str,
    item: &T,
) -> Result<(), ConflictableTransactionError<CoreError>> {
    let bytes = serde_json::to_vec(item)
        .map_err(|e| ConflictableTransactionError::Abort(CoreError::Serialization(e)))?;
    tree.insert(key.as_bytes(), bytes)?;
    Ok(())
}
