//! Atomic record merges.
//!
//! A merge folds one record of a candidate pair into the other inside a
//! single four-tree transaction: the merged master, the transferred
//! related items, the soft-deleted duplicate, the candidate transitions,
//! and the audit log all land together or not at all.

use chrono::Utc;
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::Transactional;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::dedup::types::{
    CandidateStatus, DuplicateCandidate, MergeConfig, MergeLog, MergePreview, MergeStrategy,
};
use crate::dedup::DuplicateEngine;
use crate::error::{CoreError, CoreResult};
use crate::record::{FieldValue, ModuleRecord, Page, RelatedItem};
use crate::storage::{id_key, record_key, related_key, tx_get, tx_put, Storage};

/// Dismiss reason stamped on pending candidates whose pair lost a record
/// to a merge.
const STALE_PAIR_REASON: &str = "auto-dismissed: record was merged into another record";

/// Executes, previews, and audits merges.
#[derive(Clone)]
pub struct MergeEngine {
    pub(crate) storage: Arc<Storage>,
    pub(crate) duplicates: DuplicateEngine,
}

impl MergeEngine {
    pub fn new(storage: Arc<Storage>) -> Self {
        let duplicates = DuplicateEngine::new(Arc::clone(&storage));
        Self {
            storage,
            duplicates,
        }
    }

    /// Merges the candidate's other record into `master_record_id`.
    ///
    /// In one transaction: the master takes the merged attribute map, the
    /// duplicate's related items move to the master, the duplicate is
    /// soft-deleted, the candidate goes `merged`, every other pending
    /// candidate on the duplicate is auto-dismissed, and a `MergeLog` row
    /// snapshots the duplicate's data. Returns the updated master.
    pub fn merge_records(
        &self,
        candidate_id: u64,
        master_record_id: u64,
        merge_config: &MergeConfig,
        merged_by: Option<u64>,
    ) -> CoreResult<ModuleRecord> {
        let (candidate, _, duplicate) = self.resolve(candidate_id, master_record_id)?;
        let module_id = candidate.module_id;
        let duplicate_id = duplicate.id;

        // Transactional trees cannot iterate, so the keys the transaction
        // rewrites are collected up front. The in-transaction status
        // re-check keeps a concurrent merge of the same pair from landing
        // twice.
        let related_keys: Vec<String> = self
            .storage
            .list::<RelatedItem>(&self.storage.related_items)?
            .into_iter()
            .filter(|item| item.module_id == module_id && item.record_id == duplicate_id)
            .map(|item| related_key(item.kind.as_str(), item.id))
            .collect();
        let stale_candidate_keys: Vec<String> = self
            .storage
            .list::<DuplicateCandidate>(&self.storage.duplicate_candidates)?
            .into_iter()
            .filter(|c| {
                c.id != candidate.id
                    && c.status == CandidateStatus::Pending
                    && c.involves(duplicate_id)
            })
            .map(|c| id_key(c.id))
            .collect();

        let log_id = self.storage.next_id()?;
        let now = Utc::now();

        let trees: &[&sled::Tree] = &[
            &self.storage.records,
            &self.storage.related_items,
            &self.storage.duplicate_candidates,
            &self.storage.merge_logs,
        ];
        let result = trees.transaction(|views| {
            let records = &views[0];
            let related = &views[1];
            let candidates = &views[2];
            let logs = &views[3];

            let mut candidate: DuplicateCandidate =
                match tx_get(candidates, &id_key(candidate_id))? {
                    Some(c) => c,
                    None => {
                        return abort(CoreError::not_found("duplicate candidate", candidate_id))
                    }
                };
            if candidate.status.is_terminal() {
                return abort(CoreError::conflict(format!(
                    "candidate {} is already {}",
                    candidate.id,
                    candidate.status.as_str()
                )));
            }

            let mut master: ModuleRecord =
                match tx_get::<ModuleRecord>(records, &record_key(module_id, master_record_id))? {
                    Some(r) if !r.is_deleted() => r,
                    _ => return abort(CoreError::not_found("record", master_record_id)),
                };
            let mut duplicate: ModuleRecord =
                match tx_get::<ModuleRecord>(records, &record_key(module_id, duplicate_id))? {
                    Some(r) if !r.is_deleted() => r,
                    _ => return abort(CoreError::not_found("record", duplicate_id)),
                };

            let log = MergeLog {
                id: log_id,
                module_id,
                candidate_id: candidate.id,
                master_record_id: master.id,
                duplicate_record_id: duplicate.id,
                duplicate_data: duplicate.data.clone(),
                merged_by,
                merged_at: now,
            };

            master.data = merge_data(&master.data, &duplicate.data, merge_config);
            master.updated_by = merged_by;
            master.updated_at = now;
            tx_put(records, &record_key(module_id, master.id), &master)?;

            for key in &related_keys {
                if let Some(mut item) = tx_get::<RelatedItem>(related, key)? {
                    if item.record_id == duplicate_id {
                        item.record_id = master.id;
                        tx_put(related, key, &item)?;
                    }
                }
            }

            duplicate.deleted_at = Some(now);
            duplicate.updated_by = merged_by;
            duplicate.updated_at = now;
            tx_put(records, &record_key(module_id, duplicate.id), &duplicate)?;

            candidate.status = CandidateStatus::Merged;
            candidate.reviewed_by = merged_by;
            candidate.reviewed_at = Some(now);
            candidate.updated_at = now;
            tx_put(candidates, &id_key(candidate.id), &candidate)?;

            for key in &stale_candidate_keys {
                if let Some(mut stale) = tx_get::<DuplicateCandidate>(candidates, key)? {
                    if stale.status == CandidateStatus::Pending && stale.involves(duplicate_id) {
                        stale.status = CandidateStatus::Dismissed;
                        stale.reviewed_at = Some(now);
                        stale.dismiss_reason = Some(STALE_PAIR_REASON.to_string());
                        stale.updated_at = now;
                        tx_put(candidates, key, &stale)?;
                    }
                }
            }

            tx_put(logs, &id_key(log_id), &log)?;
            Ok(master)
        });

        match result {
            Ok(master) => {
                for tree in trees {
                    tree.flush()?;
                }
                log::info!(
                    "merged record {} into {} on module {} (candidate {})",
                    duplicate_id,
                    master.id,
                    module_id,
                    candidate_id
                );
                Ok(master)
            }
            Err(TransactionError::Abort(e)) => Err(e),
            Err(TransactionError::Storage(e)) => Err(CoreError::MergeFailed(e.to_string())),
        }
    }

    /// Dry run of `merge_records`: same resolution checks, same data
    /// merge, nothing written.
    pub fn preview_merge(
        &self,
        candidate_id: u64,
        master_record_id: u64,
        merge_config: &MergeConfig,
    ) -> CoreResult<MergePreview> {
        let (_, master, duplicate) = self.resolve(candidate_id, master_record_id)?;
        let merged_data = merge_data(&master.data, &duplicate.data, merge_config);
        let changed_fields = merged_data
            .iter()
            .filter(|(key, value)| master.data.get(key.as_str()) != Some(value))
            .map(|(key, _)| key.clone())
            .collect();
        Ok(MergePreview {
            master_record_id: master.id,
            duplicate_record_id: duplicate.id,
            merged_data,
            changed_fields,
        })
    }

    /// A module's merge log, newest first.
    pub fn merge_history(
        &self,
        module_id: u64,
        page: u32,
        per_page: u32,
    ) -> CoreResult<Page<MergeLog>> {
        let mut rows: Vec<MergeLog> = self.storage.list(&self.storage.merge_logs)?;
        rows.retain(|l| l.module_id == module_id);
        rows.sort_by(|a, b| b.merged_at.cmp(&a.merged_at).then(b.id.cmp(&a.id)));
        Ok(Page::slice(rows, page, per_page))
    }

    /// Candidate, master, and duplicate with every resolution check
    /// applied: the candidate pending, the master one of its pair, both
    /// records live.
    fn resolve(
        &self,
        candidate_id: u64,
        master_record_id: u64,
    ) -> CoreResult<(DuplicateCandidate, ModuleRecord, ModuleRecord)> {
        let candidate = self.duplicates.get_candidate(candidate_id)?;
        if candidate.status.is_terminal() {
            return Err(CoreError::conflict(format!(
                "candidate {} is already {}",
                candidate.id,
                candidate.status.as_str()
            )));
        }
        let duplicate_id = candidate.other_record(master_record_id).ok_or_else(|| {
            CoreError::validation(format!(
                "record {} is not part of candidate {}",
                master_record_id, candidate.id
            ))
        })?;
        let master = self
            .duplicates
            .records
            .find_by_id(candidate.module_id, master_record_id)?;
        let duplicate = self
            .duplicates
            .records
            .find_by_id(candidate.module_id, duplicate_id)?;
        Ok((candidate, master, duplicate))
    }
}

fn abort<T>(err: CoreError) -> Result<T, ConflictableTransactionError<CoreError>> {
    Err(ConflictableTransactionError::Abort(err))
}

/// Builds the surviving attribute map. Keys from both records are kept.
/// An empty or absent master value adopts the duplicate's non-empty
/// value; everywhere else the per-field strategy decides, defaulting to
/// the master's value. Empty duplicate values never overwrite anything.
fn merge_data(
    master: &BTreeMap<String, FieldValue>,
    duplicate: &BTreeMap<String, FieldValue>,
    config: &MergeConfig,
) -> BTreeMap<String, FieldValue> {
    let mut merged = master.clone();
    for (key, dup_value) in duplicate {
        if dup_value.is_empty() {
            continue;
        }
        match master.get(key).filter(|v| !v.is_empty()) {
            None => {
                merged.insert(key.clone(), dup_value.clone());
            }
            Some(master_value) => {
                match config.get(key).copied().unwrap_or(MergeStrategy::Master) {
                    MergeStrategy::Master => {}
                    MergeStrategy::Duplicate => {
                        merged.insert(key.clone(), dup_value.clone());
                    }
                    MergeStrategy::Concat => {
                        let joined = format!("{}; {}", master_value.to_text(), dup_value.to_text());
                        merged.insert(key.clone(), FieldValue::Text(joined));
                    }
                }
            }
        }
    }
    merged
}
