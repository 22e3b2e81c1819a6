//! Candidate review: listing, dismissal, and queue statistics.
//!
//! Review operations never touch records. A candidate leaves the pending
//! state exactly once, into `Merged` or `Dismissed`, and stays there; the
//! pair index keeps holding the row so later scans skip the pair.

use chrono::Utc;

use crate::dedup::types::{CandidateQuery, CandidateStats, CandidateStatus, DuplicateCandidate};
use crate::dedup::DuplicateEngine;
use crate::error::{CoreError, CoreResult};
use crate::record::Page;
use crate::storage::id_key;

/// Pending candidates at or above this score count as high confidence.
const HIGH_CONFIDENCE: f64 = 0.9;

impl DuplicateEngine {
    pub fn get_candidate(&self, candidate_id: u64) -> CoreResult<DuplicateCandidate> {
        self.storage
            .get(&self.storage.duplicate_candidates, &id_key(candidate_id))?
            .ok_or_else(|| CoreError::not_found("duplicate candidate", candidate_id))
    }

    /// Filtered page of candidates, best score first, ascending id on ties
    /// so equal scores paginate stably.
    pub fn list_candidates(
        &self,
        query: &CandidateQuery,
        page: u32,
        per_page: u32,
    ) -> CoreResult<Page<DuplicateCandidate>> {
        let mut rows: Vec<DuplicateCandidate> =
            self.storage.list(&self.storage.duplicate_candidates)?;
        rows.retain(|c| {
            query.module_id.map_or(true, |m| c.module_id == m)
                && query.status.admits(c.status)
                && query.min_score.map_or(true, |s| c.match_score >= s)
                && query.record_id.map_or(true, |r| c.involves(r))
        });
        rows.sort_by(|a, b| {
            b.match_score
                .partial_cmp(&a.match_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.id.cmp(&b.id))
        });
        Ok(Page::slice(rows, page, per_page))
    }

    /// Every candidate involving the record, in any status, ascending id.
    pub fn candidates_for_record(&self, record_id: u64) -> CoreResult<Vec<DuplicateCandidate>> {
        let mut rows: Vec<DuplicateCandidate> =
            self.storage.list(&self.storage.duplicate_candidates)?;
        rows.retain(|c| c.involves(record_id));
        rows.sort_by_key(|c| c.id);
        Ok(rows)
    }

    /// Marks a pending candidate dismissed. Rows already merged or
    /// dismissed are settled and come back as a `Conflict`.
    pub fn dismiss_candidate(
        &self,
        candidate_id: u64,
        reviewed_by: Option<u64>,
        reason: Option<String>,
    ) -> CoreResult<DuplicateCandidate> {
        let mut candidate = self.get_candidate(candidate_id)?;
        if candidate.status.is_terminal() {
            return Err(CoreError::conflict(format!(
                "candidate {} is already {}",
                candidate.id,
                candidate.status.as_str()
            )));
        }
        let now = Utc::now();
        candidate.status = CandidateStatus::Dismissed;
        candidate.reviewed_by = reviewed_by;
        candidate.reviewed_at = Some(now);
        candidate.dismiss_reason = reason;
        candidate.updated_at = now;
        self.storage.put(
            &self.storage.duplicate_candidates,
            &id_key(candidate.id),
            &candidate,
        )?;
        Ok(candidate)
    }

    /// Dismisses every listed candidate that is still pending. Missing and
    /// already-settled rows are skipped, not errors. Returns how many rows
    /// actually changed.
    pub fn bulk_dismiss(
        &self,
        candidate_ids: &[u64],
        reviewed_by: Option<u64>,
        reason: Option<&str>,
    ) -> CoreResult<usize> {
        let mut dismissed = 0;
        for &candidate_id in candidate_ids {
            match self.dismiss_candidate(candidate_id, reviewed_by, reason.map(str::to_string)) {
                Ok(_) => dismissed += 1,
                Err(CoreError::NotFound(_)) | Err(CoreError::Conflict(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(dismissed)
    }

    /// Review-queue numbers for one module. High confidence and the
    /// average only look at pending rows.
    pub fn candidate_stats(&self, module_id: u64) -> CoreResult<CandidateStats> {
        let rows: Vec<DuplicateCandidate> =
            self.storage.list(&self.storage.duplicate_candidates)?;
        let mut stats = CandidateStats {
            pending: 0,
            merged: 0,
            dismissed: 0,
            high_confidence: 0,
            average_score: 0.0,
        };
        let mut pending_score_sum = 0.0;
        for candidate in rows.iter().filter(|c| c.module_id == module_id) {
            match candidate.status {
                CandidateStatus::Pending => {
                    stats.pending += 1;
                    pending_score_sum += candidate.match_score;
                    if candidate.match_score >= HIGH_CONFIDENCE {
                        stats.high_confidence += 1;
                    }
                }
                CandidateStatus::Merged => stats.merged += 1,
                CandidateStatus::Dismissed => stats.dismissed += 1,
            }
        }
        if stats.pending > 0 {
            stats.average_score = pending_score_sum / stats.pending as f64;
        }
        Ok(stats)
    }
}
