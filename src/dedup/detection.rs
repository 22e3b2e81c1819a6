//! Duplicate discovery and scoring.
//!
//! Discovery runs per rule condition through `find_matching_records`;
//! scoring grades each discovered pair with the weighted per-rule formula
//! and keeps the best rule score. Checks and scans share both layers, so
//! a pair scores the same whichever path found it.

use chrono::Utc;
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::Transactional;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::dedup::types::{
    CandidateStatus, DuplicateCandidate, DuplicateMatch, DuplicateRule, MatchedRule, NewCandidate,
    RuleAction, ScanOptions, ScanReport,
};
use crate::dedup::DuplicateEngine;
use crate::error::{CoreError, CoreResult};
use crate::record::{FieldValue, ModuleRecord};
use crate::similarity::{measure_for, strings_match};
use crate::storage::{id_key, pair_key, tx_put};

/// Pairs scoring below this are noise; neither checks nor scans keep them.
pub const MIN_CANDIDATE_SCORE: f64 = 0.7;

/// One pair's combined outcome across every active rule.
struct PairScore {
    /// Best single-rule score.
    score: f64,
    matched_rules: Vec<MatchedRule>,
    matched_fields: Vec<String>,
    /// Action of the best-scoring rule; ties keep the higher-priority one.
    best_action: Option<RuleAction>,
}

impl DuplicateEngine {
    /// Evaluates active rules against a prospective attribute map without
    /// persisting anything. Returns hits at or above the score threshold,
    /// best first, each carrying the action of its strongest rule so
    /// callers can warn or block before saving.
    pub fn check_for_duplicates(
        &self,
        module_id: u64,
        data: &BTreeMap<String, FieldValue>,
        exclude_record: Option<u64>,
    ) -> CoreResult<Vec<DuplicateMatch>> {
        let rules = self.active_rules(module_id)?;
        if rules.is_empty() {
            return Ok(Vec::new());
        }
        let partners = self.discover_partners(module_id, &rules, data, exclude_record)?;

        let mut matches = Vec::new();
        for (_, record) in partners {
            let scored = score_pair(&rules, data, &record.data);
            if scored.score >= MIN_CANDIDATE_SCORE {
                matches.push(DuplicateMatch {
                    record,
                    match_score: scored.score,
                    matched_rules: scored.matched_rules,
                    matched_fields: scored.matched_fields,
                    action: scored.best_action.unwrap_or(RuleAction::Warn),
                });
            }
        }
        matches.sort_by(|x, y| {
            y.match_score
                .partial_cmp(&x.match_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(x.record.id.cmp(&y.record.id))
        });
        Ok(matches)
    }

    /// Walks a module's live records in ascending id order, scoring each
    /// against partners with a larger id so every pair is visited once.
    /// Pairs that already have a candidate row in any status are skipped;
    /// re-running a scan never duplicates rows and never resurrects
    /// dismissed pairs.
    pub fn run_scan(&self, module_id: u64, options: ScanOptions) -> CoreResult<ScanReport> {
        let module = self.schema.get_module(module_id)?;
        let rules = self.active_rules(module_id)?;
        let scan_id = Uuid::new_v4();
        let started_at = Utc::now();
        log::info!(
            "scan {} started on module '{}' ({} active rules)",
            scan_id,
            module.api_name,
            rules.len()
        );

        let mut scanned = 0u64;
        let mut created = 0u64;
        let mut completed = true;

        if !rules.is_empty() {
            'outer: for record in self.records.iter_live(module_id) {
                let record = record?;
                if options.cancel.is_cancelled() {
                    completed = false;
                    break;
                }
                scanned += 1;
                let partners =
                    self.discover_partners(module_id, &rules, &record.data, Some(record.id))?;
                for (partner_id, partner) in partners {
                    if partner_id <= record.id {
                        continue;
                    }
                    if self
                        .find_candidate_by_pair(module_id, record.id, partner_id)?
                        .is_some()
                    {
                        continue;
                    }
                    let scored = score_pair(&rules, &record.data, &partner.data);
                    if scored.score < MIN_CANDIDATE_SCORE {
                        continue;
                    }
                    self.create_candidate(NewCandidate {
                        module_id,
                        record_id_a: record.id,
                        record_id_b: partner_id,
                        match_score: scored.score,
                        matched_rules: scored.matched_rules,
                        matched_fields: scored.matched_fields,
                    })?;
                    created += 1;
                    if let Some(limit) = options.limit {
                        if created as usize >= limit {
                            completed = false;
                            break 'outer;
                        }
                    }
                }
            }
        }

        let report = ScanReport {
            scan_id,
            module_id,
            scanned,
            candidates_created: created,
            completed,
            started_at,
            finished_at: Utc::now(),
        };
        log::info!(
            "scan {} finished: {} records scanned, {} candidates created, completed={}",
            report.scan_id,
            report.scanned,
            report.candidates_created,
            report.completed
        );
        Ok(report)
    }

    /// Persists a scored pair. Order-insensitive and idempotent: the pair
    /// index row and the candidate row land in one transaction, and when
    /// the pair already has a candidate in any status that row is returned
    /// untouched.
    pub fn create_candidate(&self, input: NewCandidate) -> CoreResult<DuplicateCandidate> {
        if input.record_id_a == input.record_id_b {
            return Err(CoreError::validation(
                "a record cannot be a duplicate of itself",
            ));
        }
        let (low, high) = normalize_pair(input.record_id_a, input.record_id_b);
        if let Some(existing) = self.find_candidate_by_pair(input.module_id, low, high)? {
            return Ok(existing);
        }

        let now = Utc::now();
        let candidate = DuplicateCandidate {
            id: self.storage.next_id()?,
            module_id: input.module_id,
            record_id_a: low,
            record_id_b: high,
            match_score: input.match_score,
            matched_rules: input.matched_rules,
            matched_fields: input.matched_fields,
            status: CandidateStatus::Pending,
            reviewed_by: None,
            reviewed_at: None,
            dismiss_reason: None,
            created_at: now,
            updated_at: now,
        };
        let pair = pair_key(input.module_id, low, high);
        let result = (
            &self.storage.duplicate_candidates,
            &self.storage.candidate_pairs,
        )
            .transaction(|(candidates, pairs)| {
                // Re-check inside: another writer may have claimed the pair
                // between our pre-check and this transaction.
                if pairs.get(pair.as_bytes())?.is_some() {
                    return Err(ConflictableTransactionError::Abort(CoreError::conflict(
                        "candidate pair already exists",
                    )));
                }
                tx_put(candidates, &id_key(candidate.id), &candidate)?;
                pairs.insert(pair.as_bytes(), id_key(candidate.id).as_bytes())?;
                Ok(())
            });
        match result {
            Ok(()) => {
                self.storage.duplicate_candidates.flush()?;
                self.storage.candidate_pairs.flush()?;
                Ok(candidate)
            }
            Err(TransactionError::Abort(CoreError::Conflict(_))) => {
                match self.find_candidate_by_pair(input.module_id, low, high)? {
                    Some(existing) => Ok(existing),
                    None => Err(CoreError::conflict("candidate pair vanished mid-create")),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// The candidate covering a pair, in any status. Record order does not
    /// matter.
    pub fn find_candidate_by_pair(
        &self,
        module_id: u64,
        record_id_a: u64,
        record_id_b: u64,
    ) -> CoreResult<Option<DuplicateCandidate>> {
        let (low, high) = normalize_pair(record_id_a, record_id_b);
        let key = pair_key(module_id, low, high);
        let candidate_key = match self.storage.candidate_pairs.get(key.as_bytes())? {
            Some(bytes) => String::from_utf8_lossy(&bytes).to_string(),
            None => return Ok(None),
        };
        self.storage
            .get(&self.storage.duplicate_candidates, &candidate_key)
    }

    /// Union of records matching any rule condition against `data`, keyed
    /// and ordered by record id.
    fn discover_partners(
        &self,
        module_id: u64,
        rules: &[DuplicateRule],
        data: &BTreeMap<String, FieldValue>,
        exclude_record: Option<u64>,
    ) -> CoreResult<BTreeMap<u64, ModuleRecord>> {
        let mut partners = BTreeMap::new();
        for rule in rules {
            for condition in &rule.conditions {
                let value = match data.get(&condition.field) {
                    Some(value) if !value.is_empty() => value,
                    _ => continue,
                };
                for record in self.records.find_matching_records(
                    module_id,
                    exclude_record,
                    &condition.field,
                    value,
                    condition.match_type,
                )? {
                    partners.entry(record.id).or_insert(record);
                }
            }
        }
        Ok(partners)
    }
}

fn normalize_pair(a: u64, b: u64) -> (u64, u64) {
    if a < b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Weighted mean per rule, best rule wins:
///
/// ```text
/// rule score = Σ weight · similarity   over matched conditions
///              ──────────────────────
///              Σ weight                over conditions with both sides
///                                      non-empty
/// ```
///
/// Conditions with an empty side contribute to neither sum, so one missing
/// phone number does not drag down an otherwise certain email match. A
/// rule with no matched condition is left out entirely.
fn score_pair(
    rules: &[DuplicateRule],
    a: &BTreeMap<String, FieldValue>,
    b: &BTreeMap<String, FieldValue>,
) -> PairScore {
    let mut best = 0.0f64;
    let mut best_action = None;
    let mut matched_rules = Vec::new();
    let mut matched_fields: Vec<String> = Vec::new();

    for rule in rules {
        let mut numerator = 0.0;
        let mut denominator = 0.0;
        let mut rule_fields: Vec<&str> = Vec::new();
        for condition in &rule.conditions {
            let left = a.get(&condition.field).and_then(FieldValue::fold_text);
            let right = b.get(&condition.field).and_then(FieldValue::fold_text);
            let (left, right) = match (left, right) {
                (Some(left), Some(right)) => (left, right),
                _ => continue,
            };
            denominator += condition.weight;
            if strings_match(condition.match_type, &left, &right) {
                let similarity = measure_for(condition.match_type).score(&left, &right);
                numerator += condition.weight * similarity;
                rule_fields.push(condition.field.as_str());
            }
        }
        if rule_fields.is_empty() || denominator <= 0.0 {
            continue;
        }
        let rule_score = numerator / denominator;
        matched_rules.push(MatchedRule {
            rule_id: rule.id,
            rule_name: rule.name.clone(),
            score: rule_score,
        });
        for field in rule_fields {
            if !matched_fields.iter().any(|f| f == field) {
                matched_fields.push(field.to_string());
            }
        }
        if rule_score > best {
            best = rule_score;
            best_action = Some(rule.action);
        }
    }

    PairScore {
        score: best,
        matched_rules,
        matched_fields,
        best_action,
    }
}
