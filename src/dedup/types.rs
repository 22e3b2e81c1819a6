//! Duplicate rule, candidate, scan, and merge types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use crate::record::{FieldValue, ModuleRecord};
use crate::similarity::MatchType;

/// What a caller should do when a rule fires at save time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleAction {
    /// Surface the duplicates but allow the save.
    Warn,
    /// Reject the save.
    Block,
    /// Record candidates without bothering the user.
    Silent,
}

/// One weighted comparison of a rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleCondition {
    /// Api name of the compared field.
    pub field: String,
    pub match_type: MatchType,
    /// Relative importance; must be positive.
    pub weight: f64,
}

impl RuleCondition {
    pub fn new(field: impl Into<String>, match_type: MatchType, weight: f64) -> Self {
        Self {
            field: field.into(),
            match_type,
            weight,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateRule {
    pub id: u64,
    pub module_id: u64,
    pub name: String,
    pub is_active: bool,
    pub action: RuleAction,
    /// Non-empty; evaluated together per pair.
    pub conditions: Vec<RuleCondition>,
    /// Rules run in ascending priority order.
    pub priority: u32,
    pub created_by: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for `create_rule`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDuplicateRule {
    pub module_id: u64,
    pub name: String,
    pub action: RuleAction,
    pub conditions: Vec<RuleCondition>,
    #[serde(default)]
    pub priority: u32,
    pub created_by: Option<u64>,
}

impl NewDuplicateRule {
    pub fn new(
        module_id: u64,
        name: impl Into<String>,
        action: RuleAction,
        conditions: Vec<RuleCondition>,
    ) -> Self {
        Self {
            module_id,
            name: name.into(),
            action,
            conditions,
            priority: 0,
            created_by: None,
        }
    }

    #[must_use]
    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DuplicateRuleUpdate {
    pub name: Option<String>,
    pub action: Option<RuleAction>,
    pub conditions: Option<Vec<RuleCondition>>,
    pub priority: Option<u32>,
    pub is_active: Option<bool>,
}

/// Candidate review lifecycle. `pending` is the only state that can move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateStatus {
    Pending,
    Merged,
    Dismissed,
}

impl CandidateStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, CandidateStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CandidateStatus::Pending => "pending",
            CandidateStatus::Merged => "merged",
            CandidateStatus::Dismissed => "dismissed",
        }
    }
}

/// One rule's contribution to a candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchedRule {
    pub rule_id: u64,
    pub rule_name: String,
    pub score: f64,
}

/// A scored pair of records suspected to be duplicates. The pair is
/// normalized so `record_id_a < record_id_b`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateCandidate {
    pub id: u64,
    pub module_id: u64,
    pub record_id_a: u64,
    pub record_id_b: u64,
    /// Best rule score, in `0.0..=1.0`.
    pub match_score: f64,
    pub matched_rules: Vec<MatchedRule>,
    pub matched_fields: Vec<String>,
    pub status: CandidateStatus,
    pub reviewed_by: Option<u64>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub dismiss_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DuplicateCandidate {
    pub fn involves(&self, record_id: u64) -> bool {
        self.record_id_a == record_id || self.record_id_b == record_id
    }

    /// The counterpart of `record_id` in this pair.
    pub fn other_record(&self, record_id: u64) -> Option<u64> {
        if self.record_id_a == record_id {
            Some(self.record_id_b)
        } else if self.record_id_b == record_id {
            Some(self.record_id_a)
        } else {
            None
        }
    }
}

/// Input for `create_candidate`. Record order does not matter; creation
/// normalizes it.
#[derive(Debug, Clone)]
pub struct NewCandidate {
    pub module_id: u64,
    pub record_id_a: u64,
    pub record_id_b: u64,
    pub match_score: f64,
    pub matched_rules: Vec<MatchedRule>,
    pub matched_fields: Vec<String>,
}

/// One hit from `check_for_duplicates`: the existing record plus how and
/// why it matched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateMatch {
    pub record: ModuleRecord,
    pub match_score: f64,
    pub matched_rules: Vec<MatchedRule>,
    pub matched_fields: Vec<String>,
    /// Action of the highest-scoring rule that matched.
    pub action: RuleAction,
}

/// Cooperative cancellation handle shared with a running scan. Cloning
/// hands out another view of the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    /// Stop after persisting this many new candidates.
    pub limit: Option<usize>,
    /// Checked between records; a cancelled scan keeps what it created.
    pub cancel: CancelFlag,
}

/// Outcome of one `run_scan` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanReport {
    pub scan_id: Uuid,
    pub module_id: u64,
    /// Records visited.
    pub scanned: u64,
    pub candidates_created: u64,
    /// False when the scan stopped early on the limit or the cancel flag.
    pub completed: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Status filter for candidate listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusFilter {
    #[default]
    Pending,
    Merged,
    Dismissed,
    All,
}

impl StatusFilter {
    pub(crate) fn admits(&self, status: CandidateStatus) -> bool {
        match self {
            StatusFilter::All => true,
            StatusFilter::Pending => status == CandidateStatus::Pending,
            StatusFilter::Merged => status == CandidateStatus::Merged,
            StatusFilter::Dismissed => status == CandidateStatus::Dismissed,
        }
    }
}

/// Filters for `list_candidates`.
#[derive(Debug, Clone, Default)]
pub struct CandidateQuery {
    pub module_id: Option<u64>,
    pub status: StatusFilter,
    pub min_score: Option<f64>,
    /// Either side of the pair.
    pub record_id: Option<u64>,
}

impl CandidateQuery {
    pub fn for_module(module_id: u64) -> Self {
        Self {
            module_id: Some(module_id),
            ..Self::default()
        }
    }
}

/// Review-queue numbers for one module.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateStats {
    pub pending: u64,
    pub merged: u64,
    pub dismissed: u64,
    /// Pending candidates scoring at least 0.9.
    pub high_confidence: u64,
    /// Mean score of pending candidates; 0 when there are none.
    pub average_score: f64,
}

/// Per-field survival strategy during a merge. Keys the caller does not
/// configure keep the master's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    Master,
    Duplicate,
    Concat,
}

pub type MergeConfig = BTreeMap<String, MergeStrategy>;

/// Audit row written inside the merge transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeLog {
    pub id: u64,
    pub module_id: u64,
    pub candidate_id: u64,
    pub master_record_id: u64,
    pub duplicate_record_id: u64,
    /// The duplicate's attribute map as it was when merged away.
    pub duplicate_data: BTreeMap<String, FieldValue>,
    pub merged_by: Option<u64>,
    pub merged_at: DateTime<Utc>,
}

/// Dry-run result of a merge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergePreview {
    pub master_record_id: u64,
    pub duplicate_record_id: u64,
    pub merged_data: BTreeMap<String, FieldValue>,
    /// Master keys whose value would change.
    pub changed_fields: Vec<String>,
}
