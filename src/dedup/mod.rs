//! Duplicate management: detection rules, match scoring, scans, candidate
//! review, and atomic merges.
//!
//! `DuplicateEngine` carries rules, discovery, and review; its impl is
//! split by concern across `rules.rs`, `detection.rs`, and
//! `candidates.rs`. `MergeEngine` folds a confirmed pair together.

mod candidates;
mod detection;
mod merge;
mod rules;
mod types;

pub use detection::MIN_CANDIDATE_SCORE;
pub use merge::MergeEngine;
pub use types::{
    CancelFlag, CandidateQuery, CandidateStats, CandidateStatus, DuplicateCandidate,
    DuplicateMatch, DuplicateRule, DuplicateRuleUpdate, MatchedRule, MergeConfig, MergeLog,
    MergePreview, MergeStrategy, NewCandidate, NewDuplicateRule, RuleAction, RuleCondition,
    ScanOptions, ScanReport, StatusFilter,
};

use std::sync::Arc;

use crate::record::RecordStore;
use crate::schema::SchemaRegistry;
use crate::storage::Storage;

/// Detection and review service. Cheap to clone; all state lives in
/// storage.
#[derive(Clone)]
pub struct DuplicateEngine {
    pub(crate) storage: Arc<Storage>,
    pub(crate) schema: SchemaRegistry,
    pub(crate) records: RecordStore,
}

impl DuplicateEngine {
    pub fn new(storage: Arc<Storage>) -> Self {
        let schema = SchemaRegistry::new(Arc::clone(&storage));
        let records = RecordStore::new(Arc::clone(&storage));
        Self {
            storage,
            schema,
            records,
        }
    }
}
