//! # Recordbase Library
//!
//! This library implements a schema-driven record store of the kind CRM
//! backends are built on. Administrators declare modules, blocks, and
//! fields at runtime; records are attribute maps validated against those
//! declarations; filters, duplicate rules, and merges all speak in field
//! api names.
//!
//! ## Core Components
//!
//! * `schema` - module, block, field, and field option definitions plus
//!   the field visibility dependency resolver
//! * `record` - attribute-map records with filter translation, sorting,
//!   pagination, aggregation, search, and related items
//! * `dedup` - duplicate rules, match scoring, scans, candidate review,
//!   and the atomic merge engine
//! * `similarity` - the string similarity measures behind match types
//! * `storage` - the embedded sled database and its trees
//! * `error` - error types and handling
//!
//! ## Architecture
//!
//! Everything persists in one embedded sled database with a named tree
//! per entity family. Services are thin handles over a shared `Storage`:
//! cheap to clone, safe to hand to separate threads, and independently
//! constructible when an application only needs one of them. `Recordbase`
//! opens a database and wires all of them at once.
//!
//! Records never get a fixed schema struct; they stay `BTreeMap` attribute
//! maps keyed by field api name, and every read path tolerates data the
//! current schema no longer declares.

pub mod dedup;
pub mod error;
pub mod record;
pub mod schema;
pub mod similarity;
pub mod storage;

// Re-export main types for convenience
pub use dedup::{
    CancelFlag, CandidateQuery, CandidateStats, CandidateStatus, DuplicateCandidate,
    DuplicateEngine, DuplicateMatch, DuplicateRule, MatchedRule, MergeConfig, MergeEngine,
    MergeLog, MergePreview, MergeStrategy, NewCandidate, NewDuplicateRule, RuleAction,
    RuleCondition, ScanOptions, ScanReport, StatusFilter, MIN_CANDIDATE_SCORE,
};
pub use error::{CoreError, CoreResult};
pub use record::{
    Aggregation, FieldPredicate, FieldValue, ModuleRecord, NewRelatedItem, Page, Predicate,
    RecordStore, RelatedItem, RelatedKind, SortDirection, SortKey,
};
pub use schema::SchemaRegistry;
pub use similarity::MatchType;
pub use storage::Storage;

use std::path::Path;
use std::sync::Arc;

/// One open database with every service wired over it.
///
/// ```no_run
/// use recordbase::{FieldValue, Recordbase};
/// use recordbase::schema::types::{FieldType, NewField, NewModule};
///
/// # fn main() -> recordbase::CoreResult<()> {
/// let db = Recordbase::open("./data")?;
/// let module = db.schema.create_module(NewModule {
///     name: "Contacts".to_string(),
///     singular_name: "Contact".to_string(),
///     ..NewModule::default()
/// })?;
/// db.schema.create_field(NewField::new(module.id, "Email", FieldType::Email))?;
/// db.records.create_record(
///     module.id,
///     [("email".to_string(), FieldValue::from("jane@acme.com"))].into(),
///     None,
/// )?;
/// # Ok(())
/// # }
/// ```
pub struct Recordbase {
    /// Module, block, field, and option definitions.
    pub schema: SchemaRegistry,
    /// Record reads, writes, queries, and related items.
    pub records: RecordStore,
    /// Duplicate rules, checks, scans, and candidate review.
    pub duplicates: DuplicateEngine,
    /// Merge execution, previews, and history.
    pub merges: MergeEngine,
}

impl Recordbase {
    /// Opens (or creates) a database at `path` and wires the services.
    pub fn open(path: impl AsRef<Path>) -> CoreResult<Self> {
        Ok(Self::with_storage(Arc::new(Storage::open(path)?)))
    }

    /// Opens a throwaway database that never touches disk after close.
    pub fn open_temporary() -> CoreResult<Self> {
        Ok(Self::with_storage(Arc::new(Storage::open_temporary()?)))
    }

    fn with_storage(storage: Arc<Storage>) -> Self {
        Self {
            schema: SchemaRegistry::new(Arc::clone(&storage)),
            records: RecordStore::new(Arc::clone(&storage)),
            duplicates: DuplicateEngine::new(Arc::clone(&storage)),
            merges: MergeEngine::new(storage),
        }
    }
}
