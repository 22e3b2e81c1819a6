//! Record store: attribute-map rows, filter translation, sorting,
//! pagination, aggregation, and related items.

mod filter;
mod query;
mod related;
mod store;
mod types;
mod value;

pub use filter::{is_system_field, FieldPredicate, Predicate, SortDirection, SortKey, SYSTEM_FIELDS};
pub use query::Aggregation;
pub use related::{NewRelatedItem, RelatedItem, RelatedKind};
pub use store::RecordStore;
pub use types::{ModuleRecord, Page};
pub use value::FieldValue;
