//! Listing, filtering, aggregation, search, and matching queries.
//!
//! Everything here walks a module's records through one prefix scan and
//! evaluates prepared predicates in memory. Filter and sort field names
//! are gated by the schema before any row is touched.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::{CoreError, CoreResult};
use crate::record::filter::{
    is_system_field, sort_records, system_value, FieldPredicate, Predicate, SortKey, SEARCH_FIELD,
};
use crate::record::store::RecordStore;
use crate::record::types::{ModuleRecord, Page};
use crate::record::value::FieldValue;
use crate::schema::types::Field;
use crate::similarity::{strings_match, MatchType};
use crate::storage::record_prefix;

/// Cap on `find_matching_records` output; duplicate discovery wants the
/// closest rows, not the whole module.
pub(crate) const MATCH_CAP: usize = 100;

/// Metric vocabulary for `calculate_metric`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    Count,
    Sum,
    Avg,
    Min,
    Max,
    CountDistinct,
}

impl RecordStore {
    /// Live records of a module in ascending id order. Rows that no longer
    /// decode are logged and skipped.
    pub(crate) fn iter_live(
        &self,
        module_id: u64,
    ) -> impl Iterator<Item = CoreResult<ModuleRecord>> + '_ {
        self.storage
            .records
            .scan_prefix(record_prefix(module_id).as_bytes())
            .filter_map(|entry| match entry {
                Ok((key, bytes)) => match serde_json::from_slice::<ModuleRecord>(&bytes) {
                    Ok(record) if record.is_deleted() => None,
                    Ok(record) => Some(Ok(record)),
                    Err(e) => {
                        log::warn!(
                            "skipping undecodable record {}: {}",
                            String::from_utf8_lossy(&key),
                            e
                        );
                        None
                    }
                },
                Err(e) => Some(Err(CoreError::Storage(e))),
            })
    }

    /// Filtered, sorted, paged listing. Filters are AND-combined.
    pub fn find_all(
        &self,
        module_id: u64,
        filters: &[FieldPredicate],
        sorts: &[SortKey],
        page: u32,
        per_page: u32,
    ) -> CoreResult<Page<ModuleRecord>> {
        let module = self.schema.get_module(module_id)?;
        let fields = self.schema.fields_for_module(module_id)?;
        let filters = prepare_filters(&module.api_name, &fields, filters)?;
        validate_sorts(&module.api_name, &fields, sorts)?;

        let mut rows = Vec::new();
        for record in self.iter_live(module_id) {
            let record = record?;
            if filters.iter().all(|f| f.matches(&record)) {
                rows.push(record);
            }
        }
        sort_records(&mut rows, sorts);
        Ok(Page::slice(rows, page, per_page))
    }

    /// Count of live records matching the filters.
    pub fn count(&self, module_id: u64, filters: &[FieldPredicate]) -> CoreResult<u64> {
        let module = self.schema.get_module(module_id)?;
        let fields = self.schema.fields_for_module(module_id)?;
        let filters = prepare_filters(&module.api_name, &fields, filters)?;

        let mut matched = 0u64;
        for record in self.iter_live(module_id) {
            let record = record?;
            if filters.iter().all(|f| f.matches(&record)) {
                matched += 1;
            }
        }
        Ok(matched)
    }

    /// One aggregate over the filtered rows. Numeric aggregations skip
    /// values that will not cast; `min`/`max` over nothing come back 0.
    pub fn calculate_metric(
        &self,
        module_id: u64,
        field: &str,
        aggregation: Aggregation,
        filters: &[FieldPredicate],
    ) -> CoreResult<f64> {
        let module = self.schema.get_module(module_id)?;
        let fields = self.schema.fields_for_module(module_id)?;
        if !is_system_field(field) && !fields.iter().any(|f| f.api_name == field) {
            return Err(CoreError::validation(format!(
                "unknown metric field '{}' on module '{}'",
                field, module.api_name
            )));
        }
        let filters = prepare_filters(&module.api_name, &fields, filters)?;

        let mut matched = 0u64;
        let mut numbers: Vec<f64> = Vec::new();
        let mut distinct: BTreeSet<String> = BTreeSet::new();
        for record in self.iter_live(module_id) {
            let record = record?;
            if !filters.iter().all(|f| f.matches(&record)) {
                continue;
            }
            matched += 1;
            let value = metric_value(&record, field);
            match aggregation {
                Aggregation::Count => {}
                Aggregation::CountDistinct => {
                    if let Some(folded) = value.as_ref().and_then(|v| v.fold_text()) {
                        distinct.insert(folded);
                    }
                }
                _ => {
                    if let Some(n) = value.as_ref().and_then(|v| v.as_number()) {
                        numbers.push(n);
                    }
                }
            }
        }
        Ok(match aggregation {
            Aggregation::Count => matched as f64,
            Aggregation::CountDistinct => distinct.len() as f64,
            Aggregation::Sum => numbers.iter().sum(),
            Aggregation::Avg => {
                if numbers.is_empty() {
                    0.0
                } else {
                    numbers.iter().sum::<f64>() / numbers.len() as f64
                }
            }
            Aggregation::Min => numbers.iter().copied().reduce(f64::min).unwrap_or(0.0),
            Aggregation::Max => numbers.iter().copied().reduce(f64::max).unwrap_or(0.0),
        })
    }

    /// Records created inside the inclusive calendar period, optionally by
    /// one user, newest first.
    pub fn find_by_period(
        &self,
        module_id: u64,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
        created_by: Option<u64>,
    ) -> CoreResult<Vec<ModuleRecord>> {
        self.schema.get_module(module_id)?;
        let mut rows = Vec::new();
        for record in self.iter_live(module_id) {
            let record = record?;
            let day = record.created_at.date_naive();
            if let Some(start) = start {
                if day < start {
                    continue;
                }
            }
            if let Some(end) = end {
                if day > end {
                    continue;
                }
            }
            if let Some(user) = created_by {
                if record.created_by != Some(user) {
                    continue;
                }
            }
            rows.push(record);
        }
        sort_records(&mut rows, &[SortKey::desc("created_at")]);
        Ok(rows)
    }

    /// Substring search across searchable fields, newest first. `fields`
    /// narrows the targets; names that are not searchable are dropped, and
    /// an empty effective list matches nothing.
    pub fn search_records(
        &self,
        module_id: u64,
        term: &str,
        fields: Option<Vec<String>>,
        page: u32,
        per_page: u32,
    ) -> CoreResult<Page<ModuleRecord>> {
        self.schema.get_module(module_id)?;
        let declared = self.schema.fields_for_module(module_id)?;
        let searchable: Vec<String> = declared
            .iter()
            .filter(|f| f.is_searchable)
            .map(|f| f.api_name.clone())
            .collect();
        let targets = match fields {
            Some(named) => named
                .into_iter()
                .filter(|name| searchable.contains(name))
                .collect(),
            None => searchable,
        };
        let filter = FieldPredicate::search(term, targets);

        let mut rows = Vec::new();
        for record in self.iter_live(module_id) {
            let record = record?;
            if filter.matches(&record) {
                rows.push(record);
            }
        }
        sort_records(&mut rows, &[SortKey::desc("created_at")]);
        Ok(Page::slice(rows, page, per_page))
    }

    /// Live records whose value for `field` matches `value` under the
    /// match type. Records with an empty value never match; output stops
    /// at the first 100 rows in id order.
    pub fn find_matching_records(
        &self,
        module_id: u64,
        exclude_record: Option<u64>,
        field: &str,
        value: &FieldValue,
        match_type: MatchType,
    ) -> CoreResult<Vec<ModuleRecord>> {
        self.schema.get_module(module_id)?;
        let probe = match value.fold_text() {
            Some(probe) => probe,
            None => return Ok(Vec::new()),
        };
        let mut matches = Vec::new();
        for record in self.iter_live(module_id) {
            let record = record?;
            if Some(record.id) == exclude_record {
                continue;
            }
            let candidate = match record.data.get(field).and_then(FieldValue::fold_text) {
                Some(candidate) => candidate,
                None => continue,
            };
            if strings_match(match_type, &probe, &candidate) {
                matches.push(record);
                if matches.len() >= MATCH_CAP {
                    break;
                }
            }
        }
        Ok(matches)
    }
}

/// Gates filter field names against the schema and pre-resolves search
/// targets. System fields always pass; declared fields must be marked
/// filterable; unknown names are rejected.
fn prepare_filters(
    module_api_name: &str,
    fields: &[Field],
    filters: &[FieldPredicate],
) -> CoreResult<Vec<FieldPredicate>> {
    let searchable: Vec<&str> = fields
        .iter()
        .filter(|f| f.is_searchable)
        .map(|f| f.api_name.as_str())
        .collect();
    let mut prepared = Vec::with_capacity(filters.len());
    for filter in filters {
        match &filter.predicate {
            Predicate::Search { value, fields: targets } => {
                let effective: Vec<String> = targets
                    .iter()
                    .filter(|t| searchable.contains(&t.as_str()))
                    .cloned()
                    .collect();
                prepared.push(FieldPredicate::new(
                    SEARCH_FIELD,
                    Predicate::Search {
                        value: value.clone(),
                        fields: effective,
                    },
                ));
            }
            predicate => {
                if let Predicate::Between { min, max } = predicate {
                    if min > max {
                        return Err(CoreError::validation(format!(
                            "between bounds are inverted ({} > {})",
                            min, max
                        )));
                    }
                }
                if let Predicate::DateBetween { start, end } = predicate {
                    if start > end {
                        return Err(CoreError::validation(format!(
                            "date_between bounds are inverted ({} > {})",
                            start, end
                        )));
                    }
                }
                let name = filter.field.as_str();
                if !is_system_field(name) {
                    match fields.iter().find(|f| f.api_name == name) {
                        Some(field) if field.is_filterable => {}
                        Some(_) => {
                            return Err(CoreError::validation(format!(
                                "field '{}' of module '{}' is not filterable",
                                name, module_api_name
                            )))
                        }
                        None => {
                            return Err(CoreError::validation(format!(
                                "unknown filter field '{}' on module '{}'",
                                name, module_api_name
                            )))
                        }
                    }
                }
                prepared.push(filter.clone());
            }
        }
    }
    Ok(prepared)
}

fn validate_sorts(module_api_name: &str, fields: &[Field], sorts: &[SortKey]) -> CoreResult<()> {
    for sort in sorts {
        let name = sort.field.as_str();
        if is_system_field(name) {
            continue;
        }
        match fields.iter().find(|f| f.api_name == name) {
            Some(field) if field.is_sortable => {}
            Some(_) => {
                return Err(CoreError::validation(format!(
                    "field '{}' of module '{}' is not sortable",
                    name, module_api_name
                )))
            }
            None => {
                return Err(CoreError::validation(format!(
                    "unknown sort field '{}' on module '{}'",
                    name, module_api_name
                )))
            }
        }
    }
    Ok(())
}

fn metric_value(record: &ModuleRecord, field: &str) -> Option<FieldValue> {
    system_value(record, field).or_else(|| record.data.get(field).cloned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::types::{FieldType, NewField, NewModule};
    use crate::storage::Storage;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn deals_store() -> (RecordStore, u64) {
        let storage = Arc::new(Storage::open_temporary().unwrap());
        let store = RecordStore::new(storage);
        let module = store
            .schema
            .create_module(NewModule {
                name: "Deals".to_string(),
                singular_name: "Deal".to_string(),
                ..NewModule::default()
            })
            .unwrap();
        store
            .schema
            .create_field(NewField::new(module.id, "Amount", FieldType::Number))
            .unwrap();
        store
            .schema
            .create_field(NewField::new(module.id, "Name", FieldType::Text).searchable())
            .unwrap();
        let mut hidden = NewField::new(module.id, "Margin", FieldType::Number);
        hidden.is_filterable = false;
        hidden.is_sortable = false;
        store.schema.create_field(hidden).unwrap();
        (store, module.id)
    }

    fn seed_amounts(store: &RecordStore, module_id: u64, amounts: &[f64]) -> Vec<u64> {
        amounts
            .iter()
            .map(|&amount| {
                let mut data = BTreeMap::new();
                data.insert("amount".to_string(), FieldValue::Number(amount));
                store.create_record(module_id, data, None).unwrap().id
            })
            .collect()
    }

    #[test]
    fn test_between_filter_with_sort_and_paging() {
        let (store, module_id) = deals_store();
        seed_amounts(&store, module_id, &[50.0, 150.0, 300.0, 450.0, 600.0]);

        let page = store
            .find_all(
                module_id,
                &[FieldPredicate::between("amount", 100.0, 500.0)],
                &[SortKey::desc("amount")],
                1,
                2,
            )
            .unwrap();
        let amounts: Vec<f64> = page
            .data
            .iter()
            .filter_map(|r| r.value("amount").and_then(FieldValue::as_number))
            .collect();
        assert_eq!(amounts, vec![450.0, 300.0]);
        assert_eq!(page.total, 3);
        assert_eq!(page.last_page, 2);

        let rest = store
            .find_all(
                module_id,
                &[FieldPredicate::between("amount", 100.0, 500.0)],
                &[SortKey::desc("amount")],
                2,
                2,
            )
            .unwrap();
        let amounts: Vec<f64> = rest
            .data
            .iter()
            .filter_map(|r| r.value("amount").and_then(FieldValue::as_number))
            .collect();
        assert_eq!(amounts, vec![150.0]);
    }

    #[test]
    fn test_filter_and_sort_gates() {
        let (store, module_id) = deals_store();
        seed_amounts(&store, module_id, &[100.0]);

        let unknown = store.find_all(
            module_id,
            &[FieldPredicate::equals("ghost", 1.0)],
            &[],
            1,
            10,
        );
        assert!(matches!(unknown, Err(CoreError::Validation(_))));

        let unfilterable = store.find_all(
            module_id,
            &[FieldPredicate::greater_than("margin", 0.0)],
            &[],
            1,
            10,
        );
        assert!(matches!(unfilterable, Err(CoreError::Validation(_))));

        let unsortable = store.find_all(module_id, &[], &[SortKey::asc("margin")], 1, 10);
        assert!(matches!(unsortable, Err(CoreError::Validation(_))));

        // System fields pass both gates.
        assert!(store
            .find_all(
                module_id,
                &[FieldPredicate::greater_than("id", 0.0)],
                &[SortKey::desc("created_at")],
                1,
                10
            )
            .is_ok());

        let inverted = store.find_all(
            module_id,
            &[FieldPredicate::between("amount", 500.0, 100.0)],
            &[],
            1,
            10,
        );
        assert!(matches!(inverted, Err(CoreError::Validation(_))));
    }

    #[test]
    fn test_pagination_is_stable_on_ties() {
        let (store, module_id) = deals_store();
        let ids = seed_amounts(&store, module_id, &[100.0, 100.0, 100.0, 100.0]);

        let mut seen = Vec::new();
        for page in 1..=2 {
            let result = store
                .find_all(module_id, &[], &[SortKey::asc("amount")], page, 2)
                .unwrap();
            seen.extend(result.data.iter().map(|r| r.id));
        }
        assert_eq!(seen, ids);
    }

    #[test]
    fn test_count_and_metrics() {
        let (store, module_id) = deals_store();
        seed_amounts(&store, module_id, &[100.0, 200.0, 300.0]);

        assert_eq!(store.count(module_id, &[]).unwrap(), 3);
        assert_eq!(
            store
                .count(module_id, &[FieldPredicate::greater_than("amount", 150.0)])
                .unwrap(),
            2
        );

        let sum = store
            .calculate_metric(module_id, "amount", Aggregation::Sum, &[])
            .unwrap();
        assert_eq!(sum, 600.0);
        let avg = store
            .calculate_metric(module_id, "amount", Aggregation::Avg, &[])
            .unwrap();
        assert_eq!(avg, 200.0);
        let max = store
            .calculate_metric(module_id, "amount", Aggregation::Max, &[])
            .unwrap();
        assert_eq!(max, 300.0);

        // Empty input: min comes back 0 rather than an infinity.
        let none = store
            .calculate_metric(
                module_id,
                "amount",
                Aggregation::Min,
                &[FieldPredicate::greater_than("amount", 1000.0)],
            )
            .unwrap();
        assert_eq!(none, 0.0);

        let unknown =
            store.calculate_metric(module_id, "ghost", Aggregation::Sum, &[]);
        assert!(matches!(unknown, Err(CoreError::Validation(_))));
    }

    #[test]
    fn test_count_distinct_folds_case() {
        let (store, module_id) = deals_store();
        for name in ["Acme", "ACME", "Globex"] {
            let mut data = BTreeMap::new();
            data.insert("name".to_string(), FieldValue::from(name));
            store.create_record(module_id, data, None).unwrap();
        }
        let distinct = store
            .calculate_metric(module_id, "name", Aggregation::CountDistinct, &[])
            .unwrap();
        assert_eq!(distinct, 2.0);
    }

    #[test]
    fn test_search_defaults_to_searchable_fields() {
        let (store, module_id) = deals_store();
        let mut data = BTreeMap::new();
        data.insert("name".to_string(), FieldValue::from("Acme renewal"));
        data.insert("amount".to_string(), FieldValue::Number(100.0));
        store.create_record(module_id, data, None).unwrap();

        let hits = store
            .search_records(module_id, "acme", None, 1, 10)
            .unwrap();
        assert_eq!(hits.total, 1);

        // Amount is not searchable, so narrowing to it matches nothing.
        let none = store
            .search_records(module_id, "100", Some(vec!["amount".to_string()]), 1, 10)
            .unwrap();
        assert_eq!(none.total, 0);
    }

    #[test]
    fn test_find_by_period_filters_creator() {
        let (store, module_id) = deals_store();
        let mine = store
            .create_record(module_id, BTreeMap::new(), Some(1))
            .unwrap();
        store
            .create_record(module_id, BTreeMap::new(), Some(2))
            .unwrap();

        let today = chrono::Utc::now().date_naive();
        let rows = store
            .find_by_period(module_id, Some(today), Some(today), Some(1))
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, mine.id);

        let none = store
            .find_by_period(
                module_id,
                Some(today.succ_opt().unwrap()),
                None,
                None,
            )
            .unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn test_find_matching_records() {
        let (store, module_id) = deals_store();
        let seed = |name: &str| {
            let mut data = BTreeMap::new();
            data.insert("name".to_string(), FieldValue::from(name));
            store.create_record(module_id, data, None).unwrap()
        };
        let acme = seed("Acme Corp");
        let acme_inc = seed("ACME");
        seed("Globex");

        let fuzzy = store
            .find_matching_records(
                module_id,
                Some(acme.id),
                "name",
                &FieldValue::from("acme"),
                MatchType::Fuzzy,
            )
            .unwrap();
        assert_eq!(fuzzy.len(), 1);
        assert_eq!(fuzzy[0].id, acme_inc.id);

        // Empty probes match nothing at all.
        let empty = store
            .find_matching_records(module_id, None, "name", &FieldValue::Null, MatchType::Exact)
            .unwrap();
        assert!(empty.is_empty());
    }
}
