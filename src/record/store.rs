//! Record persistence and write-path validation.

use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{CoreError, CoreResult};
use crate::record::types::ModuleRecord;
use crate::record::value::FieldValue;
use crate::schema::types::Field;
use crate::schema::SchemaRegistry;
use crate::storage::{record_key, Storage};

/// Stores and queries the rows of every module. Writes validate against
/// the owning module's field declarations; reads take stored data as it
/// is, unknown keys included.
#[derive(Clone)]
pub struct RecordStore {
    pub(crate) storage: Arc<Storage>,
    pub(crate) schema: SchemaRegistry,
}

impl RecordStore {
    pub fn new(storage: Arc<Storage>) -> Self {
        let schema = SchemaRegistry::new(Arc::clone(&storage));
        Self { storage, schema }
    }

    // ========== WRITE OPERATIONS ==========

    /// Creates a record. Absent fields with a default receive it before
    /// validation runs.
    pub fn create_record(
        &self,
        module_id: u64,
        mut data: BTreeMap<String, FieldValue>,
        created_by: Option<u64>,
    ) -> CoreResult<ModuleRecord> {
        let fields = self.writable_fields(module_id)?;
        apply_defaults(&fields, &mut data);
        self.validate_data(module_id, &fields, &data, None)?;

        let now = Utc::now();
        let record = ModuleRecord {
            id: self.storage.next_id()?,
            module_id,
            data,
            created_by,
            updated_by: created_by,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        self.storage.put(
            &self.storage.records,
            &record_key(module_id, record.id),
            &record,
        )?;
        Ok(record)
    }

    /// Replaces a record's attribute map wholesale. Defaults do not
    /// re-apply; an update that blanks a defaulted field means it.
    pub fn update_record(
        &self,
        module_id: u64,
        record_id: u64,
        data: BTreeMap<String, FieldValue>,
        updated_by: Option<u64>,
    ) -> CoreResult<ModuleRecord> {
        let fields = self.writable_fields(module_id)?;
        let mut record = self.find_by_id(module_id, record_id)?;
        self.validate_data(module_id, &fields, &data, Some(record_id))?;

        record.data = data;
        record.updated_by = updated_by;
        record.updated_at = Utc::now();
        self.storage.put(
            &self.storage.records,
            &record_key(module_id, record.id),
            &record,
        )?;
        Ok(record)
    }

    /// Merges the given keys into the record's attribute map; untouched
    /// keys survive. Patching a key to null clears it.
    pub fn patch_record(
        &self,
        module_id: u64,
        record_id: u64,
        changes: BTreeMap<String, FieldValue>,
        updated_by: Option<u64>,
    ) -> CoreResult<ModuleRecord> {
        let fields = self.writable_fields(module_id)?;
        let mut record = self.find_by_id(module_id, record_id)?;
        let mut data = record.data.clone();
        for (key, value) in changes {
            if matches!(value, FieldValue::Null) {
                data.remove(&key);
            } else {
                data.insert(key, value);
            }
        }
        self.validate_data(module_id, &fields, &data, Some(record_id))?;

        record.data = data;
        record.updated_by = updated_by;
        record.updated_at = Utc::now();
        self.storage.put(
            &self.storage.records,
            &record_key(module_id, record.id),
            &record,
        )?;
        Ok(record)
    }

    /// Soft delete. The row stays on disk and keeps its id.
    pub fn delete_record(&self, module_id: u64, record_id: u64) -> CoreResult<()> {
        let mut record = self.find_by_id(module_id, record_id)?;
        let now = Utc::now();
        record.deleted_at = Some(now);
        record.updated_at = now;
        self.storage.put(
            &self.storage.records,
            &record_key(module_id, record.id),
            &record,
        )?;
        Ok(())
    }

    /// Soft deletes every listed record, skipping ids that are missing or
    /// already deleted. Returns how many rows this call deleted.
    pub fn bulk_delete(&self, module_id: u64, record_ids: &[u64]) -> CoreResult<usize> {
        let mut deleted = 0;
        for &record_id in record_ids {
            match self.delete_record(module_id, record_id) {
                Ok(()) => deleted += 1,
                Err(CoreError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(deleted)
    }

    // ========== POINT READS ==========

    pub fn find_by_id(&self, module_id: u64, record_id: u64) -> CoreResult<ModuleRecord> {
        let record: Option<ModuleRecord> = self
            .storage
            .get(&self.storage.records, &record_key(module_id, record_id))?;
        match record {
            Some(record) if !record.is_deleted() => Ok(record),
            _ => Err(CoreError::not_found("record", record_id)),
        }
    }

    pub fn exists(&self, module_id: u64, record_id: u64) -> CoreResult<bool> {
        match self.find_by_id(module_id, record_id) {
            Ok(_) => Ok(true),
            Err(CoreError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Live records for the given ids, ascending by id, duplicates
    /// collapsed. Missing and deleted ids are skipped.
    pub fn find_by_ids(&self, module_id: u64, record_ids: &[u64]) -> CoreResult<Vec<ModuleRecord>> {
        let mut found: BTreeMap<u64, ModuleRecord> = BTreeMap::new();
        for &record_id in record_ids {
            if found.contains_key(&record_id) {
                continue;
            }
            let record: Option<ModuleRecord> = self
                .storage
                .get(&self.storage.records, &record_key(module_id, record_id))?;
            if let Some(record) = record {
                if !record.is_deleted() {
                    found.insert(record.id, record);
                }
            }
        }
        Ok(found.into_values().collect())
    }

    // ========== VALIDATION ==========

    /// The module's fields, after checking the module takes writes.
    fn writable_fields(&self, module_id: u64) -> CoreResult<Vec<Field>> {
        let module = self.schema.get_module(module_id)?;
        if !module.accepts_writes() {
            return Err(CoreError::validation(format!(
                "module '{}' is inactive and does not accept record writes",
                module.api_name
            )));
        }
        self.schema.fields_for_module(module_id)
    }

    /// Checks an attribute map against the module's field declarations.
    /// All violations are collected into one error so the caller sees the
    /// full list, not the first complaint.
    fn validate_data(
        &self,
        module_id: u64,
        fields: &[Field],
        data: &BTreeMap<String, FieldValue>,
        exclude_record: Option<u64>,
    ) -> CoreResult<()> {
        let mut problems: Vec<String> = Vec::new();
        for field in fields {
            let value = match data.get(&field.api_name) {
                Some(v) if !v.is_empty() => v,
                _ => {
                    if field.is_required {
                        problems.push(format!("'{}' is required", field.api_name));
                    }
                    continue;
                }
            };
            if let Err(reason) = field.field_type.check_value(value) {
                problems.push(format!("'{}': {}", field.api_name, reason));
                continue;
            }
            for rule in &field.validation_rules {
                if let Err(reason) = rule.check(value) {
                    problems.push(format!("'{}': {}", field.api_name, reason));
                }
            }
            if field.is_unique {
                if let Some(taken_by) =
                    self.unique_holder(module_id, &field.api_name, value, exclude_record)?
                {
                    problems.push(format!(
                        "'{}' must be unique; record {} already holds this value",
                        field.api_name, taken_by
                    ));
                }
            }
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(CoreError::Validation(problems.join("; ")))
        }
    }

    /// Id of the live record already holding `value` for `api_name`, if
    /// any. Comparison is on the case-folded text form.
    fn unique_holder(
        &self,
        module_id: u64,
        api_name: &str,
        value: &FieldValue,
        exclude_record: Option<u64>,
    ) -> CoreResult<Option<u64>> {
        let probe = match value.fold_text() {
            Some(probe) => probe,
            None => return Ok(None),
        };
        for row in self.iter_live(module_id) {
            let row = row?;
            if Some(row.id) == exclude_record {
                continue;
            }
            if row.data.get(api_name).and_then(FieldValue::fold_text).as_deref()
                == Some(probe.as_str())
            {
                return Ok(Some(row.id));
            }
        }
        Ok(None)
    }
}

fn apply_defaults(fields: &[Field], data: &mut BTreeMap<String, FieldValue>) {
    for field in fields {
        if let Some(default) = &field.default_value {
            if !default.is_empty() {
                data.entry(field.api_name.clone())
                    .or_insert_with(|| default.clone());
            }
        }
    }
}
