//! Shared fixtures for the end-to-end suites.

#![allow(dead_code)]

use recordbase::schema::types::{FieldType, NewField, NewModule};
use recordbase::{FieldValue, Recordbase};
use std::collections::BTreeMap;
use tempfile::TempDir;

/// One temporary database with every service wired, plus builders for
/// the module shapes the suites lean on.
pub struct TestFixture {
    pub db: Recordbase,
    pub _temp_dir: TempDir,
}

impl TestFixture {
    pub fn new() -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let temp_dir = tempfile::tempdir().expect("create temp directory");
        let db = Recordbase::open(temp_dir.path().join("db")).expect("open database");
        Self {
            db,
            _temp_dir: temp_dir,
        }
    }

    /// A contacts module with the usual identity fields.
    pub fn contacts_module(&self) -> u64 {
        let module = self
            .db
            .schema
            .create_module(NewModule {
                name: "Contacts".to_string(),
                singular_name: "Contact".to_string(),
                ..NewModule::default()
            })
            .expect("create contacts module");
        for (label, field_type) in [
            ("Email", FieldType::Email),
            ("Phone", FieldType::Phone),
            ("First Name", FieldType::Text),
            ("Last Name", FieldType::Text),
            ("Company", FieldType::Text),
        ] {
            self.db
                .schema
                .create_field(NewField::new(module.id, label, field_type))
                .expect("create contacts field");
        }
        module.id
    }

    /// A deals module with a numeric amount and a close date.
    pub fn deals_module(&self) -> u64 {
        let module = self
            .db
            .schema
            .create_module(NewModule {
                name: "Deals".to_string(),
                singular_name: "Deal".to_string(),
                ..NewModule::default()
            })
            .expect("create deals module");
        for (label, field_type) in [
            ("Name", FieldType::Text),
            ("Amount", FieldType::Number),
            ("Close Date", FieldType::Date),
        ] {
            self.db
                .schema
                .create_field(NewField::new(module.id, label, field_type))
                .expect("create deals field");
        }
        module.id
    }

    pub fn record(&self, module_id: u64, pairs: &[(&str, FieldValue)]) -> u64 {
        self.db
            .records
            .create_record(module_id, data(pairs), Some(1))
            .expect("create record")
            .id
    }
}

pub fn data(pairs: &[(&str, FieldValue)]) -> BTreeMap<String, FieldValue> {
    pairs
        .iter()
        .map(|(key, value)| (key.to_string(), value.clone()))
        .collect()
}
