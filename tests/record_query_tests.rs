//! Record write paths and the read side: filters, sorting, pagination,
//! aggregation, period windows, and text search.

mod common;

use chrono::{Duration, Utc};
use common::TestFixture;
use recordbase::schema::types::{FieldType, NewField, NewModule, ValidationRule};
use recordbase::{Aggregation, CoreError, FieldPredicate, FieldValue, SortKey};

#[test]
fn test_record_crud_round_trip() {
    let f = TestFixture::new();
    let module_id = f.deals_module();
    let records = &f.db.records;

    let deal = records
        .create_record(
            module_id,
            common::data(&[
                ("name", FieldValue::from("Acme renewal")),
                ("amount", FieldValue::from(1200.0)),
                ("close_date", FieldValue::from("2026-03-01")),
            ]),
            Some(7),
        )
        .unwrap();
    assert_eq!(deal.created_by, Some(7));
    assert_eq!(deal.updated_by, Some(7));
    assert!(records.exists(module_id, deal.id).unwrap());

    // Both problems surface in one validation error.
    let broken = records.create_record(
        module_id,
        common::data(&[
            ("amount", FieldValue::from("lots")),
            ("close_date", FieldValue::from("soon")),
        ]),
        None,
    );
    match broken {
        Err(CoreError::Validation(message)) => {
            assert!(message.contains("amount"), "missing amount: {message}");
            assert!(message.contains("close_date"), "missing close_date: {message}");
        }
        other => panic!("expected a validation error, got {other:?}"),
    }

    // Patch merges changes; an explicit null clears the key.
    let patched = records
        .patch_record(
            module_id,
            deal.id,
            common::data(&[
                ("amount", FieldValue::from(1500.0)),
                ("close_date", FieldValue::Null),
            ]),
            Some(8),
        )
        .unwrap();
    assert_eq!(patched.data["name"], FieldValue::from("Acme renewal"));
    assert_eq!(patched.data["amount"], FieldValue::from(1500.0));
    assert!(!patched.data.contains_key("close_date"));
    assert_eq!(patched.created_by, Some(7));
    assert_eq!(patched.updated_by, Some(8));

    // Update replaces the attribute map wholesale.
    let replaced = records
        .update_record(
            module_id,
            deal.id,
            common::data(&[("name", FieldValue::from("Acme renewal Q2"))]),
            None,
        )
        .unwrap();
    assert!(!replaced.data.contains_key("amount"));

    // Keys with no field declaration are kept as stored.
    let kept = records
        .patch_record(
            module_id,
            deal.id,
            common::data(&[("legacy_code", FieldValue::from("X-17"))]),
            None,
        )
        .unwrap();
    assert_eq!(kept.data["legacy_code"], FieldValue::from("X-17"));

    // Soft delete hides the row from every read path.
    records.delete_record(module_id, deal.id).unwrap();
    assert!(matches!(
        records.find_by_id(module_id, deal.id),
        Err(CoreError::NotFound(_))
    ));
    assert!(!records.exists(module_id, deal.id).unwrap());
    assert_eq!(records.count(module_id, &[]).unwrap(), 0);

    // Bulk delete reports only the rows it actually removed.
    let a = f.record(module_id, &[("name", FieldValue::from("A"))]);
    let b = f.record(module_id, &[("name", FieldValue::from("B"))]);
    let removed = records
        .bulk_delete(module_id, &[a, b, deal.id, 424_242])
        .unwrap();
    assert_eq!(removed, 2);

    // find_by_ids skips misses and returns ascending ids.
    let c = f.record(module_id, &[("name", FieldValue::from("C"))]);
    let d = f.record(module_id, &[("name", FieldValue::from("D"))]);
    let found = records.find_by_ids(module_id, &[d, 999_999, c, d]).unwrap();
    let ids: Vec<u64> = found.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![c, d]);
}

#[test]
fn test_filter_sort_pagination_envelope() {
    let f = TestFixture::new();
    let module_id = f.deals_module();
    let records = &f.db.records;
    for (name, amount) in [
        ("a", 50.0),
        ("b", 150.0),
        ("c", 300.0),
        ("d", 450.0),
        ("e", 600.0),
    ] {
        f.record(
            module_id,
            &[
                ("name", FieldValue::from(name)),
                ("amount", FieldValue::from(amount)),
            ],
        );
    }

    let filters = vec![FieldPredicate::between("amount", 100.0, 500.0)];
    let sorts = vec![SortKey::desc("amount")];

    let page = records.find_all(module_id, &filters, &sorts, 1, 2).unwrap();
    let amounts: Vec<f64> = page
        .data
        .iter()
        .map(|r| r.data["amount"].as_number().unwrap())
        .collect();
    assert_eq!(amounts, vec![450.0, 300.0]);
    assert_eq!(page.total, 3);
    assert_eq!(page.per_page, 2);
    assert_eq!(page.current_page, 1);
    assert_eq!(page.last_page, 2);

    let tail = records.find_all(module_id, &filters, &sorts, 2, 2).unwrap();
    assert_eq!(tail.data.len(), 1);
    assert_eq!(tail.data[0].data["amount"].as_number(), Some(150.0));

    // Pages past the end are empty but keep the envelope intact.
    let past = records.find_all(module_id, &filters, &sorts, 9, 2).unwrap();
    assert!(past.data.is_empty());
    assert_eq!(past.total, 3);
    assert_eq!(past.last_page, 2);

    // Inverted bounds are refused rather than silently empty.
    let inverted = records.find_all(
        module_id,
        &[FieldPredicate::between("amount", 500.0, 100.0)],
        &[],
        1,
        10,
    );
    assert!(matches!(inverted, Err(CoreError::Validation(_))));
}

#[test]
fn test_equal_sort_keys_paginate_without_overlap() {
    let f = TestFixture::new();
    let module_id = f.deals_module();
    let records = &f.db.records;
    let ids: Vec<u64> = (0..5)
        .map(|i| {
            f.record(
                module_id,
                &[
                    ("name", FieldValue::from(format!("deal {i}"))),
                    ("amount", FieldValue::from(250.0)),
                ],
            )
        })
        .collect();

    // Every row ties on the sort key, so the id tie break alone decides
    // the order and the page walk must visit each record exactly once.
    let sorts = vec![SortKey::desc("amount")];
    let mut walked = Vec::new();
    for page in 1..=3 {
        let slice = records.find_all(module_id, &[], &sorts, page, 2).unwrap();
        walked.extend(slice.data.iter().map(|r| r.id));
    }
    assert_eq!(walked, ids);
}

#[test]
fn test_metrics_over_filtered_rows() {
    let f = TestFixture::new();
    let module_id = f.deals_module();
    let records = &f.db.records;
    for (name, amount) in [
        ("north", 50.0),
        ("north", 150.0),
        ("east", 300.0),
        ("west", 450.0),
        ("west", 600.0),
    ] {
        f.record(
            module_id,
            &[
                ("name", FieldValue::from(name)),
                ("amount", FieldValue::from(amount)),
            ],
        );
    }

    let metric = |aggregation, field: &str, filters: &[FieldPredicate]| {
        records
            .calculate_metric(module_id, field, aggregation, filters)
            .unwrap()
    };
    assert_eq!(metric(Aggregation::Count, "amount", &[]), 5.0);
    assert_eq!(metric(Aggregation::Sum, "amount", &[]), 1550.0);
    assert_eq!(metric(Aggregation::Avg, "amount", &[]), 310.0);
    assert_eq!(metric(Aggregation::Min, "amount", &[]), 50.0);
    assert_eq!(metric(Aggregation::Max, "amount", &[]), 600.0);
    assert_eq!(metric(Aggregation::CountDistinct, "name", &[]), 3.0);

    let filters = vec![FieldPredicate::greater_than("amount", 400.0)];
    assert_eq!(metric(Aggregation::Sum, "amount", &filters), 1050.0);
    assert_eq!(metric(Aggregation::Count, "amount", &filters), 2.0);

    // Unknown fields are refused rather than counted as zero.
    let unknown = records.calculate_metric(module_id, "ghost", Aggregation::Sum, &[]);
    assert!(matches!(unknown, Err(CoreError::Validation(_))));
}

#[test]
fn test_period_window_is_inclusive_and_filters_by_creator() {
    let f = TestFixture::new();
    let module_id = f.deals_module();
    let records = &f.db.records;
    for i in 0..5 {
        f.record(
            module_id,
            &[("name", FieldValue::from(format!("deal {i}")))],
        );
    }

    let today = Utc::now().date_naive();
    let in_window = records
        .find_by_period(module_id, Some(today - Duration::days(1)), Some(today), None)
        .unwrap();
    assert_eq!(in_window.len(), 5);
    assert!(in_window
        .windows(2)
        .all(|pair| pair[0].created_at >= pair[1].created_at));

    let out_of_window = records
        .find_by_period(
            module_id,
            Some(today - Duration::days(30)),
            Some(today - Duration::days(7)),
            None,
        )
        .unwrap();
    assert!(out_of_window.is_empty());

    // The fixture stamps every record with creator 1.
    let mine = records
        .find_by_period(module_id, None, None, Some(1))
        .unwrap();
    assert_eq!(mine.len(), 5);
    let theirs = records
        .find_by_period(module_id, None, None, Some(999))
        .unwrap();
    assert!(theirs.is_empty());
}

#[test]
fn test_search_targets_searchable_fields_only() {
    let f = TestFixture::new();
    let schema = &f.db.schema;
    let records = &f.db.records;
    let module = schema
        .create_module(NewModule {
            name: "Leads".to_string(),
            singular_name: "Lead".to_string(),
            ..NewModule::default()
        })
        .unwrap();
    schema
        .create_field(NewField::new(module.id, "Name", FieldType::Text).searchable())
        .unwrap();
    schema
        .create_field(NewField::new(module.id, "Email", FieldType::Email).searchable())
        .unwrap();
    schema
        .create_field(NewField::new(module.id, "Internal Note", FieldType::TextArea))
        .unwrap();

    let jane = f.record(
        module.id,
        &[
            ("name", FieldValue::from("Jane Doe")),
            ("email", FieldValue::from("jane@acme.com")),
            ("internal_note", FieldValue::from("pelican account")),
        ],
    );
    f.record(
        module.id,
        &[
            ("name", FieldValue::from("Bob Roe")),
            ("email", FieldValue::from("bob@globex.com")),
        ],
    );

    // Case-insensitive substring across every searchable field.
    let hits = records.search_records(module.id, "ACME", None, 1, 10).unwrap();
    assert_eq!(hits.total, 1);
    assert_eq!(hits.data[0].id, jane);

    // Non-searchable fields stay out of reach even when named.
    assert_eq!(
        records
            .search_records(module.id, "pelican", None, 1, 10)
            .unwrap()
            .total,
        0
    );
    assert_eq!(
        records
            .search_records(
                module.id,
                "pelican",
                Some(vec!["internal_note".to_string()]),
                1,
                10,
            )
            .unwrap()
            .total,
        0
    );

    // A narrowed field list still applies.
    let by_name = records
        .search_records(module.id, "jane", Some(vec!["name".to_string()]), 1, 10)
        .unwrap();
    assert_eq!(by_name.total, 1);

    // Blank terms match nothing.
    assert_eq!(
        records
            .search_records(module.id, "   ", None, 1, 10)
            .unwrap()
            .total,
        0
    );
}

#[test]
fn test_validation_rules_defaults_and_uniqueness() {
    let f = TestFixture::new();
    let schema = &f.db.schema;
    let records = &f.db.records;
    let module = schema
        .create_module(NewModule {
            name: "Accounts".to_string(),
            singular_name: "Account".to_string(),
            ..NewModule::default()
        })
        .unwrap();
    schema
        .create_field(
            NewField::new(module.id, "Email", FieldType::Email)
                .required()
                .unique()
                .with_rules(vec![ValidationRule::Email]),
        )
        .unwrap();
    schema
        .create_field(NewField::new(module.id, "Tier", FieldType::Text).with_default("standard"))
        .unwrap();
    schema
        .create_field(NewField::new(module.id, "Score", FieldType::Number).with_rules(vec![
            ValidationRule::MinValue { value: 0.0 },
            ValidationRule::MaxValue { value: 100.0 },
        ]))
        .unwrap();

    let made = records
        .create_record(
            module.id,
            common::data(&[("email", FieldValue::from("kim@acme.com"))]),
            None,
        )
        .unwrap();
    assert_eq!(made.data["tier"], FieldValue::from("standard"));

    // Required means present and non-empty.
    let missing = records.create_record(module.id, common::data(&[]), None);
    assert!(matches!(missing, Err(CoreError::Validation(_))));
    let blank = records.create_record(
        module.id,
        common::data(&[("email", FieldValue::from("   "))]),
        None,
    );
    assert!(matches!(blank, Err(CoreError::Validation(_))));

    // Uniqueness folds case and skips the record under update.
    let taken = records.create_record(
        module.id,
        common::data(&[("email", FieldValue::from("KIM@acme.com"))]),
        None,
    );
    assert!(matches!(taken, Err(CoreError::Validation(_))));
    assert!(records
        .update_record(
            module.id,
            made.id,
            common::data(&[("email", FieldValue::from("kim@acme.com"))]),
            None,
        )
        .is_ok());

    // Range rules bound the number, format rules check the text.
    let low = records.create_record(
        module.id,
        common::data(&[
            ("email", FieldValue::from("lee@acme.com")),
            ("score", FieldValue::from(-3.0)),
        ]),
        None,
    );
    assert!(matches!(low, Err(CoreError::Validation(_))));
    let bad_mail = records.create_record(
        module.id,
        common::data(&[("email", FieldValue::from("not-an-email"))]),
        None,
    );
    assert!(matches!(bad_mail, Err(CoreError::Validation(_))));
}

#[test]
fn test_inactive_module_rejects_writes_but_reads_fine() {
    let f = TestFixture::new();
    let module_id = f.deals_module();
    let records = &f.db.records;
    let deal = f.record(module_id, &[("name", FieldValue::from("Frozen"))]);

    let toggled = f.db.schema.toggle_module_active(module_id).unwrap();
    assert!(!toggled.is_active);

    let write = records.create_record(
        module_id,
        common::data(&[("name", FieldValue::from("New"))]),
        None,
    );
    assert!(matches!(write, Err(CoreError::Validation(_))));
    let patch = records.patch_record(
        module_id,
        deal,
        common::data(&[("name", FieldValue::from("Renamed"))]),
        None,
    );
    assert!(matches!(patch, Err(CoreError::Validation(_))));

    // Reads keep working against the frozen data.
    assert_eq!(records.find_by_id(module_id, deal).unwrap().id, deal);
    assert_eq!(records.count(module_id, &[]).unwrap(), 1);
}
