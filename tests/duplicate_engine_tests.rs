//! Duplicate detection end to end: rules, save-time checks, and the
//! module scan that persists candidate pairs.

mod common;

use common::TestFixture;
use recordbase::{
    CancelFlag, CandidateStatus, CoreError, FieldValue, MatchType, NewDuplicateRule, RuleAction,
    RuleCondition, ScanOptions,
};

fn email_rule(module_id: u64) -> NewDuplicateRule {
    NewDuplicateRule::new(
        module_id,
        "Same email",
        RuleAction::Warn,
        vec![RuleCondition::new("email", MatchType::Exact, 1.0)],
    )
}

#[test]
fn test_scan_creates_normalized_pending_pairs_once() {
    let f = TestFixture::new();
    let module_id = f.contacts_module();
    let engine = &f.db.duplicates;
    engine.create_rule(email_rule(module_id)).unwrap();

    let a = f.record(module_id, &[("email", FieldValue::from("kim@acme.com"))]);
    let b = f.record(module_id, &[("email", FieldValue::from("KIM@acme.com"))]);
    f.record(module_id, &[("email", FieldValue::from("lee@acme.com"))]);

    let report = engine.run_scan(module_id, ScanOptions::default()).unwrap();
    assert_eq!(report.scanned, 3);
    assert_eq!(report.candidates_created, 1);
    assert!(report.completed);

    let found = engine.candidates_for_record(a).unwrap();
    assert_eq!(found.len(), 1);
    let candidate = &found[0];
    assert_eq!(candidate.status, CandidateStatus::Pending);
    assert_eq!(candidate.match_score, 1.0);
    assert_eq!((candidate.record_id_a, candidate.record_id_b), (a, b));
    assert!(candidate.record_id_a < candidate.record_id_b);
    assert_eq!(candidate.matched_fields, vec!["email".to_string()]);

    // A second pass finds the same pair and leaves it alone.
    let again = engine.run_scan(module_id, ScanOptions::default()).unwrap();
    assert_eq!(again.candidates_created, 0);
    assert!(again.completed);
    assert_eq!(engine.candidates_for_record(a).unwrap().len(), 1);
}

#[test]
fn test_dismissed_pairs_never_resurrect() {
    let f = TestFixture::new();
    let module_id = f.contacts_module();
    let engine = &f.db.duplicates;
    engine.create_rule(email_rule(module_id)).unwrap();
    let a = f.record(module_id, &[("email", FieldValue::from("kim@acme.com"))]);
    f.record(module_id, &[("email", FieldValue::from("kim@acme.com"))]);
    engine.run_scan(module_id, ScanOptions::default()).unwrap();

    let candidate = engine.candidates_for_record(a).unwrap().remove(0);
    let dismissed = engine
        .dismiss_candidate(candidate.id, Some(9), Some("same family, different people".into()))
        .unwrap();
    assert_eq!(dismissed.status, CandidateStatus::Dismissed);
    assert_eq!(dismissed.reviewed_by, Some(9));
    assert!(dismissed.reviewed_at.is_some());

    // Scans skip pairs that already have a row in any status.
    let rescan = engine.run_scan(module_id, ScanOptions::default()).unwrap();
    assert_eq!(rescan.candidates_created, 0);
    let still = engine.candidates_for_record(a).unwrap();
    assert_eq!(still.len(), 1);
    assert_eq!(still[0].status, CandidateStatus::Dismissed);

    // Dismissal is terminal.
    let twice = engine.dismiss_candidate(candidate.id, Some(9), None);
    assert!(matches!(twice, Err(CoreError::Conflict(_))));
}

#[test]
fn test_check_for_duplicates_is_read_only() {
    let f = TestFixture::new();
    let module_id = f.contacts_module();
    let engine = &f.db.duplicates;
    engine
        .create_rule(NewDuplicateRule::new(
            module_id,
            "Same email",
            RuleAction::Block,
            vec![RuleCondition::new("email", MatchType::Exact, 1.0)],
        ))
        .unwrap();
    let existing = f.record(module_id, &[("email", FieldValue::from("kim@acme.com"))]);

    let incoming = common::data(&[("email", FieldValue::from("kim@acme.com"))]);
    let matches = engine
        .check_for_duplicates(module_id, &incoming, None)
        .unwrap();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].record.id, existing);
    assert_eq!(matches[0].match_score, 1.0);
    assert_eq!(matches[0].action, RuleAction::Block);
    assert_eq!(matches[0].matched_fields, vec!["email".to_string()]);

    // Excluding the record under edit hides its own row.
    let on_update = engine
        .check_for_duplicates(module_id, &incoming, Some(existing))
        .unwrap();
    assert!(on_update.is_empty());

    // The check persists nothing.
    assert!(engine
        .candidates_for_record(existing)
        .unwrap()
        .is_empty());
}

#[test]
fn test_scan_stops_on_limit_and_cancellation() {
    let f = TestFixture::new();
    let module_id = f.contacts_module();
    let engine = &f.db.duplicates;
    engine.create_rule(email_rule(module_id)).unwrap();
    for _ in 0..3 {
        f.record(module_id, &[("email", FieldValue::from("kim@acme.com"))]);
    }

    // Three records sharing an email make three pairs; the limit keeps one.
    let limited = engine
        .run_scan(
            module_id,
            ScanOptions {
                limit: Some(1),
                ..ScanOptions::default()
            },
        )
        .unwrap();
    assert_eq!(limited.candidates_created, 1);
    assert!(!limited.completed);

    // A flag cancelled before the walk starts stops the scan cold.
    let cancel = CancelFlag::new();
    cancel.cancel();
    let cancelled = engine
        .run_scan(
            module_id,
            ScanOptions {
                limit: None,
                cancel,
            },
        )
        .unwrap();
    assert_eq!(cancelled.scanned, 0);
    assert_eq!(cancelled.candidates_created, 0);
    assert!(!cancelled.completed);

    // An unhindered pass picks up the remaining pairs.
    let rest = engine.run_scan(module_id, ScanOptions::default()).unwrap();
    assert_eq!(rest.candidates_created, 2);
    assert!(rest.completed);
}

#[test]
fn test_fuzzy_conditions_grade_near_matches() {
    let f = TestFixture::new();
    let module_id = f.contacts_module();
    let engine = &f.db.duplicates;
    engine
        .create_rule(NewDuplicateRule::new(
            module_id,
            "Similar company",
            RuleAction::Warn,
            vec![RuleCondition::new("company", MatchType::Fuzzy, 1.0)],
        ))
        .unwrap();

    let a = f.record(module_id, &[("company", FieldValue::from("Acme Corp"))]);
    let b = f.record(module_id, &[("company", FieldValue::from("Acme Corp."))]);
    f.record(module_id, &[("company", FieldValue::from("Globex"))]);

    let report = engine.run_scan(module_id, ScanOptions::default()).unwrap();
    assert_eq!(report.candidates_created, 1);

    let candidate = engine.candidates_for_record(a).unwrap().remove(0);
    assert_eq!((candidate.record_id_a, candidate.record_id_b), (a, b));
    // One edit across ten characters.
    assert!((candidate.match_score - 0.9).abs() < 1e-9);
}

#[test]
fn test_rule_score_weights_conditions_with_both_sides_present() {
    let f = TestFixture::new();
    let module_id = f.contacts_module();
    let engine = &f.db.duplicates;
    engine
        .create_rule(NewDuplicateRule::new(
            module_id,
            "Email plus company",
            RuleAction::Warn,
            vec![
                RuleCondition::new("email", MatchType::Exact, 3.0),
                RuleCondition::new("company", MatchType::Fuzzy, 1.0),
                RuleCondition::new("phone", MatchType::Exact, 2.0),
            ],
        ))
        .unwrap();

    // Phone is empty on one side, so its weight drops out instead of
    // dragging the score down.
    let a = f.record(
        module_id,
        &[
            ("email", FieldValue::from("kim@acme.com")),
            ("company", FieldValue::from("Acme Corp")),
            ("phone", FieldValue::from("555-0100")),
        ],
    );
    f.record(
        module_id,
        &[
            ("email", FieldValue::from("kim@acme.com")),
            ("company", FieldValue::from("Acme Corp.")),
        ],
    );

    engine.run_scan(module_id, ScanOptions::default()).unwrap();
    let candidate = engine.candidates_for_record(a).unwrap().remove(0);
    // (3.0 * 1.0 + 1.0 * 0.9) / 4.0
    assert!((candidate.match_score - 0.975).abs() < 1e-9);
    assert_eq!(
        candidate.matched_fields,
        vec!["email".to_string(), "company".to_string()]
    );
}
