// tests/admission_gate.rs

use std::sync::Arc;

use pipeguard::admission::{AdmissionError, StatusState};
use pipeguard::marker::{MarkerStore, PROCESSING_MARKER};
use pipeguard::trigger::TriggerSlot;
use pipeguard_test_utils::builders::{
    Harness, PRODUCTS_FOLDER, TRANSACTIONS_FOLDER, UnavailableMarkerStore, upload,
};
use pipeguard_test_utils::init_tracing;

#[test]
fn accepted_submission_writes_marker_and_trigger() {
    init_tracing();
    let h = Harness::new();
    let gate = h.gate();

    let acceptance = gate
        .submit(vec![
            upload("Sales Transaction List 2024-05.csv"),
            upload("Sales Report by Product 2024-05.xlsx"),
        ])
        .unwrap();

    assert_eq!(acceptance.accepted.len(), 2);
    assert!(acceptance.skipped.is_empty());
    assert!(h.marker_present());
    assert!(h.trigger_present());

    let signal = h.slot.peek().unwrap().unwrap();
    assert_eq!(signal.submission_id, acceptance.submission_id);
    assert_eq!(
        signal.items,
        vec![
            format!("{TRANSACTIONS_FOLDER}/Sales Transaction List 2024-05.csv"),
            format!("{PRODUCTS_FOLDER}/Sales Report by Product 2024-05.xlsx"),
        ]
    );

    let status = h.status().status();
    assert!(status.is_processing);
    assert_eq!(status.status, StatusState::Processing);
}

#[test]
fn submission_while_marker_present_is_rejected_without_side_effects() {
    init_tracing();
    let h = Harness::new();
    let gate = h.gate();
    gate.submit(vec![upload("Sales Transaction List a.csv")]).unwrap();
    let first_signal = h.slot.peek().unwrap().unwrap();
    let marker_before = h.markers.read(PROCESSING_MARKER).unwrap();

    let err = gate
        .submit(vec![upload("Sales Transaction List b.csv")])
        .unwrap_err();

    match err {
        AdmissionError::Conflict { retry_hint, .. } => {
            assert!(retry_hint.contains("typically 2-5 minutes"));
        }
        other => panic!("expected conflict, got {other:?}"),
    }
    assert_eq!(h.slot.peek().unwrap().unwrap(), first_signal);
    assert_eq!(h.markers.read(PROCESSING_MARKER).unwrap(), marker_before);
    assert!(!h.fs.contains(format!(
        "/data/landing/{TRANSACTIONS_FOLDER}/Sales Transaction List b.csv"
    )));
}

#[test]
fn unreadable_marker_store_fails_closed() {
    init_tracing();
    let h = Harness::new();
    let gate = h.gate_with_markers(Arc::new(UnavailableMarkerStore));

    let err = gate
        .submit(vec![upload("Sales Transaction List a.csv")])
        .unwrap_err();

    assert!(matches!(err, AdmissionError::MarkerStoreUnavailable(_)));
    assert!(!h.trigger_present());
    assert!(!h.fs.contains(format!(
        "/data/landing/{TRANSACTIONS_FOLDER}/Sales Transaction List a.csv"
    )));
}

#[test]
fn status_fails_open_when_marker_store_is_down() {
    init_tracing();
    let h = Harness::new();
    h.gate().submit(vec![upload("Sales Transaction List a.csv")]).unwrap();

    h.fs.set_unavailable(true);
    let status = h.status().status();

    assert!(!status.is_processing);
    assert_eq!(status.status, StatusState::Unknown);
}

#[test]
fn submission_without_routable_files_changes_nothing() {
    init_tracing();
    let h = Harness::new();

    let err = h
        .gate()
        .submit(vec![upload("holiday photos.csv"), upload("")])
        .unwrap_err();

    let AdmissionError::NothingAccepted { skipped } = err else {
        panic!("expected NothingAccepted");
    };
    assert_eq!(skipped.len(), 2);
    assert!(!h.marker_present());
    assert!(!h.trigger_present());
}

#[test]
fn unroutable_files_are_reported_but_do_not_block_the_rest() {
    init_tracing();
    let h = Harness::new();

    let acceptance = h
        .gate()
        .submit(vec![
            upload("notes.csv"),
            upload("Sales Report by Product.csv"),
        ])
        .unwrap();

    assert_eq!(acceptance.accepted_keys(), vec![format!(
        "{PRODUCTS_FOLDER}/Sales Report by Product.csv"
    )]);
    assert_eq!(acceptance.skipped[0].filename, "notes.csv");
}

#[test]
fn clearing_absent_marker_and_trigger_is_a_no_op() {
    let h = Harness::new();

    h.markers.delete(PROCESSING_MARKER).unwrap();
    h.slot.clear().unwrap();
    h.markers.delete(PROCESSING_MARKER).unwrap();
    h.slot.clear().unwrap();

    assert!(!h.marker_present());
    assert!(!h.trigger_present());
}
