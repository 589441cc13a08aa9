// tests/reconcile.rs

use std::time::{Duration, SystemTime};

use pipeguard::engine::Reconciliation;
use pipeguard::marker::{MarkerStore, PROCESSING_MARKER};
use pipeguard::stages::RunOutcome;
use pipeguard::storage::Storage;
use pipeguard::types::{OrphanPolicy, StageKind};
use pipeguard_test_utils::builders::{Harness, upload};
use pipeguard_test_utils::init_tracing;
use pipeguard_test_utils::stages::{ExecutionLog, succeeding_stages};
use uuid::Uuid;

#[test]
fn clean_start_needs_no_recovery() {
    init_tracing();
    let h = Harness::new();
    let orch = h.orchestrator(succeeding_stages(&ExecutionLog::new()));

    assert_eq!(
        orch.reconcile(OrphanPolicy::Clear).unwrap(),
        Reconciliation::Clean
    );
}

#[test]
fn clear_policy_records_interrupted_run_and_reopens_admission() {
    init_tracing();
    let h = Harness::new();
    let signal = h.leave_orphaned_run();
    let stale_scratch = h.scratch_path(Uuid::new_v4(), "etl/part-0");
    h.fs.add_file(&stale_scratch, "half written");
    let orch = h.orchestrator(succeeding_stages(&ExecutionLog::new()));

    let outcome = orch.reconcile(OrphanPolicy::Clear).unwrap();

    let Reconciliation::Cleared { run } = outcome else {
        panic!("expected the orphan to be cleared, got {outcome:?}");
    };
    assert_eq!(run.outcome, RunOutcome::Interrupted);
    assert_eq!(run.submission_id, signal.submission_id);
    assert_eq!(h.journal.last().unwrap().unwrap(), run);
    assert!(!h.marker_present());
    assert!(!h.trigger_present());
    assert!(!h.fs.contains(&stale_scratch));

    h.gate()
        .submit(vec![upload("Sales Transaction List.csv")])
        .expect("admission reopens after reconciliation");
}

#[tokio::test]
async fn resume_policy_reruns_the_pipeline_from_the_first_stage() {
    init_tracing();
    let h = Harness::new();
    let signal = h.leave_orphaned_run();
    let log = ExecutionLog::new();
    let orch = h.orchestrator(succeeding_stages(&log));

    let outcome = orch.reconcile(OrphanPolicy::Resume).unwrap();

    assert_eq!(
        outcome,
        Reconciliation::Resumed {
            submission_id: signal.submission_id
        }
    );
    assert!(h.marker_present());
    assert!(h.trigger_present());

    let run = orch.run_if_triggered().await.unwrap().unwrap();
    assert!(run.succeeded());
    assert_eq!(log.stages()[0], StageKind::Etl);
    assert_eq!(run.submission_id, signal.submission_id);
    assert!(!h.marker_present());
}

#[test]
fn marker_without_trigger_is_cleared_under_either_policy() {
    init_tracing();
    for policy in [OrphanPolicy::Clear, OrphanPolicy::Resume] {
        let h = Harness::new();
        h.markers.put(PROCESSING_MARKER, "stuck").unwrap();
        let orch = h.orchestrator(succeeding_stages(&ExecutionLog::new()));

        assert_eq!(
            orch.reconcile(policy).unwrap(),
            Reconciliation::ClearedStaleMarker
        );
        assert!(!h.marker_present());
    }
}

#[test]
fn recent_marker_without_trigger_is_left_for_the_admission_in_flight() {
    init_tracing();
    let h = Harness::new();
    h.markers.put(PROCESSING_MARKER, "just accepted").unwrap();
    let orch = h
        .orchestrator(succeeding_stages(&ExecutionLog::new()))
        .with_marker_grace(Duration::from_secs(60));

    assert_eq!(
        orch.reconcile(OrphanPolicy::Clear).unwrap(),
        Reconciliation::KeptFreshMarker
    );
    assert!(h.marker_present());

    h.fs.set_modified(
        "/state/markers/_complete",
        SystemTime::now() - Duration::from_secs(120),
    );
    assert_eq!(
        orch.reconcile(OrphanPolicy::Clear).unwrap(),
        Reconciliation::ClearedStaleMarker
    );
    assert!(!h.marker_present());
}

#[test]
fn reconcile_refuses_while_a_run_holds_the_lock() {
    init_tracing();
    let h = Harness::new();
    h.leave_orphaned_run();
    let orch = h.orchestrator(succeeding_stages(&ExecutionLog::new()));

    let _active = orch.try_begin().unwrap();

    assert!(orch.reconcile(OrphanPolicy::Clear).is_err());
}

#[test]
fn scratch_purge_is_idempotent() {
    let h = Harness::new();
    h.storage.purge_scratch().unwrap();
    h.storage.purge_scratch().unwrap();
}
