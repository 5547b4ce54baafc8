//! End-to-end tests of the harness against real stub service processes.

#![cfg(unix)]

mod common;

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;
use std::time::Duration;

use common::fixtures::{CANCELED_BUILD, FAILED_BUILD, SUCCEEDED_BUILD};
use common::{StubCluster, init_test_logging};
use cr_harness::{
    ClusterApiClient, ClusterController, ClusterState, FsItem, FunctionalTestCase, HarnessError,
    MismatchKind, Role, Termination,
};
use secrecy::SecretString;
use serde_json::json;

#[test]
fn test_build_statuses_match_fixtures() {
    init_test_logging();
    test_log!("TEST START: test_build_statuses_match_fixtures");

    let stub = StubCluster::new();
    FunctionalTestCase::run(stub.config(2), &stub.spawner, |case| {
        case.assert_build_has_successful_status(SUCCEEDED_BUILD)?;
        case.assert_build_has_failure_status(FAILED_BUILD)?;
        case.assert_build_has_canceled_status(CANCELED_BUILD)?;
        case.assert_build_status_contains_expected_data(
            SUCCEEDED_BUILD,
            &json!({"build_id": SUCCEEDED_BUILD, "status": "FINISHED"}),
        )
    })
    .unwrap();

    assert!(stub.leftover_dirs().is_empty());
    test_log!("TEST PASS: test_build_statuses_match_fixtures");
}

#[test]
fn test_wrong_status_reports_expected_and_actual() {
    init_test_logging();
    let stub = StubCluster::new();

    let err = FunctionalTestCase::run(stub.config(1), &stub.spawner, |case| {
        case.assert_build_has_canceled_status(SUCCEEDED_BUILD)
    })
    .unwrap_err();

    match err {
        HarnessError::StatusMismatch {
            build_id,
            discrepancies,
            ..
        } => {
            assert_eq!(build_id, SUCCEEDED_BUILD);
            let keys: Vec<&str> = discrepancies.iter().map(|d| d.key.as_str()).collect();
            assert_eq!(keys, vec!["result", "status"]);
        }
        other => panic!("expected StatusMismatch, got {other}"),
    }
    assert!(stub.leftover_dirs().is_empty());
}

#[test]
fn test_unknown_build_is_api_error() {
    init_test_logging();
    let stub = StubCluster::new();

    let err = FunctionalTestCase::run(stub.config(1), &stub.spawner, |case| {
        case.assert_build_has_successful_status(99)
    })
    .unwrap_err();
    assert!(matches!(err, HarnessError::Api { .. }), "got {err}");
}

#[test]
fn test_build_artifacts_match_expected_tree() {
    init_test_logging();
    test_log!("TEST START: test_build_artifacts_match_expected_tree");
    let stub = StubCluster::new();

    FunctionalTestCase::run(stub.config(1), &stub.spawner, |case| {
        case.assert_build_artifact_contents_match_expected(
            SUCCEEDED_BUILD,
            vec![
                FsItem::file("clusterrunner_exit_code", "0\n"),
                FsItem::dir(
                    "artifact_0_0",
                    [
                        FsItem::any_file("clusterrunner_console_output"),
                        FsItem::file("clusterrunner_exit_code", "0\n"),
                    ],
                )?,
            ],
        )?;

        let err = case
            .assert_build_artifact_contents_match_expected(
                FAILED_BUILD,
                vec![FsItem::file("clusterrunner_exit_code", "0\n")],
            )
            .unwrap_err();
        match err {
            HarnessError::TreeMismatch { mismatch, .. } => {
                assert_eq!(mismatch.path, PathBuf::from("clusterrunner_exit_code"));
                assert!(matches!(mismatch.kind, MismatchKind::ContentDiffers { .. }));
            }
            other => panic!("expected TreeMismatch, got {other}"),
        }

        // Extra artifacts fail an exact comparison.
        let err = case
            .assert_build_artifact_contents_match_expected(
                SUCCEEDED_BUILD,
                vec![FsItem::file("clusterrunner_exit_code", "0\n")],
            )
            .unwrap_err();
        assert!(matches!(err, HarnessError::TreeMismatch { .. }));
        Ok(())
    })
    .unwrap();
}

#[test]
fn test_tear_down_releases_every_work_dir() {
    init_test_logging();
    let stub = StubCluster::new();

    let mut case = FunctionalTestCase::set_up(stub.config(2), &stub.spawner).unwrap();
    assert_eq!(case.cluster().state(), ClusterState::Running);

    let dirs: Vec<PathBuf> = [Role::Coordinator, Role::Worker(0), Role::Worker(1)]
        .into_iter()
        .map(|role| case.cluster().work_dir(role).unwrap().to_path_buf())
        .collect();
    assert!(dirs.iter().all(|d| d.is_dir()));
    assert!(dirs[0].join("clusterrunner.toml").is_file());

    case.tear_down().unwrap();

    assert_eq!(case.cluster().state(), ClusterState::Stopped);
    assert!(dirs.iter().all(|d| !d.exists()));
    let records = case.cluster().exit_records();
    assert!(records.iter().all(|r| r.exit_code == Some(0)));
    assert!(records.iter().all(|r| r.termination == Some(Termination::Signaled)));

    // A second teardown is a no-op.
    case.tear_down().unwrap();
}

#[test]
fn test_nonzero_worker_exit_fails_teardown_but_releases_dirs() {
    init_test_logging();
    test_log!("TEST START: test_nonzero_worker_exit_fails_teardown_but_releases_dirs");
    let stub = StubCluster::new().role_args(Role::Worker(0), &["--exit-code", "3"]);

    let err = FunctionalTestCase::run(stub.config(2), &stub.spawner, |_| Ok(())).unwrap_err();
    match &err {
        HarnessError::ExitCodeMismatch(failures) => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].role, Role::Worker(0));
            assert_eq!(failures[0].actual, Some(3));
        }
        other => panic!("expected ExitCodeMismatch, got {other}"),
    }
    assert!(err.to_string().contains("exited with code 3"));
    assert!(stub.leftover_dirs().is_empty());
}

#[test]
fn test_worker_ignoring_term_is_killed() {
    init_test_logging();
    let stub = StubCluster::new().role_args(Role::Worker(0), &["--ignore-term"]);
    let config = stub.config(1).with_termination_grace(Duration::from_millis(500));

    let mut cluster = ClusterController::start(config, &stub.spawner).unwrap();
    let records = cluster.terminate_all();

    let worker = records.iter().find(|r| r.role == Role::Worker(0)).unwrap();
    assert_eq!(worker.termination, Some(Termination::Killed));
    assert_eq!(worker.exit_code, Some(128 + 9));
    let coordinator = records.iter().find(|r| r.role == Role::Coordinator).unwrap();
    assert_eq!(coordinator.exit_code, Some(0));

    cluster.release_work_dirs().unwrap();
    assert!(stub.leftover_dirs().is_empty());
}

#[test]
fn test_drain_times_out_without_touching_processes() {
    init_test_logging();
    let stub = StubCluster::with_queue(vec![json!({"build_id": 4})]);

    let mut cluster = ClusterController::start(stub.config(1), &stub.spawner).unwrap();
    let err = cluster
        .block_until_queue_empty(Duration::from_millis(300))
        .unwrap_err();
    assert!(matches!(err, HarnessError::Timeout(_)));
    assert_eq!(cluster.state(), ClusterState::Draining);
    assert!(cluster.coordinator().exit_code().is_none());
    assert!(cluster.workers().values().all(|w| w.exit_code().is_none()));

    let records = cluster.terminate_all();
    assert!(records.iter().all(|r| r.exit_code == Some(0)));
    cluster.release_work_dirs().unwrap();
}

#[test]
fn test_empty_queue_drains_immediately() {
    init_test_logging();
    let stub = StubCluster::new();

    let mut cluster = ClusterController::start(stub.config(1), &stub.spawner).unwrap();
    cluster.block_until_queue_empty(Duration::ZERO).unwrap();
    cluster.terminate_all();
    cluster.release_work_dirs().unwrap();
}

#[test]
fn test_body_error_still_tears_down() {
    init_test_logging();
    let stub = StubCluster::new();
    let mut coordinator_dir = None;

    let err = FunctionalTestCase::run(stub.config(1), &stub.spawner, |case| {
        coordinator_dir = Some(case.cluster().coordinator_dir()?.to_path_buf());
        Err(HarnessError::AssertionFailed("body failed".to_string()))
    })
    .unwrap_err();

    assert!(matches!(err, HarnessError::AssertionFailed(ref msg) if msg == "body failed"));
    assert!(!coordinator_dir.unwrap().exists());
}

#[test]
fn test_body_panic_still_tears_down() {
    init_test_logging();
    let stub = StubCluster::new();

    let result = catch_unwind(AssertUnwindSafe(|| {
        FunctionalTestCase::run(stub.config(1), &stub.spawner, |_| panic!("body panicked"))
    }));

    assert!(result.is_err());
    assert!(stub.leftover_dirs().is_empty());
}

#[test]
fn test_startup_failure_cleans_up() {
    init_test_logging();
    let stub = StubCluster::new().role_args(Role::Worker(0), &["--no-such-flag"]);
    let config = stub.config(1).with_startup_timeout(Duration::from_secs(10));

    let err = ClusterController::start(config, &stub.spawner).unwrap_err();
    assert!(matches!(err, HarnessError::ProcessStartFailed(_)), "got {err}");
    assert!(stub.leftover_dirs().is_empty());
}

#[test]
fn test_requests_without_secret_are_rejected() {
    init_test_logging();
    let stub = StubCluster::new();

    let mut cluster = ClusterController::start(stub.config(0), &stub.spawner).unwrap();
    let url = cluster.coordinator().url().to_string();

    let intruder = ClusterApiClient::new(&url, SecretString::from("wrongsecret"));
    assert!(matches!(
        intruder.get_build_status(SUCCEEDED_BUILD),
        Err(HarnessError::Api { .. })
    ));
    assert!(cluster.api().get_build_status(SUCCEEDED_BUILD).is_ok());

    cluster.terminate_all();
    cluster.release_work_dirs().unwrap();
}
