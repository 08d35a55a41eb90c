//! Durability, resume and cancellation tests.
//!
//! These tests run against the file store in a temp directory and verify
//! that a run can be picked up by a fresh engine from what is on disk.

use std::sync::Arc;
use std::time::Duration;

use cadence::config::Config;
use cadence::orchestration::SchedulerEvent;
use cadence::state::Outcome;
use cadence::workflow::RunStatus;

use crate::fixtures::*;

/// Test: Resume idempotence
/// Given a run that completed
/// When it is resumed by a new engine
/// Then no agent is called again and no artifact gains a version
#[tokio::test]
async fn test_resume_of_completed_run_is_a_no_op() {
    let dir = TestStateDir::new();
    let first = Arc::new(ScriptedRunner::new());
    let report = dir
        .engine(test_config(), first.clone())
        .start(diamond())
        .await
        .unwrap();
    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(first.total_calls(), 4);

    let second = Arc::new(ScriptedRunner::new());
    let resumed = dir
        .engine(test_config(), second.clone())
        .resume(report.run_id)
        .await
        .unwrap();
    assert_eq!(resumed.status, RunStatus::Completed);
    assert_eq!(second.total_calls(), 0);

    let stores = dir.stores();
    for agent in ["a", "b", "c", "d"] {
        let versions = stores
            .artifacts
            .versions(report.run_id, &agent_id(agent))
            .await
            .unwrap();
        assert_eq!(versions, vec![1], "agent {}", agent);
    }
}

/// Test: Cancellation and resume
/// Given a run where one branch hangs
/// When the run is cancelled and later resumed
/// Then the interrupted attempt leaves no record, the run is cancelled, and
/// the resume finishes it without re-running completed agents
#[tokio::test]
async fn test_cancelled_run_resumes_where_it_stopped() {
    let dir = TestStateDir::new();
    let hanging = Arc::new(ScriptedRunner::new().script("b", vec![Step::Hang]));
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let engine = Arc::new(dir.engine(test_config(), hanging.clone()).with_events(tx));
    let cancel = engine.cancellation_token();

    let handle = tokio::spawn({
        let engine = Arc::clone(&engine);
        async move { engine.start(diamond()).await }
    });

    // Wait until b is running, then cancel.
    tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(event) = rx.recv().await {
            if matches!(&event, SchedulerEvent::TaskDispatched { agent_id, .. } if agent_id.as_str() == "b")
            {
                break;
            }
        }
    })
    .await
    .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();

    let report = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(report.status, RunStatus::Cancelled);
    assert_eq!(hanging.calls("d"), 0);

    let stores = dir.stores();
    let run_id = report.run_id;
    assert!(stores
        .ledger
        .attempts(run_id, &agent_id("b"))
        .await
        .unwrap()
        .is_empty());
    let metadata = stores.runs.load_run(run_id).await.unwrap().unwrap();
    assert_eq!(metadata.status, RunStatus::Cancelled);

    let fresh = Arc::new(ScriptedRunner::new());
    let resumed = dir
        .engine(test_config(), fresh.clone())
        .resume(run_id)
        .await
        .unwrap();
    assert_eq!(resumed.status, RunStatus::Completed);
    assert_eq!(fresh.calls("a"), 0);
    assert_eq!(fresh.calls("b"), 1);
    assert_eq!(fresh.calls("d"), 1);

    // c ran exactly once across both processes.
    let c_successes = stores
        .ledger
        .attempts(run_id, &agent_id("c"))
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.outcome == Outcome::Success)
        .count();
    assert_eq!(c_successes, 1);
}

/// Test: Failed run resume
/// Given a run aborted on a transient failure
/// When it is resumed with a working agent
/// Then only the failed task is retried, keeping its attempt count
#[tokio::test]
async fn test_resume_after_abort_continues_attempt_numbering() {
    let dir = TestStateDir::new();
    let failing = Arc::new(ScriptedRunner::new().script(
        "b",
        vec![Step::Fail(cadence::error::ExecutorError::Transport(
            "down".to_string(),
        ))],
    ));
    let config = Config {
        retry_budget: 0,
        ..test_config()
    };
    let report = dir
        .engine(config, failing)
        .start(diamond())
        .await
        .unwrap();
    assert_eq!(report.status, RunStatus::Aborted);

    // A larger budget on resume lets b try again.
    let fresh = Arc::new(ScriptedRunner::new());
    let resumed = dir
        .engine(test_config(), fresh.clone())
        .resume(report.run_id)
        .await
        .unwrap();
    assert_eq!(resumed.status, RunStatus::Completed);
    assert_eq!(fresh.calls("a"), 0);
    assert_eq!(fresh.calls("b"), 1);

    let attempts = dir
        .stores()
        .ledger
        .attempts(report.run_id, &agent_id("b"))
        .await
        .unwrap();
    let numbers: Vec<u32> = attempts.iter().map(|r| r.attempt_number).collect();
    assert_eq!(numbers, vec![1, 2]);
}

/// Test: On-disk layout
/// Given a completed run
/// When a new store is opened on the same directory
/// Then metadata, artifacts and the ledger are all readable
#[tokio::test]
async fn test_file_store_survives_reopen() {
    let dir = TestStateDir::new();
    let report = dir
        .engine(test_config(), Arc::new(ScriptedRunner::new()))
        .start(diamond())
        .await
        .unwrap();

    let run_dir = dir
        .temp_dir
        .path()
        .join("runs")
        .join(report.run_id.to_string());
    assert!(run_dir.join("run.json").exists());
    assert!(run_dir.join("artifacts").join("d").join("v1.json").exists());
    assert!(run_dir.join("ledger").join("d.jsonl").exists());

    let reopened = dir.stores();
    let runs = reopened.runs.list_runs().await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Completed);
    assert_eq!(runs[0].workflow.name, "diamond");

    let artifact = reopened
        .artifacts
        .latest(report.run_id, &agent_id("d"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(artifact.content, "d output");
    assert!(artifact.verify());
    assert_eq!(reopened.ledger.records(report.run_id).await.unwrap().len(), 4);

    let status = dir
        .engine(test_config(), Arc::new(ScriptedRunner::new()))
        .status(report.run_id)
        .await
        .unwrap();
    assert_eq!(status.phases, report.phases);
}

/// Test: Unreadable upstream artifact on disk
/// Given an aborted run whose completed upstream artifact file was emptied
/// When the run is resumed
/// Then the consumer fails as missing_dependency instead of the run erroring
#[tokio::test]
async fn test_resume_with_unreadable_artifact_fails_consumer() {
    let dir = TestStateDir::new();
    let failing = Arc::new(ScriptedRunner::new().script(
        "b",
        vec![Step::Fail(cadence::error::ExecutorError::Transport(
            "down".to_string(),
        ))],
    ));
    let config = Config {
        retry_budget: 0,
        ..test_config()
    };
    let report = dir
        .engine(config, failing)
        .start(diamond())
        .await
        .unwrap();
    assert_eq!(report.status, RunStatus::Aborted);

    let artifact = dir
        .temp_dir
        .path()
        .join("runs")
        .join(report.run_id.to_string())
        .join("artifacts")
        .join("a")
        .join("v1.json");
    std::fs::write(&artifact, "").unwrap();

    let fresh = Arc::new(ScriptedRunner::new());
    let resumed = dir
        .engine(test_config(), fresh.clone())
        .resume(report.run_id)
        .await
        .unwrap();
    assert_eq!(resumed.status, RunStatus::Aborted);
    assert_eq!(fresh.calls("b"), 0);

    let attempts = dir
        .stores()
        .ledger
        .attempts(report.run_id, &agent_id("b"))
        .await
        .unwrap();
    assert_eq!(attempts.len(), 2);
    assert_eq!(
        attempts[1].failure_kind,
        Some(cadence::state::FailureKind::MissingDependency)
    );
}
