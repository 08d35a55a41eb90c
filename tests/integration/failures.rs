//! Retry, severity and structural failure tests.
//!
//! These tests verify that transient failures are retried within budget,
//! that exhausted tasks are classified by severity, and that a missing
//! upstream artifact fails the consumer without calling the runner.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use cadence::config::Config;
use cadence::core::{Exhaustion, Severity, TaskKey, TaskStatus};
use cadence::error::ExecutorError;
use cadence::orchestration::{SchedulerEvent, MISSING_DEPENDENCY};
use cadence::state::{Artifact, ExecutionRecord, FailureKind, Outcome, RunMetadata};
use cadence::workflow::{AgentDefinition, AgentEntry, PhaseStatus, RunId, RunStatus};

use crate::fixtures::*;

/// Test: Timeouts then success
/// Given an agent that hangs twice and then answers, with retry budget 2
/// When the run executes
/// Then three attempts are recorded and exactly one artifact version exists
#[tokio::test]
async fn test_two_timeouts_then_success() {
    let runner = Arc::new(ScriptedRunner::new().script(
        "slow",
        vec![Step::Hang, Step::Hang, Step::Output("third time".to_string())],
    ));
    let config = Config {
        task_timeout_secs: 1,
        retry_budget: 2,
        ..test_config()
    };
    let (engine, stores, mut rx) = memory_engine(config, runner.clone());
    let definition = workflow("slow", vec![phase("only", &[], vec![AgentEntry::from("slow")])]);

    let report = engine.start(definition).await.unwrap();
    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(runner.calls("slow"), 3);

    let attempts = engine
        .history(report.run_id, Some(&agent_id("slow")))
        .await
        .unwrap();
    let outcomes: Vec<Outcome> = attempts.iter().map(|r| r.outcome).collect();
    assert_eq!(outcomes, vec![Outcome::Timeout, Outcome::Timeout, Outcome::Success]);
    assert_eq!(attempts[2].artifact_version, Some(1));

    let slow = agent_id("slow");
    assert_eq!(
        stores.artifacts.versions(report.run_id, &slow).await.unwrap(),
        vec![1]
    );
    let artifact = stores.artifacts.latest(report.run_id, &slow).await.unwrap().unwrap();
    assert_eq!(artifact.content, "third time");
    assert_eq!(artifact.attempt_number, 3);
    assert!(artifact.verify());

    let failed = drain(&mut rx)
        .into_iter()
        .filter(|e| matches!(e, SchedulerEvent::AttemptFailed { kind: FailureKind::Timeout, .. }))
        .count();
    assert_eq!(failed, 2);
}

/// Test: Retry bound
/// Given an agent that always fails with retry budget N = 3
/// When the run executes
/// Then exactly N + 1 attempts are made and the run aborts
#[tokio::test]
async fn test_retry_budget_bounds_attempts() {
    let failures = (0..10)
        .map(|_| Step::Fail(ExecutorError::Transport("connection reset".to_string())))
        .collect();
    let runner = Arc::new(ScriptedRunner::new().script("flaky", failures));
    let (engine, stores, _rx) = memory_engine(test_config(), runner.clone());
    let definition = workflow(
        "flaky",
        vec![phase("only", &[], vec![retrying("flaky", 3, Severity::Blocking)])],
    );

    let report = engine.start(definition).await.unwrap();
    assert_eq!(report.status, RunStatus::Aborted);
    assert_eq!(runner.calls("flaky"), 4);
    assert_eq!(
        stores
            .ledger
            .attempts(report.run_id, &agent_id("flaky"))
            .await
            .unwrap()
            .len(),
        4
    );
    assert!(matches!(
        report.task(&agent_id("flaky")),
        Some(TaskStatus::RetriesExhausted {
            classification: Exhaustion::FailedBlocking,
            ..
        })
    ));
    assert_eq!(report.phase("only"), Some(PhaseStatus::FailedBlocking));
}

/// Test: Non-blocking containment
/// Given a non-blocking agent that always fails, and a downstream phase
/// that lists it as an optional input
/// When the run executes
/// Then the downstream phase still runs, the input is absent, and the run
/// completes with a warning
#[tokio::test]
async fn test_non_blocking_failure_is_contained() {
    let runner = Arc::new(ScriptedRunner::new().script(
        "linter",
        vec![
            Step::Fail(ExecutorError::Rejected("bad request".to_string())),
            Step::Fail(ExecutorError::Rejected("bad request".to_string())),
        ],
    ));
    let mut reporter = AgentDefinition::new("reporter");
    reporter.requires = vec!["builder".to_string()];
    reporter.optional = vec!["linter".to_string()];
    let definition = workflow(
        "lint",
        vec![
            parallel_phase(
                "check",
                &[],
                vec![
                    AgentEntry::from("builder"),
                    retrying("linter", 1, Severity::NonBlocking),
                ],
            ),
            phase("report", &["check"], vec![AgentEntry::Detailed(reporter)]),
        ],
    );
    let (engine, _stores, _rx) = memory_engine(test_config(), runner.clone());

    let report = engine.start(definition).await.unwrap();
    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(runner.calls("linter"), 2);
    assert_eq!(runner.calls("reporter"), 1);
    assert_eq!(runner.inputs_of("reporter"), vec![("builder".to_string(), 1)]);
    assert!(matches!(
        report.task(&agent_id("linter")),
        Some(TaskStatus::RetriesExhausted {
            classification: Exhaustion::SkippedNonBlocking,
            ..
        })
    ));
    assert_eq!(report.warnings.len(), 1);
    assert!(report.warnings[0].contains("linter"));
}

/// Test: Blocking failure
/// Given a blocking agent that fails in one branch and an independent branch
/// When the run executes
/// Then the dependents of the failed phase never run, the independent
/// branch completes, and the run ends aborted
#[tokio::test]
async fn test_blocking_failure_stops_only_dependents() {
    let runner = Arc::new(ScriptedRunner::new().script(
        "broken",
        vec![Step::Fail(ExecutorError::Rejected("refused".to_string()))],
    ));
    let definition = workflow(
        "branches",
        vec![
            phase("X", &[], vec![retrying("broken", 0, Severity::Blocking)]),
            phase("Y", &["X"], vec![AgentEntry::from("after")]),
            phase("Z", &[], vec![AgentEntry::from("independent")]),
        ],
    );
    let (engine, _stores, _rx) = memory_engine(test_config(), runner.clone());

    let report = engine.start(definition).await.unwrap();
    assert_eq!(report.status, RunStatus::Aborted);
    assert_eq!(runner.calls("after"), 0);
    assert_eq!(runner.calls("independent"), 1);
    assert_eq!(report.phase("X"), Some(PhaseStatus::FailedBlocking));
    assert_eq!(report.phase("Y"), Some(PhaseStatus::Pending));
    assert_eq!(report.phase("Z"), Some(PhaseStatus::Completed));
}

/// Test: Invalid output
/// Given an agent declaring JSON output that answers with prose
/// When the run executes
/// Then every attempt is a validation failure and no artifact is stored
#[tokio::test]
async fn test_validation_failure_is_retried_then_exhausted() {
    let runner = Arc::new(ScriptedRunner::new().script(
        "emitter",
        vec![
            Step::Output("not json".to_string()),
            Step::Output("still not json".to_string()),
        ],
    ));
    let mut emitter = AgentDefinition::new("emitter");
    emitter.retry_budget = Some(1);
    emitter.output = cadence::core::OutputFormat::Json;
    let definition = workflow(
        "json",
        vec![phase("emit", &[], vec![AgentEntry::Detailed(emitter)])],
    );
    let (engine, stores, _rx) = memory_engine(test_config(), runner.clone());

    let report = engine.start(definition).await.unwrap();
    assert_eq!(report.status, RunStatus::Aborted);
    let attempts = engine.history(report.run_id, None).await.unwrap();
    assert_eq!(attempts.len(), 2);
    assert!(attempts
        .iter()
        .all(|r| r.failure_kind == Some(FailureKind::Validation)));
    assert!(stores
        .artifacts
        .latest(report.run_id, &agent_id("emitter"))
        .await
        .unwrap()
        .is_none());
}

/// Test: Missing upstream artifact
/// Given a ledger that records a success for `upstream` but no stored
/// artifact
/// When the run is resumed
/// Then the consumer fails as missing_dependency without calling the
/// runner and without retries
#[tokio::test]
async fn test_missing_artifact_fails_consumer_without_runner_call() {
    let runner = Arc::new(ScriptedRunner::new());
    let (engine, stores, _rx) = memory_engine(test_config(), runner.clone());
    let definition = workflow(
        "handoff",
        vec![
            phase("produce", &[], vec![AgentEntry::from("upstream")]),
            phase("consume", &["produce"], vec![requiring("consumer", &["upstream"])]),
        ],
    );

    let run_id = RunId::new();
    stores
        .runs
        .save_run(&RunMetadata::new(run_id, definition))
        .await
        .unwrap();
    let upstream = agent_id("upstream");
    let lost = Artifact::new(run_id, upstream.clone(), 1, "lost".to_string(), 1);
    let record = ExecutionRecord::success(
        &TaskKey::new(run_id, "produce", upstream),
        1,
        Utc::now(),
        &lost,
        vec![],
    );
    stores.ledger.append(&record).await.unwrap();

    let report = engine.resume(run_id).await.unwrap();
    assert_eq!(report.status, RunStatus::Aborted);
    assert_eq!(runner.total_calls(), 0);

    let attempts = stores
        .ledger
        .attempts(run_id, &agent_id("consumer"))
        .await
        .unwrap();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].failure_kind, Some(FailureKind::MissingDependency));
    assert_eq!(attempts[0].error_summary.as_deref(), Some(MISSING_DEPENDENCY));
    assert!(report
        .task(&agent_id("consumer"))
        .is_some_and(|s| s.is_blocking_failure()));
}

/// Test: Backoff between attempts
/// Given a 50ms initial backoff
/// When an agent fails once
/// Then the retry starts no earlier than the backoff delay
#[tokio::test]
async fn test_backoff_delays_retry() {
    let runner = Arc::new(ScriptedRunner::new().script(
        "retry",
        vec![Step::Fail(ExecutorError::Transport("reset".to_string()))],
    ));
    let config = Config {
        backoff_initial_ms: 50,
        ..test_config()
    };
    let (engine, _stores, _rx) = memory_engine(config, runner.clone());
    let definition = workflow("backoff", vec![phase("p", &[], vec![AgentEntry::from("retry")])]);

    let started = std::time::Instant::now();
    let report = engine.start(definition).await.unwrap();
    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(runner.calls("retry"), 2);
    assert!(started.elapsed() >= Duration::from_millis(50));
}

/// Test: Required input from a skipped agent
/// Given a non-blocking agent that exhausts its retries, and a downstream
/// agent that requires its artifact
/// When the run executes
/// Then the downstream agent fails once as missing_dependency without a
/// runner call or a retry, and the run aborts
#[tokio::test]
async fn test_required_input_from_skipped_agent_fails_fast() {
    let runner = Arc::new(ScriptedRunner::new().script(
        "linter",
        vec![
            Step::Fail(ExecutorError::Rejected("bad request".to_string())),
            Step::Fail(ExecutorError::Rejected("bad request".to_string())),
        ],
    ));
    let definition = workflow(
        "lint",
        vec![
            parallel_phase(
                "check",
                &[],
                vec![
                    AgentEntry::from("builder"),
                    retrying("linter", 1, Severity::NonBlocking),
                ],
            ),
            phase("report", &["check"], vec![requiring("reporter", &["linter"])]),
        ],
    );
    let (engine, stores, mut rx) = memory_engine(test_config(), runner.clone());

    let report = engine.start(definition).await.unwrap();
    assert_eq!(report.status, RunStatus::Aborted);
    assert_eq!(report.phase("check"), Some(PhaseStatus::Completed));
    assert_eq!(report.phase("report"), Some(PhaseStatus::FailedBlocking));
    assert_eq!(runner.calls("reporter"), 0);

    let attempts = stores
        .ledger
        .attempts(report.run_id, &agent_id("reporter"))
        .await
        .unwrap();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].failure_kind, Some(FailureKind::MissingDependency));

    let reporter_dispatches = drain(&mut rx)
        .into_iter()
        .filter(|e| {
            matches!(e, SchedulerEvent::TaskDispatched { agent_id, .. } if agent_id.as_str() == "reporter")
        })
        .count();
    assert_eq!(reporter_dispatches, 1);
}
