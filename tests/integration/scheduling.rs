//! Dependency ordering and concurrency tests.
//!
//! These tests verify that the scheduler only dispatches a task once every
//! phase it depends on has completed, runs independent phases concurrently,
//! and never exceeds the worker pool bound.

use std::sync::Arc;
use std::time::Duration;

use cadence::config::Config;
use cadence::orchestration::SchedulerEvent;
use cadence::workflow::{AgentEntry, PhaseStatus, RunStatus};

use crate::fixtures::*;

/// Test: Diamond dependencies
/// Given A -> {B, C} -> D
/// When the run starts
/// Then B and C are in flight together and D starts only after both succeed
#[tokio::test]
async fn test_diamond_runs_branches_concurrently() {
    let runner = Arc::new(ScriptedRunner::new().with_barrier(&["b", "c"]));
    let (engine, _stores, mut rx) = memory_engine(test_config(), runner.clone());

    let report = tokio::time::timeout(Duration::from_secs(10), engine.start(diamond()))
        .await
        .expect("B and C should not wait on each other")
        .unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    assert!(runner.peak_concurrency() >= 2);
    assert_eq!(runner.calls("a"), 1);

    let events = drain(&mut rx);
    let d = dispatched(&events, "d").unwrap();
    assert!(d > succeeded(&events, "b").unwrap());
    assert!(d > succeeded(&events, "c").unwrap());
    assert!(d > phase_completed(&events, "B").unwrap());
    assert!(d > phase_completed(&events, "C").unwrap());
    assert_eq!(
        runner.inputs_of("d"),
        vec![("b".to_string(), 1), ("c".to_string(), 1)]
    );
}

/// Test: Sequential phase ordering
/// Given a sequential phase with three agents
/// When it runs
/// Then the agents run one at a time in declared order
#[tokio::test]
async fn test_sequential_phase_runs_in_declared_order() {
    let runner = Arc::new(ScriptedRunner::new().with_delay(Duration::from_millis(20)));
    let definition = workflow(
        "sequential",
        vec![phase(
            "steps",
            &[],
            vec![
                AgentEntry::from("first"),
                AgentEntry::from("second"),
                AgentEntry::from("third"),
            ],
        )],
    );
    let (engine, _stores, _rx) = memory_engine(test_config(), runner.clone());

    let report = engine.start(definition).await.unwrap();
    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(runner.peak_concurrency(), 1);
    assert_eq!(runner.call_order(), vec!["first", "second", "third"]);
}

/// Test: Worker pool bound
/// Given a parallel phase with six agents and max_in_flight = 2
/// When it runs
/// Then at most two calls are ever in flight
#[tokio::test]
async fn test_max_in_flight_is_respected() {
    let runner = Arc::new(ScriptedRunner::new().with_delay(Duration::from_millis(30)));
    let agents = ["w1", "w2", "w3", "w4", "w5", "w6"]
        .iter()
        .map(|a| AgentEntry::from(*a))
        .collect();
    let definition = workflow("wide", vec![parallel_phase("fan", &[], agents)]);
    let config = Config {
        max_in_flight: 2,
        ..test_config()
    };
    let (engine, _stores, _rx) = memory_engine(config, runner.clone());

    let report = engine.start(definition).await.unwrap();
    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(runner.total_calls(), 6);
    assert!(runner.peak_concurrency() <= 2);
    assert_eq!(runner.peak_concurrency(), 2);
}

/// Test: Phase lifecycle events
/// Given a two-phase workflow
/// When it completes
/// Then each phase is started before it is completed, and the run
/// finishes last
#[tokio::test]
async fn test_phase_events_in_order() {
    let runner = Arc::new(ScriptedRunner::new());
    let definition = workflow(
        "pair",
        vec![
            phase("plan", &[], vec![AgentEntry::from("planner")]),
            phase("build", &["plan"], vec![requiring("builder", &["planner"])]),
        ],
    );
    let (engine, _stores, mut rx) = memory_engine(test_config(), runner);
    let report = engine.start(definition).await.unwrap();
    assert_eq!(report.phase("build"), Some(PhaseStatus::Completed));

    let events = drain(&mut rx);
    let started = |name: &str| {
        position(&events, |e| {
            matches!(e, SchedulerEvent::PhaseStarted { phase } if phase == name)
        })
        .unwrap()
    };
    assert!(started("plan") < phase_completed(&events, "plan").unwrap());
    assert!(phase_completed(&events, "plan").unwrap() < started("build"));
    assert_eq!(
        events.last(),
        Some(&SchedulerEvent::RunFinished {
            status: RunStatus::Completed
        })
    );
}

/// Test: Independent phases
/// Given two phases with no dependency between them
/// When both are ready
/// Then they run at the same time
#[tokio::test]
async fn test_independent_phases_overlap() {
    let runner = Arc::new(ScriptedRunner::new().with_barrier(&["left", "right"]));
    let definition = workflow(
        "split",
        vec![
            phase("L", &[], vec![AgentEntry::from("left")]),
            phase("R", &[], vec![AgentEntry::from("right")]),
        ],
    );
    let (engine, _stores, _rx) = memory_engine(test_config(), runner.clone());

    let report = tokio::time::timeout(Duration::from_secs(10), engine.start(definition))
        .await
        .expect("independent phases should overlap")
        .unwrap();
    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(runner.peak_concurrency(), 2);
}
