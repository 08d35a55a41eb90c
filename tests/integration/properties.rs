//! Property tests over randomly generated workflows.
//!
//! Graphs are generated with forward edges only, so every one is a DAG;
//! completion timing is randomized per agent.

use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;

use cadence::config::Config;
use cadence::error::{DefinitionError, ExecutorError};
use cadence::orchestration::SchedulerEvent;
use cadence::workflow::{loader, AgentDefinition, AgentEntry, PhaseDefinition, RunStatus};

use crate::fixtures::*;

/// Phase `i` may depend on any phase before it.
fn dag_strategy() -> impl Strategy<Value = Vec<Vec<usize>>> {
    (1usize..7).prop_flat_map(|n| {
        let rows: Vec<_> = (0..n)
            .map(|i| proptest::collection::vec(any::<bool>(), i))
            .collect();
        rows.prop_map(|rows| {
            rows.into_iter()
                .map(|row| {
                    row.into_iter()
                        .enumerate()
                        .filter(|(_, edge)| *edge)
                        .map(|(j, _)| j)
                        .collect()
                })
                .collect()
        })
    })
}

/// One agent per phase (`a{i}` in phase `p{i}`), consuming the agents of
/// its dependency phases.
fn definition(deps: &[Vec<usize>]) -> cadence::workflow::WorkflowDefinition {
    let phases = deps
        .iter()
        .enumerate()
        .map(|(i, row)| {
            let mut agent = AgentDefinition::new(&format!("a{}", i));
            agent.requires = row.iter().map(|j| format!("a{}", j)).collect();
            PhaseDefinition {
                name: format!("p{}", i),
                agents: vec![AgentEntry::Detailed(agent)],
                parallel: false,
                depends_on: row.iter().map(|j| format!("p{}", j)).collect(),
            }
        })
        .collect();
    workflow("generated", phases)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// No task is dispatched before every phase its phase depends on has
    /// completed, whatever order agents finish in.
    #[test]
    fn prop_dispatch_waits_for_dependencies(
        deps in dag_strategy(),
        delays in proptest::collection::vec(0u64..6, 7),
    ) {
        let mut runner = ScriptedRunner::new();
        for (i, ms) in delays.iter().enumerate().take(deps.len()) {
            runner = runner.with_agent_delay(&format!("a{}", i), Duration::from_millis(*ms));
        }
        let runner = Arc::new(runner);
        let (engine, _stores, mut rx) = memory_engine(test_config(), runner.clone());

        let report = tokio_test::block_on(engine.start(definition(&deps))).unwrap();
        prop_assert_eq!(report.status, RunStatus::Completed);
        prop_assert_eq!(runner.total_calls(), deps.len());

        let events = drain(&mut rx);
        for (i, row) in deps.iter().enumerate() {
            let at = dispatched(&events, &format!("a{}", i)).unwrap();
            for j in row {
                let done = phase_completed(&events, &format!("p{}", j)).unwrap();
                prop_assert!(done < at, "a{} dispatched before p{} completed", i, j);
            }
        }
    }

    /// Adding an edge back from an earlier phase to a later one it reaches
    /// always makes the definition invalid.
    #[test]
    fn prop_back_edge_is_rejected(
        deps in dag_strategy().prop_filter("needs two phases", |d| d.len() >= 2),
        pick in any::<proptest::sample::Index>(),
    ) {
        let n = deps.len();
        let later = 1 + pick.index(n - 1);
        let mut definition = definition(&deps);
        let earlier_name = "p0".to_string();
        let later_name = format!("p{}", later);
        if !definition.phases[later].depends_on.contains(&earlier_name) {
            definition.phases[later].depends_on.push(earlier_name);
        }
        definition.phases[0].depends_on.push(later_name);

        let err = loader::build(&definition, &Config::default()).unwrap_err();
        prop_assert!(matches!(err, DefinitionError::Cycle(_)));
    }

    /// An always-failing task is attempted exactly budget + 1 times.
    #[test]
    fn prop_attempts_bounded_by_budget(budget in 0u32..5) {
        let failures = (0..10)
            .map(|_| Step::Fail(ExecutorError::Rejected("no".to_string())))
            .collect();
        let runner = Arc::new(ScriptedRunner::new().script("only", failures));
        let (engine, _stores, mut rx) = memory_engine(test_config(), runner.clone());
        let definition = workflow(
            "bounded",
            vec![phase("p", &[], vec![retrying("only", budget, cadence::core::Severity::Blocking)])],
        );

        let report = tokio_test::block_on(engine.start(definition)).unwrap();
        prop_assert_eq!(report.status, RunStatus::Aborted);
        prop_assert_eq!(runner.calls("only") as u32, budget + 1);

        let dispatches = drain(&mut rx)
            .into_iter()
            .filter(|e| matches!(e, SchedulerEvent::TaskDispatched { .. }))
            .count();
        prop_assert_eq!(dispatches as u32, budget + 1);
    }
}
