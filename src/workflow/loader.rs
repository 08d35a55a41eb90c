//! Parse and validate workflow definitions.
//!
//! The loader rejects anything that cannot run: unknown phase references,
//! cycles, agents listed twice, and required inputs that the scheduler could
//! not guarantee to exist when the consumer starts. It does not decide
//! execution order.

use std::path::Path;
use std::time::Duration;

use tracing::debug;

use crate::config::Config;
use crate::core::{AgentId, PhaseSpec, RetryPolicy, TaskSpec, WorkflowGraph};
use crate::error::{DefinitionError, Result};

use super::types::{AgentDefinition, PhaseDefinition, WorkflowDefinition};

/// Parse a YAML document without validating it.
pub fn parse(text: &str) -> Result<WorkflowDefinition> {
    serde_yaml::from_str(text).map_err(|e| DefinitionError::Malformed(e.to_string()).into())
}

/// Read, parse and validate a workflow file.
pub fn load_path(path: &Path, config: &Config) -> Result<(WorkflowDefinition, WorkflowGraph)> {
    let text = std::fs::read_to_string(path)?;
    let definition = parse(&text)?;
    let graph = build(&definition, config)?;
    Ok((definition, graph))
}

/// Validate a definition and produce its graph.
///
/// Per-agent settings fall back to `config` when unset.
pub fn build(
    definition: &WorkflowDefinition,
    config: &Config,
) -> std::result::Result<WorkflowGraph, DefinitionError> {
    if definition.phases.is_empty() {
        return Err(DefinitionError::Empty);
    }

    let mut graph = WorkflowGraph::new(&definition.name);
    for phase in &definition.phases {
        graph.add_phase(phase_spec(phase, config)?)?;
    }
    for phase in &definition.phases {
        for dependency in &phase.depends_on {
            graph.add_dependency(dependency, &phase.name)?;
        }
    }

    // Feasibility only; the order itself is discarded.
    graph.topological_order()?;

    for task in graph.tasks() {
        check_requirements(&graph, task)?;
    }

    debug!(
        workflow = %definition.name,
        phases = graph.phase_count(),
        tasks = graph.task_count(),
        "workflow validated"
    );
    Ok(graph)
}

fn phase_spec(phase: &PhaseDefinition, config: &Config) -> std::result::Result<PhaseSpec, DefinitionError> {
    let name = phase.name.trim();
    if name.is_empty() || name != phase.name {
        return Err(DefinitionError::InvalidPhaseName(phase.name.clone()));
    }

    let tasks = phase
        .agents
        .iter()
        .map(|entry| task_spec(&entry.to_definition(), &phase.name, config))
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(PhaseSpec {
        name: phase.name.clone(),
        parallel: phase.parallel,
        depends_on: phase.depends_on.clone(),
        tasks,
    })
}

fn task_spec(
    agent: &AgentDefinition,
    phase: &str,
    config: &Config,
) -> std::result::Result<TaskSpec, DefinitionError> {
    let ids = |list: &[String]| {
        list.iter()
            .map(|id| AgentId::new(id))
            .collect::<std::result::Result<Vec<_>, _>>()
    };

    let backoff = match agent.backoff_ms {
        Some(ms) => config.backoff_with_initial(ms),
        None => config.backoff(),
    };

    Ok(TaskSpec {
        agent_id: AgentId::new(&agent.id)?,
        phase: phase.to_string(),
        requires: ids(&agent.requires)?,
        optional: ids(&agent.optional)?,
        retry: RetryPolicy::new(agent.retry_budget.unwrap_or(config.retry_budget), backoff),
        severity: agent.severity,
        timeout: Duration::from_secs(agent.timeout_secs.unwrap_or(config.task_timeout_secs)),
        output: agent.output,
    })
}

/// A required input must come from an agent that is guaranteed to be
/// terminal before this one starts: either in an upstream phase or earlier
/// in the same sequential phase.
fn check_requirements(graph: &WorkflowGraph, task: &TaskSpec) -> std::result::Result<(), DefinitionError> {
    for required in &task.requires {
        let owner = known_owner(graph, task, required)?;
        let ordered = if owner.name == task.phase {
            !owner.parallel
                && owner.position(required) < owner.position(&task.agent_id)
        } else {
            graph.precedes(&owner.name, &task.phase)
        };
        if !ordered {
            return Err(DefinitionError::UnorderedRequirement {
                agent: task.agent_id.to_string(),
                required: required.to_string(),
            });
        }
    }
    for optional in &task.optional {
        known_owner(graph, task, optional)?;
    }
    Ok(())
}

fn known_owner<'g>(
    graph: &'g WorkflowGraph,
    task: &TaskSpec,
    input: &AgentId,
) -> std::result::Result<&'g PhaseSpec, DefinitionError> {
    if input == &task.agent_id {
        return Err(DefinitionError::SelfRequirement(task.agent_id.to_string()));
    }
    graph
        .phase_of(input)
        .ok_or_else(|| DefinitionError::UnknownRequirement {
            agent: task.agent_id.to_string(),
            missing: input.to_string(),
        })
}
