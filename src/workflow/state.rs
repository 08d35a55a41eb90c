//! Run state with validated phase and task transitions.
//!
//! `RunState` is owned by exactly one scheduler loop. It is either created
//! fresh for a new run or rebuilt from the execution ledger on resume; it is
//! never persisted itself.

use std::collections::HashMap;
use std::sync::Arc;

use crate::core::{
    AgentId, Exhaustion, PhaseSpec, TaskRecord, TaskSpec, TaskStatus, WorkflowGraph,
};
use crate::error::{Error, Result};
use crate::state::{ExecutionRecord, FailureKind};

use super::types::{PhaseStatus, RunId, RunStatus};

/// A phase moved to a new status during [`RunState::advance_phases`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseChange {
    pub phase: String,
    pub status: PhaseStatus,
}

#[derive(Debug)]
pub struct RunState {
    run_id: RunId,
    graph: Arc<WorkflowGraph>,
    phases: HashMap<String, PhaseStatus>,
    tasks: HashMap<AgentId, TaskRecord>,
    warnings: Vec<String>,
}

impl RunState {
    /// State for a run that has not executed anything yet.
    pub fn new(run_id: RunId, graph: Arc<WorkflowGraph>) -> Self {
        let phases = graph
            .phases()
            .map(|p| (p.name.clone(), PhaseStatus::Pending))
            .collect();
        let tasks = graph
            .tasks()
            .map(|t| (t.agent_id.clone(), TaskRecord::new(t.agent_id.clone())))
            .collect();
        Self {
            run_id,
            graph,
            phases,
            tasks,
            warnings: Vec::new(),
        }
    }

    /// Rebuild task statuses from ledger history.
    ///
    /// A recorded success makes the task Succeeded. A missing-dependency
    /// failure, or failures beyond the retry budget, make it
    /// RetriesExhausted. Other failures leave it eligible with its attempt
    /// count preserved. Tasks without records start fresh.
    pub fn restore(run_id: RunId, graph: Arc<WorkflowGraph>, records: &[ExecutionRecord]) -> Self {
        let mut state = Self::new(run_id, graph);

        let mut by_agent: HashMap<&AgentId, Vec<&ExecutionRecord>> = HashMap::new();
        for record in records.iter().filter(|r| r.run_id == run_id) {
            by_agent.entry(&record.agent_id).or_default().push(record);
        }

        let graph = Arc::clone(&state.graph);
        for spec in graph.tasks() {
            let Some(mut history) = by_agent.remove(&spec.agent_id) else {
                continue;
            };
            history.sort_by_key(|r| r.attempt_number);
            let record = restored_record(spec, &history);
            if let TaskStatus::RetriesExhausted {
                classification: Exhaustion::SkippedNonBlocking,
                reason,
            } = &record.status
            {
                state
                    .warnings
                    .push(skipped_warning(&spec.agent_id, reason));
            }
            state.tasks.insert(spec.agent_id.clone(), record);
        }
        state
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub fn graph(&self) -> &Arc<WorkflowGraph> {
        &self.graph
    }

    pub fn phase_status(&self, phase: &str) -> Option<PhaseStatus> {
        self.phases.get(phase).copied()
    }

    pub fn task(&self, agent_id: &AgentId) -> Option<&TaskRecord> {
        self.tasks.get(agent_id)
    }

    pub fn task_mut(&mut self, agent_id: &AgentId) -> Result<&mut TaskRecord> {
        self.tasks
            .get_mut(agent_id)
            .ok_or_else(|| Error::UnknownTask(agent_id.to_string()))
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn add_warning(&mut self, warning: String) {
        self.warnings.push(warning);
    }

    /// Phase statuses in declared order.
    pub fn phase_statuses(&self) -> Vec<(String, PhaseStatus)> {
        self.graph
            .phases()
            .map(|p| (p.name.clone(), self.phases[&p.name]))
            .collect()
    }

    /// Task statuses in declared order.
    pub fn task_statuses(&self) -> Vec<(AgentId, TaskStatus)> {
        self.graph
            .tasks()
            .map(|t| (t.agent_id.clone(), self.tasks[&t.agent_id].status.clone()))
            .collect()
    }

    /// Check whether a phase may move from its current status to `target`.
    ///
    /// Valid transitions:
    /// - Pending -> Ready
    /// - Ready -> Running
    /// - Running -> Completed OR FailedBlocking
    pub fn can_transition(&self, phase: &str, target: PhaseStatus) -> bool {
        let Some(current) = self.phase_status(phase) else {
            return false;
        };
        matches!(
            (current, target),
            (PhaseStatus::Pending, PhaseStatus::Ready)
                | (PhaseStatus::Ready, PhaseStatus::Running)
                | (PhaseStatus::Running, PhaseStatus::Completed)
                | (PhaseStatus::Running, PhaseStatus::FailedBlocking)
        )
    }

    pub fn transition_phase(&mut self, phase: &str, target: PhaseStatus) -> Result<()> {
        if !self.can_transition(phase, target) {
            return Err(Error::InvalidPhaseTransition {
                phase: phase.to_string(),
                from: self
                    .phase_status(phase)
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "unknown".to_string()),
                to: target.to_string(),
            });
        }
        self.phases.insert(phase.to_string(), target);
        Ok(())
    }

    /// Terminal status of a running phase implied by its tasks, if any.
    pub fn phase_outcome(&self, phase: &str) -> Option<PhaseStatus> {
        let spec = self.graph.phase(phase)?;
        let statuses: Vec<&TaskStatus> = spec
            .tasks
            .iter()
            .filter_map(|t| self.tasks.get(&t.agent_id).map(|r| &r.status))
            .collect();
        if statuses.iter().any(|s| s.is_blocking_failure()) {
            Some(PhaseStatus::FailedBlocking)
        } else if statuses.iter().all(|s| s.allows_phase_completion()) {
            Some(PhaseStatus::Completed)
        } else {
            None
        }
    }

    /// Move phases forward until nothing changes.
    ///
    /// Pending phases become Ready once every dependency is Completed;
    /// Ready phases become Running only when `promote` is set; Running
    /// phases settle into Completed or FailedBlocking from their tasks.
    pub fn advance_phases(&mut self, promote: bool) -> Result<Vec<PhaseChange>> {
        self.advance(|_, _| promote)
    }

    /// Settle phase statuses for inspection without starting anything.
    ///
    /// A Ready phase counts as Running only once one of its tasks has a
    /// recorded attempt, so phases that never started stay Ready.
    pub fn settle(&mut self) -> Result<Vec<PhaseChange>> {
        self.advance(|state, phase| {
            phase
                .tasks
                .iter()
                .any(|t| state.tasks.get(&t.agent_id).is_some_and(|r| r.attempts > 0))
        })
    }

    fn advance<F>(&mut self, promote: F) -> Result<Vec<PhaseChange>>
    where
        F: Fn(&Self, &PhaseSpec) -> bool,
    {
        let graph = Arc::clone(&self.graph);
        let mut changes = Vec::new();
        loop {
            let mut changed = false;
            for phase in graph.phases() {
                let next = match self.phases[&phase.name] {
                    PhaseStatus::Pending => graph
                        .dependencies(&phase.name)
                        .iter()
                        .all(|dep| self.phases.get(*dep) == Some(&PhaseStatus::Completed))
                        .then_some(PhaseStatus::Ready),
                    PhaseStatus::Ready => promote(self, phase).then_some(PhaseStatus::Running),
                    PhaseStatus::Running => self.phase_outcome(&phase.name),
                    PhaseStatus::Completed | PhaseStatus::FailedBlocking => None,
                };
                if let Some(status) = next {
                    self.transition_phase(&phase.name, status)?;
                    changes.push(PhaseChange {
                        phase: phase.name.clone(),
                        status,
                    });
                    changed = true;
                }
            }
            if !changed {
                return Ok(changes);
            }
        }
    }

    /// Tasks of running phases that may be dispatched now.
    ///
    /// Parallel phases offer every eligible task. Sequential phases offer
    /// at most their first non-terminal task, and only when it is eligible.
    pub fn dispatchable(&self) -> Vec<&TaskSpec> {
        let mut out = Vec::new();
        for phase in self.graph.phases() {
            if self.phases[&phase.name] != PhaseStatus::Running {
                continue;
            }
            if phase.parallel {
                out.extend(
                    phase
                        .tasks
                        .iter()
                        .filter(|t| self.tasks[&t.agent_id].status.is_eligible()),
                );
            } else if let Some(next) = phase
                .tasks
                .iter()
                .find(|t| !self.tasks[&t.agent_id].status.is_terminal())
            {
                if self.tasks[&next.agent_id].status.is_eligible() {
                    out.push(next);
                }
            }
        }
        out
    }

    /// Final status once nothing is in flight and nothing can be dispatched.
    pub fn final_status(&self, cancelled: bool) -> RunStatus {
        if self.phases.values().all(|s| *s == PhaseStatus::Completed) {
            RunStatus::Completed
        } else if cancelled {
            RunStatus::Cancelled
        } else {
            RunStatus::Aborted
        }
    }
}

pub(crate) fn skipped_warning(agent_id: &AgentId, reason: &str) -> String {
    format!("non-blocking agent {} skipped: {}", agent_id, reason)
}

fn restored_record(spec: &TaskSpec, history: &[&ExecutionRecord]) -> TaskRecord {
    let agent_id = spec.agent_id.clone();
    let attempts = history.iter().map(|r| r.attempt_number).max().unwrap_or(0);

    if let Some(success) = history.iter().find(|r| r.is_success()) {
        return TaskRecord::restored(
            agent_id,
            TaskStatus::Succeeded {
                attempt: success.attempt_number,
            },
            attempts,
        );
    }

    let Some(last) = history.last() else {
        return TaskRecord::new(agent_id);
    };
    let reason = last
        .error_summary
        .clone()
        .unwrap_or_else(|| last.outcome.to_string());

    let structural = history
        .iter()
        .any(|r| r.failure_kind == Some(FailureKind::MissingDependency));
    let status = if structural || !spec.retry.allows_retry_after(attempts) {
        TaskStatus::RetriesExhausted {
            classification: spec.severity.classify(),
            reason,
        }
    } else {
        TaskStatus::Failed {
            attempt: attempts,
            error: reason,
        }
    };
    TaskRecord::restored(agent_id, status, attempts)
}
