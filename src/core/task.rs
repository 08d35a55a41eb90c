//! Task data model and the per-task state machine.
//!
//! A task is one agent executed once per run. Its identity is the
//! `(run_id, phase, agent_id)` triple; its status only moves along the
//! transitions allowed by [`TaskStatus::can_transition`].

use crate::core::retry::RetryPolicy;
use crate::error::{DefinitionError, Error, Result};
use crate::workflow::RunId;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Identifier of an agent within a workflow.
///
/// Restricted to ASCII alphanumerics, `-`, `_` and `.` because it is used
/// as a path component by the file store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AgentId(String);

impl AgentId {
    /// Validate and wrap an agent identifier.
    pub fn new(id: &str) -> std::result::Result<Self, DefinitionError> {
        let valid = !id.is_empty()
            && id != "."
            && id != ".."
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if valid {
            Ok(Self(id.to_string()))
        } else {
            Err(DefinitionError::InvalidAgentId(id.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for AgentId {
    type Error = DefinitionError;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<AgentId> for String {
    fn from(id: AgentId) -> Self {
        id.0
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of a task: one agent in one phase of one run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskKey {
    pub run_id: RunId,
    pub phase: String,
    pub agent_id: AgentId,
}

impl TaskKey {
    pub fn new(run_id: RunId, phase: &str, agent_id: AgentId) -> Self {
        Self {
            run_id,
            phase: phase.to_string(),
            agent_id,
        }
    }
}

impl std::fmt::Display for TaskKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.run_id.short(), self.phase, self.agent_id)
    }
}

/// How a permanently failed task affects its phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Exhausting retries fails the owning phase.
    #[default]
    Blocking,
    /// Exhausting retries skips the task; the phase may still complete.
    NonBlocking,
}

impl Severity {
    /// Classification applied when a task with this severity exhausts retries.
    pub fn classify(self) -> Exhaustion {
        match self {
            Severity::Blocking => Exhaustion::FailedBlocking,
            Severity::NonBlocking => Exhaustion::SkippedNonBlocking,
        }
    }
}

/// Terminal classification of a task that ran out of retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Exhaustion {
    FailedBlocking,
    SkippedNonBlocking,
}

impl std::fmt::Display for Exhaustion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Exhaustion::FailedBlocking => write!(f, "failed_blocking"),
            Exhaustion::SkippedNonBlocking => write!(f, "skipped_non_blocking"),
        }
    }
}

/// Structural format an agent promises for its output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    Markdown,
    Json,
    Yaml,
}

/// Validated, fully-resolved configuration of a single task.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskSpec {
    pub agent_id: AgentId,
    pub phase: String,
    /// Upstream agents whose artifacts must exist.
    pub requires: Vec<AgentId>,
    /// Upstream agents whose artifacts are passed along when present.
    pub optional: Vec<AgentId>,
    pub retry: RetryPolicy,
    pub severity: Severity,
    pub timeout: Duration,
    pub output: OutputFormat,
}

/// Task status in its lifecycle.
///
/// `Pending -> Dispatched -> (Succeeded | Failed)`, with `Failed` looping
/// back to `Dispatched` while budget remains, otherwise ending in
/// `RetriesExhausted`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum TaskStatus {
    /// Not yet dispatched in this run.
    #[default]
    Pending,
    /// An attempt is in flight.
    Dispatched { attempt: u32 },
    /// The last attempt failed and another is allowed.
    Failed { attempt: u32, error: String },
    /// An attempt produced a valid artifact.
    Succeeded { attempt: u32 },
    /// No further attempts will be made.
    RetriesExhausted {
        classification: Exhaustion,
        reason: String,
    },
}

impl TaskStatus {
    fn label(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Dispatched { .. } => "dispatched",
            TaskStatus::Failed { .. } => "failed",
            TaskStatus::Succeeded { .. } => "succeeded",
            TaskStatus::RetriesExhausted { .. } => "retries_exhausted",
        }
    }

    /// Check whether moving from `self` to `target` is a legal transition.
    pub fn can_transition(&self, target: &TaskStatus) -> bool {
        matches!(
            (self, target),
            (TaskStatus::Pending, TaskStatus::Dispatched { .. })
                | (TaskStatus::Failed { .. }, TaskStatus::Dispatched { .. })
                | (TaskStatus::Dispatched { .. }, TaskStatus::Succeeded { .. })
                | (TaskStatus::Dispatched { .. }, TaskStatus::Failed { .. })
                | (TaskStatus::Dispatched { .. }, TaskStatus::RetriesExhausted { .. })
                | (TaskStatus::Dispatched { .. }, TaskStatus::Pending)
        )
    }

    /// Succeeded or RetriesExhausted.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded { .. } | TaskStatus::RetriesExhausted { .. }
        )
    }

    /// Pending or Failed with budget left.
    pub fn is_eligible(&self) -> bool {
        matches!(self, TaskStatus::Pending | TaskStatus::Failed { .. })
    }

    /// Terminal in a way that lets the owning phase complete.
    pub fn allows_phase_completion(&self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded { .. }
                | TaskStatus::RetriesExhausted {
                    classification: Exhaustion::SkippedNonBlocking,
                    ..
                }
        )
    }

    pub fn is_blocking_failure(&self) -> bool {
        matches!(
            self,
            TaskStatus::RetriesExhausted {
                classification: Exhaustion::FailedBlocking,
                ..
            }
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Dispatched { attempt } => write!(f, "dispatched (attempt {})", attempt),
            TaskStatus::Failed { attempt, error } => {
                write!(f, "failed (attempt {}): {}", attempt, error)
            }
            TaskStatus::Succeeded { attempt } => write!(f, "succeeded (attempt {})", attempt),
            TaskStatus::RetriesExhausted {
                classification,
                reason,
            } => write!(f, "retries exhausted ({}): {}", classification, reason),
        }
    }
}

/// Tracker entry for one task: its status plus the number of attempts
/// already recorded in the execution ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub agent_id: AgentId,
    pub status: TaskStatus,
    /// Attempts that reached a recorded outcome.
    pub attempts: u32,
}

impl TaskRecord {
    /// A task that has never been attempted.
    pub fn new(agent_id: AgentId) -> Self {
        Self {
            agent_id,
            status: TaskStatus::Pending,
            attempts: 0,
        }
    }

    /// A task rebuilt from ledger history.
    pub fn restored(agent_id: AgentId, status: TaskStatus, attempts: u32) -> Self {
        Self {
            agent_id,
            status,
            attempts,
        }
    }

    /// Attempt number the next dispatch will use.
    pub fn next_attempt(&self) -> u32 {
        self.attempts + 1
    }

    fn transition(&mut self, target: TaskStatus) -> Result<()> {
        if !self.status.can_transition(&target) {
            return Err(Error::InvalidTaskTransition {
                agent: self.agent_id.to_string(),
                from: self.status.label().to_string(),
                to: target.label().to_string(),
            });
        }
        self.status = target;
        Ok(())
    }

    /// Move to Dispatched and return the attempt number.
    pub fn dispatch(&mut self) -> Result<u32> {
        let attempt = self.next_attempt();
        self.transition(TaskStatus::Dispatched { attempt })?;
        Ok(attempt)
    }

    pub fn succeed(&mut self, attempt: u32) -> Result<()> {
        self.transition(TaskStatus::Succeeded { attempt })?;
        self.attempts = attempt;
        Ok(())
    }

    /// Record a failed attempt that still has budget left.
    pub fn fail(&mut self, attempt: u32, error: &str) -> Result<()> {
        self.transition(TaskStatus::Failed {
            attempt,
            error: error.to_string(),
        })?;
        self.attempts = attempt;
        Ok(())
    }

    /// Record a failed attempt after which no retry is allowed.
    pub fn exhaust(&mut self, attempt: u32, classification: Exhaustion, reason: &str) -> Result<()> {
        self.transition(TaskStatus::RetriesExhausted {
            classification,
            reason: reason.to_string(),
        })?;
        self.attempts = attempt;
        Ok(())
    }

    /// Return an in-flight task to the eligible pool without consuming an attempt.
    pub fn interrupt(&mut self) -> Result<()> {
        self.transition(TaskStatus::Pending)
    }
}
