//! Core workflow type definitions.

use crate::core::task::{OutputFormat, Severity};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for one execution of a workflow.
///
/// Uses UUID v4 for generation and provides a short form display
/// for human-readable output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Create a new unique run identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RunId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Declarative workflow document as written by users.
///
/// This is the raw, unvalidated form. The loader turns it into a
/// [`WorkflowGraph`](crate::core::WorkflowGraph); the document itself is
/// stored as the run's snapshot so a resumed run sees the same graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub phases: Vec<PhaseDefinition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseDefinition {
    pub name: String,
    pub agents: Vec<AgentEntry>,
    #[serde(default)]
    pub parallel: bool,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

/// An agent listed in a phase: either a bare id or a detailed entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AgentEntry {
    Id(String),
    Detailed(AgentDefinition),
}

impl AgentEntry {
    pub fn id(&self) -> &str {
        match self {
            AgentEntry::Id(id) => id,
            AgentEntry::Detailed(def) => &def.id,
        }
    }

    /// Normalize into a detailed definition with no overrides.
    pub fn to_definition(&self) -> AgentDefinition {
        match self {
            AgentEntry::Id(id) => AgentDefinition::new(id),
            AgentEntry::Detailed(def) => def.clone(),
        }
    }
}

impl From<&str> for AgentEntry {
    fn from(id: &str) -> Self {
        AgentEntry::Id(id.to_string())
    }
}

/// Per-agent settings. Unset fields fall back to the engine config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDefinition {
    pub id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requires: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub optional: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_budget: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff_ms: Option<u64>,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub output: OutputFormat,
}

impl AgentDefinition {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            requires: Vec::new(),
            optional: Vec::new(),
            retry_budget: None,
            timeout_secs: None,
            backoff_ms: None,
            severity: Severity::Blocking,
            output: OutputFormat::Text,
        }
    }
}

/// Status of a phase within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    /// Waiting on dependency phases.
    #[default]
    Pending,
    /// Every dependency phase is Completed.
    Ready,
    /// Tasks are being dispatched.
    Running,
    /// Every task Succeeded or was skipped as non-blocking.
    Completed,
    /// A blocking task exhausted its retries.
    FailedBlocking,
}

impl PhaseStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PhaseStatus::Completed | PhaseStatus::FailedBlocking)
    }
}

impl std::fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PhaseStatus::Pending => write!(f, "pending"),
            PhaseStatus::Ready => write!(f, "ready"),
            PhaseStatus::Running => write!(f, "running"),
            PhaseStatus::Completed => write!(f, "completed"),
            PhaseStatus::FailedBlocking => write!(f, "failed_blocking"),
        }
    }
}

/// Status of a run in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Run in progress (or interrupted before it could record an outcome).
    #[default]
    Running,
    /// Every phase Completed.
    Completed,
    /// A blocking failure left at least one phase unable to complete.
    Aborted,
    /// Stopped by the cancellation signal; resumable.
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Aborted)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Running => write!(f, "running"),
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Aborted => write!(f, "aborted"),
            RunStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}
