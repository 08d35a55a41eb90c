use std::time::Duration;

use thiserror::Error;

use crate::core::task::AgentId;

/// Reasons a workflow definition is rejected at load time.
///
/// These are never retried: a malformed graph stays malformed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DefinitionError {
    #[error("Workflow has no phases")]
    Empty,

    #[error("Invalid phase name: {0:?}")]
    InvalidPhaseName(String),

    #[error("Duplicate phase: {0}")]
    DuplicatePhase(String),

    #[error("Invalid agent id: {0:?}")]
    InvalidAgentId(String),

    #[error("Agent {agent} appears in both phase {first} and phase {second}")]
    DuplicateAgent {
        agent: String,
        first: String,
        second: String,
    },

    #[error("Phase {phase} depends on unknown phase {missing}")]
    UnknownPhase { phase: String, missing: String },

    #[error("Dependency cycle detected at phase: {0}")]
    Cycle(String),

    #[error("Agent {agent} requires unknown agent {missing}")]
    UnknownRequirement { agent: String, missing: String },

    #[error("Agent {0} cannot require its own output")]
    SelfRequirement(String),

    #[error("Agent {agent} requires {required}, which is not guaranteed to finish first")]
    UnorderedRequirement { agent: String, required: String },

    #[error("Malformed workflow definition: {0}")]
    Malformed(String),
}

/// Failure to build a task's input bundle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContextError {
    #[error("Missing artifact from {agent_id} required by {required_by}")]
    MissingArtifact {
        agent_id: AgentId,
        required_by: AgentId,
    },
}

/// Failure reported by the external agent runner.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutorError {
    #[error("Agent timed out after {0:?}")]
    Timeout(Duration),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Agent rejected the request: {0}")]
    Rejected(String),
}

/// Structural rejection of an agent's raw output.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Output from {agent_id} failed validation: {reason}")]
pub struct ValidationError {
    pub agent_id: AgentId,
    pub reason: String,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Definition error: {0}")]
    Definition(#[from] DefinitionError),

    #[error("Context error: {0}")]
    Context(#[from] ContextError),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Run not found: {0}")]
    RunNotFound(String),

    #[error("Task join error: {0}")]
    TaskJoin(String),

    #[error("Invalid task transition for {agent} from {from} to {to}")]
    InvalidTaskTransition {
        agent: String,
        from: String,
        to: String,
    },

    #[error("Invalid phase transition for {phase} from {from} to {to}")]
    InvalidPhaseTransition {
        phase: String,
        from: String,
        to: String,
    },

    #[error("Worker pool is full (max: {max})")]
    WorkerPoolFull { max: usize },

    #[error("Unknown task: {0}")]
    UnknownTask(String),
}

pub type Result<T> = std::result::Result<T, Error>;
