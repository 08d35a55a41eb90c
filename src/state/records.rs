//! Persisted record types: artifacts, execution records and run metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::core::{AgentId, TaskKey};
use crate::error::ExecutorError;
use crate::workflow::{RunId, RunStatus, WorkflowDefinition};

/// Characters per estimated token.
const CHARS_PER_TOKEN: usize = 4;

/// Immutable, versioned output of one successful attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub run_id: RunId,
    pub agent_id: AgentId,
    /// 1-based, strictly increasing per `(run_id, agent_id)`.
    pub version: u32,
    pub content: String,
    /// SHA-256 of `content`, lowercase hex.
    pub content_hash: String,
    pub produced_at: DateTime<Utc>,
    pub attempt_number: u32,
    pub token_estimate: usize,
}

impl Artifact {
    pub fn new(
        run_id: RunId,
        agent_id: AgentId,
        version: u32,
        content: String,
        attempt_number: u32,
    ) -> Self {
        Self {
            run_id,
            agent_id,
            version,
            content_hash: hash_content(&content),
            token_estimate: estimate_tokens(&content),
            content,
            produced_at: Utc::now(),
            attempt_number,
        }
    }

    /// Whether the stored hash still matches the content.
    pub fn verify(&self) -> bool {
        self.content_hash == hash_content(&self.content)
    }

    pub fn reference(&self) -> ArtifactRef {
        ArtifactRef {
            agent_id: self.agent_id.clone(),
            version: self.version,
        }
    }
}

pub fn hash_content(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

pub fn estimate_tokens(content: &str) -> usize {
    content.len().div_ceil(CHARS_PER_TOKEN)
}

/// A specific artifact version consumed by an attempt.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub agent_id: AgentId,
    pub version: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure,
    Timeout,
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Success => write!(f, "success"),
            Outcome::Failure => write!(f, "failure"),
            Outcome::Timeout => write!(f, "timeout"),
        }
    }
}

/// Why an attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    Transport,
    Rejected,
    Validation,
    MissingDependency,
}

impl FailureKind {
    /// Failures that retrying cannot fix.
    pub fn is_structural(&self) -> bool {
        matches!(self, FailureKind::MissingDependency)
    }

    pub fn outcome(&self) -> Outcome {
        match self {
            FailureKind::Timeout => Outcome::Timeout,
            _ => Outcome::Failure,
        }
    }
}

impl From<&ExecutorError> for FailureKind {
    fn from(err: &ExecutorError) -> Self {
        match err {
            ExecutorError::Timeout(_) => FailureKind::Timeout,
            ExecutorError::Transport(_) => FailureKind::Transport,
            ExecutorError::Rejected(_) => FailureKind::Rejected,
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::Transport => write!(f, "transport"),
            FailureKind::Rejected => write!(f, "rejected"),
            FailureKind::Validation => write!(f, "validation"),
            FailureKind::MissingDependency => write!(f, "missing_dependency"),
        }
    }
}

/// One row per task attempt. Append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub run_id: RunId,
    pub phase: String,
    pub agent_id: AgentId,
    pub attempt_number: u32,
    pub outcome: Outcome,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_kind: Option<FailureKind>,
    /// Version written by a successful attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_version: Option<u32>,
    #[serde(default)]
    pub inputs: Vec<ArtifactRef>,
}

impl ExecutionRecord {
    pub fn success(
        key: &TaskKey,
        attempt_number: u32,
        started_at: DateTime<Utc>,
        artifact: &Artifact,
        inputs: Vec<ArtifactRef>,
    ) -> Self {
        Self {
            run_id: key.run_id,
            phase: key.phase.clone(),
            agent_id: key.agent_id.clone(),
            attempt_number,
            outcome: Outcome::Success,
            started_at,
            finished_at: Utc::now(),
            error_summary: None,
            failure_kind: None,
            artifact_version: Some(artifact.version),
            inputs,
        }
    }

    pub fn failure(
        key: &TaskKey,
        attempt_number: u32,
        started_at: DateTime<Utc>,
        kind: FailureKind,
        summary: &str,
        inputs: Vec<ArtifactRef>,
    ) -> Self {
        Self {
            run_id: key.run_id,
            phase: key.phase.clone(),
            agent_id: key.agent_id.clone(),
            attempt_number,
            outcome: kind.outcome(),
            started_at,
            finished_at: Utc::now(),
            error_summary: Some(summary.to_string()),
            failure_kind: Some(kind),
            artifact_version: None,
            inputs,
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Success
    }
}

/// Durable per-run metadata, including the workflow snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub run_id: RunId,
    pub workflow: WorkflowDefinition,
    pub status: RunStatus,
    #[serde(default)]
    pub warnings: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RunMetadata {
    pub fn new(run_id: RunId, workflow: WorkflowDefinition) -> Self {
        let now = Utc::now();
        Self {
            run_id,
            workflow,
            status: RunStatus::Running,
            warnings: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
