//! Context assembly for task attempts.
//!
//! The `ContextAssembler` resolves a task's declared inputs to the latest
//! artifact of each upstream agent in the same run. A missing required
//! input is a structural failure; a missing optional input is passed along
//! as [`ContextInput::Absent`].

use std::fmt::Write as _;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::core::{AgentId, TaskSpec};
use crate::error::{ContextError, Result};
use crate::state::{Artifact, ArtifactRef, ArtifactStore};
use crate::workflow::RunId;

/// One upstream input as seen by the consuming task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextInput {
    Present(Artifact),
    /// An optional input that has no artifact.
    Absent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextEntry {
    pub agent_id: AgentId,
    pub required: bool,
    pub input: ContextInput,
}

/// Everything handed to the agent runner for one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextBundle {
    pub run_id: RunId,
    pub agent_id: AgentId,
    /// Required inputs first, then optional ones, each in declared order.
    pub entries: Vec<ContextEntry>,
    /// Sum of the present inputs' token estimates.
    pub token_estimate: usize,
    pub warnings: Vec<String>,
}

impl ContextBundle {
    pub fn get(&self, agent_id: &AgentId) -> Option<&ContextInput> {
        self.entries
            .iter()
            .find(|e| &e.agent_id == agent_id)
            .map(|e| &e.input)
    }

    /// Artifact versions actually consumed.
    pub fn inputs(&self) -> Vec<ArtifactRef> {
        self.entries
            .iter()
            .filter_map(|e| match &e.input {
                ContextInput::Present(artifact) => Some(artifact.reference()),
                ContextInput::Absent => None,
            })
            .collect()
    }

    /// Text form passed to the runner.
    pub fn render(&self) -> String {
        let mut out = String::from("## Context\n");
        if self.entries.is_empty() {
            out.push_str("\n(no upstream inputs)\n");
        }
        for entry in &self.entries {
            let _ = write!(out, "\n### {}", entry.agent_id);
            match &entry.input {
                ContextInput::Present(artifact) => {
                    let _ = writeln!(out, " (v{})\n", artifact.version);
                    out.push_str(artifact.content.trim_end());
                    out.push('\n');
                }
                ContextInput::Absent => out.push_str("\n\n(absent)\n"),
            }
        }
        let _ = write!(out, "\n## Task\n\nYou are agent {}.\n", self.agent_id);
        out
    }
}

pub struct ContextAssembler {
    artifacts: Arc<dyn ArtifactStore>,
    token_budget: usize,
}

impl ContextAssembler {
    pub fn new(artifacts: Arc<dyn ArtifactStore>, token_budget: usize) -> Self {
        Self {
            artifacts,
            token_budget,
        }
    }

    /// Build the input bundle for `task`.
    ///
    /// # Errors
    /// `ContextError::MissingArtifact` if a required input has no artifact;
    /// store failures otherwise.
    pub async fn assemble(&self, run_id: RunId, task: &TaskSpec) -> Result<ContextBundle> {
        let mut entries = Vec::with_capacity(task.requires.len() + task.optional.len());

        for upstream in &task.requires {
            let artifact = self
                .artifacts
                .latest(run_id, upstream)
                .await?
                .ok_or_else(|| ContextError::MissingArtifact {
                    agent_id: upstream.clone(),
                    required_by: task.agent_id.clone(),
                })?;
            entries.push(ContextEntry {
                agent_id: upstream.clone(),
                required: true,
                input: ContextInput::Present(artifact),
            });
        }

        for upstream in &task.optional {
            let input = match self.artifacts.latest(run_id, upstream).await? {
                Some(artifact) => ContextInput::Present(artifact),
                None => ContextInput::Absent,
            };
            entries.push(ContextEntry {
                agent_id: upstream.clone(),
                required: false,
                input,
            });
        }

        let token_estimate = entries
            .iter()
            .map(|e| match &e.input {
                ContextInput::Present(artifact) => artifact.token_estimate,
                ContextInput::Absent => 0,
            })
            .sum();

        let mut warnings = Vec::new();
        if token_estimate > self.token_budget {
            let warning = format!(
                "context for {} is ~{} tokens, over the {} token budget",
                task.agent_id, token_estimate, self.token_budget
            );
            warn!("{}", warning);
            warnings.push(warning);
        }

        debug!(
            agent = %task.agent_id,
            inputs = entries.len(),
            tokens = token_estimate,
            "context assembled"
        );

        Ok(ContextBundle {
            run_id,
            agent_id: task.agent_id.clone(),
            entries,
            token_estimate,
            warnings,
        })
    }
}
