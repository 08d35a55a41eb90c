//! Agent runner: the external collaborator that produces task output.
//!
//! The engine only sees the [`AgentRunner`] trait. [`CommandRunner`] is the
//! stock implementation, which runs a configured agent command headlessly
//! and feeds it the rendered context on stdin.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::core::AgentId;
use crate::error::{DefinitionError, ExecutorError};

use super::context::ContextBundle;

/// Longest stderr excerpt carried in a rejection.
const MAX_ERROR_CHARS: usize = 500;

/// Raw text returned by an agent before validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawOutput {
    pub content: String,
}

impl RawOutput {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }
}

#[async_trait]
pub trait AgentRunner: Send + Sync {
    /// Run `agent_id` once with `context`, giving up after `timeout`.
    async fn execute(
        &self,
        agent_id: &AgentId,
        context: &ContextBundle,
        timeout: Duration,
    ) -> Result<RawOutput, ExecutorError>;
}

/// Runs an external command per attempt.
///
/// The command receives the rendered context on stdin and
/// `CADENCE_AGENT_ID` / `CADENCE_RUN_ID` in its environment. Stdout is the
/// output; a non-zero exit is a rejection.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    program: String,
    args: Vec<String>,
}

impl CommandRunner {
    /// Parse a whitespace-separated command line such as `claude -p`.
    pub fn new(command: &str) -> Result<Self, DefinitionError> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| DefinitionError::Malformed("empty agent command".to_string()))?;
        Ok(Self {
            program,
            args: parts.collect(),
        })
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Resolve the program on `PATH`.
    pub fn locate(&self) -> Option<PathBuf> {
        which::which(&self.program).ok()
    }

    pub fn is_available(&self) -> bool {
        self.locate().is_some()
    }
}

#[async_trait]
impl AgentRunner for CommandRunner {
    async fn execute(
        &self,
        agent_id: &AgentId,
        context: &ContextBundle,
        timeout: Duration,
    ) -> Result<RawOutput, ExecutorError> {
        debug!(agent = %agent_id, program = %self.program, "spawning agent command");
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .env("CADENCE_AGENT_ID", agent_id.as_str())
            .env("CADENCE_RUN_ID", context.run_id.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ExecutorError::Transport(format!("{}: {}", self.program, e)))?;

        // Commands that exit without reading stdin close the pipe early.
        if let Some(mut stdin) = child.stdin.take() {
            match stdin.write_all(context.render().as_bytes()).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
                Err(e) => return Err(ExecutorError::Transport(e.to_string())),
            }
        }

        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| ExecutorError::Timeout(timeout))?
            .map_err(|e| ExecutorError::Transport(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let message = if stderr.trim().is_empty() {
                format!(
                    "{} exited with code {}",
                    self.program,
                    output.status.code().unwrap_or(-1)
                )
            } else {
                stderr.trim().chars().take(MAX_ERROR_CHARS).collect()
            };
            return Err(ExecutorError::Rejected(message));
        }

        Ok(RawOutput::new(
            String::from_utf8_lossy(&output.stdout).into_owned(),
        ))
    }
}
