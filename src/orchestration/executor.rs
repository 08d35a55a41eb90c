//! Task executor: runs exactly one attempt of one task.
//!
//! An attempt assembles context, calls the agent runner under the task's
//! timeout, validates the output, and writes the artifact and ledger record.
//! Every attempt that reaches an outcome is in the ledger before its report
//! is returned; the scheduler never learns of an unrecorded outcome.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::{TaskKey, TaskSpec};
use crate::error::{ContextError, Error, ExecutorError, Result};
use crate::state::{
    ArtifactRef, ArtifactStore, ExecutionLedger, ExecutionRecord, FailureKind, Stores,
};

use super::context::ContextAssembler;
use super::runner::AgentRunner;
use super::validator::OutputValidator;

/// Ledger summary for a structurally missing input.
pub const MISSING_DEPENDENCY: &str = "missing_dependency";

/// One attempt to execute.
#[derive(Debug, Clone)]
pub struct AttemptJob {
    pub key: TaskKey,
    pub spec: TaskSpec,
    /// 1-based attempt number.
    pub attempt: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// A new artifact version was written and recorded.
    Succeeded { version: u32 },
    /// The failure was recorded.
    Failed { kind: FailureKind, error: String },
    /// Cancelled before an outcome; nothing was recorded.
    Interrupted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptReport {
    pub key: TaskKey,
    pub attempt: u32,
    pub outcome: AttemptOutcome,
    /// Non-fatal notes, such as context budget overruns.
    pub warnings: Vec<String>,
}

impl AttemptReport {
    fn new(job: &AttemptJob, outcome: AttemptOutcome) -> Self {
        Self {
            key: job.key.clone(),
            attempt: job.attempt,
            outcome,
            warnings: Vec::new(),
        }
    }
}

pub struct TaskExecutor {
    stores: Stores,
    assembler: ContextAssembler,
    runner: Arc<dyn AgentRunner>,
    validator: Arc<dyn OutputValidator>,
    /// How long an in-flight call may continue after cancellation.
    cancel_grace: Duration,
}

impl TaskExecutor {
    pub fn new(
        stores: Stores,
        runner: Arc<dyn AgentRunner>,
        validator: Arc<dyn OutputValidator>,
        token_budget: usize,
        cancel_grace: Duration,
    ) -> Self {
        Self {
            assembler: ContextAssembler::new(Arc::clone(&stores.artifacts), token_budget),
            stores,
            runner,
            validator,
            cancel_grace,
        }
    }

    /// Run one attempt.
    ///
    /// # Errors
    /// Only store failures. Every task-level failure is an
    /// [`AttemptOutcome::Failed`] that has already been recorded.
    pub async fn attempt(&self, job: AttemptJob, cancel: &CancellationToken) -> Result<AttemptReport> {
        let spec = &job.spec;
        let agent_id = &job.key.agent_id;

        let delay = spec.retry.backoff.delay_before(job.attempt);
        if !delay.is_zero() {
            debug!(agent = %agent_id, attempt = job.attempt, ?delay, "backing off");
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Ok(AttemptReport::new(&job, AttemptOutcome::Interrupted));
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
        if cancel.is_cancelled() {
            return Ok(AttemptReport::new(&job, AttemptOutcome::Interrupted));
        }

        let started_at = Utc::now();
        let bundle = match self.assembler.assemble(job.key.run_id, spec).await {
            Ok(bundle) => bundle,
            Err(Error::Context(ContextError::MissingArtifact {
                agent_id: missing,
                required_by,
            })) => {
                warn!(
                    agent = %required_by,
                    missing = %missing,
                    "required input has no artifact"
                );
                return self
                    .record_failure(
                        &job,
                        started_at,
                        FailureKind::MissingDependency,
                        MISSING_DEPENDENCY,
                        Vec::new(),
                    )
                    .await;
            }
            Err(e) => return Err(e),
        };
        let inputs = bundle.inputs();

        debug!(agent = %agent_id, attempt = job.attempt, "invoking runner");
        let timeout = spec.timeout;
        let call = async {
            match tokio::time::timeout(timeout, self.runner.execute(agent_id, &bundle, timeout)).await
            {
                Ok(result) => result,
                Err(_) => Err(ExecutorError::Timeout(timeout)),
            }
        };
        tokio::pin!(call);

        let result = tokio::select! {
            result = &mut call => result,
            _ = cancel.cancelled() => {
                debug!(agent = %agent_id, grace = ?self.cancel_grace, "cancelled, waiting for in-flight call");
                match tokio::time::timeout(self.cancel_grace, &mut call).await {
                    Ok(result) => result,
                    Err(_) => {
                        warn!(agent = %agent_id, attempt = job.attempt, "force-stopped after grace period");
                        return Ok(AttemptReport::new(&job, AttemptOutcome::Interrupted));
                    }
                }
            }
        };

        let mut report = match result {
            Err(e) => {
                let kind = FailureKind::from(&e);
                self.record_failure(&job, started_at, kind, &e.to_string(), inputs)
                    .await?
            }
            Ok(raw) => match self.validator.validate(agent_id, spec.output, raw) {
                Err(e) => {
                    self.record_failure(
                        &job,
                        started_at,
                        FailureKind::Validation,
                        &e.reason,
                        inputs,
                    )
                    .await?
                }
                Ok(valid) => {
                    let artifact = self
                        .stores
                        .artifacts
                        .put(job.key.run_id, agent_id, &valid.content, job.attempt)
                        .await?;
                    let record =
                        ExecutionRecord::success(&job.key, job.attempt, started_at, &artifact, inputs);
                    self.stores.ledger.append(&record).await?;
                    info!(
                        agent = %agent_id,
                        attempt = job.attempt,
                        version = artifact.version,
                        "attempt succeeded"
                    );
                    AttemptReport::new(
                        &job,
                        AttemptOutcome::Succeeded {
                            version: artifact.version,
                        },
                    )
                }
            },
        };
        report.warnings = bundle.warnings.clone();
        Ok(report)
    }

    async fn record_failure(
        &self,
        job: &AttemptJob,
        started_at: DateTime<Utc>,
        kind: FailureKind,
        summary: &str,
        inputs: Vec<ArtifactRef>,
    ) -> Result<AttemptReport> {
        let record = ExecutionRecord::failure(&job.key, job.attempt, started_at, kind, summary, inputs);
        self.stores.ledger.append(&record).await?;
        warn!(
            agent = %job.key.agent_id,
            attempt = job.attempt,
            kind = %kind,
            error = summary,
            "attempt failed"
        );
        Ok(AttemptReport::new(
            job,
            AttemptOutcome::Failed {
                kind,
                error: summary.to_string(),
            },
        ))
    }
}
