//! Engine facade: starts, resumes and inspects runs.
//!
//! The engine owns nothing between calls except its collaborators. Each run
//! gets a fresh [`Scheduler`] whose state is built either from scratch or
//! from the execution ledger, so a crashed or cancelled run is resumed the
//! same way regardless of how it stopped.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::core::{AgentId, TaskStatus, WorkflowGraph};
use crate::error::{Error, Result};
use crate::state::{ExecutionRecord, RunMetadata, Stores};
use crate::workflow::{loader, PhaseStatus, RunId, RunState, RunStatus, WorkflowDefinition};

use super::executor::TaskExecutor;
use super::runner::AgentRunner;
use super::scheduler::{Scheduler, SchedulerEvent};
use super::validator::{FormatValidator, OutputValidator};

/// Summary of a run, in declared phase and task order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub run_id: RunId,
    pub status: RunStatus,
    pub phases: Vec<(String, PhaseStatus)>,
    pub tasks: Vec<(AgentId, TaskStatus)>,
    pub warnings: Vec<String>,
}

impl RunReport {
    fn new(state: &RunState, status: RunStatus, warnings: Vec<String>) -> Self {
        Self {
            run_id: state.run_id(),
            status,
            phases: state.phase_statuses(),
            tasks: state.task_statuses(),
            warnings,
        }
    }

    pub fn task(&self, agent_id: &AgentId) -> Option<&TaskStatus> {
        self.tasks
            .iter()
            .find(|(id, _)| id == agent_id)
            .map(|(_, status)| status)
    }

    pub fn phase(&self, name: &str) -> Option<PhaseStatus> {
        self.phases
            .iter()
            .find(|(phase, _)| phase == name)
            .map(|(_, status)| *status)
    }
}

/// Workflow engine.
///
/// # Example
///
/// ```ignore
/// let engine = Engine::new(config, Stores::file(&state_dir), Arc::new(runner));
/// let report = engine.start(definition).await?;
/// if report.status == RunStatus::Cancelled {
///     engine.resume(report.run_id).await?;
/// }
/// ```
pub struct Engine {
    config: Config,
    stores: Stores,
    runner: Arc<dyn AgentRunner>,
    validator: Arc<dyn OutputValidator>,
    cancel: CancellationToken,
    events: Option<mpsc::UnboundedSender<SchedulerEvent>>,
}

impl Engine {
    pub fn new(config: Config, stores: Stores, runner: Arc<dyn AgentRunner>) -> Self {
        Self {
            config,
            stores,
            runner,
            validator: Arc::new(FormatValidator),
            cancel: CancellationToken::new(),
            events: None,
        }
    }

    pub fn with_validator(mut self, validator: Arc<dyn OutputValidator>) -> Self {
        self.validator = validator;
        self
    }

    /// Send scheduler lifecycle events to `tx`.
    pub fn with_events(mut self, tx: mpsc::UnboundedSender<SchedulerEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    /// Token that cancels every run driven by this engine. Cancelling it is
    /// permanent; later runs stop before dispatching anything.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    /// Validate `definition`, record a new run and drive it.
    ///
    /// # Errors
    ///
    /// `Definition` errors before anything is persisted; store failures
    /// after, leaving the run resumable.
    pub async fn start(&self, definition: WorkflowDefinition) -> Result<RunReport> {
        let graph = loader::build(&definition, &self.config)?;
        let run_id = RunId::new();
        let metadata = RunMetadata::new(run_id, definition);
        self.stores.runs.save_run(&metadata).await?;
        info!(
            run = %run_id,
            workflow = graph.name(),
            phases = graph.phase_count(),
            tasks = graph.task_count(),
            "run started"
        );
        let state = RunState::new(run_id, Arc::new(graph));
        self.drive(metadata, state).await
    }

    /// Continue a run from its ledger.
    ///
    /// Tasks with a recorded success are not re-run; failed tasks keep
    /// their attempt counts.
    pub async fn resume(&self, run_id: RunId) -> Result<RunReport> {
        let mut metadata = self.load_metadata(run_id).await?;
        let state = self.restore(&metadata).await?;
        info!(run = %run_id, previous = %metadata.status, "resuming run");
        metadata.status = RunStatus::Running;
        metadata.touch();
        self.stores.runs.save_run(&metadata).await?;
        self.drive(metadata, state).await
    }

    /// Current state of a run as reconstructed from its ledger.
    pub async fn status(&self, run_id: RunId) -> Result<RunReport> {
        let metadata = self.load_metadata(run_id).await?;
        let mut state = self.restore(&metadata).await?;
        state.settle()?;
        let mut warnings = metadata.warnings.clone();
        merge_warnings(&mut warnings, state.warnings());
        Ok(RunReport::new(&state, metadata.status, warnings))
    }

    /// Recorded attempts for a run, or for one task of it.
    pub async fn history(
        &self,
        run_id: RunId,
        agent_id: Option<&AgentId>,
    ) -> Result<Vec<ExecutionRecord>> {
        self.load_metadata(run_id).await?;
        match agent_id {
            Some(agent_id) => self.stores.ledger.attempts(run_id, agent_id).await,
            None => self.stores.ledger.records(run_id).await,
        }
    }

    async fn load_metadata(&self, run_id: RunId) -> Result<RunMetadata> {
        self.stores
            .runs
            .load_run(run_id)
            .await?
            .ok_or_else(|| Error::RunNotFound(run_id.to_string()))
    }

    async fn restore(&self, metadata: &RunMetadata) -> Result<RunState> {
        let graph: WorkflowGraph = loader::build(&metadata.workflow, &self.config)?;
        let records = self.stores.ledger.records(metadata.run_id).await?;
        Ok(RunState::restore(metadata.run_id, Arc::new(graph), &records))
    }

    async fn drive(&self, mut metadata: RunMetadata, state: RunState) -> Result<RunReport> {
        let run_id = metadata.run_id;
        let executor = TaskExecutor::new(
            self.stores.clone(),
            Arc::clone(&self.runner),
            Arc::clone(&self.validator),
            self.config.context_token_budget,
            self.config.cancel_grace(),
        );
        let scheduler = Scheduler::new(
            state,
            Arc::new(executor),
            self.config.max_in_flight,
            self.cancel.child_token(),
            self.events.clone(),
        );

        let (state, status) = match scheduler.run().await {
            Ok(done) => done,
            Err(e) => {
                error!(run = %run_id, error = %e, "run stopped, left resumable");
                return Err(e);
            }
        };

        merge_warnings(&mut metadata.warnings, state.warnings());
        metadata.status = status;
        metadata.touch();
        self.stores.runs.save_run(&metadata).await?;

        match status {
            RunStatus::Completed => info!(run = %run_id, "run completed"),
            RunStatus::Cancelled => warn!(run = %run_id, "run cancelled"),
            RunStatus::Aborted => error!(run = %run_id, "run aborted"),
            RunStatus::Running => {}
        }
        Ok(RunReport::new(&state, status, metadata.warnings))
    }
}

/// Append warnings not already present. Resumed runs re-derive some.
fn merge_warnings(into: &mut Vec<String>, new: &[String]) {
    for warning in new {
        if !into.contains(warning) {
            into.push(warning.clone());
        }
    }
}
