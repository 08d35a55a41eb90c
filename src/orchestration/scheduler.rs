//! Scheduler for dependency-ordered task execution.
//!
//! The Scheduler owns the [`RunState`] for one run. It promotes phases as
//! their dependencies complete, dispatches eligible tasks to the
//! [`WorkerPool`] while it has capacity, and applies each attempt's outcome
//! to the task state machine. It is the only writer of run state; workers
//! report back through a channel.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::core::{AgentId, Exhaustion, Severity, TaskKey};
use crate::error::{Error, Result};
use crate::state::FailureKind;
use crate::workflow::{skipped_warning, PhaseStatus, RunState, RunStatus};

use super::executor::{AttemptJob, AttemptOutcome, AttemptReport, TaskExecutor};
use super::pool::{WorkerEvent, WorkerPool};

/// Events emitted by the scheduler for run lifecycle changes.
///
/// These let observers (the CLI, tests) follow a run without polling.
/// Events are sent from the scheduler loop in the order the changes
/// happen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerEvent {
    /// A phase's dependencies completed and it began dispatching.
    PhaseStarted { phase: String },
    /// Every task in the phase succeeded or was skipped.
    PhaseCompleted { phase: String },
    /// A blocking task in the phase exhausted its retries.
    PhaseFailed { phase: String },
    /// An attempt was handed to the worker pool.
    TaskDispatched {
        agent_id: AgentId,
        phase: String,
        attempt: u32,
    },
    /// An attempt failed and another is allowed.
    AttemptFailed {
        agent_id: AgentId,
        attempt: u32,
        kind: FailureKind,
        error: String,
    },
    TaskSucceeded {
        agent_id: AgentId,
        attempt: u32,
        version: u32,
    },
    /// No further attempts will be made.
    TaskExhausted {
        agent_id: AgentId,
        classification: Exhaustion,
        reason: String,
    },
    /// An attempt was cut short by cancellation and not recorded.
    TaskInterrupted { agent_id: AgentId },
    /// The run stopped with this status.
    RunFinished { status: RunStatus },
}

/// Drives one run to a terminal or cancelled state.
///
/// # Example
///
/// ```ignore
/// let scheduler = Scheduler::new(state, executor, 4, cancel, Some(event_tx));
/// let (state, status) = scheduler.run().await?;
/// ```
pub struct Scheduler {
    state: RunState,
    pool: WorkerPool,
    worker_rx: mpsc::UnboundedReceiver<WorkerEvent>,
    events: Option<mpsc::UnboundedSender<SchedulerEvent>>,
    cancel: CancellationToken,
    /// First infrastructure failure; stops dispatch and fails the run.
    fatal: Option<Error>,
}

impl Scheduler {
    /// Create a scheduler.
    ///
    /// # Arguments
    ///
    /// * `state` - Fresh or restored run state
    /// * `executor` - Runs single attempts
    /// * `max_in_flight` - Worker pool bound
    /// * `cancel` - Run-scoped cancellation signal
    /// * `events` - Optional observer channel
    pub fn new(
        state: RunState,
        executor: Arc<TaskExecutor>,
        max_in_flight: usize,
        cancel: CancellationToken,
        events: Option<mpsc::UnboundedSender<SchedulerEvent>>,
    ) -> Self {
        let (worker_tx, worker_rx) = mpsc::unbounded_channel();
        let pool = WorkerPool::new(executor, max_in_flight, cancel.clone(), worker_tx);
        Self {
            state,
            pool,
            worker_rx,
            events,
            cancel,
            fatal: None,
        }
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    /// Get the number of attempts currently in flight.
    pub fn active_count(&self) -> usize {
        self.pool.active_count()
    }

    fn stopping(&self) -> bool {
        self.fatal.is_some() || self.cancel.is_cancelled()
    }

    fn emit(&self, event: SchedulerEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    /// Apply phase transitions implied by current task statuses.
    ///
    /// Phases are promoted to Running only while the run is not stopping.
    pub fn advance_phases(&mut self) -> Result<()> {
        let promote = !self.stopping();
        for change in self.state.advance_phases(promote)? {
            match change.status {
                PhaseStatus::Running => {
                    info!(phase = %change.phase, "phase started");
                    self.emit(SchedulerEvent::PhaseStarted {
                        phase: change.phase,
                    });
                }
                PhaseStatus::Completed => {
                    info!(phase = %change.phase, "phase completed");
                    self.emit(SchedulerEvent::PhaseCompleted {
                        phase: change.phase,
                    });
                }
                PhaseStatus::FailedBlocking => {
                    error!(phase = %change.phase, "phase failed on a blocking task");
                    self.emit(SchedulerEvent::PhaseFailed {
                        phase: change.phase,
                    });
                }
                PhaseStatus::Pending | PhaseStatus::Ready => {}
            }
        }
        Ok(())
    }

    /// Dispatch eligible tasks while the pool has capacity.
    ///
    /// Returns the number of attempts dispatched.
    pub fn dispatch_ready_tasks(&mut self) -> Result<usize> {
        if self.stopping() {
            return Ok(0);
        }
        let run_id = self.state.run_id();
        let ready: Vec<_> = self
            .state
            .dispatchable()
            .into_iter()
            .filter(|spec| !self.pool.is_in_flight(&spec.agent_id))
            .cloned()
            .collect();

        let mut dispatched = 0;
        for spec in ready {
            if !self.pool.has_capacity() {
                break;
            }
            let attempt = self.state.task_mut(&spec.agent_id)?.dispatch()?;
            let key = TaskKey::new(run_id, &spec.phase, spec.agent_id.clone());
            debug!(task = %key, attempt, "dispatching");
            self.emit(SchedulerEvent::TaskDispatched {
                agent_id: spec.agent_id.clone(),
                phase: spec.phase.clone(),
                attempt,
            });
            self.pool.spawn(AttemptJob { key, spec, attempt })?;
            dispatched += 1;
        }
        Ok(dispatched)
    }

    /// Handle one worker event.
    pub fn handle_event(&mut self, event: WorkerEvent) -> Result<()> {
        self.pool.release(event.agent_id());
        match event {
            WorkerEvent::Finished(report) => self.handle_report(report),
            WorkerEvent::Crashed { agent_id, error } => {
                error!(agent = %agent_id, error = %error, "attempt crashed, stopping run");
                self.state.task_mut(&agent_id)?.interrupt()?;
                if self.fatal.is_none() {
                    self.fatal = Some(error);
                }
                self.cancel.cancel();
                Ok(())
            }
        }
    }

    fn handle_report(&mut self, report: AttemptReport) -> Result<()> {
        for warning in report.warnings {
            self.state.add_warning(warning);
        }

        let agent_id = report.key.agent_id;
        let attempt = report.attempt;
        let spec = self
            .state
            .graph()
            .task(&agent_id)
            .cloned()
            .ok_or_else(|| Error::UnknownTask(agent_id.to_string()))?;

        match report.outcome {
            AttemptOutcome::Succeeded { version } => {
                self.state.task_mut(&agent_id)?.succeed(attempt)?;
                self.emit(SchedulerEvent::TaskSucceeded {
                    agent_id,
                    attempt,
                    version,
                });
            }
            AttemptOutcome::Failed { kind, error } => {
                let retry = !kind.is_structural() && spec.retry.allows_retry_after(attempt);
                if retry {
                    debug!(agent = %agent_id, attempt, kind = %kind, "attempt failed, will retry");
                    self.state.task_mut(&agent_id)?.fail(attempt, &error)?;
                    self.emit(SchedulerEvent::AttemptFailed {
                        agent_id,
                        attempt,
                        kind,
                        error,
                    });
                } else {
                    let classification = spec.severity.classify();
                    self.state
                        .task_mut(&agent_id)?
                        .exhaust(attempt, classification, &error)?;
                    match spec.severity {
                        Severity::NonBlocking => {
                            warn!(agent = %agent_id, error = %error, "non-blocking task skipped");
                            self.state.add_warning(skipped_warning(&agent_id, &error));
                        }
                        Severity::Blocking => {
                            error!(agent = %agent_id, error = %error, "blocking task exhausted retries");
                        }
                    }
                    self.emit(SchedulerEvent::TaskExhausted {
                        agent_id,
                        classification,
                        reason: error,
                    });
                }
            }
            AttemptOutcome::Interrupted => {
                self.state.task_mut(&agent_id)?.interrupt()?;
                self.emit(SchedulerEvent::TaskInterrupted { agent_id });
            }
        }
        Ok(())
    }

    /// Run the scheduling loop until nothing is in flight and nothing more
    /// can be dispatched.
    ///
    /// This is the main entry point. It:
    /// 1. Advances phases whose dependencies completed
    /// 2. Dispatches eligible tasks up to the pool's capacity
    /// 3. Waits for one attempt to finish and applies its outcome
    /// 4. Repeats until quiescent
    ///
    /// # Returns
    ///
    /// The final run state and status. A cancelled run drains its in-flight
    /// attempts first.
    ///
    /// # Errors
    ///
    /// Store failures reported by a worker; the run is left resumable.
    pub async fn run(mut self) -> Result<(RunState, RunStatus)> {
        loop {
            self.advance_phases()?;
            self.dispatch_ready_tasks()?;

            if self.pool.active_count() == 0 {
                break;
            }

            tokio::select! {
                event = self.worker_rx.recv() => match event {
                    Some(event) => self.handle_event(event)?,
                    None => break,
                },
                _ = self.cancel.cancelled(), if !self.cancel.is_cancelled() => {
                    warn!(
                        run = %self.state.run_id(),
                        in_flight = self.pool.active_count(),
                        "cancellation requested, draining"
                    );
                }
            }
        }

        if let Some(error) = self.fatal.take() {
            error!(run = %self.state.run_id(), error = %error, "run stopped on store failure");
            return Err(error);
        }

        let status = self.state.final_status(self.cancel.is_cancelled());
        info!(run = %self.state.run_id(), status = %status, "run finished");
        self.emit(SchedulerEvent::RunFinished { status });
        Ok((self.state, status))
    }
}
