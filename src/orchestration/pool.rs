//! Worker pool for bounded concurrent task attempts.
//!
//! The `WorkerPool` runs attempts on tokio tasks, never more than
//! `max_in_flight` at once, and reports each finished attempt on a
//! channel. It does not touch run state; the scheduler owns that and
//! releases a slot when it has handled the attempt's event.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::core::AgentId;
use crate::error::{Error, Result};

use super::executor::{AttemptJob, AttemptReport, TaskExecutor};

/// Events emitted by the pool when an attempt ends.
#[derive(Debug)]
pub enum WorkerEvent {
    /// The attempt reached an outcome (or was interrupted).
    Finished(AttemptReport),
    /// The attempt could not run to an outcome: a store failure or a
    /// panicked worker. Nothing is known about what was recorded.
    Crashed { agent_id: AgentId, error: Error },
}

impl WorkerEvent {
    pub fn agent_id(&self) -> &AgentId {
        match self {
            WorkerEvent::Finished(report) => &report.key.agent_id,
            WorkerEvent::Crashed { agent_id, .. } => agent_id,
        }
    }
}

/// Runs task attempts with a fixed concurrency limit.
///
/// # Example
///
/// ```ignore
/// let (tx, mut rx) = mpsc::unbounded_channel();
/// let mut pool = WorkerPool::new(executor, 4, CancellationToken::new(), tx);
///
/// if pool.has_capacity() {
///     pool.spawn(job)?;
/// }
/// let event = rx.recv().await;
/// pool.release(event.agent_id());
/// ```
pub struct WorkerPool {
    executor: Arc<TaskExecutor>,
    permits: Arc<Semaphore>,
    max_in_flight: usize,
    /// Agents whose attempt has not been released yet.
    in_flight: HashSet<AgentId>,
    cancel: CancellationToken,
    event_tx: mpsc::UnboundedSender<WorkerEvent>,
}

impl WorkerPool {
    /// Create a pool. A limit of zero is treated as one.
    pub fn new(
        executor: Arc<TaskExecutor>,
        max_in_flight: usize,
        cancel: CancellationToken,
        event_tx: mpsc::UnboundedSender<WorkerEvent>,
    ) -> Self {
        let max_in_flight = max_in_flight.max(1);
        Self {
            executor,
            permits: Arc::new(Semaphore::new(max_in_flight)),
            max_in_flight,
            in_flight: HashSet::new(),
            cancel,
            event_tx,
        }
    }

    /// Start one attempt.
    ///
    /// # Errors
    ///
    /// Returns `WorkerPoolFull` if no slot is free.
    pub fn spawn(&mut self, job: AttemptJob) -> Result<()> {
        if !self.has_capacity() {
            return Err(Error::WorkerPoolFull {
                max: self.max_in_flight,
            });
        }
        let permit = Arc::clone(&self.permits)
            .try_acquire_owned()
            .map_err(|_| Error::WorkerPoolFull {
                max: self.max_in_flight,
            })?;

        let agent_id = job.key.agent_id.clone();
        self.in_flight.insert(agent_id.clone());
        debug!(agent = %agent_id, attempt = job.attempt, "worker spawned");

        let executor = Arc::clone(&self.executor);
        let cancel = self.cancel.clone();
        let tx = self.event_tx.clone();

        // The attempt runs in its own task so a panic surfaces as a JoinError.
        let handle = tokio::spawn(async move { executor.attempt(job, &cancel).await });
        tokio::spawn(async move {
            let event = match handle.await {
                Ok(Ok(report)) => WorkerEvent::Finished(report),
                Ok(Err(error)) => WorkerEvent::Crashed { agent_id, error },
                Err(join) => {
                    error!(agent = %agent_id, error = %join, "worker panicked");
                    WorkerEvent::Crashed {
                        agent_id,
                        error: Error::TaskJoin(join.to_string()),
                    }
                }
            };
            drop(permit);
            let _ = tx.send(event);
        });
        Ok(())
    }

    /// Free the slot held by `agent_id`. Returns false if it held none.
    pub fn release(&mut self, agent_id: &AgentId) -> bool {
        self.in_flight.remove(agent_id)
    }

    pub fn is_in_flight(&self, agent_id: &AgentId) -> bool {
        self.in_flight.contains(agent_id)
    }

    pub fn active_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn has_capacity(&self) -> bool {
        self.active_count() < self.max_in_flight
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }
}
