//! Durable run state: artifacts, the execution ledger and run metadata.
//!
//! The three stores are separate traits so that each can be backed
//! independently. [`Stores`] bundles one of each for the engine.

mod file;
mod memory;
mod records;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::core::AgentId;
use crate::error::Result;
use crate::workflow::RunId;

pub use file::FileStore;
pub use memory::MemoryStore;
pub use records::{
    estimate_tokens, hash_content, Artifact, ArtifactRef, ExecutionRecord, FailureKind, Outcome,
    RunMetadata,
};

/// Versioned, append-only storage for task outputs.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Append a new version for `(run_id, agent_id)` and return it.
    async fn put(
        &self,
        run_id: RunId,
        agent_id: &AgentId,
        content: &str,
        attempt_number: u32,
    ) -> Result<Artifact>;

    /// Highest version for the key, if any.
    async fn latest(&self, run_id: RunId, agent_id: &AgentId) -> Result<Option<Artifact>>;

    async fn get_version(
        &self,
        run_id: RunId,
        agent_id: &AgentId,
        version: u32,
    ) -> Result<Option<Artifact>>;

    /// All stored versions for the key, ascending.
    async fn versions(&self, run_id: RunId, agent_id: &AgentId) -> Result<Vec<u32>>;
}

/// Append-only log of task attempts.
#[async_trait]
pub trait ExecutionLedger: Send + Sync {
    /// Durably append one record.
    async fn append(&self, record: &ExecutionRecord) -> Result<()>;

    /// All attempts for one task, ordered by attempt number.
    async fn attempts(&self, run_id: RunId, agent_id: &AgentId) -> Result<Vec<ExecutionRecord>>;

    /// All attempts in a run.
    async fn records(&self, run_id: RunId) -> Result<Vec<ExecutionRecord>>;
}

#[async_trait]
pub trait RunStore: Send + Sync {
    async fn save_run(&self, metadata: &RunMetadata) -> Result<()>;

    async fn load_run(&self, run_id: RunId) -> Result<Option<RunMetadata>>;

    /// All known runs, most recently created first.
    async fn list_runs(&self) -> Result<Vec<RunMetadata>>;
}

/// One handle to each store.
#[derive(Clone)]
pub struct Stores {
    pub artifacts: Arc<dyn ArtifactStore>,
    pub ledger: Arc<dyn ExecutionLedger>,
    pub runs: Arc<dyn RunStore>,
}

impl Stores {
    pub fn new(
        artifacts: Arc<dyn ArtifactStore>,
        ledger: Arc<dyn ExecutionLedger>,
        runs: Arc<dyn RunStore>,
    ) -> Self {
        Self {
            artifacts,
            ledger,
            runs,
        }
    }

    /// All three stores backed by one in-process map.
    pub fn in_memory() -> Self {
        Self::shared(Arc::new(MemoryStore::new()))
    }

    /// All three stores backed by files under `root`.
    pub fn file(root: &Path) -> Self {
        Self::shared(Arc::new(FileStore::new(root)))
    }

    fn shared<S>(store: Arc<S>) -> Self
    where
        S: ArtifactStore + ExecutionLedger + RunStore + 'static,
    {
        Self {
            artifacts: store.clone(),
            ledger: store.clone(),
            runs: store,
        }
    }
}

impl std::fmt::Debug for Stores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stores").finish_non_exhaustive()
    }
}
