//! In-process store used by tests and embedders that do not need durability.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{Artifact, ArtifactStore, ExecutionLedger, ExecutionRecord, RunMetadata, RunStore};
use crate::core::AgentId;
use crate::error::Result;
use crate::workflow::RunId;

type Key = (RunId, AgentId);

#[derive(Debug, Default)]
pub struct MemoryStore {
    artifacts: RwLock<HashMap<Key, Vec<Artifact>>>,
    ledger: RwLock<HashMap<RunId, Vec<ExecutionRecord>>>,
    runs: RwLock<HashMap<RunId, RunMetadata>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ArtifactStore for MemoryStore {
    async fn put(
        &self,
        run_id: RunId,
        agent_id: &AgentId,
        content: &str,
        attempt_number: u32,
    ) -> Result<Artifact> {
        let mut artifacts = self.artifacts.write().await;
        let versions = artifacts.entry((run_id, agent_id.clone())).or_default();
        let version = versions.last().map(|a| a.version + 1).unwrap_or(1);
        let artifact = Artifact::new(
            run_id,
            agent_id.clone(),
            version,
            content.to_string(),
            attempt_number,
        );
        versions.push(artifact.clone());
        Ok(artifact)
    }

    async fn latest(&self, run_id: RunId, agent_id: &AgentId) -> Result<Option<Artifact>> {
        let artifacts = self.artifacts.read().await;
        Ok(artifacts
            .get(&(run_id, agent_id.clone()))
            .and_then(|versions| versions.last().cloned()))
    }

    async fn get_version(
        &self,
        run_id: RunId,
        agent_id: &AgentId,
        version: u32,
    ) -> Result<Option<Artifact>> {
        let artifacts = self.artifacts.read().await;
        Ok(artifacts
            .get(&(run_id, agent_id.clone()))
            .and_then(|versions| versions.iter().find(|a| a.version == version).cloned()))
    }

    async fn versions(&self, run_id: RunId, agent_id: &AgentId) -> Result<Vec<u32>> {
        let artifacts = self.artifacts.read().await;
        Ok(artifacts
            .get(&(run_id, agent_id.clone()))
            .map(|versions| versions.iter().map(|a| a.version).collect())
            .unwrap_or_default())
    }
}

#[async_trait]
impl ExecutionLedger for MemoryStore {
    async fn append(&self, record: &ExecutionRecord) -> Result<()> {
        self.ledger
            .write()
            .await
            .entry(record.run_id)
            .or_default()
            .push(record.clone());
        Ok(())
    }

    async fn attempts(&self, run_id: RunId, agent_id: &AgentId) -> Result<Vec<ExecutionRecord>> {
        let ledger = self.ledger.read().await;
        let mut records: Vec<ExecutionRecord> = ledger
            .get(&run_id)
            .map(|records| {
                records
                    .iter()
                    .filter(|r| &r.agent_id == agent_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        records.sort_by_key(|r| r.attempt_number);
        Ok(records)
    }

    async fn records(&self, run_id: RunId) -> Result<Vec<ExecutionRecord>> {
        let ledger = self.ledger.read().await;
        Ok(ledger.get(&run_id).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl RunStore for MemoryStore {
    async fn save_run(&self, metadata: &RunMetadata) -> Result<()> {
        self.runs
            .write()
            .await
            .insert(metadata.run_id, metadata.clone());
        Ok(())
    }

    async fn load_run(&self, run_id: RunId) -> Result<Option<RunMetadata>> {
        Ok(self.runs.read().await.get(&run_id).cloned())
    }

    async fn list_runs(&self) -> Result<Vec<RunMetadata>> {
        let mut runs: Vec<RunMetadata> = self.runs.read().await.values().cloned().collect();
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(runs)
    }
}
