//! File-backed store.
//!
//! Layout under the root directory:
//!
//! ```text
//! runs/<run_id>/run.json
//! runs/<run_id>/artifacts/<agent_id>/v<N>.json
//! runs/<run_id>/ledger/<agent_id>.jsonl
//! ```
//!
//! Artifact versions are written once with temp-file-and-rename and never
//! rewritten. Each task owns its own ledger file, so every file has a single
//! writer.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{trace, warn};

use super::{Artifact, ArtifactStore, ExecutionLedger, ExecutionRecord, RunMetadata, RunStore};
use crate::core::AgentId;
use crate::error::Result;
use crate::util::blocking;
use crate::workflow::RunId;

#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn run_dir(&self, run_id: RunId) -> PathBuf {
        self.root.join("runs").join(run_id.to_string())
    }

    pub fn artifact_dir(&self, run_id: RunId, agent_id: &AgentId) -> PathBuf {
        self.run_dir(run_id).join("artifacts").join(agent_id.as_str())
    }

    pub fn artifact_path(&self, run_id: RunId, agent_id: &AgentId, version: u32) -> PathBuf {
        self.artifact_dir(run_id, agent_id)
            .join(format!("v{}.json", version))
    }

    pub fn ledger_path(&self, run_id: RunId, agent_id: &AgentId) -> PathBuf {
        self.run_dir(run_id)
            .join("ledger")
            .join(format!("{}.jsonl", agent_id))
    }

    fn run_path(&self, run_id: RunId) -> PathBuf {
        self.run_dir(run_id).join("run.json")
    }
}

/// Write via a temp file and rename, optionally keeping a `.bak` of the
/// previous contents.
fn write_atomic(path: &Path, contents: &str, backup: bool) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    if backup && path.exists() {
        fs::copy(path, path.with_extension("json.bak"))?;
    }
    let temp_path = path.with_extension("json.tmp");
    let mut file = File::create(&temp_path)?;
    file.write_all(contents.as_bytes())?;
    file.sync_all()?;
    fs::rename(&temp_path, path)?;
    trace!(path = %path.display(), "written");
    Ok(())
}

/// Versions present in an artifact directory, ascending.
fn list_versions(dir: &Path) -> Result<Vec<u32>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut versions: Vec<u32> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let name = entry.file_name();
            name.to_str()?
                .strip_prefix('v')?
                .strip_suffix(".json")?
                .parse()
                .ok()
        })
        .collect();
    versions.sort_unstable();
    Ok(versions)
}

/// Read one artifact version. A file that does not parse is reported as
/// absent, so consumers fail with a missing dependency instead of an
/// infrastructure error.
fn read_artifact(path: &Path) -> Result<Option<Artifact>> {
    if !path.exists() {
        return Ok(None);
    }
    match serde_json::from_str(&fs::read_to_string(path)?) {
        Ok(artifact) => Ok(Some(artifact)),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Unreadable artifact treated as missing");
            Ok(None)
        }
    }
}

/// Whether a non-empty file lacks a trailing newline, as left by a torn
/// append.
fn ends_mid_line(file: &mut File) -> Result<bool> {
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(false);
    }
    file.seek(SeekFrom::Start(len - 1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] != b'\n')
}

/// Parse a JSONL ledger file. A torn trailing line from a crash is skipped.
fn read_ledger(path: &Path) -> Result<Vec<ExecutionRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let contents = fs::read_to_string(path)?;
    let mut records = Vec::new();
    for (index, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<ExecutionRecord>(line) {
            Ok(record) => records.push(record),
            Err(e) => warn!(
                path = %path.display(),
                line = index + 1,
                error = %e,
                "Skipping unreadable ledger line"
            ),
        }
    }
    Ok(records)
}

#[async_trait]
impl ArtifactStore for FileStore {
    async fn put(
        &self,
        run_id: RunId,
        agent_id: &AgentId,
        content: &str,
        attempt_number: u32,
    ) -> Result<Artifact> {
        let store = self.clone();
        let agent_id = agent_id.clone();
        let content = content.to_string();
        blocking(move || {
            let dir = store.artifact_dir(run_id, &agent_id);
            let version = list_versions(&dir)?.last().map(|v| v + 1).unwrap_or(1);
            let artifact = Artifact::new(run_id, agent_id, version, content, attempt_number);
            let path = store.artifact_path(run_id, &artifact.agent_id, version);
            write_atomic(&path, &serde_json::to_string_pretty(&artifact)?, false)?;
            Ok(artifact)
        })
        .await
    }

    async fn latest(&self, run_id: RunId, agent_id: &AgentId) -> Result<Option<Artifact>> {
        let store = self.clone();
        let agent_id = agent_id.clone();
        blocking(move || {
            let dir = store.artifact_dir(run_id, &agent_id);
            match list_versions(&dir)?.last() {
                Some(&version) => read_artifact(&store.artifact_path(run_id, &agent_id, version)),
                None => Ok(None),
            }
        })
        .await
    }

    async fn get_version(
        &self,
        run_id: RunId,
        agent_id: &AgentId,
        version: u32,
    ) -> Result<Option<Artifact>> {
        let path = self.artifact_path(run_id, agent_id, version);
        blocking(move || read_artifact(&path)).await
    }

    async fn versions(&self, run_id: RunId, agent_id: &AgentId) -> Result<Vec<u32>> {
        let dir = self.artifact_dir(run_id, agent_id);
        blocking(move || list_versions(&dir)).await
    }
}

#[async_trait]
impl ExecutionLedger for FileStore {
    async fn append(&self, record: &ExecutionRecord) -> Result<()> {
        let path = self.ledger_path(record.run_id, &record.agent_id);
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        blocking(move || {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut file = OpenOptions::new()
                .create(true)
                .read(true)
                .append(true)
                .open(&path)?;
            if ends_mid_line(&mut file)? {
                warn!(path = %path.display(), "Terminating torn ledger line");
                file.write_all(b"\n")?;
            }
            file.write_all(line.as_bytes())?;
            file.sync_data()?;
            trace!(path = %path.display(), "ledger append");
            Ok(())
        })
        .await
    }

    async fn attempts(&self, run_id: RunId, agent_id: &AgentId) -> Result<Vec<ExecutionRecord>> {
        let path = self.ledger_path(run_id, agent_id);
        blocking(move || {
            let mut records = read_ledger(&path)?;
            records.sort_by_key(|r| r.attempt_number);
            Ok(records)
        })
        .await
    }

    async fn records(&self, run_id: RunId) -> Result<Vec<ExecutionRecord>> {
        let dir = self.run_dir(run_id).join("ledger");
        blocking(move || {
            if !dir.exists() {
                return Ok(Vec::new());
            }
            let mut records = Vec::new();
            for entry in fs::read_dir(&dir)? {
                let path = entry?.path();
                if path.extension().is_some_and(|ext| ext == "jsonl") {
                    records.extend(read_ledger(&path)?);
                }
            }
            records.sort_by(|a, b| {
                a.started_at
                    .cmp(&b.started_at)
                    .then(a.attempt_number.cmp(&b.attempt_number))
            });
            Ok(records)
        })
        .await
    }
}

#[async_trait]
impl RunStore for FileStore {
    async fn save_run(&self, metadata: &RunMetadata) -> Result<()> {
        let path = self.run_path(metadata.run_id);
        let contents = serde_json::to_string_pretty(metadata)?;
        blocking(move || write_atomic(&path, &contents, true)).await
    }

    async fn load_run(&self, run_id: RunId) -> Result<Option<RunMetadata>> {
        let path = self.run_path(run_id);
        blocking(move || {
            if !path.exists() {
                return Ok(None);
            }
            Ok(Some(serde_json::from_str(&fs::read_to_string(&path)?)?))
        })
        .await
    }

    async fn list_runs(&self) -> Result<Vec<RunMetadata>> {
        let dir = self.root.join("runs");
        blocking(move || {
            if !dir.exists() {
                return Ok(Vec::new());
            }
            let mut runs = Vec::new();
            for entry in fs::read_dir(&dir)? {
                let path = entry?.path().join("run.json");
                if path.exists() {
                    let metadata: RunMetadata = serde_json::from_str(&fs::read_to_string(&path)?)?;
                    runs.push(metadata);
                }
            }
            runs.sort_by(|a: &RunMetadata, b: &RunMetadata| b.created_at.cmp(&a.created_at));
            Ok(runs)
        })
        .await
    }
}
