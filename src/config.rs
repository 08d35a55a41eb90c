use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;

use crate::core::Backoff;
use crate::{Error, Result};

/// Engine configuration, read from `~/.cadence/cadence.toml`.
///
/// Every field has a default so a missing or partial file is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root of the file store. `~/` is expanded.
    pub state_dir: Option<String>,
    pub max_in_flight: usize,
    pub task_timeout_secs: u64,
    pub retry_budget: u32,
    pub backoff_initial_ms: u64,
    pub backoff_multiplier: u32,
    pub backoff_max_ms: u64,
    pub cancel_grace_secs: u64,
    pub context_token_budget: usize,
    pub agent_command: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            state_dir: None,
            max_in_flight: 4,
            task_timeout_secs: 600,
            retry_budget: 2,
            backoff_initial_ms: 1000,
            backoff_multiplier: 2,
            backoff_max_ms: 30_000,
            cancel_grace_secs: 10,
            context_token_budget: 93_000,
            agent_command: "claude -p".to_string(),
        }
    }
}

impl Config {
    pub fn cadence_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".cadence"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::cadence_dir()?.join("cadence.toml"))
    }

    pub fn state_path(&self) -> Result<PathBuf> {
        match &self.state_dir {
            Some(dir) => Ok(expand_tilde(dir)),
            None => Ok(Self::cadence_dir()?.join("state")),
        }
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "Config::load");
        if !path.exists() {
            debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(path)?)?;
        debug!(
            max_in_flight = config.max_in_flight,
            retry_budget = config.retry_budget,
            agent_command = %config.agent_command,
            "Config loaded"
        );
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let cadence_dir = Self::cadence_dir()?;
        if !cadence_dir.exists() {
            debug!(dir = %cadence_dir.display(), "Creating cadence directory");
            fs::create_dir_all(&cadence_dir)?;
        }
        let path = Self::config_path()?;
        fs::write(&path, toml::to_string_pretty(self)?)?;
        debug!(path = %path.display(), "Config saved");
        Ok(())
    }

    pub fn ensure_dirs(&self) -> Result<()> {
        let state_dir = self.state_path()?;
        if !state_dir.exists() {
            debug!(dir = %state_dir.display(), "Creating state directory");
            fs::create_dir_all(&state_dir)?;
        }
        Ok(())
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_secs(self.cancel_grace_secs)
    }

    /// Backoff for agents that do not override it.
    pub fn backoff(&self) -> Backoff {
        self.backoff_with_initial(self.backoff_initial_ms)
    }

    /// Backoff with a per-agent initial delay and the global growth settings.
    pub fn backoff_with_initial(&self, initial_ms: u64) -> Backoff {
        Backoff {
            initial: Duration::from_millis(initial_ms),
            multiplier: self.backoff_multiplier,
            max: Duration::from_millis(self.backoff_max_ms.max(initial_ms)),
        }
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
