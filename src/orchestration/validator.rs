//! Structural validation of agent output.

use crate::core::{AgentId, OutputFormat};
use crate::error::ValidationError;

use super::runner::RawOutput;

/// Output that passed validation and may be stored as an artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedOutput {
    pub content: String,
}

pub trait OutputValidator: Send + Sync {
    fn validate(
        &self,
        agent_id: &AgentId,
        format: OutputFormat,
        raw: RawOutput,
    ) -> Result<ValidatedOutput, ValidationError>;
}

/// Rejects empty output, and output that does not parse in the declared
/// format. Text and markdown are only checked for emptiness.
#[derive(Debug, Clone, Copy, Default)]
pub struct FormatValidator;

impl OutputValidator for FormatValidator {
    fn validate(
        &self,
        agent_id: &AgentId,
        format: OutputFormat,
        raw: RawOutput,
    ) -> Result<ValidatedOutput, ValidationError> {
        let reject = |reason: String| ValidationError {
            agent_id: agent_id.clone(),
            reason,
        };

        if raw.content.trim().is_empty() {
            return Err(reject("empty output".to_string()));
        }

        match format {
            OutputFormat::Text | OutputFormat::Markdown => {}
            OutputFormat::Json => {
                serde_json::from_str::<serde_json::Value>(&raw.content)
                    .map_err(|e| reject(format!("invalid JSON: {}", e)))?;
            }
            OutputFormat::Yaml => {
                serde_yaml::from_str::<serde_yaml::Value>(&raw.content)
                    .map_err(|e| reject(format!("invalid YAML: {}", e)))?;
            }
        }

        Ok(ValidatedOutput {
            content: raw.content,
        })
    }
}
