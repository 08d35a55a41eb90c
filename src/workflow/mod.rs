//! Workflow definitions, loading and per-run state.
//!
//! A workflow is declared as YAML, validated once by the loader into a
//! [`WorkflowGraph`](crate::core::WorkflowGraph), and executed as a run
//! whose progress is tracked in [`RunState`].

pub mod loader;
mod state;
mod types;

pub use state::{PhaseChange, RunState};
pub(crate) use state::skipped_warning;
pub use types::{
    AgentDefinition, AgentEntry, PhaseDefinition, PhaseStatus, RunId, RunStatus,
    WorkflowDefinition,
};
