//! Core domain models for cadence orchestration.
//!
//! This module contains the fundamental data structures used throughout
//! the engine: task identity and status, retry policy, and the validated
//! phase dependency graph.

pub mod dag;
pub mod retry;
pub mod task;

pub use dag::{PhaseSpec, WorkflowGraph};
pub use retry::{Backoff, RetryPolicy};
pub use task::{
    AgentId, Exhaustion, OutputFormat, Severity, TaskKey, TaskRecord, TaskSpec, TaskStatus,
};
