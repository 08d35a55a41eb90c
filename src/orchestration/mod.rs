//! Orchestration layer for cadence runs.
//!
//! The [`Engine`] drives a [`Scheduler`] per run. The scheduler hands
//! attempts to a bounded [`WorkerPool`]; each attempt is executed by the
//! [`TaskExecutor`], which assembles context, calls the [`AgentRunner`] and
//! validates and records the result.

pub mod context;
pub mod engine;
pub mod executor;
pub mod pool;
pub mod runner;
pub mod scheduler;
pub mod validator;

pub use context::{ContextAssembler, ContextBundle, ContextEntry, ContextInput};
pub use engine::{Engine, RunReport};
pub use executor::{AttemptJob, AttemptOutcome, AttemptReport, TaskExecutor, MISSING_DEPENDENCY};
pub use pool::{WorkerEvent, WorkerPool};
pub use runner::{AgentRunner, CommandRunner, RawOutput};
pub use scheduler::{Scheduler, SchedulerEvent};
pub use validator::{FormatValidator, OutputValidator, ValidatedOutput};
