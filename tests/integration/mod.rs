//! Integration test suite for cadence.
//!
//! These tests drive the engine end to end with a scripted in-process
//! agent runner, over both the memory and the file store.
//!
//! # Test Categories
//!
//! - `scheduling`: Dependency ordering and concurrency
//! - `failures`: Retries, severity and missing inputs
//! - `resume`: Durability, cancellation and resume
//! - `properties`: Randomized DAGs and completion timing
//!
//! # CI Compatibility
//!
//! No test spawns an external agent command, making them safe to run in
//! CI environments.


mod failures;
mod properties;
mod resume;
mod scheduling;
