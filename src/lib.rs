//! Probe Harness - end-to-end verification for MQTT probe exporters
//!
//! This library stands up a broker dependency, builds the exporter under
//! test, and drives one exporter instance per scenario until its probe
//! metrics converge.

pub mod artifact;
pub mod cli;
pub mod commands;
pub mod common;
pub mod dependency;
pub mod exporter;
pub mod metrics;
pub mod scenario;
pub mod testing;

// Re-export commonly used types for tests
pub use common::{Error, Result};
pub use testing::{RunOptions, Suite, SuiteReport};
