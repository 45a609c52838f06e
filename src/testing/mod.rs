//! End-to-end suite runner
//!
//! Stands up the broker dependency, builds the exporter once, then runs
//! each scenario against a fresh exporter instance and checks that its
//! probe metrics converge.

mod report;
mod runner;

pub use report::{ScenarioOutcome, ScenarioReport, SuiteReport};
pub use runner::{RunOptions, Suite};
