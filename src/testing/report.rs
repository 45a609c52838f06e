//! Suite and scenario reports

use colored::Colorize;
use std::time::Duration;

use crate::common::Error;

/// How one scenario ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScenarioOutcome {
    Passed,
    /// Metrics never converged; carries the last poll error
    PollTimeout(String),
    /// Metrics converged but did not match
    AssertionFailed(String),
    /// Anything else that stopped the scenario
    Error(String),
}

impl ScenarioOutcome {
    /// Classify a scenario-local error
    pub fn from_error(err: &Error) -> Self {
        match err {
            Error::PollTimeout { .. } => ScenarioOutcome::PollTimeout(err.to_string()),
            Error::AssertionFailed { .. } => ScenarioOutcome::AssertionFailed(err.to_string()),
            other => ScenarioOutcome::Error(other.to_string()),
        }
    }

    pub fn is_passed(&self) -> bool {
        matches!(self, ScenarioOutcome::Passed)
    }

    pub fn label(&self) -> &'static str {
        match self {
            ScenarioOutcome::Passed => "passed",
            ScenarioOutcome::PollTimeout(_) => "poll timeout",
            ScenarioOutcome::AssertionFailed(_) => "assertion failed",
            ScenarioOutcome::Error(_) => "error",
        }
    }

    pub fn detail(&self) -> Option<&str> {
        match self {
            ScenarioOutcome::Passed => None,
            ScenarioOutcome::PollTimeout(d)
            | ScenarioOutcome::AssertionFailed(d)
            | ScenarioOutcome::Error(d) => Some(d),
        }
    }
}

/// Result of one scenario run
#[derive(Debug, Clone)]
pub struct ScenarioReport {
    pub name: String,
    pub target: String,
    /// Port the exporter was given, if one was allocated
    pub port: Option<u16>,
    /// Exporter process id, if one was launched
    pub pid: Option<u32>,
    /// Poll attempts made
    pub attempts: u32,
    pub elapsed: Duration,
    pub outcome: ScenarioOutcome,
}

impl ScenarioReport {
    pub fn passed(&self) -> bool {
        self.outcome.is_passed()
    }

    /// Print a one-line result, plus the failure detail
    pub fn print(&self) {
        let port = self
            .port
            .map(|p| p.to_string())
            .unwrap_or_else(|| "-".to_string());
        let timing = format!(
            "port {}, {} attempt(s), {:.1}s",
            port,
            self.attempts,
            self.elapsed.as_secs_f64()
        );

        if self.passed() {
            println!(
                "  {} {} {} {}",
                "✓".green(),
                self.name.white().bold(),
                self.target.dimmed(),
                timing.dimmed()
            );
        } else {
            println!(
                "  {} {} {} {} ({})",
                "✗".red(),
                self.name.white().bold(),
                self.target.dimmed(),
                self.outcome.label().red(),
                timing.dimmed()
            );
            if let Some(detail) = self.outcome.detail() {
                for line in detail.lines() {
                    println!("      {}", line.dimmed());
                }
            }
        }
    }
}

/// Result of a suite run
#[derive(Debug, Clone, Default)]
pub struct SuiteReport {
    pub scenarios: Vec<ScenarioReport>,
    /// Scenarios not run because of `--fail-fast`
    pub skipped: usize,
    /// Stopped early by Ctrl-C
    pub interrupted: bool,
}

impl SuiteReport {
    pub fn passed_count(&self) -> usize {
        self.scenarios.iter().filter(|s| s.passed()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.scenarios.len() - self.passed_count()
    }

    /// Every scenario ran and passed
    pub fn success(&self) -> bool {
        !self.interrupted && self.skipped == 0 && self.failed_count() == 0
    }

    /// Ports handed to exporters, in run order
    pub fn ports(&self) -> Vec<u16> {
        self.scenarios.iter().filter_map(|s| s.port).collect()
    }

    pub fn print_summary(&self) {
        println!();
        let mut parts = vec![format!("{} passed", self.passed_count())];
        if self.failed_count() > 0 {
            parts.push(format!("{} failed", self.failed_count()));
        }
        if self.skipped > 0 {
            parts.push(format!("{} skipped", self.skipped));
        }
        let summary = parts.join(", ");

        if self.interrupted {
            println!("{} {} ({})", "!".yellow().bold(), "Interrupted".yellow().bold(), summary);
        } else if self.success() {
            println!("{} {} ({})", "✓".green().bold(), "Suite Passed".green().bold(), summary);
        } else {
            println!("{} {} ({})", "✗".red().bold(), "Suite Failed".red().bold(), summary);
        }
    }
}
