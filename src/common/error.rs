//! Error types for the probe harness
//!
//! Errors fall into two regimes: fatal environment failures that abort the
//! whole suite, and scenario-local failures that are reported per scenario
//! while sibling scenarios keep running. See [`Error::is_fatal`].

use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the probe harness
#[derive(Error, Debug)]
pub enum Error {
    // === Dependency Errors ===
    #[error("Required tool '{0}' not found in PATH")]
    ToolNotFound(String),

    #[error("Container runtime command '{command}' failed: {message}")]
    ContainerCommand { command: String, message: String },

    #[error("Dependency '{name}' did not become healthy after {attempts} checks (last status: {last_status})")]
    DependencyUnhealthy {
        name: String,
        attempts: u32,
        last_status: String,
    },

    #[error("Dependency '{0}' has not been started")]
    DependencyNotStarted(String),

    // === Artifact Errors ===
    #[error("Failed to build exporter: {0}")]
    BuildFailed(String),

    #[error("Working directory error at '{path}': {source}")]
    WorkDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    // === TLS Material Errors ===
    #[error("Failed to stage TLS material '{path}': {source}")]
    TlsStaging {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    #[error("Invalid probe target '{target}': {reason}")]
    InvalidProbe { target: String, reason: String },

    // === Exporter Process Errors ===
    #[error("Failed to launch exporter '{binary}': {source}")]
    ExporterLaunch {
        binary: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Port {0} is still in use")]
    PortInUse(u16),

    #[error("Port range exhausted (next port {next} is below the lowest allowed port {floor})")]
    PortsExhausted { next: u16, floor: u16 },

    // === Measurement Errors ===
    #[error("HTTP request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url}: unexpected HTTP status {status}")]
    HttpStatus { url: String, status: u16 },

    #[error("Undecodable metrics document: {0}")]
    MetricsParse(String),

    #[error("Metrics at {url} did not converge after {attempts} attempts in {elapsed:?}: {last_error}")]
    PollTimeout {
        url: String,
        attempts: u32,
        elapsed: Duration,
        last_error: Box<Error>,
    },

    // === Assertion Errors ===
    #[error("Metric assertion failed: {}\n{families}", mismatches.join("; "))]
    AssertionFailed {
        mismatches: Vec<String>,
        families: String,
    },

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    // === Internal Errors ===
    #[error("Interrupted")]
    Interrupted,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a container command error
    pub fn container_command(command: &str, message: impl Into<String>) -> Self {
        Self::ContainerCommand {
            command: command.to_string(),
            message: message.into(),
        }
    }

    /// Create a work directory error for a path
    pub fn work_dir(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::WorkDir {
            path: path.into(),
            source,
        }
    }

    /// Create an invalid probe error
    pub fn invalid_probe(target: &str, reason: &str) -> Self {
        Self::InvalidProbe {
            target: target.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Whether this error means the environment cannot support any scenario.
    ///
    /// Fatal errors abort the suite; everything else is reported against the
    /// scenario that produced it.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::ToolNotFound(_)
                | Error::ContainerCommand { .. }
                | Error::DependencyUnhealthy { .. }
                | Error::DependencyNotStarted(_)
                | Error::BuildFailed(_)
                | Error::WorkDir { .. }
                | Error::TlsStaging { .. }
                | Error::Config(_)
                | Error::ConfigParse(_)
                | Error::InvalidProbe { .. }
                | Error::PortsExhausted { .. }
                | Error::Interrupted
        )
    }

    /// Whether a poll attempt that hit this error may be retried
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Http { .. } | Error::HttpStatus { .. } | Error::MetricsParse(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_errors_are_fatal() {
        assert!(Error::BuildFailed("exit status 2".into()).is_fatal());
        assert!(Error::DependencyUnhealthy {
            name: "broker".into(),
            attempts: 60,
            last_status: "starting".into(),
        }
        .is_fatal());
        assert!(Error::TlsStaging {
            path: PathBuf::from("/tmp/certs/cacert.pem"),
            source: io::Error::new(io::ErrorKind::NotFound, "missing"),
        }
        .is_fatal());
    }

    #[test]
    fn test_scenario_errors_are_not_fatal() {
        let status = Error::HttpStatus {
            url: "http://127.0.0.1:65534/probe".into(),
            status: 503,
        };
        assert!(!status.is_fatal());
        assert!(status.is_retryable());

        let timeout = Error::PollTimeout {
            url: "http://127.0.0.1:65534/probe".into(),
            attempts: 20,
            elapsed: Duration::from_secs(10),
            last_error: Box::new(status),
        };
        assert!(!timeout.is_fatal());
        assert!(!timeout.is_retryable());
        assert!(timeout.to_string().contains("503"));

        let assertion = Error::AssertionFailed {
            mismatches: vec!["emqx_mqtt_probe_success: expected 1, got 0".into()],
            families: String::new(),
        };
        assert!(!assertion.is_fatal());
    }
}
