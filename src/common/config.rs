//! Harness configuration file handling
//!
//! Every field has a default, so an empty file (or no file at all) runs the
//! standard broker suite: four probe targets, one scenario per target.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::paths::config_path;
use super::{Error, Result};
use crate::scenario::Scheme;

/// Main configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct HarnessConfig {
    /// External dependency (broker container) settings
    #[serde(default)]
    pub dependency: DependencyConfig,

    /// How the exporter under test is built
    #[serde(default)]
    pub build: BuildConfig,

    /// How exporter instances are launched
    #[serde(default)]
    pub exporter: ExporterConfig,

    /// Measurement endpoint polling
    #[serde(default)]
    pub poll: PollConfig,

    /// Source of TLS material staged into each scenario
    #[serde(default)]
    pub tls: TlsSourceConfig,

    /// Probe targets written into every scenario's exporter config
    #[serde(default = "default_probes")]
    pub probes: Vec<ProbeSpec>,

    /// Scenarios to run, in order
    #[serde(default = "default_scenarios")]
    pub scenarios: Vec<ScenarioSpec>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            dependency: DependencyConfig::default(),
            build: BuildConfig::default(),
            exporter: ExporterConfig::default(),
            poll: PollConfig::default(),
            tls: TlsSourceConfig::default(),
            probes: default_probes(),
            scenarios: default_scenarios(),
        }
    }
}

/// One container port published on the host
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct PortMapping {
    /// Container-side port with protocol, e.g. `1883/tcp`
    pub container: String,
    /// Host-side port
    pub host: u16,
}

impl PortMapping {
    fn new(container: &str, host: u16) -> Self {
        Self {
            container: container.to_string(),
            host,
        }
    }
}

/// Dependency container settings
#[derive(Debug, Deserialize, Clone)]
pub struct DependencyConfig {
    /// Container name
    #[serde(default = "default_dependency_name")]
    pub name: String,

    /// Image reference
    #[serde(default = "default_dependency_image")]
    pub image: String,

    /// Host address the published ports bind to
    #[serde(default = "default_host_ip")]
    pub host_ip: String,

    /// Published ports, in declaration order
    #[serde(default = "default_port_map")]
    pub ports: Vec<PortMapping>,

    /// Container health-check command (exec form)
    #[serde(default = "default_health_command")]
    pub health_command: Vec<String>,

    /// Interval the container runtime runs the health check at
    pub container_health_interval_secs: Option<u64>,

    /// Interval between health status inspections
    #[serde(default = "default_health_poll_interval")]
    pub health_poll_interval_ms: u64,

    /// Number of inspections before giving up
    #[serde(default = "default_health_attempts")]
    pub health_attempts: u32,

    /// Remove a leftover container with the same name before creating
    #[serde(default = "default_true")]
    pub remove_stale: bool,
}

impl Default for DependencyConfig {
    fn default() -> Self {
        Self {
            name: default_dependency_name(),
            image: default_dependency_image(),
            host_ip: default_host_ip(),
            ports: default_port_map(),
            health_command: default_health_command(),
            container_health_interval_secs: None,
            health_poll_interval_ms: default_health_poll_interval(),
            health_attempts: default_health_attempts(),
            remove_stale: true,
        }
    }
}

impl DependencyConfig {
    pub fn health_poll_interval(&self) -> Duration {
        Duration::from_millis(self.health_poll_interval_ms)
    }
}

fn default_dependency_name() -> String {
    "emqx-for-emqx-exporter-test".to_string()
}
fn default_dependency_image() -> String {
    "docker.io/emqx/emqx-enterprise:5.3".to_string()
}
fn default_host_ip() -> String {
    "127.0.0.1".to_string()
}
fn default_port_map() -> Vec<PortMapping> {
    vec![
        PortMapping::new("18084/tcp", 18084),
        PortMapping::new("18083/tcp", 18083),
        PortMapping::new("1883/tcp", 1883),
        PortMapping::new("8883/tcp", 8883),
        PortMapping::new("8083/tcp", 8083),
        // 8084 is taken on CI runners
        PortMapping::new("8084/tcp", 38084),
    ]
}
fn default_health_command() -> Vec<String> {
    ["curl", "-f", "http://localhost:18083/status"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_health_poll_interval() -> u64 {
    1000
}
fn default_health_attempts() -> u32 {
    60
}
fn default_true() -> bool {
    true
}

/// Exporter build settings
#[derive(Debug, Deserialize, Clone)]
pub struct BuildConfig {
    /// Directory the build command runs in
    #[serde(default = "default_source_dir")]
    pub source_dir: PathBuf,

    /// File name of the built executable
    #[serde(default = "default_binary_name")]
    pub binary_name: String,

    /// Build command; `{output}` is replaced with the executable path
    #[serde(default = "default_build_command")]
    pub command: Vec<String>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            source_dir: default_source_dir(),
            binary_name: default_binary_name(),
            command: default_build_command(),
        }
    }
}

fn default_source_dir() -> PathBuf {
    PathBuf::from(".")
}
fn default_binary_name() -> String {
    "emqx-exporter".to_string()
}
fn default_build_command() -> Vec<String> {
    ["go", "build", "-o", "{output}"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Exporter launch settings
#[derive(Debug, Deserialize, Clone)]
pub struct ExporterConfig {
    /// First port handed out; each scenario takes the next lower one
    #[serde(default = "default_start_port")]
    pub start_port: u16,

    /// Lowest port the allocator may hand out
    #[serde(default = "default_lowest_port")]
    pub lowest_port: u16,

    /// Host part of `--web.listen-address`
    #[serde(default = "default_host_ip")]
    pub listen_host: String,

    /// Metric name prefix, e.g. `emqx` for `emqx_mqtt_probe_success`
    #[serde(default = "default_metric_prefix")]
    pub metric_prefix: String,

    /// File name of the exporter config document inside a scenario directory
    #[serde(default = "default_config_file_name")]
    pub config_file_name: String,
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            start_port: default_start_port(),
            lowest_port: default_lowest_port(),
            listen_host: default_host_ip(),
            metric_prefix: default_metric_prefix(),
            config_file_name: default_config_file_name(),
        }
    }
}

fn default_start_port() -> u16 {
    65534
}
fn default_lowest_port() -> u16 {
    1024
}
fn default_metric_prefix() -> String {
    "emqx".to_string()
}
fn default_config_file_name() -> String {
    "config.yml".to_string()
}

/// Measurement endpoint polling settings
#[derive(Debug, Deserialize, Clone)]
pub struct PollConfig {
    /// Overall deadline for one scenario's metrics to converge
    #[serde(default = "default_poll_timeout")]
    pub timeout_ms: u64,

    /// Delay between attempts
    #[serde(default = "default_poll_interval")]
    pub interval_ms: u64,

    /// Accept families other than the two probe gauges
    #[serde(default = "default_true")]
    pub allow_extra_families: bool,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_poll_timeout(),
            interval_ms: default_poll_interval(),
            allow_extra_families: true,
        }
    }
}

impl PollConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

fn default_poll_timeout() -> u64 {
    10_000
}
fn default_poll_interval() -> u64 {
    500
}

/// Where TLS material is copied from
#[derive(Debug, Deserialize, Clone)]
pub struct TlsSourceConfig {
    /// Directory holding the certificate bundle
    #[serde(default = "default_cert_source")]
    pub source_dir: PathBuf,

    #[serde(default = "default_ca_file")]
    pub ca_file: String,

    #[serde(default = "default_cert_file")]
    pub cert_file: String,

    #[serde(default = "default_key_file")]
    pub key_file: String,

    /// The bundled certificates are self-signed
    #[serde(default = "default_true")]
    pub insecure_skip_verify: bool,
}

impl Default for TlsSourceConfig {
    fn default() -> Self {
        Self {
            source_dir: default_cert_source(),
            ca_file: default_ca_file(),
            cert_file: default_cert_file(),
            key_file: default_key_file(),
            insecure_skip_verify: true,
        }
    }
}

fn default_cert_source() -> PathBuf {
    PathBuf::from("config/example/certs")
}
fn default_ca_file() -> String {
    "cacert.pem".to_string()
}
fn default_cert_file() -> String {
    "client-cert.pem".to_string()
}
fn default_key_file() -> String {
    "client-key.pem".to_string()
}

/// A probe target as configured; TLS paths are filled in per scenario
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct ProbeSpec {
    pub target: String,
    pub scheme: Scheme,
}

fn default_probes() -> Vec<ProbeSpec> {
    vec![
        ProbeSpec {
            target: "127.0.0.1:1883".to_string(),
            scheme: Scheme::Tcp,
        },
        ProbeSpec {
            target: "127.0.0.1:8883".to_string(),
            scheme: Scheme::Ssl,
        },
        ProbeSpec {
            target: "127.0.0.1:8083/mqtt".to_string(),
            scheme: Scheme::Ws,
        },
        ProbeSpec {
            target: "127.0.0.1:38084/mqtt".to_string(),
            scheme: Scheme::Wss,
        },
    ]
}

/// One scenario: launch an exporter and check the metrics for `target`
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct ScenarioSpec {
    pub name: String,
    pub target: String,
}

fn default_scenarios() -> Vec<ScenarioSpec> {
    [
        ("mqtt", "127.0.0.1:1883"),
        ("ssl", "127.0.0.1:8883"),
        ("ws", "127.0.0.1:8083/mqtt"),
        ("wss", "127.0.0.1:38084/mqtt"),
    ]
    .iter()
    .map(|(name, target)| ScenarioSpec {
        name: name.to_string(),
        target: target.to_string(),
    })
    .collect()
}

impl HarnessConfig {
    /// Load configuration
    ///
    /// Uses `explicit` when given (it must exist), otherwise the default
    /// config file if present, otherwise built-in defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => config_path().filter(|p| p.exists()),
        };

        let config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(&path).map_err(|e| {
                    Error::Config(format!("Failed to read '{}': {}", path.display(), e))
                })?;
                tracing::debug!("Loaded harness config from {}", path.display());
                Self::from_toml_str(&content)?
            }
            None => Self::default(),
        };

        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::ConfigParse(e.to_string()))
    }

    /// Check cross-field constraints that serde cannot express
    pub fn validate(&self) -> Result<()> {
        if self.scenarios.is_empty() {
            return Err(Error::Config("No scenarios configured".to_string()));
        }

        for scenario in &self.scenarios {
            if !self.probes.iter().any(|p| p.target == scenario.target) {
                return Err(Error::Config(format!(
                    "Scenario '{}' targets '{}', which is not a configured probe",
                    scenario.name, scenario.target
                )));
            }
        }

        if self.build.command.is_empty() {
            return Err(Error::Config("Build command is empty".to_string()));
        }

        if self.exporter.start_port < self.exporter.lowest_port {
            return Err(Error::Config(format!(
                "Exporter start port {} is below lowest port {}",
                self.exporter.start_port, self.exporter.lowest_port
            )));
        }

        if self.poll.interval_ms == 0 {
            return Err(Error::Config("Poll interval must be non-zero".to_string()));
        }

        if self.poll.interval_ms > self.poll.timeout_ms {
            return Err(Error::Config(format!(
                "Poll interval {}ms exceeds poll timeout {}ms",
                self.poll.interval_ms, self.poll.timeout_ms
            )));
        }

        if self.dependency.health_attempts == 0 {
            return Err(Error::Config(
                "Dependency health attempts must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}
