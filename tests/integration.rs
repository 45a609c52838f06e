//! End-to-end integration tests for the probe harness
//!
//! These run the real suite driver against the `mock-exporter` binary:
//! 1. The build step copies mock-exporter into the artifact directory
//! 2. The broker container is replaced by an in-memory runtime
//! 3. Every scenario launches a real process and polls it over HTTP

#![cfg(unix)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Mutex;

use probe_harness::common::config::{HarnessConfig, ProbeSpec, TlsSourceConfig};
use probe_harness::dependency::{ContainerRuntime, ContainerSpec, HealthStatus};
use probe_harness::exporter::process_exists;
use probe_harness::scenario::{ScenarioConfig, ScenarioConfigSynthesizer, Scheme};
use probe_harness::{Error, Result, RunOptions, Suite};

/// Container runtime that keeps containers in a map and reports them healthy
#[derive(Default)]
struct InMemoryRuntime {
    /// id -> name
    containers: Mutex<HashMap<String, String>>,
}

impl InMemoryRuntime {
    fn count(&self) -> usize {
        self.containers.lock().unwrap().len()
    }

    fn no_such(id: &str) -> Error {
        Error::container_command("inspect", format!("No such container: {}", id))
    }
}

#[async_trait]
impl ContainerRuntime for InMemoryRuntime {
    async fn pull(&self, _image: &str) -> Result<()> {
        Ok(())
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<String> {
        let id = format!("{}-0001", spec.name);
        self.containers
            .lock()
            .unwrap()
            .insert(id.clone(), spec.name.clone());
        Ok(id)
    }

    async fn start(&self, _id: &str) -> Result<()> {
        Ok(())
    }

    async fn health(&self, id: &str) -> Result<HealthStatus> {
        if self.containers.lock().unwrap().contains_key(id) {
            Ok(HealthStatus::Healthy)
        } else {
            Err(Self::no_such(id))
        }
    }

    async fn stop(&self, id: &str) -> Result<()> {
        if self.exists(id).await? {
            Ok(())
        } else {
            Err(Self::no_such(id))
        }
    }

    async fn remove(&self, id: &str) -> Result<()> {
        let mut containers = self.containers.lock().unwrap();
        let key = containers
            .iter()
            .find(|(k, name)| k.as_str() == id || name.as_str() == id)
            .map(|(k, _)| k.clone());
        match key {
            Some(key) => {
                containers.remove(&key);
                Ok(())
            }
            None => Err(Self::no_such(id)),
        }
    }

    async fn exists(&self, name_or_id: &str) -> Result<bool> {
        Ok(self
            .containers
            .lock()
            .unwrap()
            .iter()
            .any(|(id, name)| id == name_or_id || name == name_or_id))
    }
}

fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
}

fn mock_exporter() -> &'static str {
    env!("CARGO_BIN_EXE_mock-exporter")
}

fn free_port() -> u16 {
    let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
    listener.local_addr().unwrap().port()
}

/// Harness config that "builds" the exporter by copying mock-exporter
fn harness_config() -> HarnessConfig {
    let mut config = HarnessConfig::default();
    config.dependency.health_poll_interval_ms = 10;
    config.dependency.health_attempts = 5;
    config.build.command = vec![
        "cp".to_string(),
        mock_exporter().to_string(),
        "{output}".to_string(),
    ];
    config.tls.source_dir = fixtures_dir().join("certs");
    config.exporter.start_port = free_port().max(2048);
    config.poll.timeout_ms = 10_000;
    config.poll.interval_ms = 100;
    config
}

#[tokio::test]
async fn test_suite_converges_for_every_scheme() {
    let mut suite = Suite::new(harness_config(), InMemoryRuntime::default(), RunOptions::default())
        .expect("suite");

    let report = suite.run(std::future::pending()).await.expect("suite run");

    let names: Vec<&str> = report.scenarios.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, ["mqtt", "ssl", "ws", "wss"]);
    for scenario in &report.scenarios {
        assert!(
            scenario.passed(),
            "{} failed: {:?}",
            scenario.name,
            scenario.outcome
        );
    }
    assert!(report.success());

    let ports = report.ports();
    assert_eq!(ports.len(), 4);
    assert!(ports.windows(2).all(|w| w[0] > w[1]), "ports {ports:?}");

    assert!(suite.artifact().is_none());
    assert_eq!(suite.dependency().runtime().count(), 0);
}

#[tokio::test]
async fn test_stepwise_lifecycle_cleans_up() {
    let config = harness_config();
    let scenarios = config.scenarios.clone();
    let mut suite =
        Suite::new(config, InMemoryRuntime::default(), RunOptions::default()).expect("suite");

    suite.setup().await.expect("setup");
    let artifact_dir = suite.artifact().expect("artifact").dir().to_path_buf();
    assert!(suite.artifact().unwrap().binary().is_file());
    assert!(suite.dependency().is_healthy());

    let report = suite.run_scenario(&scenarios[1]).await.expect("ssl scenario");
    assert!(report.passed(), "{:?}", report.outcome);

    // The scenario's working directory is gone; the artifact is not
    let scenarios_dir = artifact_dir.join("scenarios");
    let leftovers = std::fs::read_dir(&scenarios_dir)
        .map(|entries| entries.count())
        .unwrap_or(0);
    assert_eq!(leftovers, 0);
    assert!(artifact_dir.exists());

    suite.teardown().await.expect("teardown");
    assert!(!artifact_dir.exists());
    assert_eq!(suite.dependency().runtime().count(), 0);

    // Nothing left to tear down
    suite.teardown().await.expect("second teardown");
}

#[tokio::test]
async fn test_slow_exporter_startup_is_tolerated() {
    let mut config = harness_config();
    let wrapper = format!(
        "printf '#!/bin/sh\\nMOCK_EXPORTER_STARTUP_DELAY_MS=700 exec %s \"$@\"\\n' '{}' > {{output}} && chmod +x {{output}}",
        mock_exporter()
    );
    config.build.command = vec!["sh".to_string(), "-c".to_string(), wrapper];

    let options = RunOptions {
        filter: Some("mqtt".to_string()),
        ..RunOptions::default()
    };
    let mut suite = Suite::new(config, InMemoryRuntime::default(), options).expect("suite");
    let report = suite.run(std::future::pending()).await.expect("suite run");

    assert_eq!(report.scenarios.len(), 1);
    let scenario = &report.scenarios[0];
    assert!(scenario.passed(), "{:?}", scenario.outcome);
    assert!(scenario.attempts > 1, "converged on first attempt");
}

#[tokio::test]
async fn test_wrong_prefix_fails_every_scenario() {
    let mut config = harness_config();
    config.exporter.metric_prefix = "other".to_string();
    config.poll.timeout_ms = 3_000;

    let mut suite =
        Suite::new(config, InMemoryRuntime::default(), RunOptions::default()).expect("suite");
    let report = suite.run(std::future::pending()).await.expect("suite run");

    assert_eq!(report.scenarios.len(), 4);
    assert_eq!(report.failed_count(), 4);
    for scenario in &report.scenarios {
        assert_eq!(scenario.outcome.label(), "assertion failed");
        let detail = scenario.outcome.detail().unwrap();
        assert!(detail.contains("other_mqtt_probe_success: family missing"));
        assert!(detail.contains("# TYPE emqx_mqtt_probe_success gauge"));

        let pid = scenario.pid.expect("exporter was launched");
        assert!(!process_exists(pid), "exporter {pid} outlived {}", scenario.name);
    }
    assert_eq!(suite.dependency().runtime().count(), 0);
}

/// Run the CLI with an isolated config directory
fn run_cli(config_home: &Path, args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_probe-harness"))
        .args(args)
        .env("XDG_CONFIG_HOME", config_home)
        .env("HOME", config_home)
        .stdin(Stdio::null())
        .output()
        .expect("run probe-harness")
}

#[test]
fn test_render_config_cli() {
    let home = tempfile::tempdir().unwrap();
    let work_dir = tempfile::tempdir().unwrap();

    let output = run_cli(
        home.path(),
        &["render-config", "--work-dir", work_dir.path().to_str().unwrap()],
    );
    assert!(output.status.success(), "{:?}", output);

    let rendered = String::from_utf8(output.stdout).unwrap();
    let config = ScenarioConfig::from_yaml(&rendered).expect("rendered YAML");
    assert_eq!(config.probes.len(), 4);

    let ssl = config.probe("127.0.0.1:8883").unwrap();
    assert_eq!(ssl.scheme(), Scheme::Ssl);
    let tls = ssl.tls().unwrap();
    assert!(tls.insecure_skip_verify);
    assert_eq!(tls.ca_file, work_dir.path().join("certs").join("cacert.pem"));
    assert!(config.probe("127.0.0.1:1883").unwrap().tls().is_none());
}

#[test]
fn test_probe_cli_against_running_exporter() {
    let home = tempfile::tempdir().unwrap();
    let work_dir = tempfile::tempdir().unwrap();

    let probes = vec![ProbeSpec {
        target: "127.0.0.1:1883".to_string(),
        scheme: Scheme::Tcp,
    }];
    let tls = TlsSourceConfig::default();
    let (_, config_path) = ScenarioConfigSynthesizer::new(&probes, &tls)
        .write(work_dir.path(), "config.yml")
        .unwrap();

    let port = free_port();
    let mut exporter = Command::new(mock_exporter())
        .arg("--web.listen-address")
        .arg(format!("127.0.0.1:{}", port))
        .arg("--config.file")
        .arg(&config_path)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn mock-exporter");

    let url = format!("http://127.0.0.1:{}/probe", port);

    let known = run_cli(home.path(), &["probe", &url, "--target", "127.0.0.1:1883"]);
    let unknown = run_cli(
        home.path(),
        &["probe", &url, "--target", "10.0.0.1:1883", "--timeout-ms", "1000"],
    );

    exporter.kill().ok();
    exporter.wait().ok();

    assert!(known.status.success(), "{:?}", known);
    assert!(String::from_utf8_lossy(&known.stdout).contains("emqx_mqtt_probe_success = 1"));

    // Converges, but reports failure
    assert_eq!(unknown.status.code(), Some(1), "{:?}", unknown);
    assert!(String::from_utf8_lossy(&unknown.stderr).contains("expected 1, got 0"));
}

#[test]
fn test_probe_cli_rejects_bad_interval() {
    let home = tempfile::tempdir().unwrap();
    let output = run_cli(
        home.path(),
        &[
            "probe",
            "http://127.0.0.1:1/probe",
            "--target",
            "127.0.0.1:1883",
            "--interval-ms",
            "0",
        ],
    );
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn test_check_cli_uses_given_container_client() {
    let home = tempfile::tempdir().unwrap();
    let missing = "/nonexistent/bin/podman";

    let output = run_cli(home.path(), &["check", "--docker", missing, "--json"]);
    assert_eq!(output.status.code(), Some(1), "{:?}", output);

    let results: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let tools = results.as_array().unwrap();
    assert_eq!(tools[0]["tool"], missing);
    assert_eq!(tools[0]["found"], false);
    assert!(tools.iter().all(|t| t["tool"] != "docker"));

    let output = run_cli(home.path(), &["check", "--docker", mock_exporter(), "--json"]);
    let results: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(results[0]["found"], true);
}

#[test]
fn test_cli_requires_subcommand() {
    let home = tempfile::tempdir().unwrap();
    let output = run_cli(home.path(), &[]);
    assert!(!output.status.success());
}
