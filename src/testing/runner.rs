//! Suite driver
//!
//! A suite runs in three phases: one-time setup (dependency, then exporter
//! build), the selected scenarios strictly in order, and one-time teardown
//! (artifact directory, then dependency). [`Suite::run`] tears down on every
//! path out, including setup failure and interruption.

use colored::Colorize;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::artifact::{Artifact, ArtifactBuilder};
use crate::common::config::{HarnessConfig, ScenarioSpec};
use crate::common::{paths, Error, Result};
use crate::dependency::{ContainerRuntime, DependencyManager};
use crate::exporter::{process_exists, ExporterSupervisor, PortAllocator};
use crate::metrics::{MetricsPoller, ProbeExpectations};
use crate::scenario::{ScenarioConfigSynthesizer, TlsMaterialProvisioner};

use super::report::{ScenarioOutcome, ScenarioReport, SuiteReport};

/// Per-invocation run options
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Only run scenarios whose name contains this
    pub filter: Option<String>,
    /// Stop after the first failed scenario
    pub fail_fast: bool,
    /// Pass exporter stdout/stderr through
    pub show_exporter_output: bool,
}

impl RunOptions {
    fn selects(&self, scenario: &ScenarioSpec) -> bool {
        match &self.filter {
            Some(filter) => scenario.name.contains(filter.as_str()),
            None => true,
        }
    }
}

/// Drives one suite run against a container runtime
pub struct Suite<R> {
    config: HarnessConfig,
    options: RunOptions,
    dependency: DependencyManager<R>,
    artifact: Option<Artifact>,
    ports: PortAllocator,
    poller: MetricsPoller,
    expectations: ProbeExpectations,
    /// Exporter of the previous scenario, which must be gone before the next launch
    last_pid: Option<u32>,
    report: SuiteReport,
}

impl<R: ContainerRuntime> Suite<R> {
    pub fn new(config: HarnessConfig, runtime: R, options: RunOptions) -> Result<Self> {
        let poller = MetricsPoller::from_config(&config.poll)?;
        let ports = PortAllocator::new(
            config.exporter.listen_host.clone(),
            config.exporter.start_port,
            config.exporter.lowest_port,
        );
        let expectations = ProbeExpectations::new(config.exporter.metric_prefix.clone())
            .allow_extra_families(config.poll.allow_extra_families);
        let dependency = DependencyManager::new(runtime, config.dependency.clone());

        Ok(Self {
            config,
            options,
            dependency,
            artifact: None,
            ports,
            poller,
            expectations,
            last_pid: None,
            report: SuiteReport::default(),
        })
    }

    pub fn dependency(&self) -> &DependencyManager<R> {
        &self.dependency
    }

    pub fn artifact(&self) -> Option<&Artifact> {
        self.artifact.as_ref()
    }

    /// Set up, run every selected scenario, tear down
    ///
    /// Resolving `shutdown` stops the run at the next suspension point; the
    /// report then holds the scenarios finished so far. Fatal errors are
    /// returned after teardown.
    pub async fn run<F: Future<Output = ()>>(&mut self, shutdown: F) -> Result<SuiteReport> {
        let result = tokio::select! {
            result = self.setup_and_run() => result,
            _ = shutdown => Err(Error::Interrupted),
        };

        let teardown = self.teardown().await;
        let mut report = std::mem::take(&mut self.report);

        match result {
            Ok(()) => {}
            Err(Error::Interrupted) => {
                tracing::warn!("Interrupted; remaining scenarios not run");
                report.interrupted = true;
            }
            Err(e) => {
                if let Err(teardown_err) = teardown {
                    tracing::error!("Teardown after failure also failed: {}", teardown_err);
                }
                return Err(e);
            }
        }

        teardown?;
        Ok(report)
    }

    async fn setup_and_run(&mut self) -> Result<()> {
        self.try_setup().await?;
        self.run_scenarios().await
    }

    /// Start the dependency and build the exporter
    ///
    /// Whatever was created before a failure is torn down again.
    pub async fn setup(&mut self) -> Result<()> {
        if let Err(e) = self.try_setup().await {
            if let Err(teardown_err) = self.teardown().await {
                tracing::error!("Teardown after setup failure failed: {}", teardown_err);
            }
            return Err(e);
        }
        Ok(())
    }

    async fn try_setup(&mut self) -> Result<()> {
        println!("\n{}", "Setup:".cyan());

        let instance = self.dependency.start().await?;
        println!(
            "  {} Dependency {} is {}",
            "✓".green(),
            instance.name.white().bold(),
            instance.status
        );

        let artifact = ArtifactBuilder::new(&self.config.build).build().await?;
        println!(
            "  {} Built {}",
            "✓".green(),
            artifact.binary().display().to_string().dimmed()
        );
        self.artifact = Some(artifact);

        Ok(())
    }

    /// Run the selected scenarios in order
    ///
    /// Scenario-local failures are recorded in the report; a fatal error
    /// stops the run and is returned.
    pub async fn run_scenarios(&mut self) -> Result<()> {
        if self.artifact.is_none() {
            return Err(Error::Internal("Suite has not been set up".to_string()));
        }
        if !self.dependency.is_healthy() {
            return Err(Error::DependencyNotStarted(self.config.dependency.name.clone()));
        }

        let selected: Vec<ScenarioSpec> = self
            .config
            .scenarios
            .iter()
            .filter(|s| self.options.selects(s))
            .cloned()
            .collect();

        if selected.is_empty() {
            return Err(Error::Config(format!(
                "No scenario matches filter '{}'",
                self.options.filter.as_deref().unwrap_or_default()
            )));
        }

        println!("\n{}", "Scenarios:".cyan());

        for (index, spec) in selected.iter().enumerate() {
            let report = self.run_scenario(spec).await?;
            report.print();

            let failed = !report.passed();
            self.report.scenarios.push(report);

            if failed && self.options.fail_fast {
                self.report.skipped = selected.len() - index - 1;
                break;
            }
        }

        Ok(())
    }

    /// Run one scenario in its own working directory with its own exporter
    pub async fn run_scenario(&mut self, spec: &ScenarioSpec) -> Result<ScenarioReport> {
        let started = Instant::now();
        let mut report = ScenarioReport {
            name: spec.name.clone(),
            target: spec.target.clone(),
            port: None,
            pid: None,
            attempts: 0,
            elapsed: Duration::ZERO,
            outcome: ScenarioOutcome::Passed,
        };

        let result = self.execute(spec, &mut report).await;
        report.elapsed = started.elapsed();

        match result {
            Ok(()) => {}
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                tracing::debug!("Scenario '{}' failed: {}", spec.name, e);
                report.outcome = ScenarioOutcome::from_error(&e);
            }
        }

        Ok(report)
    }

    async fn execute(&mut self, spec: &ScenarioSpec, report: &mut ScenarioReport) -> Result<()> {
        let (artifact_dir, binary) = match &self.artifact {
            Some(artifact) => (artifact.dir().to_path_buf(), artifact.binary().to_path_buf()),
            None => return Err(Error::Internal("Suite has not been set up".to_string())),
        };

        let port = self.ports.allocate()?;
        report.port = Some(port);

        let work_dir = paths::scenario_dir(&artifact_dir, &spec.name, port);
        std::fs::create_dir_all(&work_dir).map_err(|e| Error::work_dir(&work_dir, e))?;

        let result = self.execute_in(spec, &binary, port, &work_dir, report).await;
        let cleanup = std::fs::remove_dir_all(&work_dir).map_err(|e| Error::work_dir(&work_dir, e));

        match result {
            Err(e) if e.is_fatal() => Err(e),
            result => cleanup.and(result),
        }
    }

    async fn execute_in(
        &mut self,
        spec: &ScenarioSpec,
        binary: &Path,
        port: u16,
        work_dir: &Path,
        report: &mut ScenarioReport,
    ) -> Result<()> {
        TlsMaterialProvisioner::new(&self.config.tls).stage(work_dir)?;

        let (scenario_config, config_path) =
            ScenarioConfigSynthesizer::new(&self.config.probes, &self.config.tls)
                .write(work_dir, &self.config.exporter.config_file_name)?;

        let target = scenario_config
            .probe(&spec.target)
            .map(|p| p.target().to_string())
            .ok_or_else(|| {
                Error::Config(format!(
                    "Scenario '{}' targets '{}', which is not in the exporter config",
                    spec.name, spec.target
                ))
            })?;

        if let Some(pid) = self.last_pid.take() {
            if process_exists(pid) {
                return Err(Error::Internal(format!(
                    "Previous exporter (pid {}) is still running",
                    pid
                )));
            }
        }

        let instance = ExporterSupervisor::new(&self.config.exporter)
            .with_output(self.options.show_exporter_output)
            .launch(binary, port, &config_path)?;
        self.last_pid = instance.pid();
        report.pid = instance.pid();

        // No early return between launch and terminate
        let verdict = self.verify(&instance.probe_url(), &target, report).await;
        let terminated = instance.terminate().await;

        verdict?;
        terminated
    }

    async fn verify(&self, url: &str, target: &str, report: &mut ScenarioReport) -> Result<()> {
        match self.poller.poll_until_converged(url, target).await {
            Ok(converged) => {
                report.attempts = converged.attempts;
                self.expectations.verify(&converged.families)
            }
            Err(e) => {
                if let Error::PollTimeout { attempts, .. } = &e {
                    report.attempts = *attempts;
                }
                Err(e)
            }
        }
    }

    /// Remove the artifact directory, then stop and remove the dependency
    ///
    /// Both steps are attempted; the first failure is returned. Safe to call
    /// more than once.
    pub async fn teardown(&mut self) -> Result<()> {
        let mut first_error: Option<Error> = None;

        if let Some(artifact) = self.artifact.take() {
            let dir: PathBuf = artifact.dir().to_path_buf();
            match artifact.cleanup() {
                Ok(()) => println!(
                    "  {} Removed {}",
                    "✓".green(),
                    dir.display().to_string().dimmed()
                ),
                Err(e) => {
                    tracing::error!("Artifact cleanup failed: {}", e);
                    first_error = Some(e);
                }
            }
        }

        if self.dependency.needs_cleanup() {
            match self.dependency.stop().await {
                Ok(()) => println!(
                    "  {} Dependency {} removed",
                    "✓".green(),
                    self.config.dependency.name.white().bold()
                ),
                Err(e) => {
                    tracing::error!("Dependency teardown failed: {}", e);
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
