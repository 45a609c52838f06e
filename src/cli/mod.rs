//! CLI command handling
//!
//! Dispatches CLI commands and formats their output. Every handler returns
//! whether the checks it ran passed; errors are left to `main` for exit code
//! selection.

use colored::Colorize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::commands::Commands;
use crate::common::config::HarnessConfig;
use crate::common::{Error, Result};
use crate::dependency::DockerCli;
use crate::metrics::{render, MetricsPoller, ProbeExpectations};
use crate::scenario::ScenarioConfigSynthesizer;
use crate::testing::{RunOptions, Suite};

/// Dispatch a CLI command
pub async fn dispatch(command: Commands) -> Result<bool> {
    match command {
        Commands::Run {
            config,
            filter,
            fail_fast,
            show_exporter_output,
            docker,
        } => {
            let config = HarnessConfig::load(config.as_deref())?;
            let runtime = match docker {
                Some(program) => DockerCli::with_program(program),
                None => DockerCli::locate()?,
            };
            let options = RunOptions {
                filter,
                fail_fast,
                show_exporter_output,
            };

            let mut suite = Suite::new(config, runtime, options)?;
            let report = suite.run(ctrl_c()).await?;
            report.print_summary();

            Ok(report.success())
        }

        Commands::Probe {
            url,
            target,
            prefix,
            timeout_ms,
            interval_ms,
            strict,
        } => probe(&url, &target, &prefix, timeout_ms, interval_ms, strict).await,

        Commands::RenderConfig { work_dir, config } => {
            let config = HarnessConfig::load(config.as_deref())?;
            let scenario = ScenarioConfigSynthesizer::new(&config.probes, &config.tls)
                .build(&absolute(&work_dir)?)?;
            print!("{}", scenario.to_yaml()?);
            Ok(true)
        }

        Commands::Check {
            config,
            docker,
            json,
        } => {
            let config = HarnessConfig::load(config.as_deref())?;
            let docker = docker.unwrap_or_else(|| PathBuf::from("docker"));
            check_tools(&config, &docker, json)
        }
    }
}

/// Resolves on Ctrl-C; never resolves if the handler cannot be installed
async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

async fn probe(
    url: &str,
    target: &str,
    prefix: &str,
    timeout_ms: u64,
    interval_ms: u64,
    strict: bool,
) -> Result<bool> {
    if interval_ms == 0 || interval_ms > timeout_ms {
        return Err(Error::Config(format!(
            "Interval {}ms must be non-zero and no longer than the timeout {}ms",
            interval_ms, timeout_ms
        )));
    }

    let poller = MetricsPoller::new(
        Duration::from_millis(timeout_ms),
        Duration::from_millis(interval_ms),
    )?;
    let converged = poller.poll_until_converged(url, target).await?;

    println!(
        "{} {} converged after {} attempt(s) in {:.1}s",
        "✓".green(),
        target.white().bold(),
        converged.attempts,
        converged.elapsed.as_secs_f64()
    );

    let expectations = ProbeExpectations::new(prefix).allow_extra_families(!strict);
    expectations.verify(&converged.families)?;

    for name in [expectations.duration_family(), expectations.success_family()] {
        if let Some(family) = converged.families.get(&name) {
            let value = family.first_value().unwrap_or_default();
            println!("  {} {} = {}", "✓".green(), name, value);
        }
    }

    tracing::debug!("Decoded families:\n{}", render(&converged.families));
    Ok(true)
}

fn check_tools(config: &HarnessConfig, docker: &Path, json: bool) -> Result<bool> {
    let build_tool = config
        .build
        .command
        .first()
        .cloned()
        .ok_or_else(|| Error::Config("Build command is empty".to_string()))?;

    let mut results = Vec::new();
    let mut all_found = true;

    for tool in [docker.display().to_string(), build_tool] {
        let found = which::which(&tool).ok();
        all_found &= found.is_some();

        if json {
            results.push(serde_json::json!({
                "tool": tool,
                "path": found.as_ref().map(|p| p.display().to_string()),
                "found": found.is_some(),
            }));
        } else {
            match &found {
                Some(path) => {
                    println!("{} {}", "✓".green(), tool);
                    println!("  Path: {}", path.display());
                }
                None => println!("{} {}", "✗".red(), tool),
            }
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else if !all_found {
        println!("\nInstall the missing tools before running the suite.");
    }

    Ok(all_found)
}
