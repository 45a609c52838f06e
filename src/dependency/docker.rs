//! Docker CLI container runtime

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;

use super::{ContainerRuntime, ContainerSpec, HealthStatus};
use crate::common::{display_command, Error, Result};

/// Drives containers through the `docker` command-line client
#[derive(Debug, Clone)]
pub struct DockerCli {
    program: PathBuf,
}

impl DockerCli {
    /// Find `docker` in PATH
    pub fn locate() -> Result<Self> {
        let program = which::which("docker").map_err(|_| Error::ToolNotFound("docker".into()))?;
        Ok(Self { program })
    }

    /// Use a specific client binary (e.g. `podman`)
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Run a docker subcommand and return its trimmed stdout
    async fn run(&self, args: &[String]) -> Result<String> {
        let rendered = display_command("docker", args);
        tracing::debug!("$ {}", rendered);

        let output = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| Error::container_command(&rendered, e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::container_command(&rendered, stderr.trim()));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// Arguments for `docker create`
fn create_args(spec: &ContainerSpec) -> Vec<String> {
    let mut args = vec!["create".to_string(), "--name".to_string(), spec.name.clone()];

    if !spec.health_command.is_empty() {
        args.push("--health-cmd".to_string());
        args.push(spec.health_command.join(" "));
    }

    if let Some(interval) = spec.health_interval {
        args.push("--health-interval".to_string());
        args.push(format!("{}s", interval.as_secs().max(1)));
    }

    for port in &spec.ports {
        args.push("--expose".to_string());
        args.push(port.container.clone());
        args.push("-p".to_string());
        args.push(format!("{}:{}:{}", spec.host_ip, port.host, port.container));
    }

    args.push(spec.image.clone());
    args
}

/// Parse `docker inspect --format '{{json .State.Health}}'` output
fn parse_health_output(output: &str) -> Result<HealthStatus> {
    let output = output.trim();
    if output.is_empty() || output == "null" {
        return Ok(HealthStatus::Unknown);
    }

    let health: serde_json::Value = serde_json::from_str(output)?;
    Ok(health
        .get("Status")
        .and_then(|s| s.as_str())
        .map(HealthStatus::parse)
        .unwrap_or(HealthStatus::Unknown))
}

fn is_no_such_container(err: &Error) -> bool {
    match err {
        Error::ContainerCommand { message, .. } => {
            let message = message.to_ascii_lowercase();
            message.contains("no such container") || message.contains("no such object")
        }
        _ => false,
    }
}

fn strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn pull(&self, image: &str) -> Result<()> {
        self.run(&strings(&["pull", "--quiet", image])).await?;
        Ok(())
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<String> {
        let id = self.run(&create_args(spec)).await?;
        if id.is_empty() {
            return Err(Error::container_command("create", "no container id returned"));
        }
        Ok(id)
    }

    async fn start(&self, id: &str) -> Result<()> {
        self.run(&strings(&["start", id])).await?;
        Ok(())
    }

    async fn health(&self, id: &str) -> Result<HealthStatus> {
        let output = self
            .run(&strings(&["inspect", "--format", "{{json .State.Health}}", id]))
            .await?;
        parse_health_output(&output)
    }

    async fn stop(&self, id: &str) -> Result<()> {
        self.run(&strings(&["stop", id])).await?;
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<()> {
        self.run(&strings(&["rm", id])).await?;
        Ok(())
    }

    async fn exists(&self, name_or_id: &str) -> Result<bool> {
        match self
            .run(&strings(&["inspect", "--type", "container", "--format", "{{.Id}}", name_or_id]))
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if is_no_such_container(&e) => Ok(false),
            Err(e) => Err(e),
        }
    }
}
