//! External dependency lifecycle
//!
//! The suite needs one live broker for all scenarios. [`DependencyManager`]
//! pulls, creates and starts it, gates on its health status, and stops and
//! removes it at teardown. The container runtime sits behind the
//! [`ContainerRuntime`] trait so the lifecycle logic can run without Docker.

mod docker;

pub use docker::DockerCli;

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;

use crate::common::config::{DependencyConfig, PortMapping};
use crate::common::{Error, Result};

/// Coarse health status reported by the container runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Starting,
    Healthy,
    Unhealthy,
    /// No health information (no health check, or an unrecognized status)
    Unknown,
}

impl HealthStatus {
    /// Parse a runtime status string such as `healthy`
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "starting" => HealthStatus::Starting,
            "healthy" => HealthStatus::Healthy,
            "unhealthy" => HealthStatus::Unhealthy,
            _ => HealthStatus::Unknown,
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Starting => write!(f, "starting"),
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
            HealthStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// What to create
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub host_ip: String,
    pub ports: Vec<PortMapping>,
    pub health_command: Vec<String>,
    pub health_interval: Option<Duration>,
}

impl From<&DependencyConfig> for ContainerSpec {
    fn from(config: &DependencyConfig) -> Self {
        Self {
            name: config.name.clone(),
            image: config.image.clone(),
            host_ip: config.host_ip.clone(),
            ports: config.ports.clone(),
            health_command: config.health_command.clone(),
            health_interval: config.container_health_interval_secs.map(Duration::from_secs),
        }
    }
}

/// Operations the lifecycle manager needs from a container runtime
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Pull an image
    async fn pull(&self, image: &str) -> Result<()>;

    /// Create a container, returning its id
    async fn create(&self, spec: &ContainerSpec) -> Result<String>;

    /// Start a created container
    async fn start(&self, id: &str) -> Result<()>;

    /// Inspect the current health status
    async fn health(&self, id: &str) -> Result<HealthStatus>;

    /// Stop a running container
    async fn stop(&self, id: &str) -> Result<()>;

    /// Remove a stopped container
    async fn remove(&self, id: &str) -> Result<()>;

    /// Whether a container with this name or id exists
    async fn exists(&self, name_or_id: &str) -> Result<bool>;
}

/// The live dependency owned by a suite
#[derive(Debug, Clone)]
pub struct DependencyInstance {
    /// Runtime-assigned id
    pub id: String,
    pub name: String,
    pub image: String,
    pub ports: Vec<PortMapping>,
    pub status: HealthStatus,
}

/// Creates, health-gates and removes the suite's dependency
pub struct DependencyManager<R> {
    runtime: R,
    config: DependencyConfig,
    instance: Option<DependencyInstance>,
    /// Name of a container whose `create` has not returned yet
    creating: Option<String>,
}

impl<R: ContainerRuntime> DependencyManager<R> {
    pub fn new(runtime: R, config: DependencyConfig) -> Self {
        Self {
            runtime,
            config,
            instance: None,
            creating: None,
        }
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    /// The created instance, if any
    pub fn instance(&self) -> Option<&DependencyInstance> {
        self.instance.as_ref()
    }

    /// Whether [`stop`](Self::stop) has anything to remove
    pub fn needs_cleanup(&self) -> bool {
        self.instance.is_some() || self.creating.is_some()
    }

    /// Whether the dependency is up and passed its health gate
    pub fn is_healthy(&self) -> bool {
        self.instance
            .as_ref()
            .map(|i| i.status == HealthStatus::Healthy)
            .unwrap_or(false)
    }

    /// Pull, create and start the dependency, then wait until it is healthy
    ///
    /// The instance is recorded as soon as it is created, so [`stop`](Self::stop)
    /// can clean it up even when the health gate fails.
    pub async fn start(&mut self) -> Result<&DependencyInstance> {
        if self.instance.is_some() {
            return Err(Error::Internal(format!(
                "Dependency '{}' already started",
                self.config.name
            )));
        }

        let spec = ContainerSpec::from(&self.config);

        if self.config.remove_stale && self.runtime.exists(&spec.name).await? {
            tracing::warn!("Removing leftover container '{}'", spec.name);
            if let Err(e) = self.runtime.stop(&spec.name).await {
                tracing::debug!("Stopping leftover container failed: {}", e);
            }
            self.runtime.remove(&spec.name).await?;
        }

        tracing::info!("Pulling {}", spec.image);
        self.runtime.pull(&spec.image).await?;

        // Dropped mid-create, the container may exist without an id
        self.creating = Some(spec.name.clone());
        let id = match self.runtime.create(&spec).await {
            Ok(id) => id,
            Err(e) => {
                self.creating = None;
                return Err(e);
            }
        };
        tracing::info!("Created container '{}' ({})", spec.name, short_id(&id));

        self.instance = Some(DependencyInstance {
            id: id.clone(),
            name: spec.name.clone(),
            image: spec.image.clone(),
            ports: spec.ports.clone(),
            status: HealthStatus::Unknown,
        });
        self.creating = None;

        self.runtime.start(&id).await?;
        self.wait_until_healthy(&id).await?;

        self.instance
            .as_ref()
            .ok_or_else(|| Error::DependencyNotStarted(self.config.name.clone()))
    }

    /// Inspect the health status once per interval until healthy or out of attempts
    async fn wait_until_healthy(&mut self, id: &str) -> Result<()> {
        let attempts = self.config.health_attempts;
        let interval = self.config.health_poll_interval();
        let mut last = HealthStatus::Unknown;

        for attempt in 1..=attempts {
            last = self.runtime.health(id).await?;
            if let Some(instance) = self.instance.as_mut() {
                instance.status = last;
            }

            tracing::debug!("Dependency health check {}/{}: {}", attempt, attempts, last);

            if last == HealthStatus::Healthy {
                tracing::info!("Dependency '{}' is healthy", self.config.name);
                return Ok(());
            }

            if attempt < attempts {
                tokio::time::sleep(interval).await;
            }
        }

        Err(Error::DependencyUnhealthy {
            name: self.config.name.clone(),
            attempts,
            last_status: last.to_string(),
        })
    }

    /// Stop and remove the dependency
    ///
    /// Either step failing is fatal: a leaked container keeps the fixed host
    /// ports bound for the next suite run.
    pub async fn stop(&mut self) -> Result<()> {
        let id = match (&self.instance, &self.creating) {
            (Some(instance), _) => instance.id.clone(),
            (None, Some(name)) => {
                let name = name.clone();
                if self.runtime.exists(&name).await? {
                    tracing::info!("Removing container '{}' from an interrupted create", name);
                    if let Err(e) = self.runtime.stop(&name).await {
                        tracing::debug!("Stopping '{}' failed: {}", name, e);
                    }
                    self.runtime.remove(&name).await?;
                }
                self.creating = None;
                return Ok(());
            }
            (None, None) => return Err(Error::DependencyNotStarted(self.config.name.clone())),
        };

        tracing::info!("Stopping container '{}'", self.config.name);
        self.runtime.stop(&id).await?;
        self.runtime.remove(&id).await?;
        self.instance = None;

        Ok(())
    }
}

fn short_id(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory runtime for lifecycle tests

    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    struct FakeState {
        next_id: u32,
        /// id -> (name, health checks seen)
        containers: HashMap<String, (String, u32)>,
        started: Vec<String>,
        calls: Vec<String>,
    }

    /// Reports `healthy` after a fixed number of health checks
    #[derive(Debug, Default)]
    pub struct FakeRuntime {
        pub healthy_after: Option<u32>,
        pub fail_stop: bool,
        /// `create` registers the container, then never returns
        pub hang_after_create: bool,
        state: Mutex<FakeState>,
    }

    impl FakeRuntime {
        pub fn healthy_after(checks: u32) -> Self {
            Self {
                healthy_after: Some(checks),
                ..Self::default()
            }
        }

        pub fn never_healthy() -> Self {
            Self::default()
        }

        /// Healthy at once, but every stop fails
        pub fn failing_stop() -> Self {
            Self {
                healthy_after: Some(1),
                fail_stop: true,
                ..Self::default()
            }
        }

        pub fn calls(&self) -> Vec<String> {
            self.state.lock().unwrap().calls.clone()
        }

        pub fn container_count(&self) -> usize {
            self.state.lock().unwrap().containers.len()
        }

        pub fn hangs_after_create() -> Self {
            Self {
                healthy_after: Some(1),
                hang_after_create: true,
                ..Self::default()
            }
        }

        /// Pretend a container with this name survived a previous run
        pub fn add_leftover(&self, name: &str) {
            let mut state = self.state.lock().unwrap();
            state
                .containers
                .insert(format!("leftover-{}", name), (name.to_string(), 0));
        }

        fn resolve(state: &FakeState, name_or_id: &str) -> Option<String> {
            state
                .containers
                .iter()
                .find(|(id, (name, _))| id.as_str() == name_or_id || name == name_or_id)
                .map(|(id, _)| id.clone())
        }
    }

    #[async_trait]
    impl ContainerRuntime for FakeRuntime {
        async fn pull(&self, image: &str) -> Result<()> {
            self.state.lock().unwrap().calls.push(format!("pull {}", image));
            Ok(())
        }

        async fn create(&self, spec: &ContainerSpec) -> Result<String> {
            let id = {
                let mut state = self.state.lock().unwrap();
                if Self::resolve(&state, &spec.name).is_some() {
                    return Err(Error::container_command("create", "name already in use"));
                }
                state.next_id += 1;
                let id = format!("{:064x}", state.next_id);
                state.containers.insert(id.clone(), (spec.name.clone(), 0));
                state.calls.push(format!("create {}", spec.name));
                id
            };
            if self.hang_after_create {
                std::future::pending::<()>().await;
            }
            Ok(id)
        }

        async fn start(&self, id: &str) -> Result<()> {
            let mut state = self.state.lock().unwrap();
            state.started.push(id.to_string());
            state.calls.push("start".to_string());
            Ok(())
        }

        async fn health(&self, id: &str) -> Result<HealthStatus> {
            let mut state = self.state.lock().unwrap();
            let checks = {
                let entry = state
                    .containers
                    .get_mut(id)
                    .ok_or_else(|| Error::container_command("inspect", "No such container"))?;
                entry.1 += 1;
                entry.1
            };
            state.calls.push("health".to_string());
            Ok(match self.healthy_after {
                Some(n) if checks >= n => HealthStatus::Healthy,
                _ => HealthStatus::Starting,
            })
        }

        async fn stop(&self, name_or_id: &str) -> Result<()> {
            let mut state = self.state.lock().unwrap();
            state.calls.push("stop".to_string());
            if self.fail_stop {
                return Err(Error::container_command("stop", "daemon unavailable"));
            }
            match Self::resolve(&state, name_or_id) {
                Some(_) => Ok(()),
                None => Err(Error::container_command("stop", "No such container")),
            }
        }

        async fn remove(&self, name_or_id: &str) -> Result<()> {
            let mut state = self.state.lock().unwrap();
            state.calls.push("remove".to_string());
            match Self::resolve(&state, name_or_id) {
                Some(id) => {
                    state.containers.remove(&id);
                    Ok(())
                }
                None => Err(Error::container_command("rm", "No such container")),
            }
        }

        async fn exists(&self, name_or_id: &str) -> Result<bool> {
            let state = self.state.lock().unwrap();
            Ok(Self::resolve(&state, name_or_id).is_some())
        }
    }

    /// Dependency config with a fast health loop
    pub fn fast_config(attempts: u32) -> DependencyConfig {
        DependencyConfig {
            health_poll_interval_ms: 1,
            health_attempts: attempts,
            ..DependencyConfig::default()
        }
    }
}
