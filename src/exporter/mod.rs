//! Exporter process supervision
//!
//! One exporter instance runs per scenario. The child is spawned with
//! kill-on-drop, so every exit path out of a scenario (including a panic)
//! kills it; the normal path calls [`ExporterInstance::terminate`], which also
//! waits for the process to be reaped.

mod ports;

pub use ports::{port_is_free, PortAllocator};

use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::{Child, Command};

use crate::common::config::ExporterConfig;
use crate::common::{Error, Result};

/// A running exporter bound to one port
#[derive(Debug)]
pub struct ExporterInstance {
    port: u16,
    host: String,
    pid: Option<u32>,
    config_path: PathBuf,
    child: Child,
}

impl ExporterInstance {
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Value passed to `--web.listen-address`
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Measurement endpoint URL (without query)
    pub fn probe_url(&self) -> String {
        format!("http://{}/probe", self.listen_address())
    }

    /// Whether the process has already exited on its own
    pub fn has_exited(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(Some(_)))
    }

    /// Kill the process and wait until it is reaped
    ///
    /// Exit status is not inspected; an exporter that already died is fine.
    pub async fn terminate(mut self) -> Result<()> {
        if let Err(e) = self.child.start_kill() {
            // InvalidInput means the child already exited
            if e.kind() != std::io::ErrorKind::InvalidInput {
                return Err(Error::Io(e));
            }
        }

        self.child.wait().await?;
        tracing::debug!(
            "Exporter on port {} terminated (pid {:?})",
            self.port,
            self.pid
        );
        Ok(())
    }
}

/// Launches exporter instances
pub struct ExporterSupervisor<'a> {
    config: &'a ExporterConfig,
    show_output: bool,
}

impl<'a> ExporterSupervisor<'a> {
    pub fn new(config: &'a ExporterConfig) -> Self {
        Self {
            config,
            show_output: false,
        }
    }

    /// Pass exporter stdout/stderr through to the terminal
    pub fn with_output(mut self, show: bool) -> Self {
        self.show_output = show;
        self
    }

    /// Start `binary` listening on `port` with the given config file
    ///
    /// Returns as soon as the process is spawned; readiness is established
    /// by polling the measurement endpoint.
    pub fn launch(&self, binary: &Path, port: u16, config_path: &Path) -> Result<ExporterInstance> {
        let listen_address = format!("{}:{}", self.config.listen_host, port);
        let output = || {
            if self.show_output {
                Stdio::inherit()
            } else {
                Stdio::null()
            }
        };

        let child = Command::new(binary)
            .arg("--web.listen-address")
            .arg(&listen_address)
            .arg("--config.file")
            .arg(config_path)
            .stdin(Stdio::null())
            .stdout(output())
            .stderr(output())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::ExporterLaunch {
                binary: binary.to_path_buf(),
                source: e,
            })?;

        let pid = child.id();
        tracing::info!("Launched exporter on {} (pid {:?})", listen_address, pid);

        Ok(ExporterInstance {
            port,
            host: self.config.listen_host.clone(),
            pid,
            config_path: config_path.to_path_buf(),
            child,
        })
    }
}

/// Whether a process with this pid still exists
///
/// Used to confirm the previous scenario's exporter is gone before the next
/// one binds.
#[cfg(unix)]
pub fn process_exists(pid: u32) -> bool {
    // Signal 0 tests process existence without side effects
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

#[cfg(not(unix))]
pub fn process_exists(_pid: u32) -> bool {
    false
}
