//! Exporter build artifact
//!
//! The exporter is built once per suite into a fresh temporary directory.
//! The directory doubles as the parent of every scenario working directory
//! and is removed once, at suite teardown.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use tempfile::TempDir;
use tokio::process::Command;

use crate::common::config::BuildConfig;
use crate::common::{display_command, paths, Error, Result};

/// Placeholder in the build command replaced with the executable path
const OUTPUT_PLACEHOLDER: &str = "{output}";

/// A built exporter and the temporary directory that owns it
#[derive(Debug)]
pub struct Artifact {
    dir: TempDir,
    binary: PathBuf,
}

impl Artifact {
    /// Absolute path of the built executable
    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// The owning temporary directory
    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    /// Recursively remove the artifact directory
    ///
    /// Consumes the artifact, so the directory is removed exactly once.
    pub fn cleanup(self) -> Result<()> {
        let path = self.dir.path().to_path_buf();
        tracing::info!("Removing artifact directory {}", path.display());
        self.dir.close().map_err(|e| Error::work_dir(path, e))
    }
}

/// Builds the exporter under test
pub struct ArtifactBuilder<'a> {
    config: &'a BuildConfig,
}

impl<'a> ArtifactBuilder<'a> {
    pub fn new(config: &'a BuildConfig) -> Self {
        Self { config }
    }

    /// Build command with the output placeholder substituted
    fn command_for(&self, binary: &Path) -> Result<(String, Vec<String>)> {
        let output = binary.to_string_lossy();
        let mut parts = self
            .config
            .command
            .iter()
            .map(|part| part.replace(OUTPUT_PLACEHOLDER, &output));

        let program = parts
            .next()
            .ok_or_else(|| Error::Config("Build command is empty".to_string()))?;
        Ok((program, parts.collect()))
    }

    /// Create the temporary directory and build the exporter into it
    ///
    /// Build output goes straight to the terminal. On failure the directory
    /// is removed before the error is returned.
    pub async fn build(&self) -> Result<Artifact> {
        let dir = tempfile::Builder::new()
            .prefix(&paths::artifact_dir_prefix(&self.config.binary_name))
            .tempdir()
            .map_err(|e| Error::work_dir(std::env::temp_dir(), e))?;

        let binary = dir.path().join(&self.config.binary_name);
        let (program, args) = self.command_for(&binary)?;
        let rendered = display_command(&program, &args);

        tracing::info!("Building exporter: {}", rendered);

        let status = Command::new(&program)
            .args(&args)
            .current_dir(&self.config.source_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await
            .map_err(|e| Error::BuildFailed(format!("could not run '{}': {}", rendered, e)))?;

        if !status.success() {
            return Err(Error::BuildFailed(format!(
                "'{}' exited with code {:?}",
                rendered,
                status.code()
            )));
        }

        if !binary.is_file() {
            return Err(Error::BuildFailed(format!(
                "'{}' did not produce {}",
                rendered,
                binary.display()
            )));
        }

        tracing::info!("Built {}", binary.display());
        Ok(Artifact { dir, binary })
    }
}
