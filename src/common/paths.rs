//! Configuration and working directory paths

use std::path::{Path, PathBuf};

/// Name used for the configuration directory and temporary directory prefixes
const APP_NAME: &str = "probe-harness";

/// Name of the harness configuration file inside the config directory
const CONFIG_FILE: &str = "harness.toml";

/// Get the configuration directory path
///
/// Uses the directories crate for platform-appropriate locations:
/// - Linux: `~/.config/probe-harness/`
/// - macOS: `~/Library/Application Support/probe-harness/`
/// - Windows: `%APPDATA%\probe-harness\`
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the path to the configuration file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join(CONFIG_FILE))
}

/// Prefix for the artifact temporary directory of a given binary
pub fn artifact_dir_prefix(binary_name: &str) -> String {
    format!("{}-test-bindir-", binary_name)
}

/// Directory holding all per-scenario working directories
pub fn scenarios_dir(artifact_dir: &Path) -> PathBuf {
    artifact_dir.join("scenarios")
}

/// Working directory for one scenario run
///
/// The port is part of the name so that two runs of the same scenario in
/// one suite never share a directory.
pub fn scenario_dir(artifact_dir: &Path, scenario: &str, port: u16) -> PathBuf {
    let safe: String = scenario
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    scenarios_dir(artifact_dir).join(format!("{}-{}", safe, port))
}

/// Directory that staged TLS material lands in, relative to a working directory
pub fn certs_dir(work_dir: &Path) -> PathBuf {
    work_dir.join("certs")
}
