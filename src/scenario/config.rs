//! Exporter configuration document
//!
//! Types mirror the exporter's YAML schema: a top-level `probes` list whose
//! entries carry a target, a scheme and, for TLS schemes, a `tls_config`
//! block. A TLS block is present exactly when the scheme needs one; both
//! construction and deserialization enforce that.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::common::config::{ProbeSpec, TlsSourceConfig};
use crate::common::{Error, Result};

use super::tls::StagedCerts;

/// Transport the exporter uses to reach a probe target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    /// Plain MQTT over TCP
    Tcp,
    /// MQTT over TLS
    Ssl,
    /// MQTT over websocket
    Ws,
    /// MQTT over secure websocket
    Wss,
}

impl Scheme {
    /// Whether targets using this scheme need a TLS block
    pub fn requires_tls(self) -> bool {
        matches!(self, Scheme::Ssl | Scheme::Wss)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Scheme::Tcp => "tcp",
            Scheme::Ssl => "ssl",
            Scheme::Ws => "ws",
            Scheme::Wss => "wss",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Client-side TLS settings for one probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsClientConfig {
    #[serde(default)]
    pub insecure_skip_verify: bool,
    pub ca_file: PathBuf,
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
}

impl TlsClientConfig {
    /// TLS block pointing at staged certificate material
    pub fn from_staged(certs: &StagedCerts, insecure_skip_verify: bool) -> Self {
        Self {
            insecure_skip_verify,
            ca_file: certs.ca_file.clone(),
            cert_file: certs.cert_file.clone(),
            key_file: certs.key_file.clone(),
        }
    }
}

/// One probe entry; immutable once constructed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ProbeEntry")]
pub struct Probe {
    target: String,
    scheme: Scheme,
    #[serde(rename = "tls_config", skip_serializing_if = "Option::is_none")]
    tls: Option<TlsClientConfig>,
}

/// Unchecked form of [`Probe`] as it appears in a document
#[derive(Deserialize)]
struct ProbeEntry {
    target: String,
    scheme: Scheme,
    #[serde(default)]
    tls_config: Option<TlsClientConfig>,
}

impl TryFrom<ProbeEntry> for Probe {
    type Error = Error;

    fn try_from(entry: ProbeEntry) -> Result<Self> {
        Probe::new(entry.target, entry.scheme, entry.tls_config)
    }
}

impl Probe {
    /// Create a probe, checking the scheme/TLS pairing and the target shape
    pub fn new(
        target: impl Into<String>,
        scheme: Scheme,
        tls: Option<TlsClientConfig>,
    ) -> Result<Self> {
        let target = target.into();
        validate_target(&target)?;

        match (scheme.requires_tls(), tls.is_some()) {
            (true, false) => {
                return Err(Error::invalid_probe(
                    &target,
                    &format!("scheme '{}' requires a TLS config", scheme),
                ))
            }
            (false, true) => {
                return Err(Error::invalid_probe(
                    &target,
                    &format!("scheme '{}' does not take a TLS config", scheme),
                ))
            }
            _ => {}
        }

        Ok(Self {
            target,
            scheme,
            tls,
        })
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn tls(&self) -> Option<&TlsClientConfig> {
        self.tls.as_ref()
    }
}

/// Check a `host:port[/path]` target
fn validate_target(target: &str) -> Result<()> {
    let authority = target.split('/').next().unwrap_or_default();
    let (host, port) = authority
        .rsplit_once(':')
        .ok_or_else(|| Error::invalid_probe(target, "expected host:port[/path]"))?;

    if host.is_empty() {
        return Err(Error::invalid_probe(target, "empty host"));
    }

    match port.parse::<u16>() {
        Ok(p) if p > 0 => Ok(()),
        _ => Err(Error::invalid_probe(target, "invalid port")),
    }
}

/// The configuration document handed to one exporter instance
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioConfig {
    #[serde(default)]
    pub probes: Vec<Probe>,
}

impl ScenarioConfig {
    /// Look up the probe for a target
    pub fn probe(&self, target: &str) -> Option<&Probe> {
        self.probes.iter().find(|p| p.target == target)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Read a document from disk
    pub fn read_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read '{}': {}", path.display(), e))
        })?;
        Self::from_yaml(&content)
    }

    /// Serialize and write the document
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let content = self.to_yaml()?;
        std::fs::write(path, content).map_err(|e| Error::work_dir(path, e))?;
        Ok(())
    }
}

/// Builds the per-scenario exporter configuration
pub struct ScenarioConfigSynthesizer<'a> {
    probes: &'a [ProbeSpec],
    tls: &'a TlsSourceConfig,
}

impl<'a> ScenarioConfigSynthesizer<'a> {
    pub fn new(probes: &'a [ProbeSpec], tls: &'a TlsSourceConfig) -> Self {
        Self { probes, tls }
    }

    /// Build the config for a scenario working directory
    ///
    /// TLS probes point at the material staged under `work_dir`.
    pub fn build(&self, work_dir: &Path) -> Result<ScenarioConfig> {
        let certs = StagedCerts::in_work_dir(work_dir, self.tls);

        let probes = self
            .probes
            .iter()
            .map(|spec| {
                let tls = spec
                    .scheme
                    .requires_tls()
                    .then(|| TlsClientConfig::from_staged(&certs, self.tls.insecure_skip_verify));
                Probe::new(spec.target.clone(), spec.scheme, tls)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(ScenarioConfig { probes })
    }

    /// Build the config and write it to `work_dir/file_name`
    pub fn write(&self, work_dir: &Path, file_name: &str) -> Result<(ScenarioConfig, PathBuf)> {
        let config = self.build(work_dir)?;
        let path = work_dir.join(file_name);
        config.write_to(&path)?;
        tracing::debug!(
            "Wrote exporter config with {} probes to {}",
            config.probes.len(),
            path.display()
        );
        Ok((config, path))
    }
}
