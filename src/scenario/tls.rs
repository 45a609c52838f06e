//! TLS material staging
//!
//! Copies the CA certificate, client certificate and client key into a
//! scenario's working directory so TLS probes reference scenario-local paths.

use std::path::{Path, PathBuf};

use crate::common::config::TlsSourceConfig;
use crate::common::{paths, Error, Result};

/// Paths of staged TLS material
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedCerts {
    pub ca_file: PathBuf,
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
}

impl StagedCerts {
    /// Where the bundle lives once staged into `work_dir`
    pub fn in_work_dir(work_dir: &Path, source: &TlsSourceConfig) -> Self {
        let dir = paths::certs_dir(work_dir);
        Self {
            ca_file: dir.join(&source.ca_file),
            cert_file: dir.join(&source.cert_file),
            key_file: dir.join(&source.key_file),
        }
    }

    fn files(&self) -> [&Path; 3] {
        [&self.ca_file, &self.cert_file, &self.key_file]
    }
}

/// Stages the certificate bundle before each scenario
pub struct TlsMaterialProvisioner<'a> {
    source: &'a TlsSourceConfig,
}

impl<'a> TlsMaterialProvisioner<'a> {
    pub fn new(source: &'a TlsSourceConfig) -> Self {
        Self { source }
    }

    /// Copy the bundle into `work_dir/certs`
    ///
    /// Any missing or unreadable file fails the whole staging step.
    pub fn stage(&self, work_dir: &Path) -> Result<StagedCerts> {
        let staged = StagedCerts::in_work_dir(work_dir, self.source);
        let dest_dir = paths::certs_dir(work_dir);

        std::fs::create_dir_all(&dest_dir).map_err(|e| Error::TlsStaging {
            path: dest_dir.clone(),
            source: e,
        })?;

        let names = [
            &self.source.ca_file,
            &self.source.cert_file,
            &self.source.key_file,
        ];

        for (name, dest) in names.into_iter().zip(staged.files()) {
            let src = self.source.source_dir.join(name);
            std::fs::copy(&src, dest).map_err(|e| Error::TlsStaging {
                path: src.clone(),
                source: e,
            })?;
        }

        tracing::debug!(
            "Staged TLS material from {} into {}",
            self.source.source_dir.display(),
            dest_dir.display()
        );

        Ok(staged)
    }
}
