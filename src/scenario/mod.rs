//! Per-scenario inputs: the exporter configuration document and the TLS
//! material it references.

mod config;
mod tls;

pub use config::{Probe, ScenarioConfig, ScenarioConfigSynthesizer, Scheme, TlsClientConfig};
pub use tls::{StagedCerts, TlsMaterialProvisioner};
