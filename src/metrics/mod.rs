//! Exporter metrics: decoding, polling and assertions

mod assertions;
mod parser;
mod poller;

pub use assertions::ProbeExpectations;
pub use parser::{parse_text, render, MetricFamily, MetricFamilySet, MetricType, Sample};
pub use poller::{Converged, MetricsPoller};
