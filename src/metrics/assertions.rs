//! Probe metric expectations
//!
//! A successful probe exports two gauges: how long the probe took, which must
//! be a finite non-zero number, and whether it succeeded, which must be
//! exactly 1. All mismatches are collected before failing so one report
//! shows everything that is wrong.

use super::parser::{render, MetricFamilySet, MetricType};
use crate::common::{Error, Result};

/// Expected shape of a converged probe response
#[derive(Debug, Clone)]
pub struct ProbeExpectations {
    prefix: String,
    allow_extra_families: bool,
}

impl ProbeExpectations {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            allow_extra_families: true,
        }
    }

    /// Whether families other than the two probe gauges are tolerated
    pub fn allow_extra_families(mut self, allow: bool) -> Self {
        self.allow_extra_families = allow;
        self
    }

    pub fn duration_family(&self) -> String {
        format!("{}_mqtt_probe_duration_seconds", self.prefix)
    }

    pub fn success_family(&self) -> String {
        format!("{}_mqtt_probe_success", self.prefix)
    }

    /// Check a decoded response
    pub fn verify(&self, families: &MetricFamilySet) -> Result<()> {
        let mut mismatches = Vec::new();
        let duration = self.duration_family();
        let success = self.success_family();

        check_gauge(families, &duration, "a finite non-zero value", &mut mismatches, |v| {
            v.is_finite() && v != 0.0
        });
        check_gauge(families, &success, "1", &mut mismatches, |v| v == 1.0);

        if !self.allow_extra_families {
            for name in families.keys() {
                if *name != duration && *name != success {
                    mismatches.push(format!("{}: unexpected family", name));
                }
            }
        }

        if mismatches.is_empty() {
            Ok(())
        } else {
            Err(Error::AssertionFailed {
                mismatches,
                families: render(families),
            })
        }
    }
}

fn check_gauge(
    families: &MetricFamilySet,
    name: &str,
    expected: &str,
    mismatches: &mut Vec<String>,
    accept: impl Fn(f64) -> bool,
) {
    let Some(family) = families.get(name) else {
        mismatches.push(format!("{}: family missing", name));
        return;
    };

    if family.name != name {
        mismatches.push(format!("{}: family reports name '{}'", name, family.name));
    }

    if family.metric_type != MetricType::Gauge {
        mismatches.push(format!(
            "{}: expected type gauge, got {}",
            name, family.metric_type
        ));
    }

    match family.first_value() {
        None => mismatches.push(format!("{}: no samples", name)),
        Some(value) if !accept(value) => {
            mismatches.push(format!("{}: expected {}, got {}", name, expected, value))
        }
        Some(_) => {}
    }
}
