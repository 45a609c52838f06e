//! Exposition format decoding
//!
//! Wraps the `prometheus-parse` text decoder and regroups its samples into
//! metric families keyed by name. Histogram buckets and summary quantiles are
//! flattened back into one sample each; loose `_sum` and `_count` samples are
//! attached to their histogram or summary family.

use prometheus_parse::{Scrape, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::common::{Error, Result};

/// Decoded families, keyed by family name
pub type MetricFamilySet = BTreeMap<String, MetricFamily>;

/// Declared type of a metric family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
    Counter,
    Gauge,
    Histogram,
    Summary,
    Untyped,
}

impl MetricType {
    pub fn as_str(self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
            MetricType::Histogram => "histogram",
            MetricType::Summary => "summary",
            MetricType::Untyped => "untyped",
        }
    }

    fn of(value: &Value) -> Self {
        match value {
            Value::Counter(_) => MetricType::Counter,
            Value::Gauge(_) => MetricType::Gauge,
            Value::Histogram(_) => MetricType::Histogram,
            Value::Summary(_) => MetricType::Summary,
            Value::Untyped(_) => MetricType::Untyped,
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One sample line
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Full sample name, including any histogram/summary suffix
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub value: f64,
}

/// A named, typed group of samples
#[derive(Debug, Clone, PartialEq)]
pub struct MetricFamily {
    pub name: String,
    pub help: Option<String>,
    pub metric_type: MetricType,
    pub samples: Vec<Sample>,
}

impl MetricFamily {
    /// Value of the first sample
    pub fn first_value(&self) -> Option<f64> {
        self.samples.first().map(|s| s.value)
    }
}

impl fmt::Display for MetricFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(help) = &self.help {
            writeln!(f, "# HELP {} {}", self.name, help.replace('\\', "\\\\").replace('\n', "\\n"))?;
        }
        writeln!(f, "# TYPE {} {}", self.name, self.metric_type)?;
        for sample in &self.samples {
            write!(f, "{}", sample.name)?;
            if !sample.labels.is_empty() {
                let labels: Vec<String> = sample
                    .labels
                    .iter()
                    .map(|(k, v)| {
                        let v = v.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n");
                        format!("{}=\"{}\"", k, v)
                    })
                    .collect();
                write!(f, "{{{}}}", labels.join(","))?;
            }
            writeln!(f, " {}", format_value(sample.value))?;
        }
        Ok(())
    }
}

fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value == f64::INFINITY {
        "+Inf".to_string()
    } else if value == f64::NEG_INFINITY {
        "-Inf".to_string()
    } else {
        value.to_string()
    }
}

/// Render a family set back to exposition text
pub fn render(families: &MetricFamilySet) -> String {
    families.values().map(|f| f.to_string()).collect()
}

/// Decode an exposition document
///
/// A document that yields no samples at all is an error: an exporter that
/// is up always reports something, so an empty or foreign body (an HTML
/// error page, say) means the endpoint is not serving metrics yet.
pub fn parse_text(input: &str) -> Result<MetricFamilySet> {
    let scrape = Scrape::parse(input.lines().map(|line| Ok(line.to_owned())))
        .map_err(|e| Error::MetricsParse(e.to_string()))?;

    if scrape.samples.is_empty() {
        return Err(Error::MetricsParse(
            "document contains no samples".to_string(),
        ));
    }

    let mut families = MetricFamilySet::new();
    let (untyped, typed): (Vec<_>, Vec<_>) = scrape
        .samples
        .into_iter()
        .partition(|s| matches!(s.value, Value::Untyped(_)));

    for sample in typed {
        let labels: BTreeMap<String, String> = sample
            .labels
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let family = family_entry(&mut families, &scrape.docs, &sample.metric);
        family.metric_type = MetricType::of(&sample.value);

        match &sample.value {
            Value::Counter(v) | Value::Gauge(v) | Value::Untyped(v) => family.samples.push(Sample {
                name: sample.metric.clone(),
                labels,
                value: *v,
            }),
            Value::Histogram(buckets) => {
                for bucket in buckets {
                    let mut labels = labels.clone();
                    labels.insert("le".to_string(), format_value(bucket.less_than));
                    family.samples.push(Sample {
                        name: format!("{}_bucket", sample.metric),
                        labels,
                        value: bucket.count,
                    });
                }
            }
            Value::Summary(quantiles) => {
                for quantile in quantiles {
                    let mut labels = labels.clone();
                    labels.insert("quantile".to_string(), format_value(quantile.quantile));
                    family.samples.push(Sample {
                        name: sample.metric.clone(),
                        labels,
                        value: quantile.count,
                    });
                }
            }
        }
    }

    for sample in untyped {
        let Value::Untyped(value) = sample.value else {
            continue;
        };
        let family_name = aggregate_base(&families, &sample.metric)
            .unwrap_or(sample.metric.as_str())
            .to_string();
        let labels = sample
            .labels
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        family_entry(&mut families, &scrape.docs, &family_name)
            .samples
            .push(Sample {
                name: sample.metric,
                labels,
                value,
            });
    }

    Ok(families)
}

fn family_entry<'a>(
    families: &'a mut MetricFamilySet,
    docs: &HashMap<String, String>,
    name: &str,
) -> &'a mut MetricFamily {
    families
        .entry(name.to_string())
        .or_insert_with(|| MetricFamily {
            name: name.to_string(),
            help: docs.get(name).cloned(),
            metric_type: MetricType::Untyped,
            samples: Vec::new(),
        })
}

/// Histogram or summary family a `_sum`/`_count` sample belongs to
fn aggregate_base<'n>(families: &MetricFamilySet, name: &'n str) -> Option<&'n str> {
    ["_sum", "_count"].iter().find_map(|suffix| {
        let base = name.strip_suffix(suffix)?;
        families
            .get(base)
            .filter(|f| matches!(f.metric_type, MetricType::Histogram | MetricType::Summary))
            .map(|_| base)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROBE_RESPONSE: &str = "\
# HELP emqx_mqtt_probe_duration_seconds Duration of the MQTT probe in seconds
# TYPE emqx_mqtt_probe_duration_seconds gauge
emqx_mqtt_probe_duration_seconds 0.012537
# HELP emqx_mqtt_probe_success Whether the MQTT probe succeeded
# TYPE emqx_mqtt_probe_success gauge
emqx_mqtt_probe_success 1
";

    #[test]
    fn test_parse_probe_response() {
        let families = parse_text(PROBE_RESPONSE).unwrap();
        assert_eq!(families.len(), 2);

        let duration = &families["emqx_mqtt_probe_duration_seconds"];
        assert_eq!(duration.name, "emqx_mqtt_probe_duration_seconds");
        assert_eq!(duration.metric_type, MetricType::Gauge);
        assert_eq!(duration.first_value(), Some(0.012537));
        assert_eq!(
            duration.help.as_deref(),
            Some("Duration of the MQTT probe in seconds")
        );

        let success = &families["emqx_mqtt_probe_success"];
        assert_eq!(success.first_value(), Some(1.0));
    }

    #[test]
    fn test_labelled_and_untyped_samples() {
        let text = r#"
# TYPE http_requests_total counter
http_requests_total{method="post",code="200"} 1027
http_requests_total{method="post",code="400"} 3
scrape_duration_seconds 0.5
"#;
        let families = parse_text(text).unwrap();

        let requests = &families["http_requests_total"];
        assert_eq!(requests.metric_type, MetricType::Counter);
        assert_eq!(requests.samples.len(), 2);
        assert!(requests
            .samples
            .iter()
            .any(|s| s.labels["code"] == "400" && s.value == 3.0));

        let scrape = &families["scrape_duration_seconds"];
        assert_eq!(scrape.metric_type, MetricType::Untyped);
        assert_eq!(scrape.first_value(), Some(0.5));
    }

    #[test]
    fn test_special_values() {
        let families = parse_text("a NaN\nb +Inf\nc -Inf\n").unwrap();
        assert!(families["a"].first_value().unwrap().is_nan());
        assert_eq!(families["b"].first_value(), Some(f64::INFINITY));
        assert_eq!(families["c"].first_value(), Some(f64::NEG_INFINITY));
    }

    #[test]
    fn test_documents_without_samples_rejected() {
        let cases = [
            "",
            "\n# just a comment\n",
            "# TYPE emqx_mqtt_probe_success gauge\n",
            "<html>502 Bad Gateway</html>",
        ];
        for case in cases {
            assert!(
                matches!(parse_text(case), Err(Error::MetricsParse(_))),
                "accepted: {case:?}"
            );
        }
    }

    #[test]
    fn test_render_round_trips() {
        let families = parse_text(PROBE_RESPONSE).unwrap();
        let rendered = render(&families);
        assert_eq!(parse_text(&rendered).unwrap(), families);
        assert!(rendered.contains("# TYPE emqx_mqtt_probe_success gauge"));
    }
}
