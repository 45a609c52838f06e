//! Measurement endpoint polling
//!
//! A freshly launched exporter is not listening yet, and its first probe may
//! still be in flight, so the endpoint is fetched repeatedly until it returns
//! a decodable document or the deadline passes.

use reqwest::StatusCode;
use std::time::{Duration, Instant};

use super::parser::{parse_text, MetricFamilySet};
use crate::common::config::PollConfig;
use crate::common::{Error, Result};

/// A successfully decoded response and how long it took to get one
#[derive(Debug)]
pub struct Converged {
    pub families: MetricFamilySet,
    pub attempts: u32,
    pub elapsed: Duration,
}

/// Fetches `GET <url>?target=<target>` until the response decodes
#[derive(Debug, Clone)]
pub struct MetricsPoller {
    client: reqwest::Client,
    timeout: Duration,
    interval: Duration,
}

impl MetricsPoller {
    pub fn new(timeout: Duration, interval: Duration) -> Result<Self> {
        // A single request never outlives the overall deadline. The endpoint
        // is always a locally launched exporter, never behind a proxy.
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .no_proxy()
            .build()
            .map_err(|e| Error::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            timeout,
            interval,
        })
    }

    pub fn from_config(config: &PollConfig) -> Result<Self> {
        Self::new(config.timeout(), config.interval())
    }

    /// One attempt: fetch and decode
    pub async fn fetch(&self, url: &str, target: &str) -> Result<MetricFamilySet> {
        let full_url = format!("{}?target={}", url, target);

        let response = self
            .client
            .get(url)
            .query(&[("target", target)])
            .send()
            .await
            .map_err(|e| Error::Http {
                url: full_url.clone(),
                source: e,
            })?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(Error::HttpStatus {
                url: full_url,
                status: status.as_u16(),
            });
        }

        let body = response.text().await.map_err(|e| Error::Http {
            url: full_url,
            source: e,
        })?;

        parse_text(&body)
    }

    /// Poll until a response decodes or the deadline passes
    ///
    /// Connection failures, non-200 responses and undecodable bodies are
    /// retried. On timeout the error carries the last attempt's failure.
    pub async fn poll_until_converged(&self, url: &str, target: &str) -> Result<Converged> {
        let started = Instant::now();
        let deadline = started + self.timeout;
        let mut attempts = 0u32;

        let last_error = loop {
            attempts += 1;

            let error = match self.fetch(url, target).await {
                Ok(families) => {
                    let elapsed = started.elapsed();
                    tracing::debug!(
                        "{} converged after {} attempt(s) in {:?}",
                        url,
                        attempts,
                        elapsed
                    );
                    return Ok(Converged {
                        families,
                        attempts,
                        elapsed,
                    });
                }
                Err(e) if e.is_retryable() => e,
                Err(e) => return Err(e),
            };

            tracing::debug!("Poll attempt {} for {} failed: {}", attempts, target, error);

            let now = Instant::now();
            if now >= deadline {
                break error;
            }
            tokio::time::sleep(self.interval.min(deadline - now)).await;
        };

        Err(Error::PollTimeout {
            url: format!("{}?target={}", url, target),
            attempts,
            elapsed: started.elapsed(),
            last_error: Box::new(last_error),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Query, State};
    use axum::http::StatusCode as AxumStatus;
    use axum::routing::get;
    use axum::Router;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    const BODY: &str = "\
# TYPE emqx_mqtt_probe_success gauge
emqx_mqtt_probe_success 1
";

    #[derive(Clone)]
    struct Flaky {
        failures: u32,
        hits: Arc<AtomicU32>,
        seen_targets: Arc<std::sync::Mutex<Vec<String>>>,
    }

    async fn flaky_probe(
        State(state): State<Flaky>,
        Query(query): Query<HashMap<String, String>>,
    ) -> (AxumStatus, String) {
        if let Some(target) = query.get("target") {
            state.seen_targets.lock().unwrap().push(target.clone());
        }
        let hit = state.hits.fetch_add(1, Ordering::SeqCst);
        if hit < state.failures {
            (AxumStatus::SERVICE_UNAVAILABLE, "warming up".to_string())
        } else {
            (AxumStatus::OK, BODY.to_string())
        }
    }

    /// Serve `router` on an ephemeral port, returning the probe URL
    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}/probe", addr)
    }

    #[tokio::test]
    async fn test_converges_after_failures() {
        let state = Flaky {
            failures: 2,
            hits: Arc::new(AtomicU32::new(0)),
            seen_targets: Arc::default(),
        };
        let url = serve(
            Router::new()
                .route("/probe", get(flaky_probe))
                .with_state(state.clone()),
        )
        .await;

        let poller = MetricsPoller::new(Duration::from_secs(5), Duration::from_millis(20)).unwrap();
        let converged = poller
            .poll_until_converged(&url, "127.0.0.1:8083/mqtt")
            .await
            .unwrap();

        assert_eq!(converged.attempts, 3);
        assert!(converged.families.contains_key("emqx_mqtt_probe_success"));
        assert_eq!(
            state.seen_targets.lock().unwrap().first().map(String::as_str),
            Some("127.0.0.1:8083/mqtt")
        );
    }

    #[tokio::test]
    async fn test_proxy_environment_is_ignored() {
        let url = serve(Router::new().route("/probe", get(|| async { BODY }))).await;

        // Nothing listens on the discard port
        std::env::set_var("HTTP_PROXY", "http://127.0.0.1:9");
        std::env::set_var("http_proxy", "http://127.0.0.1:9");
        let poller =
            MetricsPoller::new(Duration::from_secs(2), Duration::from_millis(50)).unwrap();
        let result = poller.poll_until_converged(&url, "127.0.0.1:1883").await;
        std::env::remove_var("HTTP_PROXY");
        std::env::remove_var("http_proxy");

        let converged = result.unwrap();
        assert_eq!(converged.attempts, 1);
    }

    #[tokio::test]
    async fn test_times_out_with_last_error() {
        let url = serve(Router::new().route(
            "/probe",
            get(|| async { (AxumStatus::INTERNAL_SERVER_ERROR, "probe failed") }),
        ))
        .await;

        let poller =
            MetricsPoller::new(Duration::from_millis(300), Duration::from_millis(50)).unwrap();
        let started = Instant::now();
        let err = poller
            .poll_until_converged(&url, "127.0.0.1:1883")
            .await
            .unwrap_err();

        assert!(started.elapsed() < Duration::from_secs(3));
        match err {
            Error::PollTimeout {
                attempts,
                last_error,
                ..
            } => {
                assert!(attempts >= 2);
                assert!(matches!(*last_error, Error::HttpStatus { status: 500, .. }));
            }
            other => panic!("Expected PollTimeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_undecodable_body_is_retried() {
        let url = serve(Router::new().route(
            "/probe",
            get(|| async { "<html>not metrics</html>" }),
        ))
        .await;

        let poller =
            MetricsPoller::new(Duration::from_millis(200), Duration::from_millis(50)).unwrap();
        let err = poller
            .poll_until_converged(&url, "127.0.0.1:1883")
            .await
            .unwrap_err();

        match err {
            Error::PollTimeout { last_error, .. } => {
                assert!(matches!(*last_error, Error::MetricsParse(_)));
            }
            other => panic!("Expected PollTimeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_nothing_listening_times_out() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let poller =
            MetricsPoller::new(Duration::from_millis(200), Duration::from_millis(50)).unwrap();
        let err = poller
            .poll_until_converged(&format!("http://127.0.0.1:{}/probe", port), "127.0.0.1:1883")
            .await
            .unwrap_err();

        match err {
            Error::PollTimeout { last_error, .. } => {
                assert!(matches!(*last_error, Error::Http { .. }));
            }
            other => panic!("Expected PollTimeout, got {other:?}"),
        }
    }
}
