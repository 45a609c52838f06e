//! Stand-in exporter for integration testing
//!
//! Honours the exporter command line (`--web.listen-address`,
//! `--config.file`) and serves `GET /probe?target=...` with the two probe
//! gauges. Configured targets report success once their TLS material (if
//! any) is readable; unknown targets report failure. No broker connection is
//! made.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use probe_harness::common::logging;
use probe_harness::scenario::{Probe, ScenarioConfig};
use probe_harness::{Error, Result};

/// Delays binding the listener, to exercise readiness polling
const STARTUP_DELAY_ENV: &str = "MOCK_EXPORTER_STARTUP_DELAY_MS";

#[derive(Parser)]
#[command(name = "mock-exporter")]
struct Args {
    /// Address to listen on, `host:port` or `:port`
    #[arg(long = "web.listen-address")]
    listen_address: String,

    /// Exporter configuration file
    #[arg(long = "config.file")]
    config_file: PathBuf,
}

#[derive(Deserialize)]
struct ProbeQuery {
    target: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init_mock_exporter();
    let args = Args::parse();

    let config = ScenarioConfig::read_from(&args.config_file)?;
    tracing::info!("Loaded {} probes from {}", config.probes.len(), args.config_file.display());

    if let Some(delay) = std::env::var(STARTUP_DELAY_ENV)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
    {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }

    let address = match args.listen_address.strip_prefix(':') {
        Some(port) => format!("0.0.0.0:{}", port),
        None => args.listen_address.clone(),
    };

    let router = Router::new()
        .route("/probe", get(probe))
        .with_state(Arc::new(config));

    let listener = tokio::net::TcpListener::bind(&address).await?;
    tracing::info!("Listening on {}", address);

    axum::serve(listener, router)
        .await
        .map_err(|e| Error::Internal(format!("Server error: {}", e)))
}

async fn probe(
    State(config): State<Arc<ScenarioConfig>>,
    Query(query): Query<ProbeQuery>,
) -> (StatusCode, String) {
    let Some(target) = query.target else {
        return (StatusCode::BAD_REQUEST, "missing target parameter\n".to_string());
    };

    let started = Instant::now();
    let success = config.probe(&target).map(tls_readable).unwrap_or(false);
    // Clock granularity can make a successful check read as zero
    let duration = if success {
        started.elapsed().as_secs_f64().max(1e-6)
    } else {
        0.0
    };

    tracing::debug!("Probe {} -> {}", target, success);
    (StatusCode::OK, render(duration, success))
}

/// TLS probes need their staged material in place
fn tls_readable(probe: &Probe) -> bool {
    match probe.tls() {
        Some(tls) => [&tls.ca_file, &tls.cert_file, &tls.key_file]
            .iter()
            .all(|path| std::fs::metadata(path).map(|m| m.is_file()).unwrap_or(false)),
        None => true,
    }
}

fn render(duration: f64, success: bool) -> String {
    format!(
        "# HELP emqx_mqtt_probe_duration_seconds Time taken by the MQTT probe\n\
         # TYPE emqx_mqtt_probe_duration_seconds gauge\n\
         emqx_mqtt_probe_duration_seconds {}\n\
         # HELP emqx_mqtt_probe_success Whether the MQTT probe succeeded\n\
         # TYPE emqx_mqtt_probe_success gauge\n\
         emqx_mqtt_probe_success {}\n",
        duration,
        if success { 1 } else { 0 }
    )
}
