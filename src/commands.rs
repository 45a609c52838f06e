//! CLI command definitions
//!
//! Defines the clap commands for the probe harness CLI.

use clap::Subcommand;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Run the end-to-end suite: start the broker, build the exporter, run every scenario
    Run {
        /// Harness configuration file (default: the platform config dir, then built-in defaults)
        #[arg(long, short)]
        config: Option<PathBuf>,

        /// Only run scenarios whose name contains this
        #[arg(long)]
        filter: Option<String>,

        /// Stop after the first failed scenario
        #[arg(long)]
        fail_fast: bool,

        /// Show exporter stdout/stderr
        #[arg(long)]
        show_exporter_output: bool,

        /// Container client to use instead of `docker` from PATH
        #[arg(long)]
        docker: Option<PathBuf>,
    },

    /// Poll an already running exporter and check its probe metrics
    Probe {
        /// Measurement endpoint, e.g. http://127.0.0.1:9100/probe
        url: String,

        /// Probe target passed as the `target` query parameter
        #[arg(long)]
        target: String,

        /// Metric name prefix
        #[arg(long, default_value = "emqx")]
        prefix: String,

        /// Give up after this many milliseconds
        #[arg(long, default_value = "10000")]
        timeout_ms: u64,

        /// Delay between attempts in milliseconds
        #[arg(long, default_value = "500")]
        interval_ms: u64,

        /// Fail on any family besides the two probe gauges
        #[arg(long)]
        strict: bool,
    },

    /// Print the exporter config a scenario working directory would get
    RenderConfig {
        /// Scenario working directory the TLS paths point into
        #[arg(long, default_value = ".")]
        work_dir: PathBuf,

        /// Harness configuration file
        #[arg(long, short)]
        config: Option<PathBuf>,
    },

    /// Check that the container client and build tool are installed
    Check {
        /// Harness configuration file
        #[arg(long, short)]
        config: Option<PathBuf>,

        /// Container client to check instead of `docker`
        #[arg(long)]
        docker: Option<PathBuf>,

        /// Output results as JSON
        #[arg(long)]
        json: bool,
    },
}
