//! Probe Harness - end-to-end verification for MQTT probe exporters
//!
//! Starts a broker container, builds the exporter under test and checks that
//! every configured probe target reports healthy metrics.

use clap::Parser;
use probe_harness::{cli, commands, common};
use commands::Commands;

#[derive(Parser)]
#[command(name = "probe-harness", about = "End-to-end harness for MQTT probe exporters")]
#[command(version, long_about = None)]
struct Cli {
    /// Debug-level logging
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    common::logging::init_cli(cli.verbose);

    match cli::dispatch(cli.command).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {e}");
            // Fatal setup failures are told apart from failing scenarios
            std::process::exit(if e.is_fatal() { 2 } else { 1 });
        }
    }
}
