//! Vigil Daemon - host service monitor
//!
//! Runs the poll/detect/evidence cycle on a fixed interval. Remediation is
//! executed out-of-band through the agent facade and never from this loop.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};
use vigild::{logging, run_cycle, Agent, Config, CycleReport};

#[derive(Debug, Parser)]
#[command(name = "vigild", version, about = "Vigil host service monitor")]
struct Args {
    /// Config file to use instead of the standard locations
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Run a single cycle and exit
    #[arg(long)]
    once: bool,

    /// Override the poll interval in seconds
    #[arg(long, value_name = "SECS")]
    interval: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load(),
    };
    if let Some(secs) = args.interval {
        config.daemon.poll_interval_secs = secs;
    }

    logging::init(&config.daemon.log_level);
    info!("Vigil Daemon v{} starting", env!("CARGO_PKG_VERSION"));

    let agent = Agent::from_config(&config)?;
    let retention = config.daemon.snapshot_retention_days;

    if args.once {
        let report = run_cycle(&agent, retention).await?;
        print_report(&report);
        return Ok(());
    }

    let mut ticker = tokio::time::interval(config.poll_interval());
    info!(
        interval_secs = config.poll_interval().as_secs(),
        "Vigil Daemon ready"
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match run_cycle(&agent, retention).await {
                    Ok(report) => {
                        for line in report.summary_lines() {
                            info!("{}", line);
                        }
                    }
                    Err(e) => {
                        // Losing the store halts the pipeline
                        error!("cycle failed: {}", e);
                        return Err(e.into());
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down gracefully");
                break;
            }
        }
    }

    Ok(())
}

fn print_report(report: &CycleReport) {
    if report.detection.is_all_healthy() {
        println!("All observable services healthy");
        return;
    }
    for line in report.summary_lines() {
        println!("{}", line);
    }
    if !report.context.is_empty() {
        println!("\n{}", report.context);
    }
}
