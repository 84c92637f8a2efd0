//! Worker command - runs a single V3 pool worker, configured entirely from `LLMC_WORKER_*`
//! environment variables, until a signal arrives or `max_iterations` items have been pulled.

use anyhow::{Context, Result};
use llmc_core::enrichment::engine_v3::{install_signal_handler, run_worker, WorkerConfig};

pub async fn run(max_iterations: Option<usize>) -> Result<()> {
    let config = WorkerConfig::from_env().context("reading LLMC_WORKER_* environment")?;
    let running = install_signal_handler().context("installing SIGTERM/SIGINT handler")?;

    let report = run_worker(&config, running, max_iterations).await.context("running worker loop")?;
    println!(
        "worker={} processed={} succeeded={} failed={}",
        config.worker_id, report.processed, report.succeeded, report.failed
    );

    if report.processed > 0 && report.succeeded == 0 {
        std::process::exit(2);
    }
    Ok(())
}
