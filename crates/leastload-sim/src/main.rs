#![doc = include_str!("../README.md")]

mod sim;

use clap::Parser;
use leastload::{BalanceReport, Balancer, TransformError};
use sim::config::{CliArgs, SimConfig};
use sim::requester::{RequesterSummary, drive_requester};
use sim::telemetry::init_telemetry;
use tokio::signal;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = SimConfig::try_from(args)?;

    init_telemetry()?;
    log_startup_info(&config);

    tokio::select! {
        res = run_simulation(config) => res,
        () = shutdown_signal() => {
            tracing::warn!("Interrupted, abandoning in-flight requests");
            Ok(())
        }
    }
}

async fn run_simulation(config: SimConfig) -> anyhow::Result<()> {
    let sine = |x: u32| -> Result<f64, TransformError> { Ok(f64::from(x).sin()) };
    let (mut balancer, pool) = Balancer::new(config.pool, sine)?;

    let clients: Vec<_> = (0..config.num_requesters)
        .map(|_| tokio::spawn(drive_requester(balancer.requester(), config.workload.clone())))
        .collect();

    let report = balancer.run().await?;

    let mut totals = RequesterSummary::default();
    for client in clients {
        let summary = client.await?;
        totals.replies += summary.replies;
        totals.failures += summary.failures;
    }

    if let Err(e) = pool.shutdown(config.shutdown_timeout).await {
        tracing::warn!("Worker pool did not shut down cleanly: {e}");
    }

    log_report(&report, totals);
    Ok(())
}

fn log_startup_info(config: &SimConfig) {
    if cfg!(debug_assertions) {
        tracing::info!("Starting simulation with full config: {config:#?}");
    } else {
        tracing::info!(
            "Starting load balancer with {} workers, {} requesters, {} requests/requester",
            config.pool.num_workers,
            config.num_requesters,
            config.workload.requests
        );
    }
}

fn log_report(report: &BalanceReport, totals: RequesterSummary) {
    tracing::info!(
        "Load balancer took {:?}: {} replies, {} failures, {} exits",
        report.elapsed,
        totals.replies,
        totals.failures,
        report.exits
    );

    for (worker, pending) in report.index.iter() {
        let i = worker.index();
        tracing::info!(
            "Worker {worker}: {} dispatched, {} completed, {pending} pending",
            report.dispatched[i],
            report.completed[i]
        );
    }

    let stats = report.index.stats();
    tracing::info!(
        "Final loads [{stats}] (mean {:.2}, variance {:.2})",
        stats.mean,
        stats.variance
    );
}

async fn shutdown_signal() {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C signal"),
        () = terminate => tracing::info!("Received SIGTERM signal"),
    }
}
