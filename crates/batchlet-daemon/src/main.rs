//! batchlet daemon
//!
//! Loads the scheduling policy, wires the cache to its event source, and
//! runs the scheduling loop.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use batchlet_cache::{run_event_loop, LoggingClient, SchedulerCache};
use batchlet_core::{parse_duration, SchedulerConfig};
use batchlet_scheduler::Scheduler;

/// batchletd - batch-workload scheduler for container clusters
#[derive(Parser, Debug)]
#[command(name = "batchletd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the YAML scheduler policy; built-in defaults when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Interval between scheduling cycles
    #[arg(long, default_value = "1s")]
    schedule_period: String,

    /// Deadline for each bind request
    #[arg(long, default_value = "30s")]
    bind_timeout: String,

    /// Maximum concurrent bind requests
    #[arg(long, default_value_t = 16)]
    bind_concurrency: usize,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let log_level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("Failed to set subscriber");

    info!("Starting batchlet daemon v{}", env!("CARGO_PKG_VERSION"));

    let config = match &args.config {
        Some(path) => SchedulerConfig::from_file(path).expect("Failed to load scheduler policy"),
        None => SchedulerConfig::default(),
    };
    let schedule_period =
        parse_duration(&args.schedule_period).expect("Invalid schedule period");
    let bind_timeout = parse_duration(&args.bind_timeout).expect("Invalid bind timeout");

    // The daemon hosts the interfaces; a deployment wires real orchestrator
    // clients and an informer feed in place of these.
    let client = Arc::new(LoggingClient);
    let cache = Arc::new(SchedulerCache::new(
        client.clone(),
        client.clone(),
        client.clone(),
        client,
        bind_timeout,
        args.bind_concurrency,
    ));

    let (events_tx, events_rx) = mpsc::channel(1024);
    tokio::spawn(run_event_loop(cache.clone(), events_rx));

    let scheduler =
        Scheduler::new(cache, config, schedule_period).expect("Invalid scheduler policy");

    info!(period = %args.schedule_period, "Scheduling loop starting");
    // Keep the event channel open for the daemon's lifetime.
    let _events_tx = events_tx;
    scheduler.run().await;
}
