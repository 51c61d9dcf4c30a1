use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use perfwatch::alerter::Dispatcher;
use perfwatch::collector::{self, FeedSource};
use perfwatch::config::Config;
use perfwatch::scheduler::Scheduler;
use perfwatch::Engine;

#[derive(Parser, Debug)]
#[command(name = "perfwatch", about = "Real-time performance telemetry and alerting engine")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "/etc/perfwatch/config.toml")]
    config: String,

    /// Validate config and exit
    #[arg(long)]
    check: bool,

    /// Print version and exit
    #[arg(short, long)]
    version: bool,
}

#[tokio::main(worker_threads = 2)]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.version {
        println!("perfwatch {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let config = Config::load(&cli.config)?;
    config.validate()?;

    if cli.check {
        println!("Configuration is valid.");
        return Ok(());
    }

    init_logging(&config);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        hostname = %config.engine.hostname,
        "Starting perfwatch"
    );

    if let Err(e) = run(config).await {
        error!(error = %e, "Engine terminated with error");
        return Err(e);
    }

    Ok(())
}

fn init_logging(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.engine.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();
}

async fn run(config: Config) -> Result<()> {
    let mut sources = collector::create_sources(&config)?;

    // Standalone runs have no in-process producer; the feed stays open so
    // embedders following this wiring can hand `_feed` to their game loop.
    let (feed_source, _feed) = FeedSource::new(
        config.collector.feed.capacity,
        config.intervals.collection_secs,
    );
    sources.push(Box::new(feed_source));

    let dispatcher = Dispatcher::new(&config.alerting)?;
    let engine = Engine::new(config)?;

    let handle = Scheduler::spawn(engine, sources, dispatcher);

    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal, draining");
    handle.shutdown().await;

    Ok(())
}
