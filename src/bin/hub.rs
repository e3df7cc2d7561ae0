use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use sensor_watch::{
    actors::sweeper::SweeperHandle,
    config::{Config, read_config_file},
    forwarder::{GraphiteForwarder, MetricSink},
    ingest::{Ingestor, report_stats},
    monitors::resources::LimitMonitor,
    mqtt::MqttListener,
    tracker::ActivityTracker,
};
use tracing::{error, info, level_filters::LevelFilter, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file (JSON or TOML); built-in defaults when omitted
    #[arg(short)]
    file: Option<String>,

    /// Log every message and sweep
    #[arg(short, long)]
    verbose: bool,
}

fn init(verbose: bool) {
    let level = if verbose {
        LevelFilter::TRACE
    } else {
        LevelFilter::DEBUG
    };
    let filter = filter::Targets::new().with_targets(vec![
        ("sensor_watch", level),
        ("sensor_watch_hub", level),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init(args.verbose);
    trace!("started with args: {args:?}");

    let config = match &args.file {
        Some(file) => read_config_file(file)?,
        None => Config::default(),
    };

    let tracker = ActivityTracker::new();
    let forwarder = GraphiteForwarder::new(&config.backend);
    info!("forwarding metrics to {}", forwarder.endpoint());
    let sink: Arc<dyn MetricSink> = Arc::new(forwarder);

    let ingestor = Ingestor::new(
        tracker.clone(),
        sink.clone(),
        LimitMonitor::new(config.limits.clone()),
    );

    let listener = MqttListener::connect(config.broker.clone())
        .await
        .context("could not start ingestion")?;

    let sweeper = SweeperHandle::spawn(&config.sweep, tracker, sink);
    let stats = tokio::spawn(report_stats(ingestor.stats(), config.stats_interval()));

    tokio::select! {
        _ = listener.run(ingestor) => {}
        res = tokio::signal::ctrl_c() => {
            if let Err(e) = res {
                error!("failed to listen for shutdown signal: {e}");
            }
            info!("shutting down");
        }
    }

    stats.abort();
    sweeper.shutdown().await?;

    Ok(())
}
