use std::sync::Arc;

use clap::Parser;
use model_monitoring::{
    api::{ApiConfig, ApiState, spawn_api_server},
    channel::{Hub, RelayHandle, hub::DEFAULT_QUEUE_CAPACITY},
    config::{Config, read_config_file},
    metrics::MetricAggregator,
    runtime::OllamaRuntime,
    watcher::WatcherHandle,
};
use tokio::sync::broadcast;
use tracing::{info, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file (JSON); defaults are used when omitted
    #[arg(short)]
    file: Option<String>,
}

fn init() {
    let filter = filter::Targets::new().with_targets(vec![
        ("model_monitoring", LevelFilter::DEBUG),
        ("modelwatch_hub", LevelFilter::TRACE),
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
    dotenv::dotenv().ok();
    init();
    let args = Args::parse();
    trace!("started with args: {args:?}");

    let config = match &args.file {
        Some(file) => read_config_file(file)?,
        None => Config::default(),
    };

    let (lifecycle_tx, lifecycle_rx) = broadcast::channel(256);
    let metrics = MetricAggregator::new(config.metrics.clone());
    let runtime = Arc::new(OllamaRuntime::new(&config.runtime)?);
    let hub = Hub::with_limits(
        runtime,
        metrics.clone(),
        DEFAULT_QUEUE_CAPACITY,
        config.runtime.snapshot_timeout(),
    );

    let relay = RelayHandle::spawn(hub.clone(), lifecycle_rx, metrics.subscribe());
    let watcher = WatcherHandle::spawn(config.watcher.clone(), lifecycle_tx);

    let addr = spawn_api_server(ApiConfig::from(&config.api), ApiState::new(hub.clone())).await?;
    info!("hub ready on {addr}, runtime at {}", config.runtime.url);

    tokio::signal::ctrl_c().await?;
    info!("shutting down");

    if let Err(e) = watcher.shutdown().await {
        warn!("{e:#}");
    }
    if let Err(e) = relay.shutdown().await {
        warn!("{e:#}");
    }
    hub.shutdown();

    Ok(())
}
