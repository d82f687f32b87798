use alloy_provider::ProviderBuilder;
use anyhow::Result;
use clap::Parser;
use rollup_tracker::{
    config::TrackerConfig,
    metrics::{init_metrics, MetricsGauge},
    prometheus::TrackerGauge,
    utils::setup_logging,
    L1Client, RollupTracker, TrackerHandle,
};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
struct Args {
    #[arg(long, default_value = ".env.tracker")]
    env_file: String,
}

/// Logs every change of the pause flags seen by readers.
async fn watch_pauses(mut handle: TrackerHandle) {
    let mut paused = None;
    loop {
        let state = handle.snapshot();
        let now = (state.chain.slot_b.proving_paused, state.chain.contract_paused);
        if paused != Some(now) {
            if now.0 || now.1 {
                tracing::warn!(
                    "Rollup paused (proving paused: {}, contract paused: {})",
                    now.0,
                    now.1
                );
            } else if paused.is_some() {
                tracing::info!("Rollup unpaused");
            }
            paused = Some(now);
        }
        if !handle.changed().await {
            return;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_logging();

    let args = Args::parse();
    dotenv::from_filename(args.env_file).ok();

    let config = TrackerConfig::from_env()?;

    let l1_provider = ProviderBuilder::new().connect_http(config.l1_rpc.clone());
    let client = L1Client::new(l1_provider, config.rollup_address, config.tier_provider_address);

    // Initialize tracker gauges
    TrackerGauge::register_all();

    // Initialize metrics exporter
    init_metrics(&config.metrics_port)?;

    // Initialize the metrics gauges
    TrackerGauge::init_all();

    let mut tracker = RollupTracker::new(client, config.sync.clone()).await?;
    tokio::spawn(watch_pauses(tracker.handle()));

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutting down...");
            shutdown.cancel();
        }
    });

    loop {
        match tracker.run(cancel.clone()).await {
            Ok(()) => return Ok(()),
            Err(e) if config.auto_resync => {
                tracing::warn!("Resyncing rollup state after error: {}", e);
                tracker.resync_with_retry(&cancel).await?;
            }
            Err(e) => return Err(e.into()),
        }
    }
}
