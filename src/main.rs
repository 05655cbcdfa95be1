use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use metrics::{
    Metrics,
    server::{MetricsServerConfig, run_metrics_server},
};
use networking::{
    MemoryLedger, OutboundPeerMessage,
    sync::{SyncConfig, SyncService},
};
use tokio::{sync::mpsc, task};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, trace};

#[derive(Parser, Debug)]
struct Args {
    /// YAML file with the sync configuration. Defaults are used if omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long, default_value_t = false)]
    metrics: bool,

    #[arg(long, default_value = "127.0.0.1")]
    metrics_address: IpAddr,

    #[arg(long, default_value_t = 9090)]
    metrics_port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => SyncConfig::load_from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => SyncConfig::default(),
    };

    let (outbound_sender, mut outbound_receiver) = mpsc::unbounded_channel::<OutboundPeerMessage>();

    // no transport is attached, outbound messages only get logged
    let outbound_handle = task::spawn(async move {
        while let Some(OutboundPeerMessage { peer_id, message }) = outbound_receiver.recv().await {
            trace!(peer = %peer_id, %message, "Outbound peer message");
        }
    });

    let ledger = Arc::new(MemoryLedger::new());
    let service = SyncService::new(config, ledger, Arc::new(outbound_sender), Vec::new());
    let mut handles = service.start();

    let cancel = CancellationToken::new();
    if args.metrics {
        let metrics = Arc::new(Metrics::new().context("failed to register metrics")?);
        let server_config = MetricsServerConfig {
            metrics_address: args.metrics_address,
            metrics_port: args.metrics_port,
        };

        handles.push(task::spawn({
            let metrics = metrics.clone();
            let cancel = cancel.clone();
            async move {
                if let Err(err) = run_metrics_server(server_config, metrics, cancel).await {
                    error!(error = %err, "Metrics server exited with error");
                }
            }
        }));

        handles.push(task::spawn({
            let service = service.clone();
            let cancel = cancel.clone();
            async move {
                let mut ticker = tokio::time::interval(Duration::from_secs(1));
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = ticker.tick() => metrics.observe_sync_stats(&service.stats()),
                    }
                }
            }
        }));
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Shutting down");

    service.shutdown();
    cancel.cancel();
    for handle in handles {
        if let Err(err) = handle.await {
            error!(error = %err, "Task panicked during shutdown");
        }
    }

    // the service held the last sender
    drop(service);
    if let Err(err) = outbound_handle.await {
        error!(error = %err, "Outbound logger panicked");
    }

    info!("Main async task exiting...");
    Ok(())
}
