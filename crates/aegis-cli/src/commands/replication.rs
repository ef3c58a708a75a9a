use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use aegis_health::{HealthMonitor, Probe, RegionProbe};

use super::utils::{info, success, warning};
use crate::app::App;

#[derive(Parser)]
pub struct ReplicationArgs {
    #[command(subcommand)]
    pub command: ReplicationCommand,
}

#[derive(Subcommand)]
pub enum ReplicationCommand {
    /// Run the replication data plane in the foreground
    Start,

    /// Stop the replication data plane
    Stop,
}

pub async fn execute(app: App, args: ReplicationArgs) -> anyhow::Result<()> {
    match args.command {
        ReplicationCommand::Start => start(app).await,
        ReplicationCommand::Stop => stop(),
    }
}

async fn start(app: App) -> anyhow::Result<()> {
    if !app.config.disaster_recovery.replication.enabled {
        anyhow::bail!("replication is disabled in the configuration");
    }

    let regions = app.connect_all_regions().await?;
    let replicator = app.replicator(regions.clone())?;
    let orchestrator = app.orchestrator(regions.clone(), replicator.clone());

    // Health monitor over every region's stores.
    let probes: Vec<Arc<dyn Probe>> = regions
        .iter()
        .map(|(name, stores)| {
            Arc::new(RegionProbe::new(name.clone(), stores.clone())) as Arc<dyn Probe>
        })
        .collect();
    let monitor = Arc::new(HealthMonitor::new(
        probes,
        Arc::clone(&app.events),
        Arc::clone(&app.metrics),
    ));

    let cancel = CancellationToken::new();
    replicator.start().await?;
    let monitor_task = Arc::clone(&monitor).start(Duration::from_secs(
        app.config.disaster_recovery.recovery.health_check_interval,
    ))?;
    let watcher = orchestrator.spawn_auto_failover(cancel.clone());

    success("Replication data plane running; press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;
    info("Shutting down...");

    cancel.cancel();
    let _ = monitor.stop();
    replicator.stop().await?;
    let _ = monitor_task.await;
    let _ = watcher.await;

    success("Replication stopped");
    Ok(())
}

fn stop() -> anyhow::Result<()> {
    // The data plane runs in the foreground of `aegis replication start`;
    // interrupt that process to stop it.
    warning("No replication data plane is attached to this control session");
    info("Stop the foreground `aegis replication start` process to halt replication");
    Ok(())
}
