use clap::Parser;

use super::utils::{create_spinner, info, success};
use crate::app::App;

#[derive(Parser)]
pub struct FailoverArgs {
    /// Target region to promote
    pub region: String,

    /// Reason recorded on the audit event
    #[arg(long)]
    pub reason: Option<String>,
}

pub async fn execute(app: App, args: FailoverArgs) -> anyhow::Result<()> {
    let regions = app.connect_all_regions().await?;
    let replicator = app.replicator(regions.clone())?;
    let orchestrator = app.orchestrator(regions, replicator);

    let reason = args.reason.as_deref().unwrap_or("manual");
    let spinner = create_spinner(&format!("Failing over to {}...", args.region));
    let result = orchestrator.execute_failover(&args.region, reason).await;
    spinner.finish_and_clear();

    match result {
        Ok(event) => {
            info(&format!("Failover id:  {}", event.id));
            info(&format!(
                "Regions:      {} -> {}",
                event.from_region, event.to_region
            ));
            info(&format!("Duration:     {} ms", event.duration_ms));
            info(&format!("Rolled back:  {}", event.rolled_back));
            success(&format!("Failover to {} committed", event.to_region));
            Ok(())
        }
        Err(e) => {
            // The audit trail keeps the rolled-back event; surface the
            // failure to the operator and exit non-zero.
            let status = orchestrator.status().await;
            if let Some(event) = status.recent_failovers.back() {
                info(&format!("Failover id:  {}", event.id));
                info(&format!(
                    "Regions:      {} -> {}",
                    event.from_region, event.to_region
                ));
                info(&format!("Duration:     {} ms", event.duration_ms));
                info(&format!("Rolled back:  {}", event.rolled_back));
            }
            Err(e.into())
        }
    }
}
