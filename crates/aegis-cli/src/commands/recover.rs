use clap::{Parser, ValueEnum};
use std::sync::Arc;
use tabled::{settings::Style, Table, Tabled};
use tokio_util::sync::CancellationToken;

use aegis_recovery::{RecoveryExecutor, RecoveryPlan, StepState};
use aegis_stores::StoreKind;

use super::utils::{create_spinner, info, success};
use crate::app::{App, LiveEnvironment};

#[derive(Parser)]
pub struct RecoverArgs {
    /// Recovery mode
    #[arg(value_enum)]
    pub mode: RecoverMode,

    /// Region to recover into; defaults to the primary region
    #[arg(long)]
    pub target_region: Option<String>,

    /// Backup id to restore from (partial recovery)
    #[arg(long)]
    pub backup_id: Option<String>,

    /// Target point in time, RFC 3339 (point-in-time recovery)
    #[arg(long)]
    pub point_in_time: Option<String>,

    /// Store subset for partial recovery (mongodb, influxdb, redis)
    #[arg(long, value_delimiter = ',')]
    pub stores: Vec<String>,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum RecoverMode {
    Full,
    Partial,
    PointInTime,
}

#[derive(Tabled)]
struct StepRow {
    step: String,
    category: String,
    estimate_min: u64,
    state: String,
}

fn parse_store(raw: &str) -> anyhow::Result<StoreKind> {
    match raw {
        "mongodb" => Ok(StoreKind::Mongodb),
        "influxdb" => Ok(StoreKind::Influxdb),
        "redis" => Ok(StoreKind::Redis),
        other => anyhow::bail!("unknown store: {}", other),
    }
}

fn print_plan(plan: &RecoveryPlan) {
    info(&format!(
        "Plan {} ({:?}) targeting {}",
        plan.id, plan.kind, plan.target_region
    ));
    if let Some(backup_id) = &plan.backup_id {
        info(&format!("Anchored on backup {}", backup_id));
    }
    let rows: Vec<StepRow> = plan
        .steps
        .iter()
        .map(|s| StepRow {
            step: s.name.clone(),
            category: format!("{:?}", s.category).to_lowercase(),
            estimate_min: s.estimated_secs / 60,
            state: format!("{:?}", s.state).to_lowercase(),
        })
        .collect();
    println!("{}", Table::new(&rows).with(Style::rounded()));
    info(&format!(
        "Estimated duration: {} minutes",
        plan.estimated_secs / 60
    ));
}

pub async fn execute(app: App, args: RecoverArgs) -> anyhow::Result<()> {
    let planner = app.planner().await?;
    let target_region = args
        .target_region
        .clone()
        .unwrap_or_else(|| app.config.primary_region().name.clone());
    let region = app
        .config
        .region(&target_region)
        .ok_or_else(|| anyhow::anyhow!("unknown region: {}", target_region))?
        .clone();

    let plan = match args.mode {
        RecoverMode::Full => planner.plan_full(&target_region).await?,
        RecoverMode::Partial => {
            let stores = args
                .stores
                .iter()
                .map(|s| parse_store(s))
                .collect::<anyhow::Result<Vec<_>>>()?;
            planner
                .plan_partial(&target_region, stores, args.backup_id.as_deref())
                .await?
        }
        RecoverMode::PointInTime => {
            let raw = args
                .point_in_time
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("--point-in-time is required"))?;
            let point_in_time = chrono::DateTime::parse_from_rfc3339(raw)
                .map_err(|e| anyhow::anyhow!("invalid --point-in-time: {}", e))?
                .with_timezone(&chrono::Utc);
            planner
                .plan_point_in_time(&target_region, point_in_time)
                .await?
        }
    };

    print_plan(&plan);

    if !args.yes {
        let confirmed = dialoguer::Confirm::new()
            .with_prompt(format!("Execute this recovery plan against {}?", target_region))
            .default(false)
            .interact()?;
        if !confirmed {
            info("Recovery cancelled");
            return Ok(());
        }
    }

    let engine = app.backup_engine().await?;
    let target_stores = App::connect_stores(&region.databases).await?;
    let targets = App::dumpers_for(&region.databases, &target_stores);
    let environment = Arc::new(LiveEnvironment::new(engine, targets, target_stores));
    let executor = RecoveryExecutor::new(environment, Arc::clone(&app.metrics));

    let spinner = create_spinner("Executing recovery plan...");
    let executed = executor.execute(plan, &CancellationToken::new()).await?;
    spinner.finish_and_clear();

    print_plan(&executed);

    if executed.completed() {
        success(&format!("Recovery into {} completed", target_region));
        Ok(())
    } else if let Some(failure) = executed.first_failure() {
        anyhow::bail!(
            "recovery failed at step {}: {}",
            failure.name,
            failure.error.as_deref().unwrap_or("unknown error")
        );
    } else {
        let stalled: Vec<&str> = executed
            .steps
            .iter()
            .filter(|s| s.state != StepState::Completed)
            .map(|s| s.name.as_str())
            .collect();
        anyhow::bail!("recovery incomplete; unfinished steps: {}", stalled.join(", "));
    }
}
