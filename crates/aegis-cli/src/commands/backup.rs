use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;

use super::utils::{create_spinner, info, success};
use crate::app::App;

#[derive(Parser)]
pub struct BackupArgs {
    /// Backup kind
    #[arg(long = "type", value_enum)]
    pub kind: BackupType,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum BackupType {
    Full,
    Incremental,
}

pub async fn execute(app: App, args: BackupArgs) -> anyhow::Result<()> {
    let engine = app.backup_engine().await?;

    let label = match args.kind {
        BackupType::Full => "full",
        BackupType::Incremental => "incremental",
    };
    let spinner = create_spinner(&format!("Running {} backup...", label));

    let cancel = CancellationToken::new();
    let record = match args.kind {
        BackupType::Full => engine.full_backup(&cancel).await,
        BackupType::Incremental => engine.incremental_backup(&cancel).await,
    };

    spinner.finish_and_clear();

    info(&format!("Backup id: {}", record.id));
    for store in &record.stores {
        let outcome = if store.success {
            format!("{} bytes -> {}", store.size_bytes, store.key.as_deref().unwrap_or("-"))
        } else {
            format!("failed: {}", store.error.as_deref().unwrap_or("unknown"))
        };
        println!("  {:<10} {}", store.store.to_string(), outcome);
    }
    info(&format!(
        "Total {} bytes in {} ms",
        record.total_size_bytes, record.duration_ms
    ));

    if record.success {
        success(&format!("{} backup completed", label));
        Ok(())
    } else {
        anyhow::bail!("backup {} finished with errors: {}", record.id, record.errors.join("; "));
    }
}
