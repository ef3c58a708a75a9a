use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod app;
mod commands;

#[derive(Parser)]
#[command(name = "aegis")]
#[command(version, about = "Aegis disaster-recovery control surface", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to the configuration file
    #[arg(short = 'c', long, global = true, default_value = "aegis.json")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print system, replication, conflict, and failover status
    Status,

    /// Take a full or incremental backup
    Backup(commands::backup::BackupArgs),

    /// Fail over to a region
    Failover(commands::failover::FailoverArgs),

    /// Run DR self-tests
    Test(commands::test::TestArgs),

    /// Plan and execute a recovery
    Recover(commands::recover::RecoverArgs),

    /// Control continuous replication
    Replication(commands::replication::ReplicationArgs),

    /// Resolve a recorded replication conflict
    ResolveConflict(commands::resolve::ResolveArgs),

    /// Evaluate compliance rules over the configuration
    Compliance(commands::compliance::ComplianceArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.debug {
        "debug"
    } else if cli.verbose {
        "info"
    } else {
        "warn"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("aegis={}", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let app = app::App::load(&cli.config)?;

    match cli.command {
        Commands::Status => commands::status::execute(app).await,
        Commands::Backup(args) => commands::backup::execute(app, args).await,
        Commands::Failover(args) => commands::failover::execute(app, args).await,
        Commands::Test(args) => commands::test::execute(app, args).await,
        Commands::Recover(args) => commands::recover::execute(app, args).await,
        Commands::Replication(args) => commands::replication::execute(app, args).await,
        Commands::ResolveConflict(args) => commands::resolve::execute(app, args).await,
        Commands::Compliance(args) => commands::compliance::execute(app, args).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_backup_command() {
        let cli = Cli::try_parse_from(["aegis", "backup", "--type", "full"]).unwrap();
        assert!(matches!(cli.command, Commands::Backup(_)));
        assert_eq!(cli.config, PathBuf::from("aegis.json"));
    }

    #[test]
    fn test_parse_failover_with_reason() {
        let cli = Cli::try_parse_from([
            "aegis",
            "-c",
            "/etc/aegis/dr.json",
            "failover",
            "west",
            "--reason",
            "maintenance",
        ])
        .unwrap();
        assert_eq!(cli.config, PathBuf::from("/etc/aegis/dr.json"));
        match cli.command {
            Commands::Failover(args) => {
                assert_eq!(args.region, "west");
                assert_eq!(args.reason.as_deref(), Some("maintenance"));
            }
            _ => panic!("expected failover command"),
        }
    }

    #[test]
    fn test_parse_recover_point_in_time() {
        let cli = Cli::try_parse_from([
            "aegis",
            "recover",
            "point-in-time",
            "--target-region",
            "west",
            "--point-in-time",
            "2024-06-01T00:00:00Z",
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::Recover(_)));
    }

    #[test]
    fn test_unknown_command_rejected() {
        assert!(Cli::try_parse_from(["aegis", "explode"]).is_err());
    }
}
