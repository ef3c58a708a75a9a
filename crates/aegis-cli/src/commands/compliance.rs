use clap::Parser;
use std::path::PathBuf;

use super::utils::{info, success, warning};
use crate::app::App;

#[derive(Parser)]
pub struct ComplianceArgs {
    /// Write the Markdown report to a file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

pub async fn execute(app: App, args: ComplianceArgs) -> anyhow::Result<()> {
    let report = aegis_compliance::evaluate(&app.config);
    let markdown = aegis_compliance::render_markdown(&report);

    match &args.output {
        Some(path) => {
            std::fs::write(path, &markdown)?;
            info(&format!("Report written to {}", path.display()));
        }
        None => println!("{}", markdown),
    }

    if report.compliant {
        success("Configuration is compliant");
    } else {
        let failing = report.requirements.iter().filter(|r| !r.passed).count();
        warning(&format!("{} requirements failing", failing));
    }
    Ok(())
}
