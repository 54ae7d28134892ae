//! `civic sweep` command implementation

use civic_server::services::CoreServices;
use colored::Colorize;

use crate::error::{CliError, Result};

pub async fn run(services: &CoreServices) -> Result<()> {
    let report = services
        .sweep_orphans()
        .await
        .map_err(|e| CliError::Other(e.to_string()))?;

    if report.orphaned.is_empty() {
        println!("{}", "No orphaned runs found.".green());
        return Ok(());
    }

    println!(
        "{}",
        format!("Finalized {} orphaned run(s):", report.orphaned.len())
            .yellow()
            .bold()
    );
    for run_id in &report.orphaned {
        println!("  {}", run_id);
    }
    Ok(())
}
