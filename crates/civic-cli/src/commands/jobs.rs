//! `civic jobs` command implementation

use civic_server::services::CoreServices;
use colored::Colorize;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Table};

use crate::error::{CliError, Result};

pub async fn run(services: &CoreServices) -> Result<()> {
    let jobs = services
        .admin
        .list_jobs()
        .await
        .map_err(|e| CliError::Other(e.to_string()))?;

    if jobs.is_empty() {
        println!("No jobs configured.");
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL).apply_modifier(UTF8_ROUND_CORNERS);
    table.set_header(vec!["Job", "Jurisdiction", "Mode", "Schedule", "Enabled", "Last run"]);

    for summary in &jobs {
        let job = &summary.job;
        let last_run = summary
            .latest_run
            .as_ref()
            .map(|run| format!("{} ({})", run.status, run.started_at.format("%Y-%m-%d %H:%M")))
            .unwrap_or_else(|| "-".to_string());

        table.add_row(vec![
            job.job_id.clone(),
            job.jurisdiction.to_string(),
            job.mode.to_string(),
            job.schedule.clone().unwrap_or_else(|| "-".to_string()),
            if job.enabled { "yes".to_string() } else { "no".to_string() },
            last_run,
        ]);
    }

    println!("{}", "Jobs:".cyan().bold());
    println!("{}", table);
    Ok(())
}
