//! `civic run` command implementation
//!
//! Dispatches one run through the same dispatcher the server uses and blocks
//! until it reaches a terminal status. Ctrl+C cancels the run cooperatively.

use chrono::NaiveDate;
use civic_common::JobMode;
use civic_server::ingest::{DispatchError, DispatchRequest};
use civic_server::models::{Run, RunStatus, TriggeredBy};
use civic_server::services::CoreServices;
use colored::Colorize;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Table};
use tracing::warn;

use crate::error::{CliError, Result};

pub struct RunArgs {
    pub mode: JobMode,
    pub job: String,
    pub scope: Option<String>,
    pub since: Option<NaiveDate>,
    pub actor: String,
}

/// Run the job to completion and return the finished run.
pub async fn execute(services: &CoreServices, args: RunArgs) -> Result<Run> {
    let job = services
        .registry
        .get(&args.job)
        .await
        .map_err(|e| CliError::Other(e.to_string()))?
        .ok_or_else(|| CliError::Rejected(format!("job '{}' not found", args.job)))?;

    if job.mode != args.mode {
        warn!(
            job_id = %job.job_id,
            configured = %job.mode,
            requested = %args.mode,
            "Running job in a mode other than its configured one"
        );
    }

    let request = DispatchRequest {
        job_id: args.job,
        mode: Some(args.mode),
        scope: args.scope,
        since: args.since,
        triggered_by: TriggeredBy::admin(args.actor),
    };

    let handle = services.dispatcher.dispatch(request).await.map_err(|e| match e {
        DispatchError::JobLocked { .. }
        | DispatchError::NotFound(_)
        | DispatchError::UnknownAdapter { .. } => CliError::Rejected(e.to_string()),
        other => CliError::Other(other.to_string()),
    })?;

    let run_id = handle.run_id;
    let wait = handle.wait();
    tokio::pin!(wait);

    let finished = tokio::select! {
        result = &mut wait => result,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("{}", "Cancelling run...".yellow());
            services.dispatcher.cancel(run_id);
            wait.await
        },
    };

    finished.map_err(|e| CliError::Other(e.to_string()))
}

/// Print the run summary.
pub fn print_run(run: &Run) {
    let status = match run.status {
        RunStatus::Success => run.status.to_string().green().bold(),
        RunStatus::PartialSuccess => run.status.to_string().yellow().bold(),
        _ => run.status.to_string().red().bold(),
    };

    let mut table = Table::new();
    table.load_preset(UTF8_FULL).apply_modifier(UTF8_ROUND_CORNERS);

    table.add_row(vec!["Run".to_string(), run.run_id.to_string()]);
    table.add_row(vec!["Job".to_string(), run.job_id.clone()]);
    table.add_row(vec!["Mode".to_string(), run.mode.to_string()]);
    table.add_row(vec!["Seen".to_string(), run.records_seen.to_string()]);
    table.add_row(vec!["Upserted".to_string(), run.records_upserted.to_string()]);
    table.add_row(vec!["Skipped".to_string(), run.records_skipped.to_string()]);
    table.add_row(vec!["Failed".to_string(), run.records_failed.to_string()]);
    if let Some(ended_at) = run.ended_at {
        let elapsed = ended_at - run.started_at;
        table.add_row(vec![
            "Duration".to_string(),
            format!("{:.1}s", elapsed.num_milliseconds() as f64 / 1000.0),
        ]);
    }
    if let Some(summary) = &run.error_summary {
        table.add_row(vec!["Error".to_string(), summary.clone()]);
    }

    println!("{}", table);
    println!("Status: {}", status);
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use civic_common::Jurisdiction;
    use civic_server::config::Config;
    use civic_server::ingest::{AdapterRegistry, JobRegistry, SyncMode};
    use civic_server::models::JobDefinition;
    use serde_json::json;
    use std::io::Write;

    fn services_for(path: &std::path::Path) -> CoreServices {
        let mut config = Config::default();
        config.jobs = vec![JobDefinition {
            job_id: "ca_on".to_string(),
            jurisdiction: Jurisdiction::Provincial,
            mode: JobMode::Bootstrap,
            schedule: None,
            enabled: true,
            adapter: "json_file".to_string(),
            scope: None,
            options: json!({ "path": path }),
        }];
        CoreServices::in_memory(config, AdapterRegistry::with_builtin())
    }

    fn args(job: &str) -> RunArgs {
        RunArgs {
            mode: JobMode::Bootstrap,
            job: job.to_string(),
            scope: None,
            since: NaiveDate::from_ymd_opt(2020, 1, 1),
            actor: "ops".to_string(),
        }
    }

    #[tokio::test]
    async fn test_run_to_completion() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let doc = json!({
            "entities": [
                {"natural_key": "on-mpp-1", "jurisdiction": "ca_on",
                 "payload": {"kind": "politician", "name": "A. Member"}},
                {"natural_key": "on-bill-1", "jurisdiction": "ca_on",
                 "payload": {"kind": "bill", "identifier": "Bill 1", "title": "An Act"}}
            ]
        });
        write!(file, "{doc}").unwrap();

        let services = services_for(file.path());
        services.sync_jobs().await.unwrap();

        let run = execute(&services, args("ca_on")).await.unwrap();
        assert_eq!(run.status, RunStatus::Success);
        assert_eq!(run.records_upserted, 2);
        assert_eq!(run.triggered_by, TriggeredBy::admin("ops"));
        assert_eq!(services.store.count().await.unwrap(), 2);
        assert_eq!(crate::exit_code(run.status), 0);
    }

    #[tokio::test]
    async fn test_register_keeps_jobs_outside_local_config() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let services = services_for(file.path());
        let mut server_only = services.config.jobs[0].clone();
        server_only.job_id = "ca_qc".to_string();
        services
            .registry
            .sync(&[server_only], SyncMode::Replace)
            .await
            .unwrap();

        services.register_jobs().await.unwrap();
        let ids: Vec<_> = services
            .registry
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|j| j.job_id)
            .collect();
        assert_eq!(ids, vec!["ca_on".to_string(), "ca_qc".to_string()]);

        services.sync_jobs().await.unwrap();
        assert!(services.registry.get("ca_qc").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unknown_job_is_rejected() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let services = services_for(file.path());
        services.sync_jobs().await.unwrap();

        let err = execute(&services, args("nope")).await.unwrap_err();
        assert_eq!(err.exit_code(), crate::error::EXIT_REJECTED);
    }
}
