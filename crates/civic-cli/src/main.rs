//! civic CLI - main entry point

use civic_cli::commands::{self, run::RunArgs};
use civic_cli::{exit_code, log_config, Cli, Commands};
use civic_common::logging::init_logging;
use clap::Parser;
use std::process;
use tracing::error;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_config = log_config(cli.verbose, |key| std::env::var(key).ok());

    // The CLI works without logging.
    let log_guard = init_logging(&log_config).ok();

    let code = match execute_command(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "Command failed");
            eprintln!("Error: {}", e);
            e.exit_code()
        },
    };

    // process::exit skips destructors; flush file logs first.
    drop(log_guard);
    process::exit(code);
}

async fn execute_command(cli: Cli) -> civic_cli::Result<i32> {
    let services = commands::connect(cli.config.as_deref(), cli.in_memory).await?;

    match cli.command {
        Commands::Run {
            mode,
            job,
            scope,
            since,
            actor,
        } => {
            let run = commands::run::execute(
                &services,
                RunArgs {
                    mode,
                    job,
                    scope,
                    since,
                    actor,
                },
            )
            .await?;
            commands::run::print_run(&run);
            Ok(exit_code(run.status))
        },
        Commands::Sweep => commands::sweep::run(&services).await.map(|()| 0),
        Commands::Jobs => commands::jobs::run(&services).await.map(|()| 0),
    }
}
