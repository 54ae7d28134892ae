//! Command implementations

pub mod jobs;
pub mod run;
pub mod sweep;

use std::path::Path;

use civic_server::config::Config;
use civic_server::ingest::AdapterRegistry;
use civic_server::services::CoreServices;

use crate::error::{CliError, Result};

/// Load configuration and bring up the core with the configured jobs
/// registered. Jobs the server knows about but this config lacks are kept.
pub async fn connect(config_path: Option<&Path>, in_memory: bool) -> Result<CoreServices> {
    dotenvy::dotenv().ok();
    let path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(Config::default_path);
    let config = Config::load_from(&path)?;

    let adapters = AdapterRegistry::with_builtin();
    let services = if in_memory {
        CoreServices::in_memory(config, adapters)
    } else {
        CoreServices::postgres(config, adapters)
            .await
            .map_err(|e| CliError::Startup(e.to_string()))?
    };

    services
        .register_jobs()
        .await
        .map_err(|e| CliError::Startup(e.to_string()))?;
    Ok(services)
}
