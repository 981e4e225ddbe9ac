pub mod check;
pub mod cleanup;
pub mod run;

use std::sync::Arc;

use anyhow::{Context, Result};
use job_runner::{CliRuntime, JobSupervisor};
use runner_config::{ConfigManager, RunnerSettings};
use tracing::debug;

pub(crate) fn load_settings() -> Result<RunnerSettings> {
    let manager = ConfigManager::new();
    let settings = manager.load_settings().with_context(|| {
        format!(
            "failed to load runner settings from {}",
            manager.config_dir().display()
        )
    })?;
    debug!(runtime = %settings.runtime, "loaded runner settings");
    Ok(settings)
}

pub(crate) fn supervisor(settings: &RunnerSettings) -> Arc<JobSupervisor<CliRuntime>> {
    Arc::new(JobSupervisor::new(
        Arc::new(settings.runtime()),
        settings.supervisor_options(),
    ))
}
