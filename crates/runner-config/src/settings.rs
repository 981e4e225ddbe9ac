use std::time::Duration;

use job_runner::{CliRuntime, ExitPolicy, SupervisorOptions};
use serde::{Deserialize, Deserializer};

use crate::ConfigError;

pub use job_runner::runtime::cli::RUNTIME_ENV;

pub const STOP_TIMEOUT_ENV: &str = "RUNNER_STOP_TIMEOUT";
pub const WAIT_TIMEOUT_ENV: &str = "RUNNER_WAIT_TIMEOUT";
pub const FAIL_ON_NONZERO_ENV: &str = "RUNNER_FAIL_ON_NONZERO";

/// Host-wide runner settings, read from `runner.json`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunnerSettings {
    pub runtime: String,
    #[serde(deserialize_with = "human_duration")]
    pub stop_timeout: Duration,
    #[serde(default, deserialize_with = "optional_human_duration")]
    pub wait_timeout: Option<Duration>,
    pub exit_policy: ExitPolicy,
    pub default_image: String,
    pub default_entrypoint: Vec<String>,
    pub mount_target: String,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            runtime: "docker".to_string(),
            stop_timeout: Duration::from_secs(10),
            wait_timeout: None,
            exit_policy: ExitPolicy::Ignore,
            default_image: "quay.io/fenicsproject/stable:2017.2.0".to_string(),
            default_entrypoint: vec!["python3".to_string()],
            mount_target: "/fenics/home/shared".to_string(),
        }
    }
}

impl RunnerSettings {
    pub fn supervisor_options(&self) -> SupervisorOptions {
        SupervisorOptions {
            stop_timeout: self.stop_timeout,
            wait_timeout: self.wait_timeout,
            exit_policy: self.exit_policy,
        }
    }

    pub fn runtime(&self) -> CliRuntime {
        CliRuntime::new(self.runtime.clone())
    }

    pub(crate) fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(runtime) = get(RUNTIME_ENV) {
            self.runtime = runtime.trim().to_string();
        }

        if let Some(value) = get(STOP_TIMEOUT_ENV) {
            self.stop_timeout = parse_duration(STOP_TIMEOUT_ENV, &value)?;
        }

        if let Some(value) = get(WAIT_TIMEOUT_ENV) {
            self.wait_timeout = match value.trim().to_ascii_lowercase().as_str() {
                "none" | "off" => None,
                _ => Some(parse_duration(WAIT_TIMEOUT_ENV, &value)?),
            };
        }

        if let Some(value) = get(FAIL_ON_NONZERO_ENV) {
            self.exit_policy = match value.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => ExitPolicy::FailOnNonZero,
                "0" | "false" | "no" | "off" => ExitPolicy::Ignore,
                _ => {
                    return Err(ConfigError::InvalidOverride {
                        variable: FAIL_ON_NONZERO_ENV.to_string(),
                        value,
                    })
                }
            };
        }

        Ok(())
    }
}

pub(crate) fn parse_duration(field: &str, value: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(value.trim()).map_err(|e| ConfigError::InvalidDuration {
        field: field.to_string(),
        value: value.to_string(),
        message: e.to_string(),
    })
}

fn human_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    humantime::parse_duration(raw.trim()).map_err(serde::de::Error::custom)
}

fn optional_human_duration<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        Some(raw) => humantime::parse_duration(raw.trim())
            .map(Some)
            .map_err(serde::de::Error::custom),
        None => Ok(None),
    }
}
