use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use job_runner::{stage_payload, validate_name, PayloadInvocation};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::settings::RunnerSettings;
use crate::ConfigError;

const DEFAULT_WORKSPACE: &str = "output";

/// A job as written in a job file or assembled from command line flags.
/// Anything left unset falls back to [`RunnerSettings`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JobFile {
    pub image: Option<String>,
    pub entrypoint: Option<Vec<String>>,
    pub payload: Option<PathBuf>,
    pub args: Vec<String>,
    pub workspace: Option<PathBuf>,
    pub mount_target: Option<String>,
    pub name: Option<String>,
    pub labels: BTreeMap<String, String>,
}

impl JobFile {
    /// Layers `overrides` on top: set fields win, a non-empty argument list
    /// replaces the original one, labels are merged.
    pub fn overlay(mut self, overrides: JobFile) -> JobFile {
        if overrides.image.is_some() {
            self.image = overrides.image;
        }
        if overrides.entrypoint.is_some() {
            self.entrypoint = overrides.entrypoint;
        }
        if overrides.payload.is_some() {
            self.payload = overrides.payload;
        }
        if !overrides.args.is_empty() {
            self.args = overrides.args;
        }
        if overrides.workspace.is_some() {
            self.workspace = overrides.workspace;
        }
        if overrides.mount_target.is_some() {
            self.mount_target = overrides.mount_target;
        }
        if overrides.name.is_some() {
            self.name = overrides.name;
        }
        self.labels.extend(overrides.labels);
        self
    }

    pub(crate) fn rebase(&mut self, base: &Path) {
        for path in [&mut self.payload, &mut self.workspace].into_iter().flatten() {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }

    /// Stages the payload into the workspace and resolves every unset field
    /// against `settings`. `default_name` receives the payload's file stem
    /// when no name was given.
    pub fn into_invocation<F>(
        self,
        settings: &RunnerSettings,
        default_name: F,
    ) -> Result<PayloadInvocation, ConfigError>
    where
        F: FnOnce(&str) -> String,
    {
        let payload = self.payload.ok_or(ConfigError::MissingPayload)?;
        let workspace_dir = self
            .workspace
            .unwrap_or_else(|| PathBuf::from(DEFAULT_WORKSPACE));

        let name = match self.name {
            Some(name) => name,
            None => {
                let stem = payload
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .filter(|s| !s.is_empty())
                    .unwrap_or_else(|| "job".to_string());
                default_name(&stem)
            }
        };
        // nothing touches the host until the name is known to be usable
        validate_name(&name)?;

        let (workspace, staged) = stage_payload(&payload, &workspace_dir)?;
        debug!(
            "Staged payload {:?} into workspace {:?}",
            payload,
            workspace.root()
        );

        Ok(PayloadInvocation {
            image: self
                .image
                .unwrap_or_else(|| settings.default_image.clone()),
            name,
            workspace: workspace.root().to_path_buf(),
            mount_target: self
                .mount_target
                .unwrap_or_else(|| settings.mount_target.clone()),
            entrypoint: self
                .entrypoint
                .unwrap_or_else(|| settings.default_entrypoint.clone()),
            payload: staged,
            args: self.args,
            labels: self.labels,
        })
    }
}
