use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::JobError;

/// Container names accepted by docker-compatible engines.
static CONTAINER_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9_.-]*$").expect("valid container name regex"));

/// Rejects names the runtime would refuse at create time.
pub fn validate_name(name: &str) -> Result<(), JobError> {
    if CONTAINER_NAME.is_match(name) {
        Ok(())
    } else {
        Err(JobError::config(format!(
            "container name '{name}' must match [a-zA-Z0-9][a-zA-Z0-9_.-]*"
        )))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum AccessMode {
    #[default]
    #[serde(rename = "rw")]
    ReadWrite,
    #[serde(rename = "ro")]
    ReadOnly,
}

impl AccessMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessMode::ReadWrite => "rw",
            AccessMode::ReadOnly => "ro",
        }
    }
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a host directory shows up inside the container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mount {
    pub target: String,
    pub mode: AccessMode,
}

/// Immutable description of one containerized job.
///
/// Built through [`DescriptorBuilder`], which performs all validation, so a
/// descriptor in hand is always well-formed: the command is non-empty, every
/// bind-mount source exists on the host, and the name is acceptable to the
/// runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionDescriptor {
    image: String,
    entrypoint: Vec<String>,
    command: Vec<String>,
    volumes: BTreeMap<PathBuf, Mount>,
    working_dir: Option<String>,
    name: String,
    labels: BTreeMap<String, String>,
}

impl ExecutionDescriptor {
    pub fn builder(image: impl Into<String>, name: impl Into<String>) -> DescriptorBuilder {
        DescriptorBuilder {
            image: image.into(),
            name: name.into(),
            entrypoint: Vec::new(),
            command: Vec::new(),
            volumes: Vec::new(),
            working_dir: None,
            labels: BTreeMap::new(),
        }
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    pub fn entrypoint(&self) -> &[String] {
        &self.entrypoint
    }

    pub fn command(&self) -> &[String] {
        &self.command
    }

    pub fn volumes(&self) -> &BTreeMap<PathBuf, Mount> {
        &self.volumes
    }

    pub fn working_dir(&self) -> Option<&str> {
        self.working_dir.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.labels
    }
}

#[derive(Debug, Clone)]
pub struct DescriptorBuilder {
    image: String,
    name: String,
    entrypoint: Vec<String>,
    command: Vec<String>,
    volumes: Vec<(PathBuf, Mount)>,
    working_dir: Option<String>,
    labels: BTreeMap<String, String>,
}

impl DescriptorBuilder {
    pub fn entrypoint<I, S>(mut self, entrypoint: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entrypoint = entrypoint.into_iter().map(Into::into).collect();
        self
    }

    pub fn command<I, S>(mut self, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command = command.into_iter().map(Into::into).collect();
        self
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.command.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn volume(
        mut self,
        host_path: impl Into<PathBuf>,
        target: impl Into<String>,
        mode: AccessMode,
    ) -> Self {
        self.volumes.push((
            host_path.into(),
            Mount {
                target: target.into(),
                mode,
            },
        ));
        self
    }

    pub fn working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> Result<ExecutionDescriptor, JobError> {
        if self.image.trim().is_empty() {
            return Err(JobError::config("container image cannot be empty"));
        }

        validate_name(&self.name)?;

        if self.command.is_empty() {
            return Err(JobError::config("container command cannot be empty"));
        }

        if self.entrypoint.iter().any(|part| part.is_empty()) {
            return Err(JobError::config("entrypoint entries cannot be empty"));
        }

        if let Some(dir) = &self.working_dir {
            if !dir.starts_with('/') {
                return Err(JobError::config(format!(
                    "working directory '{}' must be absolute",
                    dir
                )));
            }
        }

        let mut volumes: BTreeMap<PathBuf, Mount> = BTreeMap::new();
        for (host_path, mount) in self.volumes {
            if !mount.target.starts_with('/') {
                return Err(JobError::config(format!(
                    "mount target '{}' must be absolute",
                    mount.target
                )));
            }

            if volumes
                .values()
                .any(|existing| existing.target == mount.target)
            {
                return Err(JobError::config(format!(
                    "mount target '{}' is bound more than once",
                    mount.target
                )));
            }

            let host_path = canonical_mount_source(&host_path)?;
            if volumes.insert(host_path.clone(), mount).is_some() {
                return Err(JobError::config(format!(
                    "host path '{}' is mounted more than once",
                    host_path.display()
                )));
            }
        }

        Ok(ExecutionDescriptor {
            image: self.image,
            entrypoint: self.entrypoint,
            command: self.command,
            volumes,
            working_dir: self.working_dir,
            name: self.name,
            labels: self.labels,
        })
    }
}

fn canonical_mount_source(path: &Path) -> Result<PathBuf, JobError> {
    if !path.is_absolute() {
        return Err(JobError::config(format!(
            "mount source '{}' must be an absolute path",
            path.display()
        )));
    }

    if !path.exists() {
        return Err(JobError::config(format!(
            "mount source '{}' does not exist",
            path.display()
        )));
    }

    fs::canonicalize(path).map_err(|err| {
        JobError::config(format!(
            "mount source '{}' cannot be resolved: {}",
            path.display(),
            err
        ))
    })
}

/// The common job shape: a payload staged into a workspace that is bound
/// read-write into the container, run by an interpreter from the mount point.
#[derive(Debug, Clone)]
pub struct PayloadInvocation {
    pub image: String,
    pub name: String,
    pub workspace: PathBuf,
    pub mount_target: String,
    pub entrypoint: Vec<String>,
    /// Payload path relative to the workspace.
    pub payload: PathBuf,
    pub args: Vec<String>,
    pub labels: BTreeMap<String, String>,
}

impl PayloadInvocation {
    pub fn descriptor(&self) -> Result<ExecutionDescriptor, JobError> {
        if self.payload.is_absolute() {
            return Err(JobError::config(format!(
                "payload '{}' must be relative to the workspace",
                self.payload.display()
            )));
        }

        let payload = self
            .payload
            .to_str()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| JobError::config("payload path must be non-empty UTF-8"))?
            .to_string();

        let mut builder = ExecutionDescriptor::builder(&self.image, &self.name)
            .entrypoint(self.entrypoint.iter().cloned())
            .arg(payload)
            .args(self.args.iter().cloned())
            .volume(&self.workspace, &self.mount_target, AccessMode::ReadWrite)
            .working_dir(&self.mount_target);

        for (key, value) in &self.labels {
            builder = builder.label(key, value);
        }

        builder.build()
    }
}
