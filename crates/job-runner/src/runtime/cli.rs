use std::env;
use std::process::{Output, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::ContainerRuntime;
use crate::descriptor::ExecutionDescriptor;
use crate::error::RuntimeError;

pub const RUNTIME_ENV: &str = "RUNNER_CONTAINER_RUNTIME";
const DEFAULT_RUNTIME: &str = "docker";

/// Drives a docker-compatible command line client (`docker`, `podman`, or a
/// path to either).
#[derive(Debug, Clone)]
pub struct CliRuntime {
    binary: String,
}

impl CliRuntime {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Uses `RUNNER_CONTAINER_RUNTIME` when set, otherwise `docker`.
    pub fn from_env() -> Self {
        match env::var(RUNTIME_ENV) {
            Ok(val) if !val.trim().is_empty() => Self::new(val.trim()),
            _ => Self::new(DEFAULT_RUNTIME),
        }
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    async fn invoke(
        &self,
        operation: &str,
        target: &str,
        args: Vec<String>,
    ) -> Result<Output, RuntimeError> {
        debug!(
            runtime = %self.binary,
            command = %command_line_string(&self.binary, &args),
            "invoking container runtime"
        );

        let output = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| RuntimeError::Spawn {
                runtime: self.binary.clone(),
                source,
            })?;

        if output.status.success() {
            Ok(output)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(classify_failure(operation, target, &stderr))
        }
    }
}

impl Default for CliRuntime {
    fn default() -> Self {
        Self::from_env()
    }
}

#[async_trait]
impl ContainerRuntime for CliRuntime {
    async fn image_exists(&self, image: &str) -> Result<bool, RuntimeError> {
        let args = vec![
            "image".to_string(),
            "inspect".to_string(),
            "--format".to_string(),
            "{{.Id}}".to_string(),
            image.to_string(),
        ];
        match self.invoke("image inspect", image, args).await {
            Ok(_) => Ok(true),
            Err(RuntimeError::ImageNotFound { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn create(&self, descriptor: &ExecutionDescriptor) -> Result<(), RuntimeError> {
        self.invoke("create", descriptor.name(), create_args(descriptor))
            .await
            .map(|_| ())
            .map_err(|err| match err {
                // Missing images surface from `create` under the image reference.
                RuntimeError::ImageNotFound { .. } => RuntimeError::ImageNotFound {
                    image: descriptor.image().to_string(),
                },
                other => other,
            })
    }

    async fn start(&self, name: &str) -> Result<(), RuntimeError> {
        self.invoke("start", name, vec!["start".to_string(), name.to_string()])
            .await
            .map(|_| ())
    }

    async fn wait(&self, name: &str) -> Result<i64, RuntimeError> {
        let output = self
            .invoke("wait", name, vec!["wait".to_string(), name.to_string()])
            .await?;
        parse_exit_code(&output.stdout)
    }

    async fn logs(&self, name: &str) -> Result<Vec<u8>, RuntimeError> {
        let output = self
            .invoke("logs", name, vec!["logs".to_string(), name.to_string()])
            .await?;
        let mut combined = output.stdout;
        combined.extend_from_slice(&output.stderr);
        Ok(combined)
    }

    async fn stop(&self, name: &str, timeout: Duration) -> Result<(), RuntimeError> {
        let args = vec![
            "stop".to_string(),
            "--time".to_string(),
            grace_secs(timeout).to_string(),
            name.to_string(),
        ];
        match self.invoke("stop", name, args).await {
            Ok(_) | Err(RuntimeError::NotFound { .. }) => Ok(()),
            Err(err) => Err(err),
        }
    }

    async fn remove(&self, name: &str, force: bool) -> Result<(), RuntimeError> {
        let mut args = vec!["rm".to_string()];
        if force {
            args.push("--force".to_string());
        }
        args.push(name.to_string());
        match self.invoke("rm", name, args).await {
            Ok(_) | Err(RuntimeError::NotFound { .. }) => Ok(()),
            Err(err) => Err(err),
        }
    }
}

/// `--time` only takes whole seconds. Rounding up keeps a sub-second grace
/// period from turning into an immediate kill.
fn grace_secs(timeout: Duration) -> u64 {
    timeout.as_secs() + u64::from(timeout.subsec_nanos() > 0)
}

/// Arguments for `<runtime> create`. The CLI takes a single entrypoint word;
/// any further entrypoint words are placed ahead of the command.
fn create_args(descriptor: &ExecutionDescriptor) -> Vec<String> {
    let mut args = vec![
        "create".to_string(),
        "--pull".to_string(),
        "never".to_string(),
        "--name".to_string(),
        descriptor.name().to_string(),
    ];

    let mut entrypoint = descriptor.entrypoint().iter();
    if let Some(first) = entrypoint.next() {
        args.push("--entrypoint".to_string());
        args.push(first.clone());
    }

    if let Some(dir) = descriptor.working_dir() {
        args.push("--workdir".to_string());
        args.push(dir.to_string());
    }

    for (host, mount) in descriptor.volumes() {
        args.push("--volume".to_string());
        args.push(format!("{}:{}:{}", host.display(), mount.target, mount.mode));
    }

    for (key, value) in descriptor.labels() {
        args.push("--label".to_string());
        args.push(format!("{}={}", key, value));
    }

    args.push(descriptor.image().to_string());
    args.extend(entrypoint.cloned());
    args.extend(descriptor.command().iter().cloned());
    args
}

fn parse_exit_code(stdout: &[u8]) -> Result<i64, RuntimeError> {
    let text = String::from_utf8_lossy(stdout);
    // podman may print one line per container; the last one is ours
    let last = text.lines().rev().find(|line| !line.trim().is_empty());
    last.and_then(|line| line.trim().parse::<i64>().ok())
        .ok_or_else(|| RuntimeError::Protocol {
            operation: "wait".to_string(),
            message: format!("expected an exit code, got '{}'", truncate(text.trim(), 256)),
        })
}

fn classify_failure(operation: &str, target: &str, stderr: &str) -> RuntimeError {
    let lowered = stderr.to_ascii_lowercase();

    if lowered.contains("no such image")
        || lowered.contains("image not known")
        || lowered.contains("unable to find image")
    {
        return RuntimeError::ImageNotFound {
            image: target.to_string(),
        };
    }

    if lowered.contains("conflict") || lowered.contains("already in use") {
        return RuntimeError::Conflict {
            name: target.to_string(),
        };
    }

    if lowered.contains("no such container") || lowered.contains("no container with name") {
        return RuntimeError::NotFound {
            name: target.to_string(),
        };
    }

    RuntimeError::Rejected {
        operation: operation.to_string(),
        message: truncate(stderr.trim(), 2048),
    }
}

fn truncate(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut end = limit;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    let mut truncated = text[..end].to_string();
    truncated.push_str("… (truncated)");
    truncated
}

fn shell_escape(arg: &str) -> String {
    if arg.is_empty() {
        return "''".to_string();
    }
    let escaped = arg.replace('\'', "'\\''");
    format!("'{}'", escaped)
}

fn command_line_string(program: &str, args: &[String]) -> String {
    let mut s = program.to_string();
    for a in args {
        s.push(' ');
        if a.is_empty() || a.contains(' ') || a.contains('"') || a.contains('\'') {
            s.push_str(&shell_escape(a));
        } else {
            s.push_str(a);
        }
    }
    s
}
