//! Run command - stage a payload, run it in a container, report its output

use std::collections::BTreeMap;
use std::fs;
use std::future::Future;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use job_runner::{spawn_job, CliRuntime, ExitPolicy, JobError, JobResult, JobSupervisor};
use runner_config::{ConfigManager, JobFile};
use tracing::{info, warn};
use uuid::Uuid;

/// Conventional status for a process ended by SIGINT.
const INTERRUPTED_EXIT: i32 = 130;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Job file (JSON) describing the run; flags override its fields
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Container image (default: `defaultImage` from runner settings)
    #[arg(long)]
    pub image: Option<String>,

    /// Program to copy into the workspace and run
    #[arg(long, value_name = "FILE")]
    pub payload: Option<PathBuf>,

    /// Host directory bound into the container (default: ./output)
    #[arg(long, value_name = "DIR")]
    pub workspace: Option<PathBuf>,

    /// Container path the workspace is bound to
    #[arg(long, value_name = "PATH")]
    pub mount_target: Option<String>,

    /// Interpreter word; repeat for more than one
    #[arg(long = "entrypoint", value_name = "WORD")]
    pub entrypoint: Vec<String>,

    /// Container name (default: payload name plus a random suffix)
    #[arg(long)]
    pub name: Option<String>,

    /// Label attached to the container; repeatable
    #[arg(long = "label", value_name = "KEY=VALUE", value_parser = parse_label)]
    pub labels: Vec<(String, String)>,

    /// Exit with the payload's own code when it is non-zero
    #[arg(long)]
    pub fail_on_exit: bool,

    /// Stop the job if it runs longer than this, e.g. "30m"
    #[arg(long, value_name = "DURATION", value_parser = humantime::parse_duration)]
    pub wait_timeout: Option<Duration>,

    /// Workspace file to print after the job succeeds
    #[arg(long, value_name = "FILE")]
    pub result: Option<PathBuf>,

    /// Arguments passed to the payload
    #[arg(last = true, value_name = "ARGS")]
    pub args: Vec<String>,
}

impl RunArgs {
    fn job_overrides(&self) -> JobFile {
        JobFile {
            image: self.image.clone(),
            entrypoint: (!self.entrypoint.is_empty()).then(|| self.entrypoint.clone()),
            payload: self.payload.clone(),
            args: self.args.clone(),
            workspace: self.workspace.clone(),
            mount_target: self.mount_target.clone(),
            name: self.name.clone(),
            labels: self.labels.iter().cloned().collect::<BTreeMap<_, _>>(),
        }
    }
}

fn parse_label(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got '{raw}'")),
    }
}

/// Container name for a payload: its file stem reduced to characters the
/// runtime accepts, followed by a short random suffix.
pub(crate) fn default_job_name(stem: &str) -> String {
    let mut base: String = stem
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect();
    if !base.starts_with(|c: char| c.is_ascii_alphanumeric()) {
        base.insert_str(0, "job");
    }
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}", base, &suffix[..8])
}

pub async fn run(args: RunArgs) -> Result<i32> {
    let mut settings = super::load_settings()?;
    if args.fail_on_exit {
        settings.exit_policy = ExitPolicy::FailOnNonZero;
    }
    if let Some(limit) = args.wait_timeout {
        settings.wait_timeout = Some(limit);
    }

    let job = match &args.config {
        Some(path) => ConfigManager::load_job(path)
            .with_context(|| format!("failed to load job file {}", path.display()))?,
        None => JobFile::default(),
    }
    .overlay(args.job_overrides());

    let invocation = job.into_invocation(&settings, default_job_name)?;
    let descriptor = invocation.descriptor()?;
    let workspace = invocation.workspace.clone();

    info!(
        job = %descriptor.name(),
        image = %descriptor.image(),
        workspace = %workspace.display(),
        "starting job"
    );

    let supervisor = super::supervisor(&settings);
    let name = descriptor.name().to_string();
    let ticket = spawn_job(Arc::clone(&supervisor), descriptor);
    let cancel = stop_job(&supervisor, &name);

    match wait_with_interrupt(ticket.wait(), tokio::signal::ctrl_c, cancel).await {
        Some(result) => report(result, &workspace, args.result.as_deref()),
        None => {
            warn!(job = %name, "second interrupt, exiting before teardown finished");
            eprintln!(
                "Interrupted: container '{name}' may still exist; remove it with `runnerctl cleanup --name {name}`"
            );
            Ok(INTERRUPTED_EXIT)
        }
    }
}

async fn stop_job(supervisor: &JobSupervisor<CliRuntime>, name: &str) {
    warn!(job = %name, "interrupt received, stopping job");
    if let Err(err) = supervisor.cancel(name).await {
        warn!(job = %name, error = %err, "failed to stop job");
    }
}

/// Waits for the job and runs `cancel` on the first interrupt, after which
/// the run still tears the container down and reports whatever it captured.
/// A second interrupt gives up waiting and yields `None`.
async fn wait_with_interrupt<F, I, S, C>(
    wait: F,
    mut interrupt: I,
    cancel: C,
) -> Option<JobResult>
where
    F: Future<Output = JobResult>,
    I: FnMut() -> S,
    S: Future<Output = io::Result<()>>,
    C: Future<Output = ()>,
{
    tokio::pin!(wait);
    tokio::select! {
        biased;
        result = &mut wait => return Some(result),
        Ok(()) = interrupt() => {}
    }

    let finish = async move {
        cancel.await;
        wait.await
    };
    tokio::select! {
        biased;
        result = finish => Some(result),
        Ok(()) = interrupt() => None,
    }
}

fn report(result: JobResult, workspace: &Path, artifact: Option<&Path>) -> Result<i32> {
    let mut stdout = io::stdout().lock();
    match result {
        Ok(outcome) => {
            stdout.write_all(outcome.output.as_bytes())?;
            info!(
                job = %outcome.name,
                exit_code = outcome.exit_code,
                duration_ms = outcome.duration_ms(),
                "job finished"
            );

            if let Some(artifact) = artifact {
                let path = workspace.join(artifact);
                let content = fs::read(&path)
                    .with_context(|| format!("failed to read result file {}", path.display()))?;
                stdout.write_all(&content)?;
            }
            stdout.flush()?;
            Ok(0)
        }
        Err(err) => {
            if let Some(output) = err.output() {
                stdout.write_all(output.as_bytes())?;
            }
            stdout.flush()?;
            eprintln!("Error [{}]: {}", err.code(), err);
            Ok(exit_status(&err))
        }
    }
}

fn exit_status(err: &JobError) -> i32 {
    match err {
        // keep the payload's own status when it fits a process exit code
        JobError::NonZeroExit { code, .. } if (1..=255).contains(code) => *code as i32,
        _ => 1,
    }
}
