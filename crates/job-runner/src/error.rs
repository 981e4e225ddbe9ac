use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::output::CapturedOutput;

/// Failure reported by a [`ContainerRuntime`](crate::runtime::ContainerRuntime) call.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("image '{image}' is not available to the container runtime")]
    ImageNotFound { image: String },
    #[error("container name '{name}' is already in use")]
    Conflict { name: String },
    #[error("no such container '{name}'")]
    NotFound { name: String },
    #[error("container runtime rejected '{operation}': {message}")]
    Rejected { operation: String, message: String },
    #[error("failed to spawn container runtime '{runtime}': {source}")]
    Spawn {
        runtime: String,
        source: std::io::Error,
    },
    #[error("unexpected response from container runtime for '{operation}': {message}")]
    Protocol { operation: String, message: String },
}

/// Errors surfaced by the runner to its caller.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("invalid job configuration: {message}")]
    Config { message: String },

    #[error("workspace I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("image '{image}' not found")]
    ImageNotFound { image: String },

    #[error("container '{name}' already exists")]
    Conflict { name: String },

    #[error("failed to create container '{name}': {source}")]
    Create { name: String, source: RuntimeError },

    #[error("failed to start container '{name}': {source}")]
    Start { name: String, source: RuntimeError },

    #[error("lost track of container '{name}' while waiting: {source}")]
    Wait { name: String, source: RuntimeError },

    #[error("container '{name}' did not exit within {}s", .after.as_secs())]
    WaitTimeout { name: String, after: Duration },

    #[error("failed to read logs of container '{name}': {source}")]
    Logs { name: String, source: RuntimeError },

    #[error("container '{name}' exited with code {code}")]
    NonZeroExit {
        name: String,
        code: i64,
        output: CapturedOutput,
    },

    #[error("failed to clean up container '{name}': {source}")]
    Cleanup { name: String, source: RuntimeError },

    #[error("failed to cancel container '{name}': {source}")]
    Cancel { name: String, source: RuntimeError },

    #[error("container runtime unavailable: {source}")]
    Runtime { source: RuntimeError },

    #[error("job '{name}' finished without reporting a result")]
    Abandoned { name: String },
}

impl JobError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        JobError::Config {
            message: message.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            JobError::Config { .. } => "JOB_INVALID_CONFIG",
            JobError::Io { .. } => "JOB_IO_ERROR",
            JobError::ImageNotFound { .. } => "JOB_IMAGE_NOT_FOUND",
            JobError::Conflict { .. } => "JOB_CONFLICT",
            JobError::Create { .. } => "JOB_CREATE_FAILED",
            JobError::Start { .. } => "JOB_START_FAILED",
            JobError::Wait { .. } => "JOB_WAIT_FAILED",
            JobError::WaitTimeout { .. } => "JOB_WAIT_TIMEOUT",
            JobError::Logs { .. } => "JOB_LOGS_FAILED",
            JobError::NonZeroExit { .. } => "JOB_NONZERO_EXIT",
            JobError::Cleanup { .. } => "JOB_CLEANUP_FAILED",
            JobError::Cancel { .. } => "JOB_CANCEL_FAILED",
            JobError::Runtime { .. } => "JOB_RUNTIME_ERROR",
            JobError::Abandoned { .. } => "JOB_ABANDONED",
        }
    }

    /// Only a dropped runtime connection during `wait` is worth another attempt;
    /// configuration, naming and start problems rarely resolve themselves.
    pub fn is_retryable(&self) -> bool {
        matches!(self, JobError::Wait { .. })
    }

    /// Output captured before the error, if any.
    pub fn output(&self) -> Option<&CapturedOutput> {
        match self {
            JobError::NonZeroExit { output, .. } => Some(output),
            _ => None,
        }
    }
}
