use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::descriptor::ExecutionDescriptor;
use crate::error::{JobError, RuntimeError};
use crate::output::{CapturedOutput, JobOutcome};
use crate::runtime::ContainerRuntime;

/// What a non-zero exit code means to the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExitPolicy {
    /// Report the code in [`JobOutcome::exit_code`] and nothing else.
    #[default]
    Ignore,
    /// Turn a non-zero code into [`JobError::NonZeroExit`].
    FailOnNonZero,
}

#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    /// Grace period handed to `stop` before the runtime kills the unit.
    pub stop_timeout: Duration,
    /// Upper bound on `wait`. `None` waits as long as the unit runs.
    pub wait_timeout: Option<Duration>,
    pub exit_policy: ExitPolicy,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            stop_timeout: Duration::from_secs(10),
            wait_timeout: None,
            exit_policy: ExitPolicy::Ignore,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Created,
    Running,
    Exited(i64),
    Removed,
}

/// One created, not yet reaped, container.
///
/// Teardown is explicit (`teardown`), but if the handle is dropped before it
/// ran, for instance because the future driving the job was cancelled, a
/// best-effort stop and forced remove is scheduled on the current tokio
/// runtime.
pub struct JobHandle<R: ContainerRuntime> {
    runtime: Arc<R>,
    name: String,
    state: JobState,
    stop_timeout: Duration,
}

impl<R: ContainerRuntime> JobHandle<R> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    async fn start(&mut self) -> Result<(), JobError> {
        self.runtime
            .start(&self.name)
            .await
            .map_err(|source| JobError::Start {
                name: self.name.clone(),
                source,
            })?;
        self.state = JobState::Running;
        info!(job = %self.name, "container started");
        Ok(())
    }

    async fn wait(&mut self, limit: Option<Duration>) -> Result<i64, JobError> {
        let waiting = self.runtime.wait(&self.name);
        let result = match limit {
            Some(after) => tokio::time::timeout(after, waiting)
                .await
                .map_err(|_| JobError::WaitTimeout {
                    name: self.name.clone(),
                    after,
                })?,
            None => waiting.await,
        };

        let code = result.map_err(|source| JobError::Wait {
            name: self.name.clone(),
            source,
        })?;
        self.state = JobState::Exited(code);
        info!(job = %self.name, exit_code = code, "container exited");
        Ok(code)
    }

    async fn logs(&self) -> Result<CapturedOutput, JobError> {
        self.runtime
            .logs(&self.name)
            .await
            .map(CapturedOutput::new)
            .map_err(|source| JobError::Logs {
                name: self.name.clone(),
                source,
            })
    }

    /// Stops (unless the unit never ran) and force-removes the container.
    /// The handle counts as removed afterwards even if a step failed; the
    /// first failure is returned for logging.
    async fn teardown(&mut self) -> Result<(), JobError> {
        if self.state == JobState::Removed {
            return Ok(());
        }

        let mut first_error = None;

        if self.state != JobState::Created {
            if let Err(source) = tolerate_missing(
                self.runtime.stop(&self.name, self.stop_timeout).await,
            ) {
                first_error.get_or_insert(JobError::Cleanup {
                    name: self.name.clone(),
                    source,
                });
            }
        }

        if let Err(source) = tolerate_missing(self.runtime.remove(&self.name, true).await) {
            first_error.get_or_insert(JobError::Cleanup {
                name: self.name.clone(),
                source,
            });
        }

        self.state = JobState::Removed;
        match first_error {
            Some(err) => Err(err),
            None => {
                info!(job = %self.name, "container removed");
                Ok(())
            }
        }
    }
}

impl<R: ContainerRuntime> Drop for JobHandle<R> {
    fn drop(&mut self) {
        if self.state == JobState::Removed {
            return;
        }

        let runtime = Arc::clone(&self.runtime);
        let name = std::mem::take(&mut self.name);
        let stop_timeout = self.stop_timeout;
        let needs_stop = self.state != JobState::Created;

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!(job = %name, "job abandoned before teardown; cleaning up in background");
                handle.spawn(async move {
                    if needs_stop {
                        if let Err(err) = tolerate_missing(runtime.stop(&name, stop_timeout).await)
                        {
                            warn!(job = %name, error = %err, "background stop failed");
                        }
                    }
                    if let Err(err) = tolerate_missing(runtime.remove(&name, true).await) {
                        warn!(job = %name, error = %err, "background remove failed");
                    }
                });
            }
            Err(_) => {
                warn!(job = %name, "no async runtime available; container may need manual removal");
            }
        }
    }
}

fn tolerate_missing(result: Result<(), RuntimeError>) -> Result<(), RuntimeError> {
    match result {
        Err(RuntimeError::NotFound { .. }) => Ok(()),
        other => other,
    }
}

/// Owns the full lifecycle of one container per [`run`](Self::run) call.
pub struct JobSupervisor<R: ContainerRuntime> {
    runtime: Arc<R>,
    options: SupervisorOptions,
}

impl<R: ContainerRuntime> JobSupervisor<R> {
    pub fn new(runtime: Arc<R>, options: SupervisorOptions) -> Self {
        Self { runtime, options }
    }

    pub fn with_defaults(runtime: Arc<R>) -> Self {
        Self::new(runtime, SupervisorOptions::default())
    }

    pub fn runtime(&self) -> &Arc<R> {
        &self.runtime
    }

    pub fn options(&self) -> &SupervisorOptions {
        &self.options
    }

    /// Registers the container and hands back the handle that owns it.
    pub async fn create(&self, descriptor: &ExecutionDescriptor) -> Result<JobHandle<R>, JobError> {
        self.runtime
            .create(descriptor)
            .await
            .map_err(|err| match err {
                RuntimeError::Conflict { .. } => JobError::Conflict {
                    name: descriptor.name().to_string(),
                },
                RuntimeError::ImageNotFound { .. } => JobError::ImageNotFound {
                    image: descriptor.image().to_string(),
                },
                source => JobError::Create {
                    name: descriptor.name().to_string(),
                    source,
                },
            })?;

        info!(job = %descriptor.name(), image = %descriptor.image(), "container created");
        Ok(JobHandle {
            runtime: Arc::clone(&self.runtime),
            name: descriptor.name().to_string(),
            state: JobState::Created,
            stop_timeout: self.options.stop_timeout,
        })
    }

    /// Runs `create → start → wait → logs → stop → remove` in that order.
    ///
    /// Whatever fails after `create`, the container is still stopped and
    /// removed before this returns. Teardown failures are logged and never
    /// replace the primary result or error.
    #[instrument(skip_all, fields(job = %descriptor.name(), image = %descriptor.image()))]
    pub async fn run(&self, descriptor: &ExecutionDescriptor) -> Result<JobOutcome, JobError> {
        let started_at = Utc::now();
        let mut handle = self.create(descriptor).await?;

        let driven = self.drive(&mut handle).await;

        if let Err(err) = handle.teardown().await {
            warn!(job = %descriptor.name(), error = %err, "cleanup failed");
        }

        let (exit_code, output) = driven?;
        let finished_at = Utc::now();

        if exit_code != 0 {
            match self.options.exit_policy {
                ExitPolicy::Ignore => {
                    warn!(job = %descriptor.name(), exit_code, "payload exited with non-zero code");
                }
                ExitPolicy::FailOnNonZero => {
                    return Err(JobError::NonZeroExit {
                        name: descriptor.name().to_string(),
                        code: exit_code,
                        output,
                    });
                }
            }
        }

        Ok(JobOutcome {
            name: descriptor.name().to_string(),
            exit_code,
            output,
            started_at,
            finished_at,
        })
    }

    async fn drive(&self, handle: &mut JobHandle<R>) -> Result<(i64, CapturedOutput), JobError> {
        handle.start().await?;
        let exit_code = handle.wait(self.options.wait_timeout).await?;
        // logs are read only once the unit exited so the stream is complete
        let output = handle.logs().await?;
        Ok((exit_code, output))
    }

    /// Stops and force-removes `name`. A unit that is already gone is not an
    /// error, so calling this repeatedly is harmless.
    pub async fn cleanup(&self, name: &str) -> Result<(), JobError> {
        tolerate_missing(self.runtime.stop(name, self.options.stop_timeout).await).map_err(
            |source| JobError::Cleanup {
                name: name.to_string(),
                source,
            },
        )?;
        tolerate_missing(self.runtime.remove(name, true).await).map_err(|source| {
            JobError::Cleanup {
                name: name.to_string(),
                source,
            }
        })
    }

    /// Best-effort early stop of a running job. The pending `wait` of its run
    /// returns and the run finishes with its usual teardown.
    pub async fn cancel(&self, name: &str) -> Result<(), JobError> {
        info!(job = %name, "cancel requested");
        tolerate_missing(self.runtime.stop(name, self.options.stop_timeout).await).map_err(
            |source| JobError::Cancel {
                name: name.to_string(),
                source,
            },
        )
    }

    /// Checks that `image` resolves locally without creating anything.
    pub async fn check_image(&self, image: &str) -> Result<(), JobError> {
        match self.runtime.image_exists(image).await {
            Ok(true) => Ok(()),
            Ok(false) | Err(RuntimeError::ImageNotFound { .. }) => Err(JobError::ImageNotFound {
                image: image.to_string(),
            }),
            Err(source) => Err(JobError::Runtime { source }),
        }
    }
}
