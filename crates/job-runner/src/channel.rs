use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::descriptor::ExecutionDescriptor;
use crate::error::JobError;
use crate::output::JobOutcome;
use crate::runtime::ContainerRuntime;
use crate::supervisor::JobSupervisor;

pub type JobResult = Result<JobOutcome, JobError>;

/// Runs the job on its own tokio task and returns immediately.
///
/// The returned ticket yields the result exactly once. Dropping it does not
/// cancel the job: the task keeps running and still tears the container down.
pub fn spawn_job<R: ContainerRuntime>(
    supervisor: Arc<JobSupervisor<R>>,
    descriptor: ExecutionDescriptor,
) -> JobTicket<R> {
    let (sender, receiver) = oneshot::channel();
    let name = descriptor.name().to_string();
    let worker = Arc::clone(&supervisor);

    let task = tokio::spawn(async move {
        let result = worker.run(&descriptor).await;
        if sender.send(result).is_err() {
            debug!(job = %descriptor.name(), "job finished after its ticket was dropped");
        }
    });

    JobTicket {
        name,
        receiver,
        task,
        supervisor,
    }
}

/// Caller side of a spawned job.
pub struct JobTicket<R: ContainerRuntime> {
    name: String,
    receiver: oneshot::Receiver<JobResult>,
    task: JoinHandle<()>,
    supervisor: Arc<JobSupervisor<R>>,
}

impl<R: ContainerRuntime> JobTicket<R> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for the job to finish. If the worker task died without
    /// reporting (a panic), the result is [`JobError::Abandoned`].
    pub async fn wait(self) -> JobResult {
        let name = self.name;
        self.receiver
            .await
            .unwrap_or_else(|_| Err(JobError::Abandoned { name }))
    }

    /// Takes the result if it is ready, otherwise hands the ticket back.
    pub fn try_take(mut self) -> Result<JobResult, Self> {
        match self.receiver.try_recv() {
            Ok(result) => Ok(result),
            Err(oneshot::error::TryRecvError::Empty) => Err(self),
            Err(oneshot::error::TryRecvError::Closed) => Ok(Err(JobError::Abandoned {
                name: self.name,
            })),
        }
    }

    /// Asks the runtime to stop the container early. Best effort: the job's
    /// own run still reports through this ticket.
    pub async fn cancel(&self) -> Result<(), JobError> {
        self.supervisor.cancel(&self.name).await
    }
}
