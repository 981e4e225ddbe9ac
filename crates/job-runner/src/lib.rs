//! Runs a payload program inside a pre-built container image and supervises
//! that container from creation to removal.
//!
//! The pieces, leaves first:
//! - [`Workspace`] stages the payload into the host directory that gets
//!   bind-mounted into the container.
//! - [`ExecutionDescriptor`] is the validated, immutable description of what
//!   to run.
//! - [`JobSupervisor`] drives a [`ContainerRuntime`] through
//!   `create → start → wait → logs → stop → remove` and always tears down.
//! - [`spawn_job`] runs a job on its own task and reports through a
//!   [`JobTicket`].

pub mod channel;
pub mod descriptor;
pub mod error;
pub mod output;
pub mod runtime;
pub mod supervisor;
pub mod workspace;

pub use channel::{spawn_job, JobResult, JobTicket};
pub use descriptor::{
    validate_name, AccessMode, DescriptorBuilder, ExecutionDescriptor, Mount, PayloadInvocation,
};
pub use error::{JobError, RuntimeError};
pub use output::{CapturedOutput, JobOutcome};
pub use runtime::{CliRuntime, ContainerRuntime};
pub use supervisor::{ExitPolicy, JobHandle, JobState, JobSupervisor, SupervisorOptions};
pub use workspace::{stage_payload, Workspace};
