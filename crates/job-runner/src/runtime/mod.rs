use std::time::Duration;

use async_trait::async_trait;

use crate::descriptor::ExecutionDescriptor;
use crate::error::RuntimeError;

pub mod cli;

pub use cli::CliRuntime;

/// Operations the supervisor needs from a container engine. Units are
/// addressed by the descriptor's name.
#[async_trait]
pub trait ContainerRuntime: Send + Sync + 'static {
    /// Whether `image` resolves locally without pulling.
    async fn image_exists(&self, image: &str) -> Result<bool, RuntimeError>;

    /// Registers a unit without starting it. Fails with
    /// [`RuntimeError::Conflict`] when the name is taken and
    /// [`RuntimeError::ImageNotFound`] when the image does not resolve.
    async fn create(&self, descriptor: &ExecutionDescriptor) -> Result<(), RuntimeError>;

    async fn start(&self, name: &str) -> Result<(), RuntimeError>;

    /// Blocks until the unit's process terminates and returns its exit code.
    async fn wait(&self, name: &str) -> Result<i64, RuntimeError>;

    /// Full combined output of the unit.
    async fn logs(&self, name: &str) -> Result<Vec<u8>, RuntimeError>;

    /// Graceful stop; a unit that already exited is left as is.
    async fn stop(&self, name: &str, timeout: Duration) -> Result<(), RuntimeError>;

    async fn remove(&self, name: &str, force: bool) -> Result<(), RuntimeError>;
}
