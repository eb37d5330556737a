use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use anyhow::Error;
use async_trait::async_trait;

use super::model::{ContainerConfig, ContainerStatus, File, Host, RuntimeConfig};

/// Low level operations on a single container engine.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn create(&self, config: &ContainerConfig) -> Result<String, Error>;

    async fn delete(&self, id: &str) -> Result<(), Error>;

    async fn start(&self, id: &str) -> Result<(), Error>;

    async fn stop(&self, id: &str) -> Result<(), Error>;

    /// Returns an empty status when the container does not exist.
    async fn status(&self, id: &str) -> Result<ContainerStatus, Error>;

    async fn copy(&self, id: &str, files: &[File]) -> Result<(), Error>;

    async fn read(&self, id: &str, paths: &[String]) -> Result<Vec<File>, Error>;

    /// Returns the mode of every path which exists, missing paths are omitted.
    async fn stat(&self, id: &str, paths: &[String]) -> Result<HashMap<String, u32>, Error>;
}

/// Reaches the runtime of a given host.
#[async_trait]
pub trait HostConnector: Send + Sync {
    async fn connect(&self, host: &Host, runtime: &RuntimeConfig) -> Result<Arc<dyn ContainerRuntime>, Error>;
}

#[async_trait]
pub trait Hook: Send + Sync {
    async fn run(&self) -> Result<(), Error>;
}

#[async_trait]
impl<F, Fut> Hook for F
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), Error>> + Send,
{
    async fn run(&self) -> Result<(), Error> {
        self().await
    }
}

/// Actions run around container start. Not part of the persisted state.
#[derive(Clone, Default)]
pub struct Hooks {
    pub pre_start: Option<Arc<dyn Hook>>,
    pub post_start: Option<Arc<dyn Hook>>,
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("pre_start", &self.pre_start.is_some())
            .field("post_start", &self.post_start.is_some())
            .finish()
    }
}
