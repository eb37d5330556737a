use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{anyhow, Context, Error};
use itertools::Itertools;
use log::{debug, info};
use rand::{distributions::Alphanumeric, Rng};
use split_iter::Splittable;

use super::model::{Container, ContainerConfig, ContainerStatus, File, Host, HostConfiguredContainer, Mount};
use super::port::{ContainerRuntime, HostConnector, Hooks};

/// Where the host root filesystem is mounted inside the config helper container.
pub const HOST_MOUNT_PATH: &str = "/mnt/host";

/// A validated container bound to the host it runs on.
#[derive(Clone)]
pub struct ConfiguredContainer {
    container: Container,
    host: Host,
    config_files: BTreeMap<String, String>,
    hooks: Hooks,
    connector: Arc<dyn HostConnector>,
    runtime: Option<Arc<dyn ContainerRuntime>>,
}

impl ConfiguredContainer {
    pub fn new(exported: &HostConfiguredContainer, connector: Arc<dyn HostConnector>) -> Result<Self, Error> {
        exported.validate()?;
        Ok(Self {
            container: exported.container.clone(),
            host: exported.host.clone(),
            config_files: exported.config_files.clone(),
            hooks: exported.hooks.clone(),
            connector,
            runtime: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.container.config.name
    }

    pub fn config(&self) -> &ContainerConfig {
        &self.container.config
    }

    pub fn status(&self) -> &ContainerStatus {
        &self.container.status
    }

    pub fn host(&self) -> &Host {
        &self.host
    }

    pub fn config_files(&self) -> &BTreeMap<String, String> {
        &self.config_files
    }

    pub(crate) fn set_config_file(&mut self, path: String, content: String) {
        self.config_files.insert(path, content);
    }

    async fn runtime(&mut self) -> Result<Arc<dyn ContainerRuntime>, Error> {
        if let Some(runtime) = &self.runtime {
            return Ok(runtime.clone());
        }
        let runtime = self
            .connector
            .connect(&self.host, &self.container.runtime)
            .await
            .with_context(|| format!("connecting to host {}", self.host))?;
        self.runtime = Some(runtime.clone());
        Ok(runtime)
    }

    fn id(&self) -> Result<&str, Error> {
        if self.container.status.exists() {
            Ok(self.container.status.id.as_str())
        } else {
            Err(anyhow!("container {} has not been created", self.name()))
        }
    }

    /// Creates a stopped helper container with the host filesystem mounted,
    /// through which config files are read and written.
    async fn create_config_container(&self, runtime: &Arc<dyn ContainerRuntime>) -> Result<String, Error> {
        let config = ContainerConfig {
            name: format!(
                "{}-config-{}",
                self.name(),
                rand::thread_rng()
                    .sample_iter(&Alphanumeric)
                    .take(7)
                    .map(char::from)
                    .collect::<String>()
                    .to_lowercase()
            ),
            image: self.container.config.image.clone(),
            mounts: vec![Mount {
                source: "/".to_string(),
                target: HOST_MOUNT_PATH.to_string(),
                propagation: None,
            }],
            ..Default::default()
        };
        runtime
            .create(&config)
            .await
            .with_context(|| format!("creating config container for {}", self.name()))
    }

    /// Pushes the given config file paths to the host.
    pub async fn configure(&mut self, paths: &[String]) -> Result<(), Error> {
        if paths.is_empty() {
            return Ok(());
        }
        let files = paths
            .iter()
            .map(|path| {
                self.config_files
                    .get(path)
                    .map(|content| File::new(format!("{}{}", HOST_MOUNT_PATH, path), content.clone()))
                    .ok_or_else(|| anyhow!("config file {} is not defined for container {}", path, self.name()))
            })
            .collect::<Result<Vec<File>, Error>>()?;

        info!("Writing {} config file(s) for container {}: {}", files.len(), self.name(), paths.iter().join(", "));
        let runtime = self.runtime().await?;
        let config_container = self.create_config_container(&runtime).await?;
        let copied = runtime
            .copy(&config_container, &files)
            .await
            .with_context(|| format!("copying config files for container {}", self.name()));
        runtime.delete(&config_container).await.with_context(|| match &copied {
            Err(e) => format!("removing config container {} after failed copy ({:#})", config_container, e),
            Ok(()) => format!("removing config container {}", config_container),
        })?;
        copied
    }

    /// Refreshes `config_files` with what is actually present on the host.
    /// Files which do not exist are dropped.
    pub async fn configuration_status(&mut self) -> Result<(), Error> {
        if self.config_files.is_empty() {
            return Ok(());
        }
        let runtime = self.runtime().await?;
        let config_container = self.create_config_container(&runtime).await?;
        let files = self.read_host_files(&runtime, &config_container).await;
        runtime.delete(&config_container).await.with_context(|| match &files {
            Err(e) => format!("removing config container {} after failed read ({:#})", config_container, e),
            Ok(_) => format!("removing config container {}", config_container),
        })?;

        self.config_files = files?
            .into_iter()
            .map(|file| {
                let path = file.path.strip_prefix(HOST_MOUNT_PATH).unwrap_or(&file.path).to_string();
                (path, file.content)
            })
            .collect();
        Ok(())
    }

    async fn read_host_files(&self, runtime: &Arc<dyn ContainerRuntime>, config_container: &str) -> Result<Vec<File>, Error> {
        let paths = self
            .config_files
            .keys()
            .map(|path| format!("{}{}", HOST_MOUNT_PATH, path))
            .collect::<Vec<String>>();
        let modes = runtime
            .stat(config_container, &paths)
            .await
            .with_context(|| format!("checking config files of container {}", self.name()))?;
        let (missing, present) = paths.into_iter().split(|path| modes.contains_key(path));
        let missing = missing.collect::<Vec<String>>();
        if !missing.is_empty() {
            debug!("Container {} is missing config files: {}", self.name(), missing.iter().join(", "));
        }
        let present = present.collect::<Vec<String>>();
        if present.is_empty() {
            return Ok(vec![]);
        }
        runtime
            .read(config_container, &present)
            .await
            .with_context(|| format!("reading config files of container {}", self.name()))
    }

    /// Writes every config file, then creates the container.
    pub async fn create(&mut self) -> Result<(), Error> {
        let paths = self.config_files.keys().cloned().collect::<Vec<String>>();
        self.configure(&paths).await?;

        info!("Creating container {} on host {}", self.name(), self.host);
        let runtime = self.runtime().await?;
        let id = runtime
            .create(&self.container.config)
            .await
            .with_context(|| format!("creating container {}", self.name()))?;
        self.container.status.id = id;
        self.container.status.status = "created".to_string();
        Ok(())
    }

    /// Runs the pre-start hook, starts the container and runs the post-start hook.
    /// A failing post-start hook leaves the container running.
    pub async fn start(&mut self) -> Result<(), Error> {
        if let Some(hook) = &self.hooks.pre_start {
            hook.run()
                .await
                .with_context(|| format!("running pre-start hook of container {}", self.name()))?;
        }

        info!("Starting container {}", self.name());
        let id = self.id()?.to_string();
        self.runtime()
            .await?
            .start(&id)
            .await
            .with_context(|| format!("starting container {}", self.name()))?;
        self.container.status.status = "running".to_string();

        match &self.hooks.post_start {
            Some(hook) => hook
                .run()
                .await
                .with_context(|| format!("running post-start hook of container {}", self.name())),
            None => Ok(()),
        }
    }

    pub async fn stop(&mut self) -> Result<(), Error> {
        info!("Stopping container {}", self.name());
        let id = self.id()?.to_string();
        self.runtime()
            .await?
            .stop(&id)
            .await
            .with_context(|| format!("stopping container {}", self.name()))?;
        self.container.status.status = "exited".to_string();
        Ok(())
    }

    pub async fn delete(&mut self) -> Result<(), Error> {
        info!("Removing container {}", self.name());
        let id = self.id()?.to_string();
        self.runtime()
            .await?
            .delete(&id)
            .await
            .with_context(|| format!("removing container {}", self.name()))?;
        self.container.status = Default::default();
        Ok(())
    }

    /// Refreshes the live status. A container which has never been created is not queried.
    pub async fn refresh_status(&mut self) -> Result<(), Error> {
        if !self.container.status.exists() {
            return Ok(());
        }
        let id = self.container.status.id.clone();
        let status = self
            .runtime()
            .await?
            .status(&id)
            .await
            .with_context(|| format!("getting status of container {}", self.name()))?;
        debug!("Container {} status: {:?}", self.name(), status);
        self.container.status = status;
        Ok(())
    }

    pub fn export(&self) -> HostConfiguredContainer {
        HostConfiguredContainer {
            container: self.container.clone(),
            host: self.host.clone(),
            config_files: self.config_files.clone(),
            hooks: Hooks::default(),
        }
    }
}
