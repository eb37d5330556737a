use std::fmt::{self, Display};
use std::sync::Arc;

use anyhow::{anyhow, Context, Error};
use itertools::Itertools;
use log::{debug, info};
use model::Containers;
use port::HostConnector;
use serde_json::Value;
use state::ContainersState;

use container::ConfiguredContainer;

pub mod container;
pub mod error;
pub mod model;
pub mod port;
pub mod state;

/// Drives containers from their current state toward the desired state.
///
/// Every operation takes `&mut self`: a reconciler must only be driven by one
/// caller at a time, and runs against the same persisted state have to be
/// serialized by the caller.
pub struct Reconciler {
    current_state: ContainersState,
    desired_state: ContainersState,
}

/// A pending action, as reported by [`Reconciler::pending_changes`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Change {
    Create(String),
    Remove(String),
    Start(String),
    MoveHost { name: String, diff: String },
    UpdateFiles { name: String, paths: Vec<String> },
    Recreate { name: String, diff: String },
}

impl Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Change::Create(name) => write!(f, "+ {}: create and start", name),
            Change::Remove(name) => write!(f, "- {}: stop and remove", name),
            Change::Start(name) => write!(f, "~ {}: start", name),
            Change::MoveHost { name, diff } => write!(f, "~ {}: move host ({})", name, diff),
            Change::UpdateFiles { name, paths } => {
                write!(f, "~ {}: update config files {}", name, paths.iter().join(", "))
            }
            Change::Recreate { name, diff } => write!(f, "~ {}: recreate ({})", name, diff),
        }
    }
}

impl Reconciler {
    /// Validates the whole document, then builds the operational states.
    /// The current state starts as a copy of the previous state.
    pub fn new(containers: &Containers, connector: Arc<dyn HostConnector>) -> Result<Self, Error> {
        containers.validate().context("validating containers")?;
        let current_state =
            ContainersState::new(&containers.previous_state, connector.clone()).context("creating previous state")?;
        let desired_state =
            ContainersState::new(&containers.desired_state, connector).context("creating desired state")?;
        Ok(Self {
            current_state,
            desired_state,
        })
    }

    pub fn current_state(&self) -> &ContainersState {
        &self.current_state
    }

    pub fn desired_state(&self) -> &ContainersState {
        &self.desired_state
    }

    /// Current state becomes the previous state of the next run.
    pub fn to_exported(&self) -> Containers {
        Containers {
            previous_state: self.current_state.export(),
            desired_state: self.desired_state.export(),
        }
    }

    pub async fn check_current_state(&mut self) -> Result<(), Error> {
        self.current_state
            .check_state()
            .await
            .context("checking current state")
    }

    /// Refreshes the current state, then converges it.
    pub async fn deploy(&mut self) -> Result<(), Error> {
        self.check_current_state().await?;
        self.execute().await
    }

    pub async fn execute(&mut self) -> Result<(), Error> {
        for name in self.current_state.names() {
            if !self.exists(&name) {
                info!("Container {} no longer exists", name);
                self.current_state.remove(&name);
                continue;
            }
            // Containers about to be replaced are not started.
            if self.desired_state.contains(&name) && self.has_updates(&name)? {
                debug!("Container {} has pending updates, not starting it", name);
                continue;
            }
            self.ensure_running(&name).await?;
        }

        for name in self.desired_state.names() {
            self.ensure_configured(&name).await?;
            self.ensure_exists(&name).await?;
        }

        for name in self.current_state.names() {
            if !self.desired_state.contains(&name) {
                info!("Container {} is no longer desired", name);
                // Only one stale container is removed per run.
                return self.current_state.remove_container(&name).await;
            }
            self.ensure_host(&name).await?;
            self.ensure_configured(&name).await?;
            self.ensure_container(&name).await?;
        }

        Ok(())
    }

    /// What `execute` would do, without touching anything.
    pub fn pending_changes(&self) -> Result<Vec<Change>, Error> {
        let mut changes = Vec::new();
        for name in self.desired_state.names() {
            if !self.exists(&name) {
                changes.push(Change::Create(name));
                continue;
            }
            if let Some(diff) = self.diff_host(&name)? {
                changes.push(Change::MoveHost { name, diff });
                continue;
            }
            let paths = self.files_to_update(&name)?;
            if !paths.is_empty() {
                changes.push(Change::UpdateFiles {
                    name: name.clone(),
                    paths,
                });
            }
            match self.diff_container(&name)? {
                Some(diff) => changes.push(Change::Recreate { name, diff }),
                None if !self.is_running(&name) => changes.push(Change::Start(name)),
                None => {}
            }
        }
        for name in self.current_state.names() {
            if !self.desired_state.contains(&name) {
                changes.push(Change::Remove(name));
            }
        }
        Ok(changes)
    }

    fn exists(&self, name: &str) -> bool {
        self.current_state
            .get(name)
            .map(|container| container.status().exists())
            .unwrap_or(false)
    }

    fn is_running(&self, name: &str) -> bool {
        self.current_state
            .get(name)
            .map(|container| container.status().running())
            .unwrap_or(false)
    }

    /// Diffs are only defined for containers present in both states.
    fn updatable(&self, name: &str) -> Result<(&ConfiguredContainer, &ConfiguredContainer), Error> {
        let current = self
            .current_state
            .get(name)
            .ok_or_else(|| anyhow!("container {} does not exist in current state", name))?;
        let desired = self
            .desired_state
            .get(name)
            .ok_or_else(|| anyhow!("container {} does not exist in desired state", name))?;
        Ok((current, desired))
    }

    pub fn diff_host(&self, name: &str) -> Result<Option<String>, Error> {
        let (current, desired) = self.updatable(name)?;
        if current.host() == desired.host() {
            return Ok(None);
        }
        Ok(Some(format!("{} -> {}", current.host(), desired.host())))
    }

    pub fn diff_container(&self, name: &str) -> Result<Option<String>, Error> {
        let (current, desired) = self.updatable(name)?;
        if current.config() == desired.config() {
            return Ok(None);
        }
        let current = serde_json::to_value(current.config())?;
        let desired = serde_json::to_value(desired.config())?;
        let (Value::Object(current), Value::Object(desired)) = (current, desired) else {
            return Ok(Some("container configuration changed".to_string()));
        };
        let diff = current
            .keys()
            .chain(desired.keys())
            .unique()
            .filter(|key| current.get(*key) != desired.get(*key))
            .map(|key| {
                format!(
                    "{}: {} -> {}",
                    key,
                    current.get(key).unwrap_or(&Value::Null),
                    desired.get(key).unwrap_or(&Value::Null)
                )
            })
            .join(", ");
        Ok(Some(diff))
    }

    /// Desired config files which are missing on the host or have different content.
    pub fn files_to_update(&self, name: &str) -> Result<Vec<String>, Error> {
        let (current, desired) = self.updatable(name)?;
        Ok(desired
            .config_files()
            .iter()
            .filter(|(path, content)| current.config_files().get(*path) != Some(*content))
            .map(|(path, _)| path.clone())
            .collect())
    }

    pub fn has_updates(&self, name: &str) -> Result<bool, Error> {
        Ok(self.diff_host(name)?.is_some()
            || !self.files_to_update(name)?.is_empty()
            || self.diff_container(name)?.is_some())
    }

    /// Copies the desired entry into the current state. Called after every
    /// create attempt, successful or not, once no old container is left behind.
    fn record_desired(&mut self, name: &str) {
        if let Some(desired) = self.desired_state.get(name) {
            self.current_state.insert(name.to_string(), desired.clone());
        }
    }

    async fn ensure_running(&mut self, name: &str) -> Result<(), Error> {
        let container = self
            .current_state
            .get_mut(name)
            .ok_or_else(|| anyhow!("can't start non-existing container {}", name))?;
        if container.status().running() {
            return Ok(());
        }
        container
            .start()
            .await
            .with_context(|| format!("ensuring container {} is running", name))
    }

    async fn ensure_exists(&mut self, name: &str) -> Result<(), Error> {
        if self.exists(name) {
            return Ok(());
        }
        let result = self
            .desired_state
            .create_and_start(name)
            .await
            .with_context(|| format!("ensuring container {} exists", name));
        self.record_desired(name);
        result
    }

    async fn ensure_configured(&mut self, name: &str) -> Result<(), Error> {
        if !self.current_state.contains(name) {
            return Ok(());
        }
        let paths = self.files_to_update(name)?;
        if paths.is_empty() {
            return Ok(());
        }
        let desired = self
            .desired_state
            .get_mut(name)
            .ok_or_else(|| anyhow!("can't configure non-existing container {}", name))?;
        desired
            .configure(&paths)
            .await
            .with_context(|| format!("configuring container {}", name))?;
        let files = paths
            .into_iter()
            .filter_map(|path| desired.config_files().get(&path).cloned().map(|content| (path, content)))
            .collect::<Vec<_>>();
        if let Some(current) = self.current_state.get_mut(name) {
            for (path, content) in files {
                current.set_config_file(path, content);
            }
        }
        Ok(())
    }

    async fn ensure_host(&mut self, name: &str) -> Result<(), Error> {
        let Some(diff) = self.diff_host(name)? else {
            return Ok(());
        };
        info!("Moving container {}: {}", name, diff);
        self.recreate(name).await
    }

    async fn ensure_container(&mut self, name: &str) -> Result<(), Error> {
        let Some(diff) = self.diff_container(name)? else {
            return Ok(());
        };
        info!("Recreating container {}: {}", name, diff);
        self.recreate(name).await
    }

    /// The current entry is only replaced once the old container is gone, so a
    /// failed stop or delete leaves it tracked for the next run to retry.
    async fn recreate(&mut self, name: &str) -> Result<(), Error> {
        self.current_state
            .remove_container(name)
            .await
            .with_context(|| format!("removing old container {}", name))?;
        let result = self
            .desired_state
            .create_and_start(name)
            .await
            .with_context(|| format!("creating new container {}", name));
        self.record_desired(name);
        result
    }
}
