use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{anyhow, Context, Error};

use super::container::ConfiguredContainer;
use super::model::ExportedState;
use super::port::HostConnector;

/// Validated containers, keyed by name.
#[derive(Clone, Default)]
pub struct ContainersState(BTreeMap<String, ConfiguredContainer>);

impl ContainersState {
    /// Fails on the first invalid entry.
    pub fn new(exported: &ExportedState, connector: Arc<dyn HostConnector>) -> Result<Self, Error> {
        exported
            .iter()
            .map(|(name, container)| {
                ConfiguredContainer::new(container, connector.clone())
                    .with_context(|| format!("creating container {}", name))
                    .map(|container| (name.clone(), container))
            })
            .collect::<Result<BTreeMap<_, _>, Error>>()
            .map(ContainersState)
    }

    /// Refreshes the status and config files of every container, stopping at the first failure.
    pub async fn check_state(&mut self) -> Result<(), Error> {
        for (name, container) in self.0.iter_mut() {
            container
                .refresh_status()
                .await
                .with_context(|| format!("checking status of container {}", name))?;
            container
                .configuration_status()
                .await
                .with_context(|| format!("checking configuration of container {}", name))?;
        }
        Ok(())
    }

    /// Stops and deletes a container. The entry is kept if any step fails.
    pub async fn remove_container(&mut self, name: &str) -> Result<(), Error> {
        let container = self
            .0
            .get_mut(name)
            .ok_or_else(|| anyhow!("can't remove non-existing container {}", name))?;
        container.stop().await?;
        container.delete().await?;
        self.0.remove(name);
        Ok(())
    }

    pub async fn create_and_start(&mut self, name: &str) -> Result<(), Error> {
        let container = self
            .0
            .get_mut(name)
            .ok_or_else(|| anyhow!("can't create non-existing container {}", name))?;
        container.create().await?;
        container.start().await
    }

    pub fn export(&self) -> ExportedState {
        self.0
            .iter()
            .map(|(name, container)| (name.clone(), container.export()))
            .collect()
    }

    pub fn get(&self, name: &str) -> Option<&ConfiguredContainer> {
        self.0.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut ConfiguredContainer> {
        self.0.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn insert(&mut self, name: String, container: ConfiguredContainer) {
        self.0.insert(name, container);
    }

    pub fn remove(&mut self, name: &str) -> Option<ConfiguredContainer> {
        self.0.remove(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.0.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
