use std::collections::BTreeMap;
use std::fmt::{self, Display};
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::error::ValidationErrors;
use super::port::Hooks;

/// Serializable collection of containers, keyed by container name.
pub type ExportedState = BTreeMap<String, HostConfiguredContainer>;

/// Persisted document: what was deployed last time and what should be deployed now.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Containers {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub previous_state: ExportedState,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub desired_state: ExportedState,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostConfiguredContainer {
    pub container: Container,
    #[serde(default)]
    pub host: Host,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub config_files: BTreeMap<String, String>,
    #[serde(skip)]
    pub hooks: Hooks,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    pub config: ContainerConfig,
    #[serde(default, skip_serializing_if = "ContainerStatus::is_empty")]
    pub status: ContainerStatus,
    #[serde(default, skip_serializing_if = "RuntimeConfig::is_default")]
    pub runtime: RuntimeConfig,
}

/// User facing container settings. Any difference here between current and
/// desired state means the container has to be recreated.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerConfig {
    pub name: String,
    pub image: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entrypoint: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<PortMap>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mounts: Vec<Mount>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub privileged: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipc_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortMap {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    pub port: u16,
    #[serde(default)]
    pub protocol: Protocol,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
}

impl Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mount {
    pub source: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub propagation: Option<String>,
}

/// Live status as reported by the runtime. An empty id means the container
/// does not exist.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerStatus {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub status: String,
}

impl ContainerStatus {
    pub fn exists(&self) -> bool {
        !self.id.is_empty()
    }

    pub fn running(&self) -> bool {
        self.status == "running"
    }

    pub fn is_empty(&self) -> bool {
        self.id.is_empty() && self.status.is_empty()
    }
}

/// Runtime connection settings on the target host.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeConfig {
    /// Overrides the runtime socket path used for direct hosts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socket: Option<String>,
}

impl RuntimeConfig {
    pub fn is_default(&self) -> bool {
        *self == RuntimeConfig::default()
    }
}

/// Machine a container runs on.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Host {
    #[default]
    Direct,
    Remote { address: String },
}

impl Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Host::Direct => write!(f, "direct"),
            Host::Remote { address } => write!(f, "remote({})", address),
        }
    }
}

/// A file placed on the host or read back from it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct File {
    pub path: String,
    pub content: String,
    pub mode: u32,
}

impl File {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
            mode: 0o644,
        }
    }
}

impl ContainerConfig {
    fn violations(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.name.is_empty() {
            errors.push("container name must be set".to_string());
        }
        if self.image.is_empty() {
            errors.push("container image must be set".to_string());
        }
        for port in &self.ports {
            if port.port == 0 {
                errors.push("port must be greater than 0".to_string());
            }
        }
        for mount in &self.mounts {
            if mount.source.is_empty() {
                errors.push(format!("mount with target {:?} has empty source", mount.target));
            }
            if !Path::new(&mount.target).is_absolute() {
                errors.push(format!("mount target {:?} must be an absolute path", mount.target));
            }
        }
        errors
    }
}

impl Host {
    fn violations(&self) -> Vec<String> {
        match self {
            Host::Remote { address } if address.is_empty() => {
                vec!["remote host address must be set".to_string()]
            }
            _ => vec![],
        }
    }
}

impl HostConfiguredContainer {
    pub fn new(config: ContainerConfig, host: Host) -> Self {
        Self {
            container: Container {
                config,
                ..Default::default()
            },
            host,
            ..Default::default()
        }
    }

    pub fn with_config_file(mut self, path: impl Into<String>, content: impl Into<String>) -> Self {
        self.config_files.insert(path.into(), content.into());
        self
    }

    pub fn with_hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Collects every problem with this container instead of stopping at the first one.
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = self.container.config.violations();
        errors.extend(self.host.violations());
        for path in self.config_files.keys() {
            if !Path::new(path).is_absolute() {
                errors.push(format!("config file path {:?} must be absolute", path));
            }
        }
        ValidationErrors::from_violations(errors)
    }
}

impl Containers {
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = Vec::new();
        if self.previous_state.is_empty() && self.desired_state.is_empty() {
            errors.push("either previous or desired state must be defined".to_string());
        }
        for (kind, state) in [("previous", &self.previous_state), ("desired", &self.desired_state)] {
            for (name, container) in state {
                if let Err(e) = container.validate() {
                    errors.extend(
                        e.violations()
                            .iter()
                            .map(|violation| format!("{} state, container {}: {}", kind, name, violation)),
                    );
                }
            }
        }
        ValidationErrors::from_violations(errors)
    }
}
