#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Error};
use async_trait::async_trait;
use kubecrane::domain::container::HOST_MOUNT_PATH;
use kubecrane::domain::model::{
    ContainerConfig, ContainerStatus, ExportedState, File, Host, HostConfiguredContainer, RuntimeConfig,
};
use kubecrane::domain::port::{ContainerRuntime, HostConnector};

/// Failure key matching every config helper container, e.g. `fail_on("delete", CONFIG_HELPER)`.
pub const CONFIG_HELPER: &str = "config-helper";

/// Mutating operations issued against a fake host. Reads and the config
/// helper container lifecycle are not recorded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Op {
    Create { host: String, name: String },
    Start { host: String, name: String },
    Stop { host: String, name: String },
    Delete { host: String, name: String },
    WriteFiles { host: String, paths: Vec<String> },
}

#[derive(Clone, Debug)]
struct FakeContainer {
    config: ContainerConfig,
    status: String,
}

impl FakeContainer {
    fn is_config_helper(&self) -> bool {
        self.config
            .mounts
            .iter()
            .any(|mount| mount.target == HOST_MOUNT_PATH)
    }
}

#[derive(Default)]
struct HostState {
    containers: HashMap<String, FakeContainer>,
    files: HashMap<String, String>,
    next_id: usize,
}

/// In-memory container runtime of one host.
pub struct FakeRuntime {
    pub host: String,
    state: Mutex<HostState>,
    failures: Mutex<HashSet<String>>,
    log: Arc<Mutex<Vec<Op>>>,
}

impl FakeRuntime {
    fn check_failure(&self, operation: &str, name: &str) -> Result<(), Error> {
        if self.failures.lock().unwrap().contains(&format!("{}:{}", operation, name)) {
            return Err(anyhow!("injected {} failure for {}", operation, name));
        }
        Ok(())
    }

    fn container(&self, id: &str) -> Result<FakeContainer, Error> {
        self.state
            .lock()
            .unwrap()
            .containers
            .get(id)
            .cloned()
            .ok_or_else(|| anyhow!("no such container {}", id))
    }

    fn record(&self, op: Op) {
        self.log.lock().unwrap().push(op);
    }

    /// Makes the given operation fail for the named container, e.g. `("start", "etcd")`.
    pub fn fail_on(&self, operation: &str, name: &str) {
        self.failures.lock().unwrap().insert(format!("{}:{}", operation, name));
    }

    pub fn clear_failures(&self) {
        self.failures.lock().unwrap().clear();
    }

    fn id_of(&self, name: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .containers
            .iter()
            .find(|(_, container)| container.config.name == name)
            .map(|(id, _)| id.clone())
    }

    pub fn status_of(&self, name: &str) -> Option<String> {
        let id = self.id_of(name)?;
        self.state.lock().unwrap().containers.get(&id).map(|c| c.status.clone())
    }

    pub fn image_of(&self, name: &str) -> Option<String> {
        let id = self.id_of(name)?;
        self.state.lock().unwrap().containers.get(&id).map(|c| c.config.image.clone())
    }

    /// Simulates someone removing the container behind our back.
    pub fn vanish(&self, name: &str) {
        if let Some(id) = self.id_of(name) {
            self.state.lock().unwrap().containers.remove(&id);
        }
    }

    /// Simulates a crash of the container.
    pub fn kill(&self, name: &str) {
        if let Some(id) = self.id_of(name) {
            if let Some(container) = self.state.lock().unwrap().containers.get_mut(&id) {
                container.status = "exited".to_string();
            }
        }
    }

    pub fn file(&self, path: &str) -> Option<String> {
        self.state.lock().unwrap().files.get(path).cloned()
    }

    pub fn write_file(&self, path: &str, content: &str) {
        self.state
            .lock()
            .unwrap()
            .files
            .insert(path.to_string(), content.to_string());
    }

    pub fn workloads(&self) -> Vec<String> {
        let mut names = self
            .state
            .lock()
            .unwrap()
            .containers
            .values()
            .filter(|container| !container.is_config_helper())
            .map(|container| container.config.name.clone())
            .collect::<Vec<_>>();
        names.sort();
        names
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn create(&self, config: &ContainerConfig) -> Result<String, Error> {
        self.check_failure("create", &config.name)?;
        let container = FakeContainer {
            config: config.clone(),
            status: "created".to_string(),
        };
        if !container.is_config_helper() {
            self.record(Op::Create {
                host: self.host.clone(),
                name: config.name.clone(),
            });
        }
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = format!("{}-{}", self.host, state.next_id);
        state.containers.insert(id.clone(), container);
        Ok(id)
    }

    async fn delete(&self, id: &str) -> Result<(), Error> {
        let container = self.container(id)?;
        if container.is_config_helper() {
            self.check_failure("delete", CONFIG_HELPER)?;
        } else {
            self.check_failure("delete", &container.config.name)?;
            self.record(Op::Delete {
                host: self.host.clone(),
                name: container.config.name.clone(),
            });
        }
        self.state.lock().unwrap().containers.remove(id);
        Ok(())
    }

    async fn start(&self, id: &str) -> Result<(), Error> {
        let container = self.container(id)?;
        self.check_failure("start", &container.config.name)?;
        self.record(Op::Start {
            host: self.host.clone(),
            name: container.config.name.clone(),
        });
        if let Some(container) = self.state.lock().unwrap().containers.get_mut(id) {
            container.status = "running".to_string();
        }
        Ok(())
    }

    async fn stop(&self, id: &str) -> Result<(), Error> {
        let container = self.container(id)?;
        self.check_failure("stop", &container.config.name)?;
        self.record(Op::Stop {
            host: self.host.clone(),
            name: container.config.name.clone(),
        });
        if let Some(container) = self.state.lock().unwrap().containers.get_mut(id) {
            container.status = "exited".to_string();
        }
        Ok(())
    }

    async fn status(&self, id: &str) -> Result<ContainerStatus, Error> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .containers
            .get(id)
            .map(|container| ContainerStatus {
                id: id.to_string(),
                status: container.status.clone(),
            })
            .unwrap_or_default())
    }

    async fn copy(&self, id: &str, files: &[File]) -> Result<(), Error> {
        self.container(id)?;
        let paths = files
            .iter()
            .map(|file| file.path.trim_start_matches(HOST_MOUNT_PATH).to_string())
            .collect::<Vec<_>>();
        for path in &paths {
            self.check_failure("copy", path)?;
        }
        self.record(Op::WriteFiles {
            host: self.host.clone(),
            paths: paths.clone(),
        });
        let mut state = self.state.lock().unwrap();
        for (path, file) in paths.into_iter().zip(files) {
            state.files.insert(path, file.content.clone());
        }
        Ok(())
    }

    async fn read(&self, id: &str, paths: &[String]) -> Result<Vec<File>, Error> {
        self.container(id)?;
        let state = self.state.lock().unwrap();
        paths
            .iter()
            .map(|path| {
                state
                    .files
                    .get(path.trim_start_matches(HOST_MOUNT_PATH))
                    .map(|content| File::new(path.clone(), content.clone()))
                    .ok_or_else(|| anyhow!("no such file {}", path))
            })
            .collect()
    }

    async fn stat(&self, id: &str, paths: &[String]) -> Result<HashMap<String, u32>, Error> {
        self.container(id)?;
        let state = self.state.lock().unwrap();
        Ok(paths
            .iter()
            .filter(|path| state.files.contains_key(path.trim_start_matches(HOST_MOUNT_PATH)))
            .map(|path| (path.clone(), 0o644))
            .collect())
    }
}

/// Two reachable hosts sharing one operation log.
pub struct Cluster {
    pub host_a: Arc<FakeRuntime>,
    pub host_b: Arc<FakeRuntime>,
    log: Arc<Mutex<Vec<Op>>>,
}

pub fn host_a() -> Host {
    Host::Direct
}

pub fn host_b() -> Host {
    Host::Remote {
        address: "tcp://10.0.0.2:2375".to_string(),
    }
}

pub fn unreachable_host() -> Host {
    Host::Remote {
        address: "tcp://10.0.0.99:2375".to_string(),
    }
}

impl Cluster {
    pub fn new() -> Self {
        let log = Arc::new(Mutex::new(Vec::new()));
        let runtime = |host: &str| {
            Arc::new(FakeRuntime {
                host: host.to_string(),
                state: Mutex::new(HostState::default()),
                failures: Mutex::new(HashSet::new()),
                log: log.clone(),
            })
        };
        Self {
            host_a: runtime("a"),
            host_b: runtime("b"),
            log: log.clone(),
        }
    }

    pub fn connector(&self) -> Arc<dyn HostConnector> {
        Arc::new(FakeConnector {
            hosts: vec![(host_a(), self.host_a.clone()), (host_b(), self.host_b.clone())],
        })
    }

    /// Returns and clears the recorded operations.
    pub fn take_ops(&self) -> Vec<Op> {
        std::mem::take(&mut *self.log.lock().unwrap())
    }
}

struct FakeConnector {
    hosts: Vec<(Host, Arc<FakeRuntime>)>,
}

#[async_trait]
impl HostConnector for FakeConnector {
    async fn connect(&self, host: &Host, _runtime: &RuntimeConfig) -> Result<Arc<dyn ContainerRuntime>, Error> {
        self.hosts
            .iter()
            .find(|(known, _)| known == host)
            .map(|(_, runtime)| runtime.clone() as Arc<dyn ContainerRuntime>)
            .ok_or_else(|| anyhow!("host {} is unreachable", host))
    }
}

pub fn container(name: &str, image: &str, host: Host) -> HostConfiguredContainer {
    HostConfiguredContainer::new(
        ContainerConfig {
            name: name.to_string(),
            image: image.to_string(),
            ..Default::default()
        },
        host,
    )
}

pub fn state(containers: Vec<HostConfiguredContainer>) -> ExportedState {
    containers
        .into_iter()
        .map(|container| (container.container.config.name.clone(), container))
        .collect()
}

pub fn op(kind: &str, host: &str, name: &str) -> Op {
    let (host, name) = (host.to_string(), name.to_string());
    match kind {
        "create" => Op::Create { host, name },
        "start" => Op::Start { host, name },
        "stop" => Op::Stop { host, name },
        "delete" => Op::Delete { host, name },
        _ => panic!("unknown operation {}", kind),
    }
}

pub fn write_files(host: &str, paths: &[&str]) -> Op {
    Op::WriteFiles {
        host: host.to_string(),
        paths: paths.iter().map(|path| path.to_string()).collect(),
    }
}
