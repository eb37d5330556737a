use std::{collections::HashMap, io::Read, sync::Arc};

use anyhow::{anyhow, Context, Error};
use async_trait::async_trait;
use bollard::{
    container::{
        Config, CreateContainerOptions, DownloadFromContainerOptions, InspectContainerOptions,
        RemoveContainerOptions, StartContainerOptions, StopContainerOptions, UploadToContainerOptions,
    },
    errors::Error as BollardError,
    image::CreateImageOptions,
    secret::{CreateImageInfo, HostConfig, PortBinding},
    Docker, API_DEFAULT_VERSION,
};
use bytes::{BufMut, Bytes, BytesMut};
use flate2::{write::GzEncoder, Compression};
use futures::TryStreamExt;
use log::{debug, info};
use map_macro::hash_map;
use tar::{Archive, Header};

use crate::{
    config::DockerConfig,
    domain::{
        model::{ContainerConfig, ContainerStatus, File, Host, RuntimeConfig},
        port::{ContainerRuntime, HostConnector},
    },
};

pub const NAME_LABEL: &str = "kubecrane.container.name";

pub struct DockerRuntime {
    pub docker: Docker,
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn create(&self, config: &ContainerConfig) -> Result<String, Error> {
        self.pull_image(&config.image).await?;
        let container = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: config.name.clone(),
                    ..Default::default()
                }),
                container_config(config),
            )
            .await
            .context(format!("Error while creating container {}", config.name))?;
        debug!("Created docker container {} ({})", config.name, container.id);
        Ok(container.id)
    }

    async fn delete(&self, id: &str) -> Result<(), Error> {
        self.docker
            .remove_container(
                id,
                Some(RemoveContainerOptions {
                    force: false,
                    v: false,
                    ..Default::default()
                }),
            )
            .await
            .context(format!("Error while removing container {}", id))
    }

    async fn start(&self, id: &str) -> Result<(), Error> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .context(format!("Error while starting container {}", id))
    }

    async fn stop(&self, id: &str) -> Result<(), Error> {
        self.docker
            .stop_container(id, None::<StopContainerOptions>)
            .await
            .context(format!("Error while stopping container {}", id))
    }

    async fn status(&self, id: &str) -> Result<ContainerStatus, Error> {
        match self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
        {
            Ok(container) => Ok(ContainerStatus {
                id: container.id.unwrap_or_else(|| id.to_string()),
                status: container
                    .state
                    .and_then(|state| state.status)
                    .map(|status| status.to_string())
                    .unwrap_or_default(),
            }),
            Err(BollardError::DockerResponseServerError { status_code: 404, .. }) => {
                Ok(ContainerStatus::default())
            }
            Err(e) => Err(e).context(format!("Error while inspecting container {}", id)),
        }
    }

    async fn copy(&self, id: &str, files: &[File]) -> Result<(), Error> {
        let tar_gz = BytesMut::new().writer();
        let enc = GzEncoder::new(tar_gz, Compression::default());
        let mut tar = tar::Builder::new(enc);
        for file in files {
            let mut header = Header::new_gnu();
            header.set_size(file.content.len() as u64);
            header.set_mode(file.mode);
            header.set_cksum();
            tar.append_data(
                &mut header,
                file.path.trim_start_matches('/'),
                file.content.as_bytes(),
            )?;
        }
        let tar_gz = tar.into_inner()?.finish()?;

        self.docker
            .upload_to_container(
                id,
                Some(UploadToContainerOptions {
                    path: "/",
                    ..Default::default()
                }),
                tar_gz.into_inner().freeze(),
            )
            .await
            .context(format!("Error while copying files into container {}", id))
    }

    async fn read(&self, id: &str, paths: &[String]) -> Result<Vec<File>, Error> {
        let mut files = Vec::with_capacity(paths.len());
        for path in paths {
            let archive = self
                .download(id, path)
                .await?
                .ok_or(anyhow!("File {} does not exist in container {}", path, id))?;
            let (mode, content) = first_entry(&archive)
                .context(format!("Can't extract file {} from container {}", path, id))?;
            files.push(File {
                path: path.clone(),
                content,
                mode,
            });
        }
        Ok(files)
    }

    async fn stat(&self, id: &str, paths: &[String]) -> Result<HashMap<String, u32>, Error> {
        let mut modes = HashMap::new();
        for path in paths {
            if let Some(archive) = self.download(id, path).await? {
                let (mode, _) = first_entry(&archive)
                    .context(format!("Can't stat file {} in container {}", path, id))?;
                modes.insert(path.clone(), mode);
            }
        }
        Ok(modes)
    }
}

impl DockerRuntime {
    async fn pull_image(&self, image: &str) -> Result<(), Error> {
        match self.docker.inspect_image(image).await {
            Ok(_) => return Ok(()),
            Err(BollardError::DockerResponseServerError { status_code: 404, .. }) => {}
            Err(e) => return Err(e).context(format!("Can't inspect image {}", image)),
        }
        info!("Pull image {}", image);
        self.docker
            .create_image(
                Some(CreateImageOptions {
                    from_image: image,
                    ..Default::default()
                }),
                None,
                None,
            )
            .try_collect::<Vec<CreateImageInfo>>()
            .await
            .context("Error while pulling image")?;
        Ok(())
    }

    /// Downloads the archive of a path, `None` if it does not exist.
    async fn download(&self, id: &str, path: &str) -> Result<Option<Vec<u8>>, Error> {
        let chunks = self
            .docker
            .download_from_container(id, Some(DownloadFromContainerOptions { path }))
            .try_collect::<Vec<Bytes>>()
            .await;
        match chunks {
            Ok(chunks) => Ok(Some(chunks.concat())),
            Err(BollardError::DockerResponseServerError { status_code: 404, .. }) => Ok(None),
            Err(e) => Err(e).context(format!("Error while downloading {} from container {}", path, id)),
        }
    }
}

fn first_entry(archive: &[u8]) -> Result<(u32, String), Error> {
    let mut archive = Archive::new(archive);
    let mut entry = archive
        .entries()?
        .next()
        .ok_or(anyhow!("Empty archive"))??;
    let mode = entry.header().mode()?;
    let mut content = String::new();
    entry.read_to_string(&mut content)?;
    Ok((mode, content))
}

fn container_config(config: &ContainerConfig) -> Config<String> {
    let ports = config
        .ports
        .iter()
        .map(|port| {
            (
                format!("{}/{}", port.port, port.protocol),
                Some(vec![PortBinding {
                    host_ip: port.ip.clone(),
                    host_port: Some(port.port.to_string()),
                }]),
            )
        })
        .collect::<HashMap<String, Option<Vec<PortBinding>>>>();
    let binds = config
        .mounts
        .iter()
        .map(|mount| match mount.propagation {
            Some(ref propagation) => format!("{}:{}:{}", mount.source, mount.target, propagation),
            None => format!("{}:{}", mount.source, mount.target),
        })
        .collect::<Vec<String>>();
    let user = match (&config.user, &config.group) {
        (Some(user), Some(group)) => Some(format!("{}:{}", user, group)),
        (Some(user), None) => Some(user.clone()),
        (None, Some(group)) => Some(format!("0:{}", group)),
        (None, None) => None,
    };

    Config {
        image: Some(config.image.clone()),
        cmd: (!config.args.is_empty()).then(|| config.args.clone()),
        entrypoint: (!config.entrypoint.is_empty()).then(|| config.entrypoint.clone()),
        env: (!config.env.is_empty()).then(|| {
            config
                .env
                .iter()
                .map(|(key, value)| format!("{}={}", key, value))
                .collect()
        }),
        user,
        exposed_ports: (!ports.is_empty()).then(|| {
            ports
                .keys()
                .map(|port| (port.clone(), HashMap::new()))
                .collect()
        }),
        labels: Some(hash_map! {
            String::from(NAME_LABEL) => config.name.clone()
        }),
        host_config: Some(HostConfig {
            binds: (!binds.is_empty()).then_some(binds),
            port_bindings: (!ports.is_empty()).then_some(ports),
            privileged: Some(config.privileged),
            network_mode: config.network_mode.clone(),
            pid_mode: config.pid_mode.clone(),
            ipc_mode: config.ipc_mode.clone(),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Connects to the docker daemon of a host: the local socket for direct
/// hosts, the docker API over TCP for remote ones.
pub struct DockerConnector {
    pub config: DockerConfig,
}

#[async_trait]
impl HostConnector for DockerConnector {
    async fn connect(&self, host: &Host, runtime: &RuntimeConfig) -> Result<Arc<dyn ContainerRuntime>, Error> {
        let docker = match host {
            Host::Direct => {
                let socket = runtime.socket.as_deref().unwrap_or(&self.config.socket);
                Docker::connect_with_socket(socket, self.config.timeout, API_DEFAULT_VERSION)
                    .context(format!("Can't connect to docker socket {}", socket))?
            }
            Host::Remote { address } => {
                Docker::connect_with_http(address, self.config.timeout, API_DEFAULT_VERSION)
                    .context(format!("Can't connect to docker on {}", address))?
            }
        };
        Ok(Arc::new(DockerRuntime { docker }))
    }
}
