use anyhow::{Context, Error};
use config::Config;

#[derive(Debug, Clone, serde_derive::Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AppConfig {
    pub desired_file: String,
    pub state_file: String,
    pub plan_only: bool,
    pub docker: DockerConfig,
}

#[derive(Debug, Clone, serde_derive::Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DockerConfig {
    pub socket: String,
    pub timeout: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            desired_file: "desired.json".to_string(),
            state_file: "state.json".to_string(),
            plan_only: false,
            docker: DockerConfig::default(),
        }
    }
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            socket: "/var/run/docker.sock".to_string(),
            timeout: 120,
        }
    }
}

pub fn load_config() -> Result<AppConfig, Error> {
    let config = Config::builder()
        .add_source(config::File::with_name("kubecrane").required(false))
        .add_source(
            config::Environment::with_prefix("kubecrane")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .context("Can't load configuration")?;

    config
        .try_deserialize()
        .context("Can't deserialize AppConfig from loaded configuration")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_used_without_sources() {
        let config: AppConfig = Config::builder().build().unwrap().try_deserialize().unwrap();

        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn nested_values_override_defaults() {
        let config: AppConfig = Config::builder()
            .set_override("plan_only", true)
            .unwrap()
            .set_override("docker.socket", "/run/docker.sock")
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert!(config.plan_only);
        assert_eq!(config.docker.socket, "/run/docker.sock");
        assert_eq!(config.docker.timeout, 120);
        assert_eq!(config.state_file, "state.json");
    }
}
