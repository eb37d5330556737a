use std::{error::Error, sync::Arc};

use env_logger::Env;
use kubecrane::{
    config::load_config,
    domain::model::Containers,
    infra::{docker::DockerConnector, state_file},
    Reconciler,
};
use log::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let config = load_config()?;
    info!("Loaded config {:?}", config);

    let containers = Containers {
        previous_state: state_file::load_previous(&config.state_file)?,
        desired_state: state_file::load_desired(&config.desired_file)?,
    };
    let connector = Arc::new(DockerConnector {
        config: config.docker.clone(),
    });
    let mut reconciler = Reconciler::new(&containers, connector)?;

    if config.plan_only {
        reconciler.check_current_state().await?;
        let changes = reconciler.pending_changes()?;
        if changes.is_empty() {
            info!("Containers are up-to-date");
        }
        for change in changes {
            println!("{}", change);
        }
        return Ok(());
    }

    // State is saved even when the deployment fails, so the next run resumes from it.
    let result = reconciler.deploy().await;
    state_file::save(&config.state_file, &reconciler.to_exported())?;
    if let Err(e) = result {
        error!("Error during deployment {:?}", e);
        return Err(e.into());
    }
    info!("Deployment finished");
    Ok(())
}
