use std::{fs, io::ErrorKind, path::Path};

use anyhow::{Context, Error};
use log::{debug, info};

use crate::domain::model::{Containers, ExportedState};

/// Reads the desired containers, a JSON map of container name to container.
pub fn load_desired(path: impl AsRef<Path>) -> Result<ExportedState, Error> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path).context(format!("Can't read desired state {}", path.display()))?;
    serde_json::from_str(&raw).context(format!("Can't parse desired state {}", path.display()))
}

/// Reads the state persisted by the previous run. A missing file means nothing
/// has been deployed yet.
pub fn load_previous(path: impl AsRef<Path>) -> Result<ExportedState, Error> {
    let path = path.as_ref();
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            info!("No state file {}, starting from an empty state", path.display());
            return Ok(ExportedState::new());
        }
        Err(e) => return Err(e).context(format!("Can't read state {}", path.display())),
    };
    let containers: Containers =
        serde_json::from_str(&raw).context(format!("Can't parse state {}", path.display()))?;
    Ok(containers.previous_state)
}

pub fn save(path: impl AsRef<Path>, containers: &Containers) -> Result<(), Error> {
    let path = path.as_ref();
    let raw = serde_json::to_string_pretty(containers)?;
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, raw).context(format!("Can't write state {}", tmp.display()))?;
    fs::rename(&tmp, path).context(format!("Can't replace state {}", path.display()))?;
    debug!("Saved {} container(s) to {}", containers.previous_state.len(), path.display());
    Ok(())
}
