#[cfg(feature = "docker")]
pub mod docker;
pub mod state_file;
