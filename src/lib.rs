pub mod config;
pub mod domain;
pub mod infra;

pub use domain::{
    model::{Containers, HostConfiguredContainer},
    Change, Reconciler,
};
