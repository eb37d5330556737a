use itertools::Itertools;
use thiserror::Error;

/// Every problem found while validating one configuration object.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("{} validation error(s): {}", .0.len(), .0.iter().join("; "))]
pub struct ValidationErrors(Vec<String>);

impl ValidationErrors {
    pub fn from_violations(violations: Vec<String>) -> Result<(), ValidationErrors> {
        if violations.is_empty() {
            Ok(())
        } else {
            Err(ValidationErrors(violations))
        }
    }

    pub fn violations(&self) -> &[String] {
        &self.0
    }
}
