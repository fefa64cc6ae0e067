//! Prerequisite checking for the container engine

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PrereqError {
    #[error("Tool '{name}' not found")]
    NotFound { name: String, hint: String },
}

/// Trait for checking prerequisites
pub trait Prerequisite {
    /// Name of the prerequisite tool
    fn name(&self) -> &str;

    /// Check if the tool is available
    fn check(&self) -> Result<(), PrereqError>;
}

/// Basic prerequisite that checks if a command exists
pub struct CommandPrereq {
    pub name: String,
    pub hint: String,
}

impl CommandPrereq {
    pub fn new(name: impl Into<String>, hint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hint: hint.into(),
        }
    }
}

impl Prerequisite for CommandPrereq {
    fn name(&self) -> &str {
        &self.name
    }

    fn check(&self) -> Result<(), PrereqError> {
        which::which(&self.name).map_err(|_| PrereqError::NotFound {
            name: self.name.clone(),
            hint: self.hint.clone(),
        })?;
        Ok(())
    }
}

pub fn docker() -> CommandPrereq {
    CommandPrereq::new("docker", "Install from: https://docs.docker.com/get-docker/")
}

pub fn podman() -> CommandPrereq {
    CommandPrereq::new(
        "podman",
        "Install from: https://podman.io/getting-started/installation",
    )
}

/// Result of checking a set of prerequisites
#[derive(Debug, Default)]
pub struct CheckReport {
    pub found: Vec<String>,
    /// (name, install hint)
    pub missing: Vec<(String, String)>,
}

impl CheckReport {
    /// At least one of the checked alternatives is available
    pub fn any_found(&self) -> bool {
        !self.found.is_empty()
    }
}

pub fn check_all(prereqs: &[&dyn Prerequisite]) -> CheckReport {
    let mut report = CheckReport::default();

    for prereq in prereqs {
        match prereq.check() {
            Ok(()) => report.found.push(prereq.name().to_string()),
            Err(PrereqError::NotFound { name, hint }) => report.missing.push((name, hint)),
        }
    }

    report
}

/// Check the container engines; either one is enough
pub fn check_container_engines() -> CheckReport {
    check_all(&[&docker(), &podman()])
}
