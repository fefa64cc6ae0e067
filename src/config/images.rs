//! A single resolved image

use crate::utils::errors::ResolutionError;
use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

static HOST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9]([a-zA-Z0-9.-]*[a-zA-Z0-9])?(:[0-9]+)?$").expect("valid host regex")
});

static PATH_COMPONENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]+((\.|_|__|-+)[a-z0-9]+)*$").expect("valid path regex")
});

static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\w][\w.-]{0,127}$").expect("valid tag regex"));

/// One image of the set, keyed by its logical name.
///
/// Constructed through [`ImageConfig::new`], which rejects anything that
/// would not form a valid `host/repository:tag` reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageConfig {
    name: String,
    registry_host: String,
    repository: String,
    tag: String,
}

impl ImageConfig {
    pub fn new(
        name: impl Into<String>,
        registry_host: impl Into<String>,
        repository: impl Into<String>,
        tag: impl Into<String>,
    ) -> Result<Self, ResolutionError> {
        let config = Self {
            name: name.into(),
            registry_host: registry_host.into(),
            repository: repository.into(),
            tag: tag.into(),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ResolutionError> {
        let invalid = |reason: String| ResolutionError::InvalidReference {
            reference: self.reference(),
            reason,
        };

        if !HOST_RE.is_match(&self.registry_host) {
            return Err(invalid(format!(
                "bad registry host '{}'",
                self.registry_host
            )));
        }
        if self.repository.is_empty() {
            return Err(invalid("empty repository path".to_string()));
        }
        if let Some(component) = self
            .repository
            .split('/')
            .find(|c| !PATH_COMPONENT_RE.is_match(c))
        {
            return Err(invalid(format!("bad path component '{}'", component)));
        }
        if !TAG_RE.is_match(&self.tag) {
            return Err(invalid(format!("bad tag '{}'", self.tag)));
        }

        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Fully qualified `registry/repository:tag`
    pub fn reference(&self) -> String {
        format!("{}/{}:{}", self.registry_host, self.repository, self.tag)
    }
}

impl fmt::Display for ImageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.reference())
    }
}
