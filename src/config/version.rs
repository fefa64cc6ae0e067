//! Kubernetes version resolution

use crate::utils::errors::ResolutionError;
use std::fmt;

/// Sentinel asking for the version of the connected cluster
pub const AUTO: &str = "auto";

/// Supplies the server version of the cluster when `auto` is requested
pub trait ClusterVersionSource {
    fn server_version(&self) -> anyhow::Result<String>;
}

impl<F> ClusterVersionSource for F
where
    F: Fn() -> anyhow::Result<String>,
{
    fn server_version(&self) -> anyhow::Result<String> {
        self()
    }
}

/// A validated Kubernetes version, used verbatim as the image tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KubeVersion(String);

impl KubeVersion {
    /// Validate an explicit version. A leading `v` is accepted and kept.
    pub fn parse(raw: &str) -> Result<Self, ResolutionError> {
        let trimmed = raw.trim();
        let invalid = |reason: String| ResolutionError::InvalidVersion {
            version: raw.to_string(),
            reason,
        };

        if trimmed.is_empty() {
            return Err(invalid("version is empty".to_string()));
        }
        if trimmed == AUTO {
            return Err(invalid("'auto' must be resolved against a cluster".to_string()));
        }

        let bare = trimmed.strip_prefix('v').unwrap_or(trimmed);
        semver::Version::parse(bare).map_err(|e| invalid(e.to_string()))?;

        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KubeVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Resolve a raw version string, asking `source` only for `auto`
pub fn resolve(
    raw: &str,
    source: &dyn ClusterVersionSource,
) -> Result<KubeVersion, ResolutionError> {
    if raw.trim() != AUTO {
        return KubeVersion::parse(raw);
    }

    let detected = source
        .server_version()
        .map_err(|source| ResolutionError::ClusterVersion { source })?;
    crate::log_info!("Detected cluster version: {}", detected);

    KubeVersion::parse(&without_build_metadata(&detected))
}

/// Drop `+build` metadata (e.g. `v1.27.4+k3s1`), which image tags cannot
/// carry. A leading `v` is kept; unparseable input is returned as is.
fn without_build_metadata(raw: &str) -> String {
    let trimmed = raw.trim();
    let (prefix, bare) = match trimmed.strip_prefix('v') {
        Some(bare) => ("v", bare),
        None => ("", trimmed),
    };

    match semver::Version::parse(bare) {
        Ok(mut version) if !version.build.is_empty() => {
            version.build = semver::BuildMetadata::EMPTY;
            crate::log_info!("Ignoring build metadata of cluster version {}", trimmed);
            format!("{}{}", prefix, version)
        }
        _ => trimmed.to_string(),
    }
}
