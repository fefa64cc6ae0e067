//! Built-in image table with an optional registry override overlay
//!
//! The default table maps every logical image name to a registry key and a
//! repository. An override file is a flat YAML mapping whose keys are either
//! logical image names (replacing that image's location) or registries,
//! named by key or by host (replacing the location for every image served
//! from it). Image overrides win over registry overrides.

use super::images::ImageConfig;
use super::version::KubeVersion;
use crate::utils::errors::ResolutionError;
use std::collections::BTreeMap;
use std::collections::btree_map;
use std::path::{Path, PathBuf};

/// Registry key → default location (`host[/path]`)
const DEFAULT_REGISTRIES: &[(&str, &str)] = &[("gcRegistry", "k8s.gcr.io")];

/// Logical name → (registry key, repository)
const DEFAULT_IMAGES: &[(&str, &str, &str)] = &[
    ("conformance", "gcRegistry", "conformance"),
    ("hyperkube", "gcRegistry", "hyperkube"),
    ("kube-apiserver", "gcRegistry", "kube-apiserver"),
    ("kube-controller-manager", "gcRegistry", "kube-controller-manager"),
    ("kube-proxy", "gcRegistry", "kube-proxy"),
    ("kube-scheduler", "gcRegistry", "kube-scheduler"),
];

/// Parsed override file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OverrideDocument {
    entries: BTreeMap<String, String>,
}

impl OverrideDocument {
    /// Read and parse an override file
    pub fn load(path: &Path) -> Result<Self, ResolutionError> {
        let content =
            std::fs::read_to_string(path).map_err(|source| ResolutionError::OverrideFileNotFound {
                path: path.to_path_buf(),
                source,
            })?;

        Self::parse(&content, path)
    }

    /// Parse override content; `origin` is only used for error messages
    pub fn parse(content: &str, origin: &Path) -> Result<Self, ResolutionError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let entries: BTreeMap<String, String> =
            serde_yaml::from_str(content).map_err(|source| ResolutionError::OverrideParse {
                path: origin.to_path_buf(),
                source,
            })?;

        Ok(Self { entries })
    }

    pub fn from_entries<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            entries: entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// The resolved images, iterated in logical-name order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrySet {
    images: BTreeMap<String, ImageConfig>,
}

impl RegistrySet {
    /// Look up an image by logical name
    pub fn resolve(&self, name: &str) -> Result<&ImageConfig, ResolutionError> {
        self.images
            .get(name)
            .ok_or_else(|| ResolutionError::UnknownImage(name.to_string()))
    }

    pub fn get(&self, name: &str) -> Option<&ImageConfig> {
        self.images.get(name)
    }

    pub fn iter(&self) -> btree_map::Values<'_, String, ImageConfig> {
        self.images.values()
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// Full references of every image
    pub fn references(&self) -> Vec<String> {
        self.iter().map(ImageConfig::reference).collect()
    }
}

impl FromIterator<ImageConfig> for RegistrySet {
    fn from_iter<I: IntoIterator<Item = ImageConfig>>(iter: I) -> Self {
        Self {
            images: iter
                .into_iter()
                .map(|img| (img.name().to_string(), img))
                .collect(),
        }
    }
}

impl<'a> IntoIterator for &'a RegistrySet {
    type Item = &'a ImageConfig;
    type IntoIter = btree_map::Values<'a, String, ImageConfig>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Load the image set for `version`, applying `override_file` if given.
///
/// An empty path counts as no override file. The file is read and validated
/// completely before anything is returned.
pub fn load(
    override_file: Option<&Path>,
    version: &KubeVersion,
) -> Result<RegistrySet, ResolutionError> {
    let overrides = match override_file.filter(|p| !p.as_os_str().is_empty()) {
        Some(path) => {
            crate::log_info!("Loading registry overrides from {}", path.display());
            OverrideDocument::load(path)?
        }
        None => OverrideDocument::default(),
    };

    build(&overrides, version)
}

/// Merge the built-in table with `overrides`
pub fn build(
    overrides: &OverrideDocument,
    version: &KubeVersion,
) -> Result<RegistrySet, ResolutionError> {
    let mut registries: BTreeMap<&str, Location> = BTreeMap::new();
    for (key, default) in DEFAULT_REGISTRIES {
        let location = Location::parse(default).ok_or_else(|| ResolutionError::InvalidOverride {
            key: key.to_string(),
            value: default.to_string(),
        })?;
        registries.insert(*key, location);
    }

    let mut image_overrides: BTreeMap<&str, Location> = BTreeMap::new();
    for (key, value) in &overrides.entries {
        let location = Location::parse(value).ok_or_else(|| ResolutionError::InvalidOverride {
            key: key.clone(),
            value: value.clone(),
        })?;

        if DEFAULT_IMAGES.iter().any(|(name, _, _)| *name == key.as_str()) {
            image_overrides.insert(key.as_str(), location);
        } else if let Some(registry_key) = registry_key_for(key) {
            registries.insert(registry_key, location);
        } else {
            crate::log_warn!("Ignoring unknown override '{}'", key);
        }
    }

    DEFAULT_IMAGES
        .iter()
        .map(|(name, registry, repository)| {
            let (host, repository) = match image_overrides.get(name) {
                Some(location) if !location.path.is_empty() => {
                    (location.host.as_str(), location.path.clone())
                }
                Some(location) => (location.host.as_str(), repository.to_string()),
                None => {
                    let location = &registries[registry];
                    (location.host.as_str(), location.join(repository))
                }
            };

            ImageConfig::new(*name, host, repository, version.as_str())
        })
        .collect()
}

/// Map a registry key or a default registry location to its key
fn registry_key_for(key: &str) -> Option<&'static str> {
    DEFAULT_REGISTRIES
        .iter()
        .find(|(name, location)| *name == key || location.trim_end_matches('/') == key)
        .map(|(name, _)| *name)
}

/// `host[/path]` split at the first slash
#[derive(Debug, Clone, PartialEq, Eq)]
struct Location {
    host: String,
    path: String,
}

impl Location {
    fn parse(value: &str) -> Option<Self> {
        let value = value.trim().trim_end_matches('/');
        if value.is_empty() || value.starts_with('/') || value.contains(char::is_whitespace) {
            return None;
        }

        let (host, path) = value.split_once('/').unwrap_or((value, ""));
        Some(Self {
            host: host.to_string(),
            path: path.to_string(),
        })
    }

    fn join(&self, repository: &str) -> String {
        if self.path.is_empty() {
            repository.to_string()
        } else {
            format!("{}/{}", self.path, repository)
        }
    }
}

/// Default archive name for an export of `version`
pub fn tar_file_name(version: &KubeVersion) -> PathBuf {
    PathBuf::from(format!("kubernetes_e2e_images_{}.tar", version))
}
