//! Configuration file support for conformance-images

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const LOCAL_CONFIG: &str = ".conformance-images.toml";

/// Main configuration structure
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Settings {
    #[serde(default)]
    pub defaults: Defaults,

    #[serde(default)]
    pub engine: EngineSettings,

    #[serde(default)]
    pub behavior: Behavior,

    #[serde(default)]
    pub push: PushSettings,
}

/// Default values for command-line flags
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Defaults {
    /// Kubernetes version, or "auto" to ask the cluster
    #[serde(default = "default_kubernetes_version")]
    pub kubernetes_version: String,

    #[serde(default = "default_plugin")]
    pub plugin: String,

    /// Registry override file used when --e2e-repo-config is not given
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub override_file: Option<String>,
}

/// Container engine selection
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct EngineSettings {
    /// "docker" or "podman"; detected from PATH when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<String>,
}

/// Behavior settings
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Behavior {
    #[serde(default = "default_true")]
    pub confirm_destructive: bool,

    #[serde(default = "default_true")]
    pub show_progress: bool,
}

/// Push retry policy. Retries are off unless configured.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PushSettings {
    #[serde(default)]
    pub retries: u32,

    #[serde(default = "default_retry_backoff_secs")]
    pub retry_backoff_secs: u64,
}

fn default_kubernetes_version() -> String {
    crate::config::version::AUTO.to_string()
}

fn default_plugin() -> String {
    "e2e".to_string()
}

fn default_true() -> bool {
    true
}

fn default_retry_backoff_secs() -> u64 {
    2
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            kubernetes_version: default_kubernetes_version(),
            plugin: default_plugin(),
            override_file: None,
        }
    }
}

impl Default for Behavior {
    fn default() -> Self {
        Self {
            confirm_destructive: default_true(),
            show_progress: default_true(),
        }
    }
}

impl Default for PushSettings {
    fn default() -> Self {
        Self {
            retries: 0,
            retry_backoff_secs: default_retry_backoff_secs(),
        }
    }
}

impl PushSettings {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_secs(self.retry_backoff_secs)
    }
}

impl Settings {
    /// Load settings from file or return defaults
    pub fn load() -> Result<Self> {
        match Self::find_config_file() {
            Some(path) => Self::load_from_file(&path),
            None => Ok(Self::default()),
        }
    }

    /// Load settings from a specific file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let settings: Settings = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(settings)
    }

    /// Find config file in standard locations
    /// Priority:
    /// 1. .conformance-images.toml in current directory
    /// 2. ~/.config/conformance-images/config.toml (XDG config directory)
    pub fn find_config_file() -> Option<PathBuf> {
        let local_config = PathBuf::from(LOCAL_CONFIG);
        if local_config.exists() {
            return Some(local_config);
        }

        let xdg_config = Self::user_config_path()?;
        xdg_config.exists().then_some(xdg_config)
    }

    /// Per-user config location
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("conformance-images").join("config.toml"))
    }

    /// Generate example config file content
    pub fn example_config() -> Result<String> {
        let header = "# conformance-images configuration file\n\
                      # Place this file at ~/.config/conformance-images/config.toml or .conformance-images.toml in your project\n\n";

        let body = toml::to_string_pretty(&Settings::default())
            .context("Failed to serialize default settings")?;

        Ok(format!("{}{}", header, body))
    }
}
