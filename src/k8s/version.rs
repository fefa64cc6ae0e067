//! Server version lookup for `--kubernetes-version auto`

use crate::config::ClusterVersionSource;
use anyhow::{Context, Result};
use kube::Client;
use kube::config::{Config, KubeConfigOptions, Kubeconfig};
use std::path::{Path, PathBuf};

/// Asks the API server selected by a kubeconfig for its version
#[derive(Debug, Clone, Default)]
pub struct KubeVersionSource {
    kubeconfig: Option<PathBuf>,
}

impl KubeVersionSource {
    /// `None` infers the configuration (in-cluster, then `~/.kube/config`)
    pub fn new(kubeconfig: Option<PathBuf>) -> Self {
        Self {
            kubeconfig: kubeconfig.filter(|p| !p.as_os_str().is_empty()),
        }
    }

    async fn client_config(&self) -> Result<Config> {
        match &self.kubeconfig {
            Some(paths) => {
                let kubeconfig = read_kubeconfigs(paths)?;
                Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                    .await
                    .with_context(|| format!("Invalid kubeconfig {}", paths.display()))
            }
            None => Config::infer()
                .await
                .context("Failed to infer Kubernetes configuration"),
        }
    }

    async fn query(&self) -> Result<String> {
        let config = self.client_config().await?;
        let client = Client::try_from(config).context("Failed to create Kubernetes client")?;
        let info = client
            .apiserver_version()
            .await
            .context("Failed to get server version")?;
        Ok(info.git_version)
    }
}

/// Read a kubeconfig path list (`a:b` on unix) and merge the files in order
fn read_kubeconfigs(paths: &Path) -> Result<Kubeconfig> {
    let mut merged: Option<Kubeconfig> = None;

    for path in std::env::split_paths(paths.as_os_str()) {
        if path.as_os_str().is_empty() {
            continue;
        }
        let next = Kubeconfig::read_from(&path)
            .with_context(|| format!("Failed to read kubeconfig {}", path.display()))?;
        merged = Some(match merged {
            Some(current) => current
                .merge(next)
                .context("Failed to merge kubeconfig files")?,
            None => next,
        });
    }

    merged.with_context(|| format!("No kubeconfig file in {}", paths.display()))
}

impl ClusterVersionSource for KubeVersionSource {
    fn server_version(&self) -> Result<String> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("Failed to start async runtime")?;
        runtime.block_on(self.query())
    }
}
