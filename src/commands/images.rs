//! The image workflow: list, pull, download, push and delete

use crate::config::registry::{self, tar_file_name};
use crate::config::settings::Settings;
use crate::config::version::{self, AUTO};
use crate::config::{KubeVersion, RegistrySet};
use crate::engine::ImageEngine;
use crate::engine::dryrun::log_action;
use crate::images::{BatchReport, ImageSync, Outcome, RegistryAuth, SyncOptions};
use crate::k8s::KubeVersionSource;
use crate::utils::errors::{CliError, ResolutionError};
use crate::utils::{Cancellation, progress};
use anyhow::Result;
use colored::Colorize;
use std::path::PathBuf;

/// The only plugin whose images are managed here
pub const E2E_PLUGIN: &str = "e2e";

/// Which image set a command works on
#[derive(Debug, Clone)]
pub struct ImageSelection {
    pub kubeconfig: Option<PathBuf>,
    pub plugin: String,
    /// Explicit version or `auto`
    pub kubernetes_version: String,
    pub override_file: Option<PathBuf>,
}

impl ImageSelection {
    /// Fill unset values from the settings file
    pub fn with_defaults(
        kubeconfig: Option<PathBuf>,
        plugin: Option<String>,
        kubernetes_version: Option<String>,
        override_file: Option<PathBuf>,
        settings: &Settings,
    ) -> Self {
        Self {
            kubeconfig,
            plugin: plugin.unwrap_or_else(|| settings.defaults.plugin.clone()),
            kubernetes_version: kubernetes_version
                .unwrap_or_else(|| settings.defaults.kubernetes_version.clone()),
            override_file: override_file
                .or_else(|| settings.defaults.override_file.as_ref().map(PathBuf::from)),
        }
    }

    fn check_plugin(&self) -> Result<(), ResolutionError> {
        if self.plugin != E2E_PLUGIN {
            return Err(ResolutionError::UnsupportedPlugin(self.plugin.clone()));
        }
        Ok(())
    }

    pub fn version(&self) -> Result<KubeVersion, ResolutionError> {
        self.check_plugin()?;
        if self.kubernetes_version.trim() == AUTO {
            crate::log_info!("Querying the cluster for its version");
        }
        version::resolve(
            &self.kubernetes_version,
            &KubeVersionSource::new(self.kubeconfig.clone()),
        )
    }

    /// Upstream images, ignoring any override file
    pub fn upstream(&self, version: &KubeVersion) -> Result<RegistrySet, ResolutionError> {
        registry::load(None, version)
    }

    /// Images with the override file applied, if there is one
    pub fn resolved(&self, version: &KubeVersion) -> Result<RegistrySet, ResolutionError> {
        registry::load(self.override_file.as_deref(), version)
    }

    fn has_override(&self) -> bool {
        self.override_file
            .as_ref()
            .is_some_and(|p| !p.as_os_str().is_empty())
    }
}

/// Engine plus the state shared by every batch command
pub struct Runner<'a> {
    pub engine: &'a dyn ImageEngine,
    pub cancel: Cancellation,
    pub settings: &'a Settings,
    pub dry_run: bool,
}

impl<'a> Runner<'a> {
    fn sync(&self) -> ImageSync<'a, dyn ImageEngine + 'a> {
        ImageSync::new(self.engine, self.cancel.clone()).with_options(SyncOptions {
            push_retries: self.settings.push.retries,
            retry_backoff: self.settings.push.retry_backoff(),
        })
    }

    fn show_progress(&self) -> bool {
        self.settings.behavior.show_progress && !self.dry_run
    }
}

/// Print every resolved reference
pub fn list(selection: &ImageSelection) -> Result<()> {
    let version = selection.version()?;
    let images = selection.resolved(&version)?;

    for image in &images {
        println!("{}", image.reference());
    }
    Ok(())
}

/// Pull the upstream images
pub fn pull(selection: &ImageSelection, runner: &Runner) -> Result<()> {
    let version = selection.version()?;
    let images = selection.upstream(&version)?;

    crate::log_info!("Pulling {} image(s) for {}", images.len(), version);
    let mut observer = progress::observer(runner.show_progress());
    let report = runner.sync().pull_all(&images, observer.as_mut());

    print_summary(&report);
    report.check()?;
    Ok(())
}

/// Export the upstream images into one tar archive
pub fn download(
    selection: &ImageSelection,
    output: Option<PathBuf>,
    runner: &Runner,
) -> Result<()> {
    let version = selection.version()?;
    let images = selection.upstream(&version)?;
    let destination = output.unwrap_or_else(|| tar_file_name(&version));

    if runner.dry_run {
        log_action(&format!(
            "save {} image(s) to {}",
            images.len(),
            destination.display()
        ));
        return Ok(());
    }

    let bytes = runner.sync().save_all(&images.references(), &destination)?;
    println!(
        "{} {} ({} bytes)",
        "✓".green(),
        destination.display(),
        bytes
    );
    Ok(())
}

/// Where `push` reads the registry password from
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub username: Option<String>,
    /// Taken from the environment; prompted for when absent
    pub password: Option<String>,
}

impl Credentials {
    fn into_auth(self) -> Result<RegistryAuth> {
        let Some(username) = self.username.filter(|u| !u.is_empty()) else {
            return Ok(RegistryAuth::default());
        };

        let password = match self.password {
            Some(password) => password,
            None => crate::utils::password(&format!("Password for {}", username))?,
        };
        Ok(RegistryAuth::new(username, password))
    }
}

/// Tag the upstream images with their private names and push them
pub fn push(selection: &ImageSelection, credentials: Credentials, runner: &Runner) -> Result<()> {
    if !selection.has_override() {
        return Err(CliError::new("push needs a private registry to push to")
            .suggest("Pass the override file with --e2e-repo-config")
            .into());
    }

    let version = selection.version()?;
    let upstream = selection.upstream(&version)?;
    let private = selection.resolved(&version)?;
    let auth = credentials.into_auth()?;

    crate::log_info!("Pushing {} image(s) for {}", private.len(), version);
    let mut observer = progress::observer(runner.show_progress());
    let report = runner
        .sync()
        .tag_and_push_all(&upstream, &private, &auth, observer.as_mut());

    print_summary(&report);
    report.check()?;
    Ok(())
}

/// Remove the resolved images from the local engine
pub fn delete(selection: &ImageSelection, yes: bool, runner: &Runner) -> Result<()> {
    let version = selection.version()?;
    let images = selection.resolved(&version)?;

    let ask = runner.settings.behavior.confirm_destructive && !yes && !runner.dry_run;
    if ask && !crate::utils::confirm(&format!("Delete {} image(s)?", images.len()))? {
        println!("Aborted");
        return Ok(());
    }

    let report = runner.sync().delete_all(&images);

    print_summary(&report);
    report.check()?;
    Ok(())
}

/// One line per image, with removal details for deletes
pub fn print_summary(report: &BatchReport) {
    for result in &report.results {
        match &result.outcome {
            Outcome::Failed(err) => {
                println!("{} {}: {}", "✗".red(), result.reference, err);
            }
            Outcome::Done => println!("{} {}", "✓".green(), result.reference),
            Outcome::Removed(items) => {
                println!("{} {}", "✓".green(), result.reference);
                for item in items {
                    if let Some(untagged) = &item.untagged {
                        println!("    Untagged: {}", untagged);
                    }
                    if let Some(deleted) = &item.deleted {
                        println!("    Deleted: {}", deleted);
                    }
                }
            }
        }
    }

    if report.cancelled {
        println!("{}", "Interrupted".yellow());
    }
}
