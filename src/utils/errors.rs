//! Error types for image resolution and registry synchronization

use crate::images::Operation;
use colored::Colorize;
use std::path::PathBuf;
use thiserror::Error;

/// Failures while turning (version, override file) into an image set.
///
/// All of these happen before any engine call, so they abort the whole run.
#[derive(Error, Debug)]
pub enum ResolutionError {
    #[error("invalid Kubernetes version '{version}': {reason}")]
    InvalidVersion { version: String, reason: String },

    #[error("couldn't determine the cluster version: {source:#}")]
    ClusterVersion { source: anyhow::Error },

    #[error("override file does not exist or cannot be opened: {}", path.display())]
    OverrideFileNotFound {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("override file {} is not a flat key/value document: {source}", path.display())]
    OverrideParse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("override '{key}' has an invalid registry location '{value}'")]
    InvalidOverride { key: String, value: String },

    #[error("'{reference}' is not a valid image reference: {reason}")]
    InvalidReference { reference: String, reason: String },

    #[error("unknown image '{0}'")]
    UnknownImage(String),

    #[error("unsupported plugin '{0}' (valid plugins are: e2e)")]
    UnsupportedPlugin(String),
}

/// Failures of individual engine operations or of a whole batch
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("error {} image {reference}: {source:#}", operation.verb())]
    EngineCall {
        operation: Operation,
        reference: String,
        source: anyhow::Error,
    },

    /// The export stream reported an error during or after the copy
    #[error("error exporting images: {source}")]
    StreamDrain { source: std::io::Error },

    #[error("couldn't write archive {}: {source}", path.display())]
    ArchiveWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("operation cancelled")]
    Cancelled,

    #[error("{operation} completed with {failures} failure(s) out of {total} image(s)")]
    BatchFailed {
        operation: Operation,
        failures: usize,
        total: usize,
    },
}

/// User-facing error with suggestions
#[derive(Error, Debug)]
#[error("{message}")]
pub struct CliError {
    pub message: String,
    pub suggestions: Vec<String>,
}

impl CliError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            suggestions: Vec::new(),
        }
    }

    pub fn suggest(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    /// Display the error with suggestions
    pub fn display(&self) {
        crate::log_error!("{}", self.message);
        eprintln!("{} {}", "error:".red().bold(), self.message);

        if !self.suggestions.is_empty() {
            eprintln!();
            eprintln!("{}", "Suggestions:".yellow().bold());
            for suggestion in &self.suggestions {
                eprintln!("  {} {}", "→".blue(), suggestion);
            }
        }
    }

    pub fn engine_not_found() -> Self {
        Self::new("Neither docker nor podman found")
            .suggest("Docker: https://docs.docker.com/get-docker/")
            .suggest("Podman: https://podman.io/getting-started/installation")
    }

    pub fn from_resolution(err: &ResolutionError) -> Self {
        let base = Self::new(err.to_string());
        match err {
            ResolutionError::InvalidVersion { .. } => base
                .suggest("Pass a semantic version such as v1.18.0 with --kubernetes-version")
                .suggest("Or use --kubernetes-version auto to ask the cluster"),
            ResolutionError::ClusterVersion { .. } => base
                .suggest("Check that the cluster is reachable with the given --kubeconfig")
                .suggest("Or pass --kubernetes-version explicitly"),
            ResolutionError::OverrideFileNotFound { .. } => {
                base.suggest("Verify the path passed to --e2e-repo-config")
            }
            ResolutionError::OverrideParse { .. } | ResolutionError::InvalidOverride { .. } => {
                base.suggest("The file must map names to registries, e.g.\n      conformance: myregistry.local/conformance")
            }
            ResolutionError::InvalidReference { .. } => {
                base.suggest("Registry locations must be lowercase host[/path] values")
            }
            ResolutionError::UnknownImage(_) => {
                base.suggest("Run 'conformance-images list' to see the known images")
            }
            ResolutionError::UnsupportedPlugin(_) => base.suggest("Use --plugin e2e"),
        }
    }

    pub fn batch_failed(operation: Operation, failures: usize, total: usize) -> Self {
        Self::new(format!(
            "{} failed for {} of {} image(s)",
            operation, failures, total
        ))
        .suggest("Review the per-image errors above")
        .suggest("Run with -v for engine output")
    }
}

/// Turn any error from a command into a user-facing one
pub fn enhance_error(err: anyhow::Error) -> CliError {
    if let Some(resolution) = err.downcast_ref::<ResolutionError>() {
        return CliError::from_resolution(resolution);
    }

    if let Some(SyncError::BatchFailed {
        operation,
        failures,
        total,
    }) = err.downcast_ref::<SyncError>()
    {
        return CliError::batch_failed(*operation, *failures, *total);
    }

    if let Some(cli) = err.downcast_ref::<CliError>() {
        let mut copy = CliError::new(cli.message.clone());
        copy.suggestions = cli.suggestions.clone();
        return copy;
    }

    let message = format!("{:#}", err);
    if message.contains("permission denied") {
        return CliError::new(message)
            .suggest("Check that your user may talk to the container engine socket");
    }

    CliError::new(message).suggest("Run with -v for more details")
}
