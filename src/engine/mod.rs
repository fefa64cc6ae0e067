//! Container engine interface used by the sync operations
//!
//! The engine is whatever can pull, tag, push, remove and export images by
//! reference. Streaming calls hand back a stream that the caller drains to
//! the end; an engine reports failures that happen after the call started
//! as an error item (or a read error) at the end of that stream.

pub mod dryrun;
pub mod runtime;

use crate::utils::Cancellation;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Read;

pub use dryrun::DryRunEngine;
pub use runtime::ContainerRuntime;

/// Progress messages of a pull or push, ending when the engine is done
pub type ProgressStream = Box<dyn Iterator<Item = Result<ProgressMessage>>>;

/// Raw archive bytes of an export. A read error at the end is a late
/// engine failure.
pub type ExportStream = Box<dyn Read>;

pub trait ImageEngine {
    fn pull(&self, reference: &str, cancel: &Cancellation) -> Result<ProgressStream>;

    /// Make `target` point at the local image `source`
    fn tag(&self, source: &str, target: &str, cancel: &Cancellation) -> Result<()>;

    /// `registry_auth` is the base64 encoded credentials header, empty for
    /// anonymous pushes
    fn push(
        &self,
        reference: &str,
        registry_auth: &str,
        cancel: &Cancellation,
    ) -> Result<ProgressStream>;

    fn remove(&self, reference: &str, cancel: &Cancellation) -> Result<Vec<RemovedImage>>;

    /// Export all references into a single tar stream
    fn export(&self, references: &[String], cancel: &Cancellation) -> Result<ExportStream>;
}

/// One status update from the engine
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProgressMessage {
    pub fn status(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            ..Self::default()
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }

    /// Parse one line of engine output.
    ///
    /// JSON lines are taken as structured messages, `<layer>: <status>` lines
    /// keep the layer id, and anything else becomes a plain status.
    pub fn from_line(line: &str) -> Self {
        let line = line.trim();

        if line.starts_with('{')
            && let Ok(message) = serde_json::from_str::<ProgressMessage>(line)
        {
            return message;
        }

        let lower = line.to_ascii_lowercase();
        if lower.starts_with("error") {
            let error = line
                .split_once(':')
                .map(|(_, rest)| rest.trim())
                .filter(|rest| !rest.is_empty())
                .unwrap_or(line);
            return Self::error(error);
        }

        if let Some((id, status)) = line.split_once(": ")
            && is_layer_id(id)
        {
            return Self {
                id: Some(id.to_string()),
                status: status.trim().to_string(),
                ..Self::default()
            };
        }

        Self::status(line)
    }
}

fn is_layer_id(candidate: &str) -> bool {
    (12..=64).contains(&candidate.len())
        && candidate
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
}

impl fmt::Display for ProgressMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(error) = &self.error {
            return write!(f, "ERROR: {}", error);
        }
        if let Some(id) = &self.id {
            write!(f, "{}: ", id)?;
        }
        write!(f, "{}", self.status)?;
        if let Some(progress) = &self.progress {
            write!(f, " {}", progress)?;
        }
        Ok(())
    }
}

/// What removing a reference did to the local image store.
///
/// Removing a tag that other references still point to only untags it; the
/// content is deleted only when the last reference goes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovedImage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub untagged: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted: Option<String>,
}

impl RemovedImage {
    /// Parse `Untagged: <ref>` / `Deleted: <id>` lines, ignoring the rest
    pub fn parse_output(output: &str) -> Vec<Self> {
        output
            .lines()
            .filter_map(|line| {
                let (kind, value) = line.trim().split_once(':')?;
                let value = value.trim().to_string();
                match kind.trim() {
                    "Untagged" => Some(Self {
                        untagged: Some(value),
                        deleted: None,
                    }),
                    "Deleted" => Some(Self {
                        untagged: None,
                        deleted: Some(value),
                    }),
                    _ => None,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layer_progress_line() {
        let msg = ProgressMessage::from_line("a3ed95caeb02: Pull complete");
        assert_eq!(msg.id.as_deref(), Some("a3ed95caeb02"));
        assert_eq!(msg.status, "Pull complete");
        assert_eq!(msg.to_string(), "a3ed95caeb02: Pull complete");
    }

    #[test]
    fn test_plain_status_line() {
        let msg = ProgressMessage::from_line("Digest: sha256:0123abcd");
        assert_eq!(msg.id, None);
        assert_eq!(msg.status, "Digest: sha256:0123abcd");
    }

    #[test]
    fn test_error_line() {
        let msg = ProgressMessage::from_line("Error response from daemon: manifest unknown");
        assert_eq!(msg.error.as_deref(), Some("manifest unknown"));
    }

    #[test]
    fn test_json_line() {
        let msg = ProgressMessage::from_line(
            r#"{"id":"v1.18.0","status":"Pulling from conformance","progress":"[==>  ]"}"#,
        );
        assert_eq!(msg.id.as_deref(), Some("v1.18.0"));
        assert_eq!(msg.to_string(), "v1.18.0: Pulling from conformance [==>  ]");

        let err = ProgressMessage::from_line(r#"{"error":"denied: requested access"}"#);
        assert_eq!(err.to_string(), "ERROR: denied: requested access");
    }

    #[test]
    fn test_parse_remove_output() {
        let output = "Untagged: k8s.gcr.io/conformance:v1.18.0\n\
                      Untagged: k8s.gcr.io/conformance@sha256:1234\n\
                      Deleted: sha256:abcd\n\
                      \n\
                      something else\n";
        let removed = RemovedImage::parse_output(output);
        assert_eq!(removed.len(), 3);
        assert_eq!(
            removed[0].untagged.as_deref(),
            Some("k8s.gcr.io/conformance:v1.18.0")
        );
        assert_eq!(removed[2].deleted.as_deref(), Some("sha256:abcd"));
    }
}
