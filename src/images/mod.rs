//! Registry synchronization of a resolved image set

pub mod archive;
pub mod auth;
pub mod sync;

use crate::engine::{ProgressMessage, RemovedImage};
use crate::utils::errors::SyncError;
use std::fmt;

pub use auth::RegistryAuth;
pub use sync::{ImageSync, SyncOptions};

/// Engine operation performed on an image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Pull,
    Tag,
    Push,
    Delete,
    Save,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Pull => "pull",
            Operation::Tag => "tag",
            Operation::Push => "push",
            Operation::Delete => "delete",
            Operation::Save => "save",
        }
    }

    /// Present participle, for error messages
    pub fn verb(&self) -> &'static str {
        match self {
            Operation::Pull => "pulling",
            Operation::Tag => "tagging",
            Operation::Push => "pushing",
            Operation::Delete => "deleting",
            Operation::Save => "saving",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened to one image
#[derive(Debug)]
pub enum Outcome {
    Done,
    Removed(Vec<RemovedImage>),
    Failed(SyncError),
}

/// Per-image entry of a batch report
#[derive(Debug)]
pub struct SyncResult {
    pub name: String,
    pub reference: String,
    /// The step the outcome belongs to; a failed tag is reported as `Tag`
    pub operation: Operation,
    pub outcome: Outcome,
}

impl SyncResult {
    pub fn is_success(&self) -> bool {
        !matches!(self.outcome, Outcome::Failed(_))
    }

    pub fn error(&self) -> Option<&SyncError> {
        match &self.outcome {
            Outcome::Failed(err) => Some(err),
            _ => None,
        }
    }
}

/// Every outcome of one batch, in the order the images were processed
#[derive(Debug)]
pub struct BatchReport {
    pub operation: Operation,
    pub results: Vec<SyncResult>,
    /// Set when the batch stopped early because of cancellation
    pub cancelled: bool,
}

impl BatchReport {
    pub fn new(operation: Operation) -> Self {
        Self {
            operation,
            results: Vec::new(),
            cancelled: false,
        }
    }

    pub fn failures(&self) -> usize {
        self.results.iter().filter(|r| !r.is_success()).count()
    }

    pub fn successes(&self) -> usize {
        self.results.len() - self.failures()
    }

    /// `Cancelled` if the batch was interrupted, `BatchFailed` if any image
    /// failed
    pub fn check(&self) -> Result<(), SyncError> {
        if self.cancelled {
            return Err(SyncError::Cancelled);
        }

        match self.failures() {
            0 => Ok(()),
            failures => Err(SyncError::BatchFailed {
                operation: self.operation,
                failures,
                total: self.results.len(),
            }),
        }
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} completed with {} failure(s): {} of {} image(s) succeeded",
            self.operation,
            self.failures(),
            self.successes(),
            self.results.len()
        )?;
        if self.cancelled {
            write!(f, " (cancelled)")?;
        }
        Ok(())
    }
}

/// Receives engine progress while a batch runs
pub trait ProgressObserver {
    fn begin(&mut self, _reference: &str) {}

    fn message(&mut self, reference: &str, message: &ProgressMessage);

    fn end(&mut self, _reference: &str, _success: bool) {}
}

impl<F> ProgressObserver for F
where
    F: FnMut(&str, &ProgressMessage),
{
    fn message(&mut self, reference: &str, message: &ProgressMessage) {
        self(reference, message)
    }
}
