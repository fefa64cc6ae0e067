//! Dry-run engine: reports engine calls instead of making them

use super::{ExportStream, ImageEngine, ProgressMessage, ProgressStream, RemovedImage};
use crate::utils::Cancellation;
use anyhow::{Result, anyhow};
use colored::Colorize;
use std::cell::RefCell;

/// Print a dry-run action
pub fn log_action(action: &str) {
    println!("  {} {}", "[DRY RUN]".cyan().bold(), action);
}

/// Engine that records what it would do and always succeeds
#[derive(Debug, Default)]
pub struct DryRunEngine {
    actions: RefCell<Vec<String>>,
}

impl DryRunEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Actions requested so far, in order
    pub fn actions(&self) -> Vec<String> {
        self.actions.borrow().clone()
    }

    fn record(&self, cancel: &Cancellation, action: String) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(anyhow!("cancelled before: {}", action));
        }
        log_action(&action);
        self.actions.borrow_mut().push(action);
        Ok(())
    }
}

impl ImageEngine for DryRunEngine {
    fn pull(&self, reference: &str, cancel: &Cancellation) -> Result<ProgressStream> {
        self.record(cancel, format!("pull {}", reference))?;
        let skipped: Result<ProgressMessage> = Ok(ProgressMessage::status("skipped (dry run)"));
        Ok(Box::new(std::iter::once(skipped)))
    }

    fn tag(&self, source: &str, target: &str, cancel: &Cancellation) -> Result<()> {
        self.record(cancel, format!("tag {} {}", source, target))
    }

    fn push(
        &self,
        reference: &str,
        registry_auth: &str,
        cancel: &Cancellation,
    ) -> Result<ProgressStream> {
        let how = if registry_auth.is_empty() {
            "anonymously"
        } else {
            "with credentials"
        };
        self.record(cancel, format!("push {} {}", reference, how))?;
        Ok(Box::new(std::iter::empty::<Result<ProgressMessage>>()))
    }

    fn remove(&self, reference: &str, cancel: &Cancellation) -> Result<Vec<RemovedImage>> {
        self.record(cancel, format!("remove {}", reference))?;
        Ok(Vec::new())
    }

    fn export(&self, references: &[String], cancel: &Cancellation) -> Result<ExportStream> {
        self.record(cancel, format!("save {}", references.join(" ")))?;
        Ok(Box::new(std::io::empty()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_actions_in_order() {
        let engine = DryRunEngine::new();
        let cancel = Cancellation::new();

        let pulled: Vec<_> = engine
            .pull("k8s.gcr.io/conformance:v1.18.0", &cancel)
            .unwrap()
            .collect();
        assert_eq!(pulled.len(), 1);

        engine
            .tag("a:1", "b:1", &cancel)
            .unwrap();
        assert_eq!(
            engine.actions(),
            ["pull k8s.gcr.io/conformance:v1.18.0", "tag a:1 b:1"]
        );
    }

    #[test]
    fn test_respects_cancellation() {
        let engine = DryRunEngine::new();
        let cancel = Cancellation::new();
        cancel.cancel();

        assert!(engine.remove("a:1", &cancel).is_err());
        assert!(engine.actions().is_empty());
    }
}
