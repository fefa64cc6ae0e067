//! Batch pull / tag+push / delete / save over an image set
//!
//! Images are processed one at a time in set order. Each engine call is
//! drained completely before the next image starts, and a failed image is
//! recorded in the report without stopping the batch. Only cancellation
//! ends a batch early.

use super::archive::ArchiveWriter;
use super::{BatchReport, Operation, Outcome, ProgressObserver, RegistryAuth, SyncResult};
use crate::config::{ImageConfig, RegistrySet};
use crate::engine::{ImageEngine, ProgressStream};
use crate::utils::Cancellation;
use crate::utils::errors::SyncError;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Extra push attempts after a failure; 0 disables retry
    pub push_retries: u32,
    /// Delay before the first retry, doubled for each further one
    pub retry_backoff: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            push_retries: 0,
            retry_backoff: Duration::from_secs(2),
        }
    }
}

pub struct ImageSync<'a, E: ImageEngine + ?Sized> {
    engine: &'a E,
    cancel: Cancellation,
    options: SyncOptions,
}

impl<'a, E: ImageEngine + ?Sized> ImageSync<'a, E> {
    pub fn new(engine: &'a E, cancel: Cancellation) -> Self {
        Self {
            engine,
            cancel,
            options: SyncOptions::default(),
        }
    }

    pub fn with_options(mut self, options: SyncOptions) -> Self {
        self.options = options;
        self
    }

    /// Pull every image of `set`
    pub fn pull_all(&self, set: &RegistrySet, observer: &mut dyn ProgressObserver) -> BatchReport {
        self.run_batch(Operation::Pull, set, |image| {
            let reference = image.reference();
            observer.begin(&reference);

            let result = self
                .engine
                .pull(&reference, &self.cancel)
                .map_err(|source| engine_error(Operation::Pull, &reference, source))
                .and_then(|stream| self.drain(Operation::Pull, &reference, stream, observer));

            observer.end(&reference, result.is_ok());
            finish(image, reference, Operation::Pull, result.map(|()| Outcome::Done))
        })
    }

    /// Tag each image of `source` as its counterpart in `destination`, then
    /// push the destination reference.
    ///
    /// A failed tag skips that image's push. Images missing from
    /// `destination` are skipped with a warning.
    pub fn tag_and_push_all(
        &self,
        source: &RegistrySet,
        destination: &RegistrySet,
        auth: &RegistryAuth,
        observer: &mut dyn ProgressObserver,
    ) -> BatchReport {
        let pairs: Vec<(&ImageConfig, &ImageConfig)> = source
            .iter()
            .filter_map(|image| match destination.get(image.name()) {
                Some(target) => Some((image, target)),
                None => {
                    crate::log_warn!("No destination for image '{}', skipping", image.name());
                    None
                }
            })
            .collect();

        self.run_batch(Operation::Push, pairs, |(image, target)| {
            let source_ref = image.reference();
            let target_ref = target.reference();

            if let Err(source) = self.engine.tag(&source_ref, &target_ref, &self.cancel) {
                let err = engine_error(Operation::Tag, &target_ref, source);
                return finish(target, target_ref, Operation::Tag, Err(err));
            }

            observer.begin(&target_ref);
            let result = self.push_with_retry(&target_ref, auth, observer);
            observer.end(&target_ref, result.is_ok());

            finish(target, target_ref, Operation::Push, result.map(|()| Outcome::Done))
        })
    }

    /// Remove every image of `set` from the local engine.
    ///
    /// The report keeps what was untagged apart from what was deleted.
    pub fn delete_all(&self, set: &RegistrySet) -> BatchReport {
        self.run_batch(Operation::Delete, set, |image| {
            let reference = image.reference();

            let result = match self.engine.remove(&reference, &self.cancel) {
                Ok(removed) => {
                    for item in &removed {
                        if let Some(untagged) = &item.untagged {
                            crate::log_info!("Untagged: {}", untagged);
                        }
                        if let Some(deleted) = &item.deleted {
                            crate::log_info!("Deleted: {}", deleted);
                        }
                    }
                    Ok(Outcome::Removed(removed))
                }
                Err(source) => Err(engine_error(Operation::Delete, &reference, source)),
            };

            finish(image, reference, Operation::Delete, result)
        })
    }

    /// Export `references` into a single archive at `destination`.
    ///
    /// The export stream is read to its end even if writing the file fails.
    pub fn save_all(&self, references: &[String], destination: &Path) -> Result<u64, SyncError> {
        if self.cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        let file = File::create(destination).map_err(|source| SyncError::ArchiveWrite {
            path: destination.to_path_buf(),
            source,
        })?;

        let mut export = self
            .engine
            .export(references, &self.cancel)
            .map_err(|source| engine_error(Operation::Save, &references.join(", "), source))?;

        let mut writer = ArchiveWriter::new(BufWriter::new(file), destination);
        let result = writer.write_from(&mut *export);

        match result {
            Err(_) if self.cancel.is_cancelled() => Err(SyncError::Cancelled),
            Ok(bytes) => {
                crate::log_info!(
                    "Saved {} image(s) ({} bytes) to {}",
                    references.len(),
                    bytes,
                    destination.display()
                );
                Ok(bytes)
            }
            Err(err) => Err(err),
        }
    }

    fn run_batch<T>(
        &self,
        operation: Operation,
        items: impl IntoIterator<Item = T>,
        mut step: impl FnMut(T) -> SyncResult,
    ) -> BatchReport {
        let mut report = BatchReport::new(operation);

        for item in items {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let result = step(item);
            if let Some(err) = result.error() {
                crate::log_error!("{}", err);
            }
            let interrupted = !result.is_success() && self.cancel.is_cancelled();
            report.results.push(result);

            if interrupted {
                report.cancelled = true;
                break;
            }
        }

        if report.cancelled {
            crate::log_warn!(
                "{} cancelled after {} image(s)",
                operation,
                report.results.len()
            );
        } else {
            crate::log_info!("{}", report);
        }

        report
    }

    fn push_with_retry(
        &self,
        reference: &str,
        auth: &RegistryAuth,
        observer: &mut dyn ProgressObserver,
    ) -> Result<(), SyncError> {
        let header = if auth.is_anonymous() {
            String::new()
        } else {
            auth.encode()
                .map_err(|source| engine_error(Operation::Push, reference, source))?
        };

        let mut attempt: u32 = 0;
        loop {
            let result = self
                .engine
                .push(reference, &header, &self.cancel)
                .map_err(|source| engine_error(Operation::Push, reference, source))
                .and_then(|stream| self.drain(Operation::Push, reference, stream, observer));

            match result {
                Err(err) if attempt < self.options.push_retries && !self.cancel.is_cancelled() => {
                    let delay = self
                        .options
                        .retry_backoff
                        .saturating_mul(2u32.saturating_pow(attempt));
                    attempt += 1;
                    crate::log_warn!(
                        "{}; retrying in {:?} ({}/{})",
                        err,
                        delay,
                        attempt,
                        self.options.push_retries
                    );
                    std::thread::sleep(delay);
                }
                other => return other,
            }
        }
    }

    /// Consume `stream` to its end, forwarding every message. The last error
    /// seen, if any, fails the operation.
    fn drain(
        &self,
        operation: Operation,
        reference: &str,
        stream: ProgressStream,
        observer: &mut dyn ProgressObserver,
    ) -> Result<(), SyncError> {
        let mut last_error = None;

        for item in stream {
            match item {
                Ok(message) => {
                    if let Some(error) = &message.error {
                        last_error = Some(anyhow::anyhow!("{}", error));
                    }
                    observer.message(reference, &message);
                }
                Err(err) => last_error = Some(err),
            }
        }

        match last_error {
            Some(source) => Err(engine_error(operation, reference, source)),
            None => Ok(()),
        }
    }
}

fn engine_error(operation: Operation, reference: &str, source: anyhow::Error) -> SyncError {
    SyncError::EngineCall {
        operation,
        reference: reference.to_string(),
        source,
    }
}

fn finish(
    image: &ImageConfig,
    reference: String,
    operation: Operation,
    result: Result<Outcome, SyncError>,
) -> SyncResult {
    SyncResult {
        name: image.name().to_string(),
        reference,
        operation,
        outcome: result.unwrap_or_else(Outcome::Failed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{KubeVersion, OverrideDocument, registry};
    use crate::engine::{ExportStream, ProgressMessage, RemovedImage};
    use crate::images::archive::tests::ScriptedExport;
    use anyhow::{Result, anyhow};
    use std::cell::{Cell, RefCell};
    use std::collections::HashMap;
    use std::io::Read;
    use std::rc::Rc;

    /// In-memory engine with scripted failures
    #[derive(Default)]
    struct FakeEngine {
        calls: RefCell<Vec<String>>,
        /// Pulls whose stream ends in an error
        failing_streams: Vec<String>,
        /// Calls (by reference) rejected up front
        rejected: Vec<String>,
        /// Remaining push failures per reference
        flaky_pushes: RefCell<HashMap<String, u32>>,
        removed: HashMap<String, Vec<RemovedImage>>,
        push_headers: RefCell<Vec<String>>,
        /// Cancel this token when the given reference is pulled
        cancel_on_pull: Option<(String, Cancellation)>,
        export_data: Vec<u8>,
        export_error: Option<String>,
        export_drained: Rc<Cell<bool>>,
    }

    impl FakeEngine {
        fn record(&self, call: String) {
            self.calls.borrow_mut().push(call);
        }

        fn calls(&self) -> Vec<String> {
            self.calls.borrow().clone()
        }

        fn check_rejected(&self, reference: &str) -> Result<()> {
            if self.rejected.iter().any(|r| r == reference) {
                return Err(anyhow!("daemon rejected {}", reference));
            }
            Ok(())
        }

        fn stream(reference: &str, fail: bool) -> ProgressStream {
            let mut items: Vec<Result<ProgressMessage>> = vec![
                Ok(ProgressMessage::status(format!("Pulling {}", reference))),
                Ok(ProgressMessage::from_line("a3ed95caeb02: Pull complete")),
            ];
            if fail {
                items.push(Err(anyhow!("unexpected EOF")));
            }
            Box::new(items.into_iter())
        }
    }

    impl ImageEngine for FakeEngine {
        fn pull(&self, reference: &str, cancel: &Cancellation) -> Result<ProgressStream> {
            self.record(format!("pull {}", reference));
            if let Some((target, token)) = &self.cancel_on_pull
                && target == reference
            {
                token.cancel();
                return Err(anyhow!("interrupted"));
            }
            if cancel.is_cancelled() {
                return Err(anyhow!("cancelled"));
            }
            self.check_rejected(reference)?;
            let fail = self.failing_streams.iter().any(|r| r == reference);
            Ok(Self::stream(reference, fail))
        }

        fn tag(&self, source: &str, target: &str, _cancel: &Cancellation) -> Result<()> {
            self.record(format!("tag {} {}", source, target));
            self.check_rejected(target)
        }

        fn push(
            &self,
            reference: &str,
            registry_auth: &str,
            _cancel: &Cancellation,
        ) -> Result<ProgressStream> {
            self.record(format!("push {}", reference));
            self.push_headers.borrow_mut().push(registry_auth.to_string());

            let mut flaky = self.flaky_pushes.borrow_mut();
            if let Some(remaining) = flaky.get_mut(reference)
                && *remaining > 0
            {
                *remaining -= 1;
                let items: Vec<Result<ProgressMessage>> =
                    vec![Ok(ProgressMessage::error("received unexpected HTTP status: 503"))];
                return Ok(Box::new(items.into_iter()));
            }
            let items: Vec<Result<ProgressMessage>> = vec![Ok(ProgressMessage::status("Pushed"))];
            Ok(Box::new(items.into_iter()))
        }

        fn remove(&self, reference: &str, _cancel: &Cancellation) -> Result<Vec<RemovedImage>> {
            self.record(format!("remove {}", reference));
            self.check_rejected(reference)?;
            Ok(self.removed.get(reference).cloned().unwrap_or_default())
        }

        fn export(&self, references: &[String], _cancel: &Cancellation) -> Result<ExportStream> {
            self.record(format!("export {}", references.len()));
            let export =
                ScriptedExport::new(self.export_data.clone(), self.export_error.as_deref());
            let drained = Rc::clone(&self.export_drained);
            Ok(Box::new(NotifyOnEnd { inner: export, drained }))
        }
    }

    /// Forwards the scripted export's end-of-stream flag to the engine
    struct NotifyOnEnd {
        inner: ScriptedExport,
        drained: Rc<Cell<bool>>,
    }

    impl Read for NotifyOnEnd {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let result = self.inner.read(buf);
            if self.inner.reached_end.get() {
                self.drained.set(true);
            }
            result
        }
    }

    fn upstream() -> RegistrySet {
        registry::load(None, &KubeVersion::parse("v1.18.0").unwrap()).unwrap()
    }

    fn mirror() -> RegistrySet {
        let doc = OverrideDocument::from_entries([("gcRegistry", "mirror.local/e2e")]);
        registry::build(&doc, &KubeVersion::parse("v1.18.0").unwrap()).unwrap()
    }

    fn ignore(_: &str, _: &ProgressMessage) {}

    #[test]
    fn test_pull_all_records_failure_and_continues() {
        let set = upstream();
        let engine = FakeEngine {
            failing_streams: vec!["k8s.gcr.io/kube-controller-manager:v1.18.0".to_string()],
            rejected: vec!["k8s.gcr.io/kube-proxy:v1.18.0".to_string()],
            ..FakeEngine::default()
        };
        let mut lines = Vec::new();
        let mut observer = |reference: &str, message: &ProgressMessage| {
            lines.push(format!("{} {}", reference, message));
        };

        let report = ImageSync::new(&engine, Cancellation::new()).pull_all(&set, &mut observer);

        assert_eq!(report.results.len(), set.len());
        assert_eq!(engine.calls().len(), set.len());
        assert_eq!(report.failures(), 2);
        assert!(!report.cancelled);

        let failed: Vec<_> = report
            .results
            .iter()
            .filter(|r| !r.is_success())
            .map(|r| r.name.as_str())
            .collect();
        assert_eq!(failed, ["kube-controller-manager", "kube-proxy"]);

        let err = report.results[3].error().unwrap().to_string();
        assert!(err.contains("k8s.gcr.io/kube-controller-manager:v1.18.0"));
        assert!(err.contains("unexpected EOF"));

        assert!(lines.contains(
            &"k8s.gcr.io/conformance:v1.18.0 a3ed95caeb02: Pull complete".to_string()
        ));
        assert!(matches!(
            report.check(),
            Err(SyncError::BatchFailed { failures: 2, .. })
        ));
    }

    #[test]
    fn test_pull_all_success() {
        let engine = FakeEngine::default();
        let report =
            ImageSync::new(&engine, Cancellation::new()).pull_all(&upstream(), &mut ignore);
        assert_eq!(report.failures(), 0);
        assert!(report.check().is_ok());
    }

    #[test]
    fn test_tag_failure_skips_only_that_push() {
        let engine = FakeEngine {
            rejected: vec!["mirror.local/e2e/conformance:v1.18.0".to_string()],
            ..FakeEngine::default()
        };
        let auth = RegistryAuth::new("ci", "secret");

        let report = ImageSync::new(&engine, Cancellation::new()).tag_and_push_all(
            &upstream(),
            &mirror(),
            &auth,
            &mut ignore,
        );

        let calls = engine.calls();
        assert_eq!(
            calls[0],
            "tag k8s.gcr.io/conformance:v1.18.0 mirror.local/e2e/conformance:v1.18.0"
        );
        assert!(!calls.contains(&"push mirror.local/e2e/conformance:v1.18.0".to_string()));
        assert!(calls.contains(&"push mirror.local/e2e/kube-proxy:v1.18.0".to_string()));

        assert_eq!(report.results.len(), upstream().len());
        assert_eq!(report.failures(), 1);
        assert_eq!(report.results[0].operation, Operation::Tag);
        assert!(report.results[1..]
            .iter()
            .all(|r| r.is_success() && r.operation == Operation::Push));

        let header = engine.push_headers.borrow()[0].clone();
        assert_eq!(RegistryAuth::decode(&header).unwrap(), auth);
    }

    #[test]
    fn test_anonymous_push_sends_empty_header() {
        let engine = FakeEngine::default();
        ImageSync::new(&engine, Cancellation::new()).tag_and_push_all(
            &upstream(),
            &mirror(),
            &RegistryAuth::default(),
            &mut ignore,
        );
        assert!(engine.push_headers.borrow().iter().all(String::is_empty));
    }

    #[test]
    fn test_images_missing_from_destination_are_skipped() {
        let engine = FakeEngine::default();
        let destination: RegistrySet = mirror()
            .iter()
            .filter(|img| img.name() == "conformance")
            .cloned()
            .collect();

        let report = ImageSync::new(&engine, Cancellation::new()).tag_and_push_all(
            &upstream(),
            &destination,
            &RegistryAuth::default(),
            &mut ignore,
        );
        assert_eq!(report.results.len(), 1);
        assert_eq!(engine.calls().len(), 2);
    }

    #[test]
    fn test_push_retry_is_opt_in() {
        let target = "mirror.local/e2e/conformance:v1.18.0".to_string();

        let engine = FakeEngine::default();
        engine.flaky_pushes.borrow_mut().insert(target.clone(), 1);
        let report = ImageSync::new(&engine, Cancellation::new()).tag_and_push_all(
            &upstream(),
            &mirror(),
            &RegistryAuth::default(),
            &mut ignore,
        );
        assert_eq!(report.failures(), 1);
        assert!(report.results[0].error().unwrap().to_string().contains("503"));

        let engine = FakeEngine::default();
        engine.flaky_pushes.borrow_mut().insert(target.clone(), 1);
        let options = SyncOptions {
            push_retries: 2,
            retry_backoff: Duration::ZERO,
        };
        let report = ImageSync::new(&engine, Cancellation::new())
            .with_options(options)
            .tag_and_push_all(&upstream(), &mirror(), &RegistryAuth::default(), &mut ignore);
        assert_eq!(report.failures(), 0);
        let pushes = engine
            .calls()
            .iter()
            .filter(|c| **c == format!("push {}", target))
            .count();
        assert_eq!(pushes, 2);
    }

    #[test]
    fn test_delete_reports_untagged_and_deleted() {
        let conformance = "k8s.gcr.io/conformance:v1.18.0".to_string();
        let proxy = "k8s.gcr.io/kube-proxy:v1.18.0".to_string();
        let mut removed = HashMap::new();
        removed.insert(
            conformance.clone(),
            vec![
                RemovedImage {
                    untagged: Some(conformance.clone()),
                    deleted: None,
                },
                RemovedImage {
                    untagged: None,
                    deleted: Some("sha256:abcd".to_string()),
                },
            ],
        );
        removed.insert(
            proxy.clone(),
            vec![RemovedImage {
                untagged: Some(proxy.clone()),
                deleted: None,
            }],
        );
        let engine = FakeEngine {
            removed,
            rejected: vec!["k8s.gcr.io/hyperkube:v1.18.0".to_string()],
            ..FakeEngine::default()
        };

        let report = ImageSync::new(&engine, Cancellation::new()).delete_all(&upstream());
        assert_eq!(report.results.len(), upstream().len());
        assert_eq!(report.failures(), 1);

        let by_name = |name: &str| report.results.iter().find(|r| r.name == name).unwrap();
        match &by_name("conformance").outcome {
            Outcome::Removed(items) => {
                assert_eq!(items.len(), 2);
                assert_eq!(items[1].deleted.as_deref(), Some("sha256:abcd"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        match &by_name("kube-proxy").outcome {
            Outcome::Removed(items) => {
                assert!(items.iter().all(|i| i.deleted.is_none()));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(!by_name("hyperkube").is_success());
    }

    #[test]
    fn test_cancellation_stops_the_batch() {
        let cancel = Cancellation::new();
        let engine = FakeEngine {
            cancel_on_pull: Some((
                "k8s.gcr.io/kube-apiserver:v1.18.0".to_string(),
                cancel.clone(),
            )),
            ..FakeEngine::default()
        };

        let report = ImageSync::new(&engine, cancel).pull_all(&upstream(), &mut ignore);

        assert!(report.cancelled);
        assert_eq!(report.results.len(), 3);
        assert_eq!(report.successes(), 2);
        assert_eq!(engine.calls().len(), 3);
        assert!(matches!(report.check(), Err(SyncError::Cancelled)));
    }

    #[test]
    fn test_save_all_writes_archive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kubernetes_e2e_images_v1.18.0.tar");
        let engine = FakeEngine {
            export_data: vec![42u8; 1000],
            ..FakeEngine::default()
        };

        let written = ImageSync::new(&engine, Cancellation::new())
            .save_all(&upstream().references(), &path)
            .unwrap();

        assert_eq!(written, 1000);
        assert_eq!(std::fs::read(&path).unwrap(), vec![42u8; 1000]);
        assert!(engine.export_drained.get());
        assert_eq!(engine.calls(), [format!("export {}", upstream().len())]);
    }

    #[test]
    fn test_save_all_surfaces_late_export_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("images.tar");
        let engine = FakeEngine {
            export_data: vec![1u8; 100],
            export_error: Some("reference does not exist".to_string()),
            ..FakeEngine::default()
        };

        let err = ImageSync::new(&engine, Cancellation::new())
            .save_all(&upstream().references(), &path)
            .unwrap_err();

        assert!(matches!(err, SyncError::StreamDrain { .. }));
        assert!(engine.export_drained.get());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_save_all_drains_when_disk_write_fails() {
        let engine = FakeEngine {
            export_data: vec![7u8; 100_000],
            ..FakeEngine::default()
        };

        let err = ImageSync::new(&engine, Cancellation::new())
            .save_all(&upstream().references(), Path::new("/dev/full"))
            .unwrap_err();

        assert!(matches!(err, SyncError::ArchiveWrite { .. }));
        assert!(engine.export_drained.get());
    }

    #[test]
    fn test_save_all_unwritable_destination() {
        let engine = FakeEngine::default();
        let err = ImageSync::new(&engine, Cancellation::new())
            .save_all(
                &upstream().references(),
                Path::new("/nonexistent/dir/images.tar"),
            )
            .unwrap_err();

        assert!(matches!(err, SyncError::ArchiveWrite { .. }));
        assert!(engine.calls().is_empty());
    }
}
