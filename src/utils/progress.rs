//! Progress display for engine streams

use crate::engine::ProgressMessage;
use crate::images::ProgressObserver;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::Write;
use std::time::Duration;

/// Create a spinner for indeterminate operations
pub fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
        pb.set_style(style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]));
    }
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

/// One spinner per image showing the latest engine status
#[derive(Default)]
pub struct ImageProgress {
    current: Option<ProgressBar>,
}

impl ImageProgress {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProgressObserver for ImageProgress {
    fn begin(&mut self, reference: &str) {
        self.current = Some(create_spinner(reference));
    }

    fn message(&mut self, reference: &str, message: &ProgressMessage) {
        if let Some(pb) = &self.current {
            pb.set_message(format!("{}: {}", reference, message));
        }
    }

    fn end(&mut self, reference: &str, success: bool) {
        if let Some(pb) = self.current.take() {
            if success {
                pb.finish_with_message(format!("✓ {}", reference));
            } else {
                pb.finish_with_message(format!("✗ {}", reference));
            }
        }
    }
}

/// Writes every message as its own line, for non-interactive output
pub struct LineObserver<W: Write> {
    out: W,
}

impl LineObserver<std::io::Stderr> {
    pub fn stderr() -> Self {
        Self {
            out: std::io::stderr(),
        }
    }
}

impl<W: Write> LineObserver<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> ProgressObserver for LineObserver<W> {
    fn message(&mut self, _reference: &str, message: &ProgressMessage) {
        // Progress output is best effort
        let _ = writeln!(self.out, "{}", message);
    }
}

/// Pick the observer for the current run
pub fn observer(show_progress: bool) -> Box<dyn ProgressObserver> {
    if show_progress {
        Box::new(ImageProgress::new())
    } else {
        Box::new(LineObserver::stderr())
    }
}
