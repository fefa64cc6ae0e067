//! Utility modules for conformance-images

pub mod cancel;
pub mod errors;
pub mod logger;
pub mod prereqs;
pub mod progress;
pub mod prompt;

// Re-export commonly used items
pub use cancel::Cancellation;
pub use logger::{log_error, log_info, log_warn};
pub use prereqs::{CommandPrereq, Prerequisite};
pub use prompt::{confirm, password};
