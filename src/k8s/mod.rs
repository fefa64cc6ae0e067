//! Kubernetes cluster access

pub mod version;

pub use version::KubeVersionSource;
