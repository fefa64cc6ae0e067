//! Resolve the container images used by the Kubernetes e2e conformance
//! plugin and mirror them through a local container engine.

pub mod commands;
pub mod config;
pub mod engine;
pub mod images;
pub mod k8s;
pub mod utils;
