//! Image set resolution and tool settings

pub mod images;
pub mod registry;
pub mod settings;
pub mod version;

pub use images::ImageConfig;
pub use registry::{OverrideDocument, RegistrySet};
pub use version::{ClusterVersionSource, KubeVersion};
