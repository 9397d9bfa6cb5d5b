//! Module files on disk and the in-process runtime that activates them
//! 
//! Each module is a directory or a single file under the module root with a
//! `metadata.json` sidecar describing it.

pub mod loader;
pub mod metadata;
pub mod registry;
pub mod requirements;

pub use registry::LocalPluginHost;
pub use requirements::CommandInstaller;
