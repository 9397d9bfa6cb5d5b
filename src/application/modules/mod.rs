//! Module manager - catalog, lifecycle and installation of bot modules

pub mod catalog;
pub mod install;
pub mod lifecycle;
pub mod swap;

pub use catalog::{ModuleCatalog, SharedCatalog};
pub use install::{InstallEngine, InstallReport, InstallStatus};
pub use lifecycle::{LifecycleController, LifecycleSettings, StartupReport};
