//! Infrastructure layer - External concerns
//! 
//! This layer contains:
//! - Config: Configuration loading
//! - Plugins: module files on disk and the local runtime
//! - Hub: the remote module registry
//! - Storage: Data persistence
//! - Adapters: Platform integrations

pub mod adapters;
pub mod config;
pub mod hub;
pub mod plugins;
pub mod storage;
