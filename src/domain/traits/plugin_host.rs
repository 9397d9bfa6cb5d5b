use async_trait::async_trait;
use std::fmt;
use crate::application::errors::BotError;

/// Opaque token for a module that is live in the runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PluginHandle(pub u64);

impl fmt::Display for PluginHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Outcome of asking the runtime to activate a pack
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Activation {
    Active(PluginHandle),
    /// The named dependency has to be present and live first
    MissingDependency(String),
    Failed(String),
}

/// Capability interface to the live plugin runtime.
///
/// The manager never assumes a particular loading mechanism; the transport
/// layer decides what activating a pack means.
#[async_trait]
pub trait PluginHost: Send + Sync {
    /// Bring a pack live
    async fn activate(&self, pack: &str) -> Activation;

    /// Tear down a live pack
    async fn deactivate(&self, handle: PluginHandle) -> Result<(), BotError>;

    /// Handle of a live pack, if any
    fn handle_of(&self, pack: &str) -> Option<PluginHandle>;

    /// Run pending storage/schema initialization after an activation
    async fn initialize_storage(&self) -> Result<(), BotError> {
        Ok(())
    }
}
