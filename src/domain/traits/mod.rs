//! Domain traits - Abstractions for infrastructure implementations

pub mod bot;
pub mod hub;
pub mod plugin_host;
pub mod requirements;
pub mod switch;

pub use bot::{Bot, BotInfo};
pub use hub::{HubClient, OfflineBot, PresenceEvent};
pub use plugin_host::{Activation, PluginHandle, PluginHost};
pub use requirements::RequirementInstaller;
pub use switch::SwitchStore;
