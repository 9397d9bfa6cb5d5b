use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use crate::application::errors::HubError;
use crate::domain::entities::{ModuleDescriptor, SearchCriteria};

/// A peer bot the hub reports as offline
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineBot {
    pub id: i64,
    pub name: String,
    pub num: i64,
    #[serde(default)]
    pub dev_group: Vec<i64>,
    #[serde(default)]
    pub owners: Vec<i64>,
}

/// Presence events reported to the hub
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceEvent {
    Online,
    Offline,
}

/// Remote registry modules are searched for and downloaded from
#[async_trait]
pub trait HubClient: Send + Sync {
    /// Query the hub; an empty criteria set yields no results
    async fn search(&self, criteria: &SearchCriteria) -> Result<Vec<ModuleDescriptor>, HubError>;

    /// Fetch a module archive, `None` when the hub has no match
    async fn download(&self, name: &str, version: &str) -> Result<Option<Vec<u8>>, HubError>;

    /// Obtain a bearer token for subsequent calls
    async fn authorize(&self) -> Result<String, HubError>;

    /// Announce this bot to the hub
    async fn register_bot(&self) -> Result<(), HubError>;

    /// Report liveness; returns peers that went offline
    async fn heartbeat(&self) -> Result<Vec<OfflineBot>, HubError>;

    /// Acknowledge that an offline peer has been announced
    async fn notified_missing(&self, _bot_id: i64) -> Result<(), HubError> {
        Ok(())
    }

    async fn report_presence(&self, _event: PresenceEvent) -> Result<(), HubError> {
        Ok(())
    }
}
