//! File-based storage implementation

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::domain::traits::SwitchStore;
use crate::application::errors::StorageError;

/// Group key used for direct chats
const DIRECT_CHAT: &str = "0";

type Switches = HashMap<String, HashMap<String, bool>>;

/// JSON file-backed switch store, `pack -> group -> value`. Every update is
/// written through to disk.
pub struct JsonSwitchStore {
    path: PathBuf,
    switches: Arc<RwLock<Switches>>,
}

impl JsonSwitchStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            switches: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Load the data file, starting empty when it does not exist yet
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let store = Self::new(path);
        match tokio::fs::read_to_string(&store.path).await {
            Ok(content) => {
                let switches: Switches = serde_json::from_str(&content)
                    .map_err(|e| StorageError::Serialization(e.to_string()))?;
                tracing::debug!("Loaded switches of {} modules", switches.len());
                *store.switches.write().await = switches;
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No switch data at {}, starting empty", store.path.display());
            }
            Err(e) => return Err(e.into()),
        }
        Ok(store)
    }

    async fn persist(&self, switches: &Switches) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let raw = serde_json::to_string_pretty(switches)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        tokio::fs::write(&self.path, raw).await?;
        Ok(())
    }
}

#[async_trait]
impl SwitchStore for JsonSwitchStore {
    async fn get(&self, pack: &str, group: Option<&str>) -> Option<bool> {
        let switches = self.switches.read().await;
        switches.get(pack)?.get(group.unwrap_or(DIRECT_CHAT)).copied()
    }

    async fn update(&self, pack: &str, group: Option<&str>, value: bool) -> Result<(), StorageError> {
        let mut switches = self.switches.write().await;
        switches
            .entry(pack.to_string())
            .or_default()
            .insert(group.unwrap_or(DIRECT_CHAT).to_string(), value);
        self.persist(&switches).await
    }
}
