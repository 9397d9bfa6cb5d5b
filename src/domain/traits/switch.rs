use async_trait::async_trait;
use crate::application::errors::StorageError;

/// Per-group module switches, keyed pack -> group -> value
#[async_trait]
pub trait SwitchStore: Send + Sync {
    /// Stored value; `None` when never set. A `None` group means direct chat.
    async fn get(&self, pack: &str, group: Option<&str>) -> Option<bool>;

    async fn update(&self, pack: &str, group: Option<&str>, value: bool) -> Result<(), StorageError>;
}
