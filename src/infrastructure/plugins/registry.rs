//! Local plugin host - tracks which packs are live in this process

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use crate::application::errors::BotError;
use crate::domain::traits::{Activation, PluginHandle, PluginHost};
use super::metadata;

/// In-process runtime: a pack activates when it is on disk and every
/// declared dependency already holds a live handle
pub struct LocalPluginHost {
    module_root: PathBuf,
    live: RwLock<HashMap<String, PluginHandle>>,
    next_handle: AtomicU64,
}

impl LocalPluginHost {
    pub fn new(module_root: impl Into<PathBuf>) -> Self {
        Self {
            module_root: module_root.into(),
            live: RwLock::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
        }
    }

    /// Packs currently live
    pub fn names(&self) -> Vec<String> {
        self.live
            .read()
            .ok()
            .map(|l| l.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.live.read().ok().map(|l| l.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A dependency names a pack in full or by the part after its first dot
fn answers_to(pack: &str, dependency: &str) -> bool {
    pack == dependency || pack.split_once('.').map(|(_, rest)| rest) == Some(dependency)
}

#[async_trait]
impl PluginHost for LocalPluginHost {
    async fn activate(&self, pack: &str) -> Activation {
        if let Some(handle) = self.handle_of(pack) {
            return Activation::Active(handle);
        }

        let Some((path, is_dir)) = metadata::locate(&self.module_root, pack) else {
            return Activation::Failed(format!("{} is not installed", pack));
        };
        let descriptor = match metadata::read(&path, is_dir) {
            Ok(d) => d,
            Err(e) => return Activation::Failed(e.to_string()),
        };

        let mut live = match self.live.write() {
            Ok(l) => l,
            Err(_) => return Activation::Failed("Lock poisoned".to_string()),
        };
        if let Some(missing) = descriptor
            .dependency_list()
            .iter()
            .find(|dep| !live.keys().any(|pack| answers_to(pack, dep)))
        {
            return Activation::MissingDependency(missing.clone());
        }

        let handle = PluginHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        live.insert(pack.to_string(), handle);
        tracing::info!("Activated {} as {}", pack, handle);
        Activation::Active(handle)
    }

    async fn deactivate(&self, handle: PluginHandle) -> Result<(), BotError> {
        let mut live = self.live.write()
            .map_err(|_| BotError::Internal("Lock poisoned".to_string()))?;

        let before = live.len();
        live.retain(|_, h| *h != handle);
        if live.len() == before {
            return Err(BotError::Internal(format!("Unknown plugin handle {}", handle)));
        }
        tracing::info!("Deactivated plugin {}", handle);
        Ok(())
    }

    fn handle_of(&self, pack: &str) -> Option<PluginHandle> {
        self.live.read().ok()?.get(pack).copied()
    }
}
