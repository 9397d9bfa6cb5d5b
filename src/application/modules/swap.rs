//! Journaled remove-then-move of an extracted module into the module root
//!
//! The swap is not atomic. A `_swap_<name>.pending` marker is written before
//! the old tree is removed and deleted once the new tree is in place, so a
//! crash in between is detectable on the next start.

use std::path::{Path, PathBuf};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::application::errors::ModuleError;
use crate::infrastructure::plugins::{loader, metadata};

const MARKER_PREFIX: &str = "_swap_";
const MARKER_SUFFIX: &str = ".pending";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapState {
    Extracted,
    Swapping,
    Swapped,
}

#[derive(Debug, Serialize, Deserialize)]
struct SwapMarker {
    pack: String,
    destination: PathBuf,
    started_at: DateTime<Utc>,
}

/// One pending swap of an extracted module
#[derive(Debug)]
pub struct Swap {
    pack: String,
    source: PathBuf,
    is_dir: bool,
    destination: PathBuf,
    marker: PathBuf,
    state: SwapState,
}

impl Swap {
    /// Plan moving `source` into `module_root` under its normalized name
    pub fn new(pack: impl Into<String>, source: PathBuf, is_dir: bool, module_root: &Path) -> Result<Self, ModuleError> {
        let file_name = source
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| ModuleError::Archive(format!("Unusable module path {}", source.display())))?;
        let installed_name = loader::normalize_name(file_name);
        if installed_name.is_empty() {
            return Err(ModuleError::Archive(format!("Module name '{}' normalizes to nothing", file_name)));
        }

        Ok(Self {
            pack: pack.into(),
            source,
            is_dir,
            destination: module_root.join(&installed_name),
            marker: module_root.join(format!("{}{}{}", MARKER_PREFIX, installed_name, MARKER_SUFFIX)),
            state: SwapState::Extracted,
        })
    }

    pub fn state(&self) -> SwapState {
        self.state
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Remove whatever sits at the destination and move the new tree in
    pub fn execute(&mut self) -> Result<&Path, ModuleError> {
        let marker = SwapMarker {
            pack: self.pack.clone(),
            destination: self.destination.clone(),
            started_at: Utc::now(),
        };
        let raw = serde_json::to_vec(&marker).map_err(|e| ModuleError::Validation(e.to_string()))?;
        std::fs::write(&self.marker, raw)?;
        self.state = SwapState::Swapping;

        if self.destination.is_dir() {
            loader::remove_module(&self.destination, true)?;
        } else if self.destination.exists() {
            loader::remove_module(&self.destination, false)?;
        }

        std::fs::rename(&self.source, &self.destination)?;
        if !self.is_dir {
            for (from, to) in [
                (metadata::sidecar_path(&self.source, false), metadata::sidecar_path(&self.destination, false)),
                (metadata::requirements_path(&self.source, false), metadata::requirements_path(&self.destination, false)),
            ] {
                if from.is_file() {
                    std::fs::rename(&from, &to)?;
                }
            }
        }

        self.state = SwapState::Swapped;
        std::fs::remove_file(&self.marker)?;
        tracing::info!("Moved {} into {}", self.pack, self.destination.display());
        Ok(&self.destination)
    }
}

/// Inspect swap markers left by an interrupted run. Markers whose
/// destination exists are stale and cleared; the others are reported as
/// corrupt and kept until an operator resolves them.
pub fn recover(module_root: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(module_root) else {
        return Vec::new();
    };

    let mut corrupt = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        let is_marker = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with(MARKER_PREFIX) && n.ends_with(MARKER_SUFFIX))
            .unwrap_or(false);
        if !is_marker {
            continue;
        }

        let marker = std::fs::read(&path)
            .ok()
            .and_then(|raw| serde_json::from_slice::<SwapMarker>(&raw).ok());
        match marker {
            Some(marker) if marker.destination.exists() => {
                tracing::debug!("Clearing stale swap marker {}", path.display());
                if let Err(e) = std::fs::remove_file(&path) {
                    tracing::warn!("Failed to remove {}: {}", path.display(), e);
                }
            }
            Some(marker) => {
                tracing::error!(
                    "Module {} is corrupt: swap started at {} never completed, {} is absent",
                    marker.pack,
                    marker.started_at,
                    marker.destination.display()
                );
                corrupt.push(marker.destination);
            }
            None => {
                tracing::error!("Unreadable swap marker {}", path.display());
                corrupt.push(path);
            }
        }
    }
    corrupt
}
