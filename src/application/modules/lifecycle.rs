//! Lifecycle controller - load, unload and reload modules in the live runtime
//!
//! Failures stay local to the module they concern: a module that cannot be
//! activated is logged and reported, and processing of the others goes on.

use std::path::PathBuf;
use std::sync::Arc;
use crate::application::errors::ModuleError;
use crate::domain::entities::ModuleDescriptor;
use crate::domain::traits::{Activation, PluginHandle, PluginHost, SwitchStore};
use crate::infrastructure::plugins::{loader, metadata};
use super::catalog::SharedCatalog;
use super::install::{BoxFuture, InstallEngine};
use super::swap;

const REPORT_SEPARATOR: &str = "\n===============\n";

/// Tunables taken from the `modules` and `switch` config sections
#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    pub activation_retries: u32,
    /// Pack of the module manager itself, never reported as switched off
    pub manager_pack: String,
    pub default_switch: bool,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            activation_retries: 1,
            manager_pack: "module.manager".to_string(),
            default_switch: true,
        }
    }
}

/// Result of the startup pass
#[derive(Debug, Default)]
pub struct StartupReport {
    pub activated: Vec<String>,
    pub failed: Vec<(String, String)>,
    /// Destinations left absent by an interrupted swap
    pub corrupt: Vec<PathBuf>,
}

pub struct LifecycleController {
    catalog: SharedCatalog,
    host: Arc<dyn PluginHost>,
    installer: Arc<InstallEngine>,
    switches: Arc<dyn SwitchStore>,
    settings: LifecycleSettings,
}

impl LifecycleController {
    pub fn new(
        catalog: SharedCatalog,
        host: Arc<dyn PluginHost>,
        installer: Arc<InstallEngine>,
        switches: Arc<dyn SwitchStore>,
        settings: LifecycleSettings,
    ) -> Self {
        Self {
            catalog,
            host,
            installer,
            switches,
            settings,
        }
    }

    pub fn catalog(&self) -> &SharedCatalog {
        &self.catalog
    }

    pub fn manager_pack(&self) -> &str {
        &self.settings.manager_pack
    }

    /// Re-scan the module root and align `loaded` with the runtime
    pub async fn refresh(&self) -> Result<(), ModuleError> {
        let mut catalog = self.catalog.write().await;
        catalog.discover()?;
        catalog.reconcile(|pack| self.host.handle_of(pack).is_some());
        Ok(())
    }

    /// Discover every module and activate the ones marked loaded, in
    /// catalog order
    pub async fn startup(&self) -> Result<StartupReport, ModuleError> {
        let mut report = StartupReport::default();
        let root = self.catalog.read().await.root().to_path_buf();
        report.corrupt = swap::recover(&root);

        let candidates: Vec<ModuleDescriptor> = {
            let mut catalog = self.catalog.write().await;
            catalog.discover()?.to_vec()
        };

        for descriptor in candidates {
            let wanted = match descriptor.pinned_load {
                Some(pinned) => pinned,
                None => descriptor.loaded,
            };
            if !wanted {
                tracing::debug!("Leaving {} unloaded", descriptor.pack);
                continue;
            }
            match self.activate(&descriptor, self.settings.activation_retries).await {
                Ok(_) => report.activated.push(descriptor.pack.clone()),
                Err(e) => {
                    tracing::error!("Failed to load {}: {}", descriptor.pack, e);
                    report.failed.push((descriptor.pack.clone(), e.to_string()));
                }
            }
        }

        if let Err(e) = self.host.initialize_storage().await {
            tracing::warn!("Storage initialization failed: {}", e);
        }
        self.catalog
            .write()
            .await
            .reconcile(|pack| self.host.handle_of(pack).is_some());

        tracing::info!(
            "Startup finished: {} loaded, {} failed",
            report.activated.len(),
            report.failed.len()
        );
        Ok(report)
    }

    /// Activate one module. A missing dependency is fetched (or activated,
    /// when it is installed but unloaded) and the activation retried while
    /// `retries_left` allows.
    pub fn activate<'a>(
        &'a self,
        descriptor: &'a ModuleDescriptor,
        retries_left: u32,
    ) -> BoxFuture<'a, Result<PluginHandle, ModuleError>> {
        Box::pin(async move {
            if descriptor.pinned_load == Some(false) {
                return Err(ModuleError::PinnedState {
                    pack: descriptor.pack.clone(),
                    pinned: false,
                });
            }

            let dependency = match self.host.activate(&descriptor.pack).await {
                Activation::Active(handle) => {
                    self.catalog.write().await.set_loaded(&descriptor.pack, true);
                    return Ok(handle);
                }
                Activation::Failed(reason) => return Err(ModuleError::Activation(reason)),
                Activation::MissingDependency(dependency) => dependency,
            };

            if retries_left == 0 {
                tracing::warn!("{} still misses {}, giving up", descriptor.pack, dependency);
                return Err(ModuleError::MissingDependency(dependency));
            }

            tracing::info!("{} needs {}, resolving", descriptor.pack, dependency);
            let known = self.catalog.read().await.get(&dependency).cloned();
            match known {
                Some(installed) if self.host.handle_of(&installed.pack).is_none() => {
                    if let Err(e) = self.activate(&installed, retries_left - 1).await {
                        tracing::warn!("Could not activate dependency {}: {}", installed.pack, e);
                    }
                }
                _ => {
                    let report = self.installer.install(&dependency, false, "", false).await;
                    tracing::info!("Dependency {} of {}: {:?}", dependency, descriptor.pack, report.status);
                }
            }

            self.activate(descriptor, retries_left - 1).await
        })
    }

    /// Tear a module down. Returns false when it was not live to begin
    /// with.
    pub async fn deactivate(&self, descriptor: &ModuleDescriptor) -> Result<bool, ModuleError> {
        if let Some(pinned) = descriptor.pinned_load {
            return Err(ModuleError::PinnedState {
                pack: descriptor.pack.clone(),
                pinned,
            });
        }

        let Some(handle) = self.host.handle_of(&descriptor.pack) else {
            self.catalog.write().await.set_loaded(&descriptor.pack, false);
            return Ok(false);
        };
        self.host
            .deactivate(handle)
            .await
            .map_err(|e| ModuleError::Activation(e.to_string()))?;
        self.catalog.write().await.set_loaded(&descriptor.pack, false);
        tracing::info!("Unloaded {}", descriptor.pack);
        Ok(true)
    }

    async fn lookup(&self, name: &str) -> Result<ModuleDescriptor, ModuleError> {
        self.refresh().await?;
        self.catalog
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| ModuleError::NotFound(name.to_string()))
    }

    pub async fn load(&self, name: &str) -> String {
        let descriptor = match self.lookup(name).await {
            Ok(d) => d,
            Err(e) => return describe(name, &e),
        };
        if self.host.handle_of(&descriptor.pack).is_some() {
            return format!("Module {} is already loaded", name);
        }

        match self.activate(&descriptor, self.settings.activation_retries).await {
            Ok(_) => {
                if let Err(e) = self.host.initialize_storage().await {
                    tracing::warn!("Storage initialization after loading {} failed: {}", descriptor.pack, e);
                }
                format!("Loaded module {}", name)
            }
            Err(e) => {
                tracing::error!("Failed to load {}: {}", descriptor.pack, e);
                format!("Error while loading module {}:\n{}", name, describe(name, &e))
            }
        }
    }

    pub async fn unload(&self, name: &str) -> String {
        let descriptor = match self.lookup(name).await {
            Ok(d) => d,
            Err(e) => return describe(name, &e),
        };
        match self.deactivate(&descriptor).await {
            Ok(true) => format!("Unloaded module {}", name),
            Ok(false) => format!("Module {} is not loaded", name),
            Err(e) => describe(name, &e),
        }
    }

    /// Deactivate then activate. A failure between the two steps leaves the
    /// module unloaded.
    pub async fn reload(&self, name: &str) -> String {
        let descriptor = match self.lookup(name).await {
            Ok(d) => d,
            Err(e) => return describe(name, &e),
        };
        if let Err(e) = self.deactivate(&descriptor).await {
            return describe(name, &e);
        }

        match self.activate(&descriptor, self.settings.activation_retries).await {
            Ok(_) => format!("Reloaded module {}", name),
            Err(e) => {
                tracing::error!("Reload of {} left it unloaded: {}", descriptor.pack, e);
                format!("Module {} was unloaded but failed to load again:\n{}", name, e)
            }
        }
    }

    /// Deactivate a module and delete it from disk
    pub async fn uninstall(&self, name: &str) -> String {
        let descriptor = match self.lookup(name).await {
            Ok(d) => d,
            Err(e) => return describe(name, &e),
        };
        if descriptor.pack == self.settings.manager_pack {
            return format!("Module {} manages the others and cannot be uninstalled", name);
        }
        if let Err(e) = self.deactivate(&descriptor).await {
            return describe(name, &e);
        }

        let root = self.catalog.read().await.root().to_path_buf();
        let pack = descriptor.pack.clone();
        let removed = tokio::task::spawn_blocking(move || match metadata::locate(&root, &pack) {
            Some((path, is_dir)) => loader::remove_module(&path, is_dir),
            None => Err(ModuleError::NotFound(pack)),
        })
        .await
        .map_err(|e| ModuleError::Activation(format!("Removal task failed: {}", e)))
        .and_then(|result| result);

        self.catalog.write().await.remove(&descriptor.pack);
        match removed {
            Ok(()) => format!("Uninstalled module {}", name),
            Err(e) => {
                tracing::error!("Failed to remove {}: {}", descriptor.pack, e);
                format!("Error while uninstalling module {}:\n{}", name, e)
            }
        }
    }

    /// Effective switch of a module in a group
    pub async fn resolve_switch(&self, descriptor: &ModuleDescriptor, group: Option<&str>) -> bool {
        if descriptor.pack == self.settings.manager_pack {
            return true;
        }
        let value = match descriptor.pinned_switch {
            Some(pinned) => pinned,
            None => self
                .switches
                .get(&descriptor.pack, group)
                .await
                .unwrap_or(self.settings.default_switch),
        };
        value && descriptor.loaded
    }

    /// Listing of every visible module, loaded ones first
    pub async fn list(&self, group: Option<&str>) -> String {
        if let Err(e) = self.refresh().await {
            tracing::error!("Failed to refresh modules: {}", e);
            return format!("Error while listing modules:\n{}", e);
        }

        let visible: Vec<ModuleDescriptor> = self
            .catalog
            .read()
            .await
            .all()
            .iter()
            .filter(|m| !m.hidden)
            .cloned()
            .collect();
        let (loaded, unloaded): (Vec<_>, Vec<_>) = visible.into_iter().partition(|m| m.loaded);

        let mut header = format!("Installed {} modules", loaded.len() + unloaded.len());
        if !loaded.is_empty() {
            header.push_str(&format!("\nLoaded {} modules", loaded.len()));
        }
        if !unloaded.is_empty() {
            header.push_str(&format!("\nUnloaded {} modules", unloaded.len()));
        }

        let mut sections = vec![header];
        for (index, descriptor) in loaded.iter().chain(unloaded.iter()).enumerate() {
            let mut section = descriptor.details(index + 1);
            let status = if descriptor.loaded || descriptor.pack == self.settings.manager_pack {
                "loaded"
            } else {
                "unloaded"
            };
            section.push_str(&format!("\n - Status: {}", status));
            if group.is_some() {
                let on = self.resolve_switch(descriptor, group).await;
                section.push_str(&format!("\n - Switch: {}", if on { "on" } else { "off" }));
            }
            sections.push(section);
        }
        sections.join(REPORT_SEPARATOR)
    }
}

/// User-facing text of a lifecycle failure
fn describe(name: &str, error: &ModuleError) -> String {
    match error {
        ModuleError::NotFound(_) => format!("Unable to find module {}", name),
        ModuleError::PinnedState { pinned, .. } => format!(
            "Cannot change the state of module {}, it is pinned {}",
            name,
            if *pinned { "loaded" } else { "unloaded" }
        ),
        ModuleError::MissingDependency(dependency) => {
            format!("Module {} requires {}, which could not be loaded", name, dependency)
        }
        other => other.to_string(),
    }
}
