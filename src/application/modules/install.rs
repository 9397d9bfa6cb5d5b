//! Install engine - fetches modules from the hub and swaps them into place
//!
//! Top-level installs are serialized by one process-wide lock. Dependency
//! installs run nested inside the caller's held lock and never take it
//! themselves; each transaction unpacks into its own cache directory, which
//! is removed whatever the outcome.

use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::Mutex;
use crate::application::errors::ModuleError;
use crate::domain::entities::ModuleDescriptor;
use crate::domain::traits::{Activation, HubClient, PluginHost, RequirementInstaller};
use crate::infrastructure::plugins::{loader, metadata};
use super::catalog::SharedCatalog;
use super::swap::Swap;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

const REPORT_SEPARATOR: &str = "\n===============\n";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallStatus {
    AlreadyInstalled { version: String },
    NotFound,
    Installed { version: String },
    Failed(String),
}

/// Outcome of one install attempt, with the rendered outcomes of the
/// dependencies it pulled in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
    pub name: String,
    pub status: InstallStatus,
    pub dependencies: Vec<String>,
}

impl InstallReport {
    fn new(name: &str, status: InstallStatus) -> Self {
        Self {
            name: name.to_string(),
            status,
            dependencies: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, InstallStatus::Installed { .. } | InstallStatus::AlreadyInstalled { .. })
    }

    /// One-module fragment, as concatenated into a parent's report
    pub fn summary(&self) -> String {
        match &self.status {
            InstallStatus::AlreadyInstalled { version } => format!(
                "Module {} is already installed, nothing changed\nInstalled version: {}",
                self.name, version
            ),
            InstallStatus::NotFound => format!("No module matching {} was found", self.name),
            InstallStatus::Installed { version } => {
                format!("Installed module {}\nInstalled version: {}", self.name, version)
            }
            InstallStatus::Failed(reason) => {
                format!("Error while installing module {}:\n{}", self.name, reason)
            }
        }
    }

    /// Full multi-line report including dependency fragments
    pub fn render(&self) -> String {
        let mut parts = vec![self.summary()];
        parts.extend(self.dependencies.iter().cloned());
        parts.join(REPORT_SEPARATOR)
    }
}

impl fmt::Display for InstallReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render())
    }
}

/// Working state of one install attempt; its cache directory never
/// outlives it
struct InstallTransaction {
    name: String,
    is_dependency: bool,
    cache_dir: PathBuf,
    extracted: Option<PathBuf>,
}

impl InstallTransaction {
    fn open(cache_root: &Path, name: &str, is_dependency: bool) -> Self {
        let mut dir_name = loader::normalize_name(name);
        if dir_name.is_empty() {
            dir_name = "module".to_string();
        }
        if is_dependency {
            dir_name = format!("__dependency_{}__", dir_name);
        }
        Self {
            name: name.to_string(),
            is_dependency,
            cache_dir: cache_root.join(dir_name),
            extracted: None,
        }
    }

    async fn close(&mut self) {
        if !self.cache_dir.exists() {
            return;
        }
        if let Err(e) = tokio::fs::remove_dir_all(&self.cache_dir).await {
            tracing::warn!("Failed to clean {}: {}", self.cache_dir.display(), e);
        }
    }
}

impl Drop for InstallTransaction {
    fn drop(&mut self) {
        // unwinding or cancellation skipped close()
        if self.cache_dir.exists() {
            let _ = std::fs::remove_dir_all(&self.cache_dir);
        }
    }
}

pub struct InstallEngine {
    catalog: SharedCatalog,
    host: Arc<dyn PluginHost>,
    hub: Arc<dyn HubClient>,
    requirements: Arc<dyn RequirementInstaller>,
    module_root: PathBuf,
    cache_root: PathBuf,
    lock: Mutex<()>,
}

impl InstallEngine {
    pub fn new(
        catalog: SharedCatalog,
        host: Arc<dyn PluginHost>,
        hub: Arc<dyn HubClient>,
        requirements: Arc<dyn RequirementInstaller>,
        module_root: impl Into<PathBuf>,
        cache_dir_name: &str,
    ) -> Self {
        let module_root = module_root.into();
        Self {
            cache_root: module_root.join(cache_dir_name),
            module_root,
            catalog,
            host,
            hub,
            requirements,
            lock: Mutex::new(()),
        }
    }

    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    /// Install or upgrade `name`. Dependency installs (`is_dependency`) are
    /// only ever issued from inside a running top-level install.
    pub fn install<'a>(
        &'a self,
        name: &'a str,
        upgrade: bool,
        version: &'a str,
        is_dependency: bool,
    ) -> BoxFuture<'a, InstallReport> {
        self.install_within(name, upgrade, version, is_dependency, Vec::new())
    }

    /// `chain` holds the keys of every install this one is nested in
    fn install_within<'a>(
        &'a self,
        name: &'a str,
        upgrade: bool,
        version: &'a str,
        is_dependency: bool,
        mut chain: Vec<String>,
    ) -> BoxFuture<'a, InstallReport> {
        Box::pin(async move {
            if let Some(report) = self.pre_install(name, upgrade).await {
                return report;
            }

            let _guard = if is_dependency {
                None
            } else {
                Some(self.lock.lock().await)
            };
            chain.push(chain_key(name));

            let data = match self.hub.download(name, version).await {
                Ok(Some(data)) if !data.is_empty() => data,
                Ok(_) => return InstallReport::new(name, InstallStatus::NotFound),
                Err(e) => {
                    tracing::error!("Failed to download {}: {}", name, e);
                    return InstallReport::new(name, InstallStatus::Failed(e.to_string()));
                }
            };

            let mut txn = InstallTransaction::open(&self.cache_root, name, is_dependency);
            let mut report = InstallReport::new(name, InstallStatus::NotFound);
            report.status = match self.run(&mut txn, data, &mut report.dependencies, &mut chain).await {
                Ok(descriptor) => InstallStatus::Installed { version: descriptor.version },
                Err(e) => {
                    tracing::error!(
                        "Failed to install {} (dependency: {}, extracted: {:?}): {:?}",
                        txn.name,
                        txn.is_dependency,
                        txn.extracted,
                        e
                    );
                    InstallStatus::Failed(e.to_string())
                }
            };
            txn.close().await;
            report
        })
    }

    /// Already-installed short circuit, or eviction of the live version
    /// before an upgrade
    async fn pre_install(&self, name: &str, upgrade: bool) -> Option<InstallReport> {
        let existing = self.catalog.read().await.get(name).cloned()?;
        if !upgrade {
            return Some(InstallReport::new(
                name,
                InstallStatus::AlreadyInstalled { version: existing.version },
            ));
        }

        if let Some(handle) = self.host.handle_of(&existing.pack) {
            if let Err(e) = self.host.deactivate(handle).await {
                tracing::warn!("Failed to deactivate {} before upgrade: {}", existing.pack, e);
            }
            self.catalog.write().await.remove(&existing.pack);
            tracing::info!("Evicted {} {} for upgrade", existing.pack, existing.version);
        }
        None
    }

    async fn run(
        &self,
        txn: &mut InstallTransaction,
        data: Vec<u8>,
        fragments: &mut Vec<String>,
        chain: &mut Vec<String>,
    ) -> Result<ModuleDescriptor, ModuleError> {
        let cache_dir = txn.cache_dir.clone();
        let name = txn.name.clone();
        let (path, is_dir) = tokio::task::spawn_blocking(move || {
            loader::extract_archive(&cache_dir, &name, &data)?;
            loader::find_module(&cache_dir)
        })
        .await
        .map_err(|e| ModuleError::Archive(format!("Extraction task failed: {}", e)))??;
        txn.extracted = Some(path.clone());

        let mut descriptor = metadata::read_or_synthesize(&path, is_dir);
        chain.push(chain_key(&descriptor.pack));
        self.resolve_dependencies(&descriptor, &path, is_dir, fragments, chain).await?;

        let mut swap = Swap::new(descriptor.pack.clone(), path, is_dir, &self.module_root)?;
        tokio::task::spawn_blocking(move || swap.execute().map(|_| ()))
            .await
            .map_err(|e| ModuleError::Archive(format!("Swap task failed: {}", e)))??;

        match self.host.activate(&descriptor.pack).await {
            Activation::Active(handle) => {
                tracing::info!("Installed {} {} as {}", descriptor.pack, descriptor.version, handle)
            }
            Activation::MissingDependency(dep) => return Err(ModuleError::MissingDependency(dep)),
            Activation::Failed(reason) => return Err(ModuleError::Activation(reason)),
        }
        if let Err(e) = self.host.initialize_storage().await {
            tracing::warn!("Storage initialization after installing {} failed: {}", descriptor.pack, e);
        }

        descriptor.loaded = true;
        let mut catalog = self.catalog.write().await;
        catalog.add(descriptor.clone());
        catalog.reorder();
        Ok(descriptor)
    }

    async fn resolve_dependencies(
        &self,
        descriptor: &ModuleDescriptor,
        path: &Path,
        is_dir: bool,
        fragments: &mut Vec<String>,
        chain: &[String],
    ) -> Result<(), ModuleError> {
        if descriptor.has_remote_dependencies {
            let requirements = metadata::read_requirements(path, is_dir);
            if !requirements.is_empty() {
                tracing::info!("Installing {} requirements for {}", requirements.len(), descriptor.pack);
                self.requirements
                    .install(&requirements)
                    .await
                    .map_err(|e| ModuleError::Requirements(e.to_string()))?;
            }
        }

        for dependency in descriptor.dependency_list() {
            let present = self.catalog.read().await.get(dependency).is_some();
            if present {
                continue;
            }
            if chain.contains(&chain_key(dependency)) {
                tracing::warn!("Dependency cycle: {} requires {}, which is already being installed", descriptor.pack, dependency);
                fragments.push(format!(
                    "Skipped dependency {} of {}: it is already being installed (dependency cycle)",
                    dependency, descriptor.pack
                ));
                continue;
            }
            tracing::info!("Installing dependency {} of {}", dependency, descriptor.pack);
            let report = self.install_within(dependency, true, "", true, chain.to_vec()).await;
            fragments.push(report.render());
        }
        Ok(())
    }
}

/// Identity of an install in the nesting chain: a name and its pack
/// (`foo`, `module.foo`) share a key
fn chain_key(name: &str) -> String {
    let name = name.to_lowercase();
    match name.split_once('.') {
        Some((_, rest)) => rest.to_string(),
        None => name,
    }
}
